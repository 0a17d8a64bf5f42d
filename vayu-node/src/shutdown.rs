//! Node-wide termination signal
//!
//! A flag for cheap polling plus a channel that disconnects on trigger, so
//! threads can also wait on it inside `select!` or as an interruptible sleep.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Fires the signal; held by the node
pub(crate) struct ShutdownTrigger {
    flag: Arc<AtomicBool>,
    tx: Mutex<Option<Sender<()>>>,
    signal: Shutdown,
}

/// Observes the signal; cloned into every thread
#[derive(Clone)]
pub(crate) struct Shutdown {
    flag: Arc<AtomicBool>,
    rx: Receiver<()>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        let flag = Arc::new(AtomicBool::new(false));
        Self {
            signal: Shutdown {
                flag: Arc::clone(&flag),
                rx,
            },
            flag,
            tx: Mutex::new(Some(tx)),
        }
    }

    pub fn signal(&self) -> Shutdown {
        self.signal.clone()
    }

    /// Fire the signal; returns false if it had already fired
    pub fn trigger(&self) -> bool {
        if self.flag.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.tx.lock().take();
        true
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`; returns true if the signal fired meanwhile
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_triggered(),
            _ => true,
        }
    }

    /// Flag shared with stream closers
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Receiver that becomes ready (disconnected) once the signal fires
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
