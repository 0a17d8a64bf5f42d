//! Channels: one conversation over one byte stream
//!
//! ```text
//!              ┌──────────── reader thread ────────────┐
//! ByteStream ──┤ TimedStream → FrameReader → Control   ├──> dispatcher
//!              └───────────────────────────────────────┘
//!              ┌──────────── writer thread ────────────┐
//! ByteStream <─┤ FrameWriter <- mailbox (Outgoing)     │<── dispatcher
//!              └───────────────────────────────────────┘
//! ```
//!
//! The reader thread owns the channel lifetime: it announces the channel to
//! the dispatcher, reads until the stream ends, then reports the close.

use crate::error::Error;
use crate::node::Control;
use crate::shutdown::Shutdown;
use crate::transport::{ByteStream, StreamCloser, TimedStream};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use vayu_wire::{Dialect, Frame, FrameMessage, FrameReader, FrameWriter, MessageRaw, SigningKey, Version};

/// Handle of an open channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
pub(crate) fn test_channel_id(n: u64) -> ChannelId {
    ChannelId(n)
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Item in a channel's write mailbox
#[derive(Debug, Clone)]
pub(crate) enum Outgoing {
    /// Pre-encoded message, wrapped in a frame authored by this channel
    Message(Arc<MessageRaw>),
    /// Existing frame, written verbatim
    Frame(Arc<Frame>),
}

/// Dispatcher-side view of a channel
pub(crate) struct ChannelRecord {
    pub id: ChannelId,
    pub label: String,
    mailbox: Sender<Outgoing>,
    closer: StreamCloser,
    writer: Option<JoinHandle<()>>,
}

impl ChannelRecord {
    /// Queue an outgoing item; drops it when the mailbox is full
    pub fn push(&self, item: Outgoing) {
        if self.mailbox.try_send(item).is_err() {
            log::warn!("Channel {} ({}) mailbox full, dropping write", self.id, self.label);
        }
    }

    /// Close the mailbox, let the writer drain it, then close the stream
    pub fn close(self) {
        let ChannelRecord {
            id,
            mailbox,
            closer,
            writer,
            ..
        } = self;
        drop(mailbox);
        if let Some(handle) = writer
            && handle.join().is_err()
        {
            log::error!("Channel {} writer panicked", id);
        }
        closer.close();
    }
}

/// Settings and handles shared by every channel of a node
#[derive(Clone)]
pub(crate) struct ChannelContext {
    pub dialect: Option<Arc<Dialect>>,
    pub version: Version,
    pub system_id: u8,
    pub component_id: u8,
    pub inbound_key: Option<SigningKey>,
    pub outbound_key: Option<SigningKey>,
    pub signature_link_id: u8,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub mailbox_capacity: usize,
    pub control: Sender<Control>,
    pub shutdown: Shutdown,
    pub next_id: Arc<AtomicU64>,
}

impl ChannelContext {
    /// Deliver to the dispatcher unless the node is shutting down
    pub fn send_control(&self, msg: Control) -> bool {
        select! {
            send(self.control, msg) -> res => res.is_ok(),
            recv(self.shutdown.receiver()) -> _ => false,
        }
    }

    /// Start reader and writer threads for a new stream
    ///
    /// Returns the reader thread handle, which finishes once the channel
    /// has closed.
    pub fn spawn(
        &self,
        stream: Box<dyn ByteStream>,
        label: String,
        idle_timeout: bool,
    ) -> io::Result<JoinHandle<()>> {
        let id = ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let idle = idle_timeout.then_some(self.read_timeout);
        let (read_half, write_half, closer) =
            TimedStream::split(stream, idle, Some(self.write_timeout), Some(self.shutdown.flag()))?;

        let mut writer = FrameWriter::new(write_half, self.version, self.system_id, self.component_id);
        if let Some(dialect) = &self.dialect {
            writer = writer.with_dialect(Arc::clone(dialect));
        }
        if let Some(key) = &self.outbound_key {
            writer = writer
                .with_signing(key.clone(), self.signature_link_id)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        }

        let mut reader = FrameReader::new(read_half, self.dialect.clone());
        if let Some(key) = &self.inbound_key {
            reader = reader.with_inbound_key(key.clone());
        }

        let (mailbox, outgoing) = bounded(self.mailbox_capacity);
        let writer_thread = {
            let closer = closer.clone();
            thread::Builder::new()
                .name(format!("chan-{}-writer", id.0))
                .spawn(move || writer_loop(id, writer, outgoing, closer))?
        };

        let record = ChannelRecord {
            id,
            label,
            mailbox,
            closer: closer.clone(),
            writer: Some(writer_thread),
        };
        let ctx = self.clone();
        thread::Builder::new()
            .name(format!("chan-{}-reader", id.0))
            .spawn(move || reader_loop(ctx, record, reader, closer))
    }
}

fn writer_loop(
    id: ChannelId,
    mut writer: FrameWriter<Box<dyn ByteStream>>,
    outgoing: Receiver<Outgoing>,
    closer: StreamCloser,
) {
    for item in outgoing.iter() {
        let result = match &item {
            Outgoing::Message(raw) => writer.write_message(&FrameMessage::Raw(raw.as_ref().clone())),
            Outgoing::Frame(frame) => writer.write_frame(frame),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                log::warn!("Channel {} write failed: {}", id, e);
                closer.close();
                break;
            }
            Err(e) => log::debug!("Channel {} dropped outgoing message: {}", id, e),
        }
    }
}

fn reader_loop(
    ctx: ChannelContext,
    record: ChannelRecord,
    mut reader: FrameReader<TimedStream>,
    closer: StreamCloser,
) {
    let id = record.id;
    log::info!("Channel {} open: {}", id, record.label);
    if !ctx.send_control(Control::Open(record)) {
        // node is closing; the dropped record ends the writer
        closer.close();
        return;
    }

    let cause = loop {
        match reader.read() {
            Ok(frame) => {
                log::trace!(
                    "Channel {} frame id={} from {}:{}",
                    id,
                    frame.message_id(),
                    frame.system_id(),
                    frame.component_id()
                );
                if !ctx.send_control(Control::Frame { channel: id, frame }) {
                    return;
                }
            }
            Err(vayu_wire::Error::Io(e)) => {
                break if closer.is_closed() {
                    None
                } else {
                    Some(Error::from_stream(e))
                };
            }
            Err(error) => {
                log::debug!("Channel {} parse error: {}", id, error);
                if !ctx.send_control(Control::ParseError { channel: id, error }) {
                    return;
                }
            }
        }
    };

    match &cause {
        Some(e) => log::info!("Channel {} closed: {}", id, e),
        None => log::info!("Channel {} closed", id),
    }
    ctx.send_control(Control::Close { channel: id, cause });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_display_and_order() {
        let a = ChannelId(3);
        let b = ChannelId(10);
        assert_eq!(a.to_string(), "#3");
        assert!(a < b);
        assert_eq!(b.as_u64(), 10);
    }
}
