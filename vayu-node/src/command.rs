//! COMMAND_LONG / COMMAND_INT with COMMAND_ACK correlation
//!
//! A pending command is keyed by (channel, target system, target component,
//! command). ACKs reporting `IN_PROGRESS` feed the caller's progress channel;
//! any other result completes the command. Whoever removes an entry from the
//! pending table (ACK handler, caller timeout, expiry tick, cancellation) is
//! the one that answers it, so every request gets exactly one outcome.

use crate::channel::ChannelId;
use crate::error::{Error, Result};
use crate::node::frame_values;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use vayu_wire::dialects::common::mav_result;
use vayu_wire::{Dialect, Frame, MessageRaw, Value, Version};

pub(crate) const COMMAND_INT_ID: u32 = 75;
pub(crate) const COMMAND_INT_CRC_EXTRA: u8 = 158;
pub(crate) const COMMAND_LONG_ID: u32 = 76;
pub(crate) const COMMAND_LONG_CRC_EXTRA: u8 = 152;
pub(crate) const COMMAND_ACK_ID: u32 = 77;
pub(crate) const COMMAND_ACK_CRC_EXTRA: u8 = 143;

/// Progress value reported when the ACK does not carry one
pub const PROGRESS_UNKNOWN: u8 = 255;

/// Message used to carry a command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    Long {
        confirmation: u8,
        params: [f32; 7],
    },
    Int {
        /// MAV_FRAME of `x`, `y`, `z`
        frame: u8,
        current: u8,
        autocontinue: u8,
        params: [f32; 4],
        x: i32,
        y: i32,
        z: f32,
    },
}

/// A command to send and wait on
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub target_system: u8,
    pub target_component: u8,
    /// MAV_CMD
    pub command: u16,
    pub payload: CommandPayload,
    /// Falls back to the node's command timeout
    pub timeout: Option<Duration>,
    /// Receives the progress byte of every `IN_PROGRESS` ACK
    pub progress: Option<Sender<u8>>,
}

impl CommandRequest {
    /// COMMAND_LONG with seven float parameters
    pub fn long(target_system: u8, target_component: u8, command: u16, params: [f32; 7]) -> Self {
        Self {
            target_system,
            target_component,
            command,
            payload: CommandPayload::Long {
                confirmation: 0,
                params,
            },
            timeout: None,
            progress: None,
        }
    }

    /// COMMAND_INT with four float parameters and an integer position
    #[allow(clippy::too_many_arguments)]
    pub fn int(
        target_system: u8,
        target_component: u8,
        command: u16,
        frame: u8,
        params: [f32; 4],
        x: i32,
        y: i32,
        z: f32,
    ) -> Self {
        Self {
            target_system,
            target_component,
            command,
            payload: CommandPayload::Int {
                frame,
                current: 0,
                autocontinue: 0,
                params,
                x,
                y,
                z,
            },
            timeout: None,
            progress: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress(mut self, progress: Sender<u8>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Outcome of a command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    /// MAV_RESULT; 0 when timed out
    pub result: u64,
    pub result_param2: i32,
    /// Progress byte of the final ACK; for v1, the last one reported
    /// ([`PROGRESS_UNKNOWN`] when never reported)
    pub progress: u8,
    /// Time from send to ACK (or to the timeout)
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl CommandResponse {
    fn timeout(elapsed: Duration) -> Self {
        Self {
            result: 0,
            result_param2: 0,
            progress: PROGRESS_UNKNOWN,
            elapsed,
            timed_out: true,
        }
    }

    /// Turn a timeout into [`Error::CommandTimeout`]
    pub fn check(self) -> Result<Self> {
        if self.timed_out {
            Err(Error::CommandTimeout(self.elapsed))
        } else {
            Ok(self)
        }
    }

    /// ACKed with `MAV_RESULT_ACCEPTED`
    pub fn is_accepted(&self) -> bool {
        !self.timed_out && self.result == mav_result::ACCEPTED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PendingKey {
    channel: ChannelId,
    system_id: u8,
    component_id: u8,
    command: u16,
}

struct Pending {
    token: u64,
    started: Instant,
    deadline: Instant,
    progress: u8,
    progress_tx: Option<Sender<u8>>,
    reply: Sender<CommandResponse>,
}

/// Handle the caller waits on
pub(crate) struct Registration {
    key: PendingKey,
    token: u64,
    timeout: Duration,
    reply: Receiver<CommandResponse>,
}

pub(crate) struct CommandTracker {
    dialect: Arc<Dialect>,
    version: Version,
    default_timeout: Duration,
    pending: Mutex<HashMap<PendingKey, Pending>>,
    next_token: AtomicU64,
}

impl CommandTracker {
    /// `None` unless the dialect has standard COMMAND_LONG, COMMAND_INT and COMMAND_ACK
    pub fn new(dialect: Option<&Arc<Dialect>>, version: Version, default_timeout: Duration) -> Option<Self> {
        let dialect = dialect?;
        let supported = dialect.codec_matching(COMMAND_LONG_ID, COMMAND_LONG_CRC_EXTRA).is_some()
            && dialect.codec_matching(COMMAND_INT_ID, COMMAND_INT_CRC_EXTRA).is_some()
            && dialect.codec_matching(COMMAND_ACK_ID, COMMAND_ACK_CRC_EXTRA).is_some();
        if !supported {
            log::debug!("Commands unavailable: dialect lacks COMMAND_LONG, COMMAND_INT or COMMAND_ACK");
            return None;
        }
        Some(Self {
            dialect: Arc::clone(dialect),
            version,
            default_timeout,
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        })
    }

    /// Encode the request as COMMAND_LONG or COMMAND_INT
    pub fn encode(&self, request: &CommandRequest) -> Result<Arc<MessageRaw>> {
        let v2 = self.version == Version::V2;
        let mut fields = vec![
            ("target_system", Value::U8(request.target_system)),
            ("target_component", Value::U8(request.target_component)),
            ("command", Value::U16(request.command)),
        ];
        let (id, crc_extra) = match &request.payload {
            CommandPayload::Long {
                confirmation,
                params,
            } => {
                fields.push(("confirmation", Value::U8(*confirmation)));
                for (name, p) in PARAM_NAMES.iter().zip(params) {
                    fields.push((*name, Value::F32(*p)));
                }
                (COMMAND_LONG_ID, COMMAND_LONG_CRC_EXTRA)
            }
            CommandPayload::Int {
                frame,
                current,
                autocontinue,
                params,
                x,
                y,
                z,
            } => {
                fields.push(("frame", Value::U8(*frame)));
                fields.push(("current", Value::U8(*current)));
                fields.push(("autocontinue", Value::U8(*autocontinue)));
                for (name, p) in PARAM_NAMES.iter().zip(params) {
                    fields.push((*name, Value::F32(*p)));
                }
                fields.push(("x", Value::I32(*x)));
                fields.push(("y", Value::I32(*y)));
                fields.push(("z", Value::F32(*z)));
                (COMMAND_INT_ID, COMMAND_INT_CRC_EXTRA)
            }
        };
        let codec = self
            .dialect
            .codec_matching(id, crc_extra)
            .ok_or(Error::DialectMissing("COMMAND_LONG / COMMAND_INT"))?;
        let payload = codec.encode_named(&fields, v2)?;
        Ok(Arc::new(MessageRaw { id, payload }))
    }

    /// Enter a request into the pending table
    pub fn register(&self, channel: ChannelId, request: &CommandRequest) -> Result<Registration> {
        if request.target_system == 0 {
            return Err(Error::CommandTargetMissing);
        }
        let key = PendingKey {
            channel,
            system_id: request.target_system,
            component_id: request.target_component,
            command: request.command,
        };
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply) = bounded(1);
        let now = Instant::now();

        let mut pending = self.pending.lock();
        if pending.contains_key(&key) {
            return Err(Error::CommandInFlight);
        }
        pending.insert(
            key,
            Pending {
                token,
                started: now,
                deadline: now + timeout,
                progress: PROGRESS_UNKNOWN,
                progress_tx: request.progress.clone(),
                reply: reply_tx,
            },
        );
        Ok(Registration {
            key,
            token,
            timeout,
            reply,
        })
    }

    /// Drop a registration whose command could not be sent
    pub fn abandon(&self, registration: &Registration) {
        self.take(&registration.key, registration.token);
    }

    /// Block until the command completes, times out or is cancelled
    pub fn wait(&self, registration: Registration) -> Result<CommandResponse> {
        match registration.reply.recv_timeout(registration.timeout) {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => {
                match self.take(&registration.key, registration.token) {
                    Some(p) => Ok(CommandResponse::timeout(p.started.elapsed())),
                    // someone else removed it and answers
                    None => registration.reply.recv().map_err(|_| Error::CommandCancelled),
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::CommandCancelled),
        }
    }

    fn take(&self, key: &PendingKey, token: u64) -> Option<Pending> {
        let mut pending = self.pending.lock();
        if pending.get(key).is_some_and(|p| p.token == token) {
            pending.remove(key)
        } else {
            None
        }
    }

    /// Match an incoming COMMAND_ACK; returns true if it answered a pending command
    pub fn handle_ack(&self, channel: ChannelId, frame: &Frame) -> bool {
        if frame.message_id() != COMMAND_ACK_ID {
            return false;
        }
        let Some(codec) = self.dialect.codec_matching(COMMAND_ACK_ID, COMMAND_ACK_CRC_EXTRA) else {
            return false;
        };
        let Some(values) = frame_values(codec, frame) else {
            return false;
        };
        let get = |name: &str| codec.named(&values, name).and_then(Value::as_u64);
        let (Some(command), Some(result)) = (get("command"), get("result")) else {
            return false;
        };
        let progress = match frame.version() {
            Version::V1 => PROGRESS_UNKNOWN,
            Version::V2 => get("progress").map_or(PROGRESS_UNKNOWN, |p| p as u8),
        };
        let result_param2 = get("result_param2").map_or(0, |v| v as i32);

        let mut key = PendingKey {
            channel,
            system_id: frame.system_id(),
            component_id: frame.component_id(),
            command: command as u16,
        };
        let mut pending = self.pending.lock();
        if !pending.contains_key(&key) {
            // command sent to component 0 (all components)
            key.component_id = 0;
            if !pending.contains_key(&key) {
                return false;
            }
        }

        if result == mav_result::IN_PROGRESS {
            if let Some(p) = pending.get_mut(&key) {
                p.progress = progress;
                if let Some(tx) = &p.progress_tx {
                    let _ = tx.try_send(progress);
                }
            }
            return true;
        }

        let Some(p) = pending.remove(&key) else {
            return false;
        };
        drop(pending);
        let _ = p.reply.try_send(CommandResponse {
            result,
            result_param2,
            progress: if progress == PROGRESS_UNKNOWN { p.progress } else { progress },
            elapsed: p.started.elapsed(),
            timed_out: false,
        });
        true
    }

    /// Time out entries past their deadline
    pub fn expire(&self, now: Instant) {
        let expired: Vec<Pending> = {
            let mut pending = self.pending.lock();
            let keys: Vec<PendingKey> = pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(k, _)| *k)
                .collect();
            keys.iter().filter_map(|k| pending.remove(k)).collect()
        };
        for p in expired {
            let _ = p
                .reply
                .try_send(CommandResponse::timeout(now.duration_since(p.started)));
        }
    }

    /// Cancel every command sent on a closed channel
    pub fn cancel_channel(&self, channel: ChannelId) {
        self.pending.lock().retain(|k, _| k.channel != channel);
    }

    /// Cancel everything (node close)
    pub fn cancel_all(&self) {
        let n = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if n > 0 {
            log::debug!("Cancelled {} pending commands", n);
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

const PARAM_NAMES: [&str; 7] = [
    "param1", "param2", "param3", "param4", "param5", "param6", "param7",
];
