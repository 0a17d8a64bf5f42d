//! REQUEST_DATA_STREAM handshake
//!
//! ArduPilot sends nothing but heartbeats until a ground station asks for
//! data streams. When a heartbeat arrives from a matching autopilot, every
//! standard stream is requested from that sender, at most once per 30 s per
//! (channel, system, component).

use crate::channel::ChannelId;
use crate::config::StreamRequestConfig;
use crate::error::Result;
use crate::heartbeat::{HEARTBEAT_CRC_EXTRA, HEARTBEAT_ID};
use crate::node::frame_values;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vayu_wire::dialects::common::mav_data_stream;
use vayu_wire::{Dialect, Frame, MessageRaw, Value, Version};

pub(crate) const REQUEST_DATA_STREAM_ID: u32 = 66;
pub(crate) const REQUEST_DATA_STREAM_CRC_EXTRA: u8 = 148;

/// Minimum time between two request batches to the same sender
pub(crate) const REQUEST_SUPPRESSION: Duration = Duration::from_secs(30);

const STREAMS: [u8; 7] = [
    mav_data_stream::RAW_SENSORS,
    mav_data_stream::EXTENDED_STATUS,
    mav_data_stream::RC_CHANNELS,
    mav_data_stream::POSITION,
    mav_data_stream::EXTRA1,
    mav_data_stream::EXTRA2,
    mav_data_stream::EXTRA3,
];

/// Sender a batch of stream requests was addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StreamTarget {
    pub channel: ChannelId,
    pub system_id: u8,
    pub component_id: u8,
}

pub(crate) struct StreamRequester {
    dialect: Arc<Dialect>,
    version: Version,
    frequency_hz: u16,
    autopilots: Vec<u8>,
    last_request: HashMap<StreamTarget, Instant>,
}

impl StreamRequester {
    /// `None` when disabled or the dialect lacks HEARTBEAT or REQUEST_DATA_STREAM
    pub fn new(config: &StreamRequestConfig, dialect: Option<&Arc<Dialect>>, version: Version) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let dialect = dialect.filter(|d| {
            d.codec_matching(HEARTBEAT_ID, HEARTBEAT_CRC_EXTRA).is_some()
                && d.codec_matching(REQUEST_DATA_STREAM_ID, REQUEST_DATA_STREAM_CRC_EXTRA)
                    .is_some()
        });
        let Some(dialect) = dialect else {
            log::warn!("Stream requests disabled: dialect lacks HEARTBEAT or REQUEST_DATA_STREAM");
            return None;
        };
        Some(Self {
            dialect: Arc::clone(dialect),
            version,
            frequency_hz: config.frequency_hz,
            autopilots: config.autopilots.clone(),
            last_request: HashMap::new(),
        })
    }

    /// Requests to send back on `channel` in reply to `frame`, if any
    pub fn observe(&mut self, channel: ChannelId, frame: &Frame, now: Instant) -> Result<Option<(StreamTarget, Vec<Arc<MessageRaw>>)>> {
        if frame.message_id() != HEARTBEAT_ID {
            return Ok(None);
        }
        let Some(codec) = self.dialect.codec_matching(HEARTBEAT_ID, HEARTBEAT_CRC_EXTRA) else {
            return Ok(None);
        };
        let Some(values) = frame_values(codec, frame) else {
            return Ok(None);
        };
        let autopilot = codec.named(&values, "autopilot").and_then(Value::as_u64);
        if !autopilot.is_some_and(|a| self.autopilots.iter().any(|&x| x as u64 == a)) {
            return Ok(None);
        }

        let target = StreamTarget {
            channel,
            system_id: frame.system_id(),
            component_id: frame.component_id(),
        };
        if let Some(last) = self.last_request.get(&target)
            && now.duration_since(*last) < REQUEST_SUPPRESSION
        {
            return Ok(None);
        }

        let Some(request) = self
            .dialect
            .codec_matching(REQUEST_DATA_STREAM_ID, REQUEST_DATA_STREAM_CRC_EXTRA)
        else {
            return Ok(None);
        };
        let v2 = self.version == Version::V2;
        let messages = STREAMS
            .iter()
            .map(|&stream| {
                let payload = request.encode_named(
                    &[
                        ("target_system", Value::U8(target.system_id)),
                        ("target_component", Value::U8(target.component_id)),
                        ("req_stream_id", Value::U8(stream)),
                        ("req_message_rate", Value::U16(self.frequency_hz)),
                        ("start_stop", Value::U8(1)),
                    ],
                    v2,
                )?;
                Ok(Arc::new(MessageRaw {
                    id: REQUEST_DATA_STREAM_ID,
                    payload,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        self.last_request.insert(target, now);
        log::info!(
            "Requesting data streams at {} Hz from {}:{} on channel {}",
            self.frequency_hz,
            target.system_id,
            target.component_id,
            channel
        );
        Ok(Some((target, messages)))
    }

    /// Forget suppression state of a closed channel
    pub fn forget_channel(&mut self, channel: ChannelId) {
        self.last_request.retain(|t, _| t.channel != channel);
    }
}
