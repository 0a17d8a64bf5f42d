//! Periodic HEARTBEAT to every channel

use crate::channel::{ChannelContext, Outgoing};
use crate::config::HeartbeatConfig;
use crate::error::Result;
use crate::node::{Control, Target};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use vayu_wire::{Dialect, MessageRaw, Value, Version};

pub(crate) const HEARTBEAT_ID: u32 = 0;
pub(crate) const HEARTBEAT_CRC_EXTRA: u8 = 50;

/// MAVLink protocol version advertised in `mavlink_version`
const MAVLINK_VERSION: u8 = 3;

pub(crate) struct Heartbeat {
    message: Arc<MessageRaw>,
    period: Duration,
}

impl Heartbeat {
    /// `None` when disabled or when the dialect has no standard HEARTBEAT
    pub fn new(config: &HeartbeatConfig, dialect: Option<&Dialect>, version: Version) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let Some(codec) = dialect.and_then(|d| d.codec_matching(HEARTBEAT_ID, HEARTBEAT_CRC_EXTRA)) else {
            log::warn!("Heartbeat disabled: dialect has no standard HEARTBEAT message");
            return Ok(None);
        };

        let payload = codec.encode_named(
            &[
                ("type", Value::U8(config.system_type)),
                ("autopilot", Value::U8(config.autopilot)),
                ("base_mode", Value::U8(config.base_mode)),
                ("custom_mode", Value::U32(config.custom_mode)),
                ("system_status", Value::U8(config.system_status)),
                ("mavlink_version", Value::U8(MAVLINK_VERSION)),
            ],
            version == Version::V2,
        )?;
        Ok(Some(Self {
            message: Arc::new(MessageRaw {
                id: HEARTBEAT_ID,
                payload,
            }),
            period: config.period,
        }))
    }

    /// Send now, then once per period until shutdown
    pub fn spawn(self, ctx: ChannelContext) -> io::Result<JoinHandle<()>> {
        log::info!("Heartbeat every {:?}", self.period);
        thread::Builder::new()
            .name("heartbeat".to_string())
            .spawn(move || {
                loop {
                    let write = Control::Write {
                        target: Target::All,
                        item: Outgoing::Message(Arc::clone(&self.message)),
                        reply: None,
                    };
                    if !ctx.send_control(write) || ctx.shutdown.wait(self.period) {
                        break;
                    }
                }
                log::debug!("Heartbeat thread exiting");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vayu_wire::dialects::common::{self, MessageHeartbeat};

    #[test]
    fn test_payload_fields() {
        let dialect = common::dialect();
        let config = HeartbeatConfig {
            system_type: 2,
            autopilot: 12,
            custom_mode: 7,
            ..HeartbeatConfig::default()
        };
        let hb = Heartbeat::new(&config, Some(&dialect), Version::V2)
            .unwrap()
            .unwrap();
        assert_eq!(hb.period, Duration::from_secs(5));

        let decoded = dialect.decode(&hb.message, Version::V2).unwrap();
        let msg = decoded.downcast_ref::<MessageHeartbeat>().unwrap();
        assert_eq!(msg.mavtype, 2);
        assert_eq!(msg.autopilot, 12);
        assert_eq!(msg.custom_mode, 7);
        assert_eq!(msg.system_status, 4);
        assert_eq!(msg.mavlink_version, 3);
    }

    #[test]
    fn test_disabled_or_missing() {
        let dialect = common::dialect();
        let off = HeartbeatConfig {
            enabled: false,
            ..HeartbeatConfig::default()
        };
        assert!(Heartbeat::new(&off, Some(&dialect), Version::V2).unwrap().is_none());
        assert!(
            Heartbeat::new(&HeartbeatConfig::default(), None, Version::V2)
                .unwrap()
                .is_none()
        );

        let empty = Dialect::new(1, Vec::<vayu_wire::MessageDef>::new()).unwrap();
        assert!(
            Heartbeat::new(&HeartbeatConfig::default(), Some(&empty), Version::V1)
                .unwrap()
                .is_none()
        );
    }
}
