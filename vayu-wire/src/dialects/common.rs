//! Subset of the MAVLink `common` dialect used by the node runtime
//!
//! | id  | message              | crc-extra |
//! |-----|----------------------|-----------|
//! | 0   | HEARTBEAT            | 50        |
//! | 2   | SYSTEM_TIME          | 137       |
//! | 20  | PARAM_REQUEST_READ   | 214       |
//! | 22  | PARAM_VALUE          | 220       |
//! | 30  | ATTITUDE             | 39        |
//! | 66  | REQUEST_DATA_STREAM  | 148       |
//! | 75  | COMMAND_INT          | 158       |
//! | 76  | COMMAND_LONG         | 152       |
//! | 77  | COMMAND_ACK          | 143       |
//! | 253 | STATUSTEXT           | 83        |
//!
//! Enum-typed fields are carried as `u64`; the constant modules below name
//! the values the runtime relies on.

use crate::dialect::Dialect;
use crate::mavlink_message;
use crate::message::{FixedString, MessageDef};

/// Dialect version advertised by this definition set
pub const VERSION: u32 = 3;

mavlink_message! {
    /// Periodic presence announcement
    pub struct MessageHeartbeat(0) {
        mavtype: u64 as u8 => "type",
        autopilot: u64 as u8,
        base_mode: u64 as u8,
        custom_mode: u32,
        system_status: u64 as u8,
        mavlink_version: u8,
    }
}

mavlink_message! {
    pub struct MessageSystemTime(2) {
        time_unix_usec: u64,
        time_boot_ms: u32,
    }
}

mavlink_message! {
    pub struct MessageParamRequestRead(20) {
        target_system: u8,
        target_component: u8,
        param_id: FixedString<16>,
        param_index: i16,
    }
}

mavlink_message! {
    pub struct MessageParamValue(22) {
        param_id: FixedString<16>,
        param_value: f32,
        param_type: u64 as u8,
        param_count: u16,
        param_index: u16,
    }
}

mavlink_message! {
    /// Vehicle attitude in radians and radians/second
    pub struct MessageAttitude(30) {
        time_boot_ms: u32,
        roll: f32,
        pitch: f32,
        yaw: f32,
        rollspeed: f32,
        pitchspeed: f32,
        yawspeed: f32,
    }
}

mavlink_message! {
    /// Legacy data-stream rate request, still required by ArduPilot
    pub struct MessageRequestDataStream(66) {
        target_system: u8,
        target_component: u8,
        req_stream_id: u8,
        req_message_rate: u16,
        start_stop: u8,
    }
}

mavlink_message! {
    pub struct MessageCommandInt(75) {
        target_system: u8,
        target_component: u8,
        frame: u64 as u8,
        command: u64 as u16,
        current: u8,
        autocontinue: u8,
        param1: f32,
        param2: f32,
        param3: f32,
        param4: f32,
        x: i32,
        y: i32,
        z: f32,
    }
}

mavlink_message! {
    pub struct MessageCommandLong(76) {
        target_system: u8,
        target_component: u8,
        command: u64 as u16,
        confirmation: u8,
        param1: f32,
        param2: f32,
        param3: f32,
        param4: f32,
        param5: f32,
        param6: f32,
        param7: f32,
    }
}

mavlink_message! {
    pub struct MessageCommandAck(77) {
        command: u64 as u16,
        result: u64 as u8,
    }
    extensions {
        progress: u8,
        result_param2: i32,
        target_system: u8,
        target_component: u8,
    }
}

mavlink_message! {
    pub struct MessageStatustext(253) {
        severity: u64 as u8,
        text: FixedString<50>,
    }
    extensions {
        id: u16,
        chunk_seq: u8,
    }
}

/// MAV_TYPE
pub mod mav_type {
    pub const GENERIC: u64 = 0;
    pub const FIXED_WING: u64 = 1;
    pub const QUADROTOR: u64 = 2;
    pub const GROUND_ROVER: u64 = 10;
    pub const GCS: u64 = 6;
    pub const ONBOARD_CONTROLLER: u64 = 18;
}

/// MAV_AUTOPILOT
pub mod mav_autopilot {
    pub const GENERIC: u64 = 0;
    pub const ARDUPILOTMEGA: u64 = 3;
    pub const INVALID: u64 = 8;
    pub const PX4: u64 = 12;
}

/// MAV_STATE
pub mod mav_state {
    pub const UNINIT: u64 = 0;
    pub const BOOT: u64 = 1;
    pub const CALIBRATING: u64 = 2;
    pub const STANDBY: u64 = 3;
    pub const ACTIVE: u64 = 4;
    pub const CRITICAL: u64 = 5;
    pub const EMERGENCY: u64 = 6;
    pub const POWEROFF: u64 = 7;
}

/// MAV_RESULT
pub mod mav_result {
    pub const ACCEPTED: u64 = 0;
    pub const TEMPORARILY_REJECTED: u64 = 1;
    pub const DENIED: u64 = 2;
    pub const UNSUPPORTED: u64 = 3;
    pub const FAILED: u64 = 4;
    pub const IN_PROGRESS: u64 = 5;
    pub const CANCELLED: u64 = 6;
}

/// MAV_SEVERITY
pub mod mav_severity {
    pub const EMERGENCY: u64 = 0;
    pub const ALERT: u64 = 1;
    pub const CRITICAL: u64 = 2;
    pub const ERROR: u64 = 3;
    pub const WARNING: u64 = 4;
    pub const NOTICE: u64 = 5;
    pub const INFO: u64 = 6;
    pub const DEBUG: u64 = 7;
}

/// MAV_DATA_STREAM
pub mod mav_data_stream {
    pub const ALL: u8 = 0;
    pub const RAW_SENSORS: u8 = 1;
    pub const EXTENDED_STATUS: u8 = 2;
    pub const RC_CHANNELS: u8 = 3;
    pub const RAW_CONTROLLER: u8 = 4;
    pub const POSITION: u8 = 6;
    pub const EXTRA1: u8 = 10;
    pub const EXTRA2: u8 = 11;
    pub const EXTRA3: u8 = 12;
}

/// MAV_CMD (subset)
pub mod mav_cmd {
    pub const NAV_RETURN_TO_LAUNCH: u64 = 20;
    pub const NAV_LAND: u64 = 21;
    pub const NAV_TAKEOFF: u64 = 22;
    pub const DO_SET_MODE: u64 = 176;
    pub const PREFLIGHT_CALIBRATION: u64 = 241;
    pub const COMPONENT_ARM_DISARM: u64 = 400;
    pub const SET_MESSAGE_INTERVAL: u64 = 511;
    pub const REQUEST_MESSAGE: u64 = 512;
}

/// Every message definition in this module
pub fn messages() -> Vec<MessageDef> {
    vec![
        MessageDef::of::<MessageHeartbeat>(),
        MessageDef::of::<MessageSystemTime>(),
        MessageDef::of::<MessageParamRequestRead>(),
        MessageDef::of::<MessageParamValue>(),
        MessageDef::of::<MessageAttitude>(),
        MessageDef::of::<MessageRequestDataStream>(),
        MessageDef::of::<MessageCommandInt>(),
        MessageDef::of::<MessageCommandLong>(),
        MessageDef::of::<MessageCommandAck>(),
        MessageDef::of::<MessageStatustext>(),
    ]
}

/// Build the dialect
///
/// # Panics
///
/// Only if the fixed message set above has a duplicate id or a
/// malformed field.
pub fn dialect() -> Dialect {
    Dialect::new(VERSION, messages())
        .expect("common message set has unique ids and well-formed fields")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn test_crc_extras() {
        let d = Dialect::new(VERSION, messages()).unwrap();
        let expected = [
            (0, 50),
            (2, 137),
            (20, 214),
            (22, 220),
            (30, 39),
            (66, 148),
            (75, 158),
            (76, 152),
            (77, 143),
            (253, 83),
        ];
        for (id, crc) in expected {
            assert_eq!(d.codec(id).unwrap().crc_extra(), crc, "message {id}");
        }
    }

    #[test]
    fn test_dialect_builds() {
        let d = dialect();
        assert_eq!(d.len(), messages().len());
        assert!(messages().iter().all(|m| d.contains(m.descriptor().id)));
    }

    #[test]
    fn test_protocol_names() {
        let d = dialect();
        assert_eq!(d.codec(0).unwrap().protocol_name(), "HEARTBEAT");
        assert_eq!(d.codec(66).unwrap().protocol_name(), "REQUEST_DATA_STREAM");
        assert_eq!(d.codec(253).unwrap().protocol_name(), "STATUSTEXT");
    }

    #[test]
    fn test_heartbeat_type_field_name() {
        let d = MessageHeartbeat::describe();
        assert_eq!(d.fields[0].protocol_name(), "type");
    }

    #[test]
    fn test_command_ack_extension_sizes() {
        let d = dialect();
        let c = d.codec(77).unwrap();
        assert_eq!(c.size_normal(), 3);
        assert_eq!(c.size_extended(), 10);
    }
}
