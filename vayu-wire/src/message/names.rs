//! Program-side / protocol-side name conversion
//!
//! | Program side      | Protocol side       |
//! |-------------------|---------------------|
//! | `MessageGpsRawInt`| `GPS_RAW_INT`       |
//! | `TargetSystem`    | `target_system`     |
//!
//! The mapping is lossy around digits (`test_5` and `test5` both map to
//! `Test5`); fields that need an exact name carry an explicit override.

use crate::error::{Error, Result};

const MESSAGE_PREFIX: &str = "Message";

/// `CamelCase` to `snake_case`
///
/// An underscore is inserted before an uppercase letter that follows a
/// lowercase letter or a digit. Names that are already snake_case pass
/// through unchanged.
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if c.is_ascii_uppercase()
            && let Some(p) = prev
            && (p.is_ascii_lowercase() || p.is_ascii_digit())
        {
            out.push('_');
        }
        out.push(c.to_ascii_lowercase());
        prev = Some(c);
    }
    out
}

/// `snake_case` to `CamelCase`
pub fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c.to_ascii_lowercase());
        }
    }
    out
}

/// Protocol name of a message type, e.g. `MessageHeartbeat` -> `HEARTBEAT`
pub(crate) fn message_protocol_name(type_name: &'static str) -> Result<String> {
    let rest = type_name
        .strip_prefix(MESSAGE_PREFIX)
        .filter(|rest| !rest.is_empty())
        .ok_or(Error::MissingMessagePrefix(type_name))?;
    Ok(camel_to_snake(rest).to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_to_snake() {
        assert_eq!(camel_to_snake("TargetSystem"), "target_system");
        assert_eq!(camel_to_snake("Xacc"), "xacc");
        assert_eq!(camel_to_snake("Param1"), "param1");
        assert_eq!(camel_to_snake("Test5Byte"), "test5_byte");
        assert_eq!(camel_to_snake("already_snake"), "already_snake");
    }

    #[test]
    fn test_snake_to_camel() {
        assert_eq!(snake_to_camel("target_system"), "TargetSystem");
        assert_eq!(snake_to_camel("gps_raw_int"), "GpsRawInt");
        assert_eq!(snake_to_camel("x"), "X");
    }

    #[test]
    fn test_roundtrip_without_digit_boundaries() {
        for name in ["custom_mode", "system_status", "time_boot_ms", "param_id"] {
            assert_eq!(camel_to_snake(&snake_to_camel(name)), name);
        }
    }

    #[test]
    fn test_digit_boundary_is_lossy() {
        assert_eq!(snake_to_camel("test_5"), "Test5");
        assert_eq!(camel_to_snake("Test5"), "test5");
    }

    #[test]
    fn test_message_protocol_name() {
        assert_eq!(message_protocol_name("MessageHeartbeat").unwrap(), "HEARTBEAT");
        assert_eq!(message_protocol_name("MessageGpsRawInt").unwrap(), "GPS_RAW_INT");
        assert_eq!(message_protocol_name("MessageTest5").unwrap(), "TEST5");
    }

    #[test]
    fn test_message_prefix_required() {
        assert!(matches!(
            message_protocol_name("Heartbeat"),
            Err(Error::MissingMessagePrefix("Heartbeat"))
        ));
        assert!(message_protocol_name("Message").is_err());
    }
}
