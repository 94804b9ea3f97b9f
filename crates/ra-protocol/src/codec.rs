//! JSON encoding for WebSocket text frames

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtocolError;

/// Maximum accepted message size (16MB - 1). Screen frames and file
/// payloads travel base64-encoded, so this bounds a single transfer.
pub const MAX_MESSAGE_SIZE: usize = 0x00FF_FFFF;

/// Encode an event as a JSON text frame
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(message)?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(text)
}

/// Decode an event from a JSON text frame
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(serde_json::from_str(text)?)
}

/// Decode an event carried in a binary frame (some clients send JSON as binary)
pub fn decode_binary<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
    decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AgentInbound, OperatorInbound};

    #[test]
    fn test_decode_operator_event() {
        let event: OperatorInbound =
            decode(r#"{"type":"process:kill","identity":"A1","pid":4242}"#).unwrap();
        match event {
            OperatorInbound::ProcessKill { identity, pid } => {
                assert_eq!(identity, "A1");
                assert_eq!(pid, 4242);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_binary_json() {
        let event: AgentInbound = decode_binary(br#"{"type":"frame","image":"aGVsbG8="}"#).unwrap();
        assert!(matches!(event, AgentInbound::Frame { .. }));
    }

    #[test]
    fn test_decode_binary_rejects_invalid_utf8() {
        let result = decode_binary::<AgentInbound>(&[0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(ProtocolError::NotUtf8)));
    }

    #[test]
    fn test_decode_oversized_message() {
        let text = "x".repeat(MAX_MESSAGE_SIZE + 1);
        let result = decode::<AgentInbound>(&text);
        assert!(matches!(
            result,
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_unknown_event_type() {
        let result = decode::<OperatorInbound>(r#"{"type":"shell:exec","cmd":"rm"}"#);
        assert!(matches!(result, Err(ProtocolError::Serialization(_))));
    }
}
