//! Codec: one JSON object per connection, UTF-8 text, bounded size.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::Command;

/// Largest payload accepted in either direction.
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024; // 16 MiB

/// Encode a message as JSON text.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, EncodeError> {
    let out = serde_json::to_vec(msg)?;
    if out.len() > MAX_MESSAGE_LEN {
        return Err(EncodeError::TooLarge(out.len()));
    }
    Ok(out)
}

/// Error encoding a message (serialization or size limit).
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message too large ({0} bytes)")]
    TooLarge(usize),
}

/// Decode a response. Any shape mismatch is an error.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(DecodeError::TooLarge(bytes.len()));
    }
    serde_json::from_slice(bytes).map_err(DecodeError::Json)
}

/// Error decoding a response payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("payload too large ({0} bytes)")]
    TooLarge(usize),
    #[error("decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode an inbound request, telling apart payloads that deserve an error reply
/// (unknown command, malformed fields) from ones that are not requests at all.
pub fn decode_request<T: Command>(bytes: &[u8]) -> Result<T, RequestError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(RequestError::Empty);
    }
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(RequestError::TooLarge(bytes.len()));
    }
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(RequestError::NotJson)?;
    if !value.is_object() {
        return Err(RequestError::NotObject);
    }
    let command = value
        .get("command")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    match command {
        Some(command) if T::COMMANDS.contains(&command.as_str()) => serde_json::from_value(value)
            .map_err(|source| RequestError::Malformed { command, source }),
        other => Err(RequestError::UnknownCommand(other)),
    }
}

/// Why an inbound request could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("empty payload")]
    Empty,
    #[error("payload too large ({0} bytes)")]
    TooLarge(usize),
    #[error("payload is not JSON: {0}")]
    NotJson(serde_json::Error),
    #[error("payload is not a JSON object")]
    NotObject,
    #[error("unknown command")]
    UnknownCommand(Option<String>),
    #[error("malformed request: {source}")]
    Malformed {
        command: String,
        source: serde_json::Error,
    },
}

impl RequestError {
    /// Whether the sender should get an error reply; otherwise the connection is just closed.
    pub fn is_replyable(&self) -> bool {
        matches!(
            self,
            RequestError::UnknownCommand(_) | RequestError::Malformed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PeerRequest, TrackerRequest, TrackerResponse};

    #[test]
    fn roundtrip_request() {
        let req = TrackerRequest::Disconnect { node_id: 7 };
        let bytes = encode(&req).unwrap();
        let back: TrackerRequest = decode_request(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn empty_and_garbage_are_not_replyable() {
        let err = decode_request::<PeerRequest>(b"").unwrap_err();
        assert!(matches!(err, RequestError::Empty));
        assert!(!err.is_replyable());

        let err = decode_request::<PeerRequest>(b"{not json").unwrap_err();
        assert!(matches!(err, RequestError::NotJson(_)));
        assert!(!err.is_replyable());

        let err = decode_request::<PeerRequest>(b"[1, 2]").unwrap_err();
        assert!(matches!(err, RequestError::NotObject));
    }

    #[test]
    fn unknown_command_is_replyable() {
        let err = decode_request::<PeerRequest>(br#"{"command":"register"}"#).unwrap_err();
        assert!(matches!(err, RequestError::UnknownCommand(Some(ref c)) if c == "register"));
        assert!(err.is_replyable());

        let err = decode_request::<TrackerRequest>(br#"{"node_id":1}"#).unwrap_err();
        assert!(matches!(err, RequestError::UnknownCommand(None)));
    }

    #[test]
    fn missing_field_is_malformed() {
        let err =
            decode_request::<TrackerRequest>(br#"{"command":"register","port":1}"#).unwrap_err();
        match err {
            RequestError::Malformed { ref command, .. } => assert_eq!(command, "register"),
            other => panic!("expected Malformed, got {other:?}"),
        }
        assert!(err.is_replyable());
    }

    #[test]
    fn decode_response_errors() {
        assert!(matches!(
            decode::<TrackerResponse>(b""),
            Err(DecodeError::Empty)
        ));
        assert!(matches!(
            decode::<TrackerResponse>(br#"{"status":"bogus"}"#),
            Err(DecodeError::Json(_))
        ));
    }
}
