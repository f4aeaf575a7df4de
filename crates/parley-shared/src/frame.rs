//! JSON hub protocol framing.
//!
//! Every message is a JSON object terminated by [`RECORD_SEPARATOR`]; one
//! WebSocket text frame may carry several of them. Only the message types the
//! chat core needs are modelled, everything else is skipped on decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::constants::{HUB_PROTOCOL, HUB_PROTOCOL_VERSION, RECORD_SEPARATOR};

const TYPE_INVOCATION: u8 = 1;
const TYPE_COMPLETION: u8 = 3;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

/// A decoded hub protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    /// Method call in either direction. `invocation_id` is `None` for
    /// fire-and-forget calls and server events.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Result of an invocation that carried an id.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    /// Server is closing the connection.
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Malformed hub message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hub message missing field `{0}`")]
    MissingField(&'static str),

    #[error("Hub handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Hub handshake response incomplete")]
    HandshakeIncomplete,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

impl HubFrame {
    /// Fire-and-forget invocation of a hub method.
    pub fn invocation(target: &str, arguments: Vec<Value>) -> Self {
        HubFrame::Invocation {
            invocation_id: None,
            target: target.to_string(),
            arguments,
        }
    }

    /// Serialize to a record-separator-terminated string.
    pub fn encode(&self) -> Result<String, FrameError> {
        let raw = match self.clone() {
            HubFrame::Invocation {
                invocation_id,
                target,
                arguments,
            } => RawFrame {
                kind: TYPE_INVOCATION,
                invocation_id,
                target: Some(target),
                arguments: Some(arguments),
                ..Default::default()
            },
            HubFrame::Completion {
                invocation_id,
                result,
                error,
            } => RawFrame {
                kind: TYPE_COMPLETION,
                invocation_id: Some(invocation_id),
                result,
                error,
                ..Default::default()
            },
            HubFrame::Ping => RawFrame {
                kind: TYPE_PING,
                ..Default::default()
            },
            HubFrame::Close {
                error,
                allow_reconnect,
            } => RawFrame {
                kind: TYPE_CLOSE,
                error,
                allow_reconnect: Some(allow_reconnect),
                ..Default::default()
            },
        };

        let mut out = serde_json::to_string(&raw)?;
        out.push(RECORD_SEPARATOR);
        Ok(out)
    }

    /// Decode every record in a text payload, skipping unmodelled types.
    pub fn decode_all(text: &str) -> Result<Vec<HubFrame>, FrameError> {
        let mut frames = Vec::new();
        for record in text.split(RECORD_SEPARATOR) {
            if record.trim().is_empty() {
                continue;
            }
            let raw: RawFrame = serde_json::from_str(record)?;
            if let Some(frame) = Self::from_raw(raw)? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    fn from_raw(raw: RawFrame) -> Result<Option<HubFrame>, FrameError> {
        let frame = match raw.kind {
            TYPE_INVOCATION => HubFrame::Invocation {
                invocation_id: raw.invocation_id,
                target: raw.target.ok_or(FrameError::MissingField("target"))?,
                arguments: raw.arguments.unwrap_or_default(),
            },
            TYPE_COMPLETION => HubFrame::Completion {
                invocation_id: raw
                    .invocation_id
                    .ok_or(FrameError::MissingField("invocationId"))?,
                result: raw.result,
                error: raw.error,
            },
            TYPE_PING => HubFrame::Ping,
            TYPE_CLOSE => HubFrame::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect.unwrap_or(false),
            },
            _ => return Ok(None),
        };
        Ok(Some(frame))
    }
}

/// The first message a client sends after the socket opens.
pub fn handshake_request() -> String {
    let mut out = serde_json::json!({
        "protocol": HUB_PROTOCOL,
        "version": HUB_PROTOCOL_VERSION,
    })
    .to_string();
    out.push(RECORD_SEPARATOR);
    out
}

/// Check the server's handshake response.
///
/// Returns whatever follows the handshake record in the same payload, which
/// may already contain regular frames.
pub fn parse_handshake_response(text: &str) -> Result<&str, FrameError> {
    let (record, rest) = text
        .split_once(RECORD_SEPARATOR)
        .ok_or(FrameError::HandshakeIncomplete)?;

    #[derive(Deserialize)]
    struct HandshakeResponse {
        error: Option<String>,
    }

    let response: HandshakeResponse = serde_json::from_str(record)?;
    match response.error {
        Some(error) => Err(FrameError::HandshakeRejected(error)),
        None => Ok(rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_invocation() {
        let frame = HubFrame::invocation("Connect", vec![Value::from("u1")]);
        let text = frame.encode().unwrap();
        assert!(text.ends_with(RECORD_SEPARATOR));

        let value: Value = serde_json::from_str(text.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": 1, "target": "Connect", "arguments": ["u1"]})
        );
    }

    #[test]
    fn test_decode_multiple_records() {
        let text = "{\"type\":6}\u{1e}{\"type\":1,\"target\":\"Messages\",\"arguments\":[{\"userId\":\"a\"}]}\u{1e}";
        let frames = HubFrame::decode_all(text).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], HubFrame::Ping);
        match &frames[1] {
            HubFrame::Invocation { target, arguments, .. } => {
                assert_eq!(target, "Messages");
                assert_eq!(arguments.len(), 1);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_decode_skips_stream_items() {
        let text = "{\"type\":2,\"invocationId\":\"1\",\"item\":5}\u{1e}{\"type\":7,\"error\":\"bye\",\"allowReconnect\":true}\u{1e}";
        let frames = HubFrame::decode_all(text).unwrap();
        assert_eq!(
            frames,
            vec![HubFrame::Close {
                error: Some("bye".into()),
                allow_reconnect: true
            }]
        );
    }

    #[test]
    fn test_invocation_without_target_is_rejected() {
        let err = HubFrame::decode_all("{\"type\":1}\u{1e}").unwrap_err();
        assert!(matches!(err, FrameError::MissingField("target")));
    }

    #[test]
    fn test_handshake() {
        assert_eq!(handshake_request(), "{\"protocol\":\"json\",\"version\":1}\u{1e}");

        let rest = parse_handshake_response("{}\u{1e}{\"type\":6}\u{1e}").unwrap();
        assert_eq!(HubFrame::decode_all(rest).unwrap(), vec![HubFrame::Ping]);

        let err = parse_handshake_response("{\"error\":\"unsupported\"}\u{1e}").unwrap_err();
        assert!(matches!(err, FrameError::HandshakeRejected(_)));

        assert!(matches!(
            parse_handshake_response("{}"),
            Err(FrameError::HandshakeIncomplete)
        ));
    }
}
