//! WebSocket envelope codec.
//!
//! Frames are three-element JSON arrays `[message-type, sequence, payload]`.
//! `Hello` and `Error` carry a null sequence; `Welcome`, `Update`, and
//! `Heartbeat` carry the server's monotonically increasing sequence number.
//! `Welcome` and `Update` payloads are the serialized [`SubjectUpdate`];
//! `Hello` declares the protocol version and format, `Heartbeat` has an
//! empty payload.

use std::fmt;

use serde::{Deserialize, Serialize};

use interject_core::error::SubjectError;

use crate::update::SubjectUpdate;

/// Wire error codes; further codes are reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    ValidationFailed,
    ReadOnlyProperty,
    PropertyNotFound,
    SubjectNotFound,
    InternalError,
}

impl ErrorCode {
    /// Map a runtime error to its wire code.
    pub fn from_subject_error(error: &SubjectError) -> Self {
        match error {
            SubjectError::Validation(_) => ErrorCode::ValidationFailed,
            SubjectError::ReadOnly(_) => ErrorCode::ReadOnlyProperty,
            SubjectError::PropertyNotFound(_) => ErrorCode::PropertyNotFound,
            SubjectError::SubjectNotFound(_) => ErrorCode::SubjectNotFound,
            _ => ErrorCode::InternalError,
        }
    }
}

/// One per-property failure inside an `Error` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireFailure {
    pub path: String,
    pub code: ErrorCode,
    pub message: String,
}

/// A decoded WebSocket frame.
#[derive(Clone, Debug, PartialEq)]
pub enum WsEnvelope {
    Hello {
        version: u32,
        format: String,
    },
    Welcome {
        state: SubjectUpdate,
        sequence: u64,
    },
    Update {
        update: SubjectUpdate,
        sequence: u64,
    },
    Error {
        code: ErrorCode,
        message: String,
        failures: Option<Vec<WireFailure>>,
    },
    Heartbeat {
        sequence: u64,
    },
}

const TYPE_HELLO: i64 = 0;
const TYPE_WELCOME: i64 = 1;
const TYPE_UPDATE: i64 = 2;
const TYPE_ERROR: i64 = 3;
const TYPE_HEARTBEAT: i64 = 4;

#[derive(Serialize, Deserialize)]
struct HelloPayload {
    version: u32,
    format: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    code: ErrorCode,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failures: Option<Vec<WireFailure>>,
}

/// Errors from envelope encoding/decoding.
#[derive(Debug)]
pub enum WsCodecError {
    Json(serde_json::Error),
    Malformed(String),
    UnknownType(i64),
}

impl fmt::Display for WsCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsCodecError::Json(err) => write!(f, "envelope json: {err}"),
            WsCodecError::Malformed(msg) => write!(f, "malformed envelope: {msg}"),
            WsCodecError::UnknownType(t) => write!(f, "unknown message type {t}"),
        }
    }
}

impl std::error::Error for WsCodecError {}

impl From<serde_json::Error> for WsCodecError {
    fn from(err: serde_json::Error) -> Self {
        WsCodecError::Json(err)
    }
}

/// Encode an envelope to its wire text.
pub fn encode(envelope: &WsEnvelope) -> Result<String, WsCodecError> {
    let frame = match envelope {
        WsEnvelope::Hello { version, format } => serde_json::json!([
            TYPE_HELLO,
            null,
            HelloPayload {
                version: *version,
                format: format.clone(),
            }
        ]),
        WsEnvelope::Welcome { state, sequence } => {
            serde_json::json!([TYPE_WELCOME, sequence, state])
        }
        WsEnvelope::Update { update, sequence } => {
            serde_json::json!([TYPE_UPDATE, sequence, update])
        }
        WsEnvelope::Error {
            code,
            message,
            failures,
        } => serde_json::json!([
            TYPE_ERROR,
            null,
            ErrorPayload {
                code: *code,
                message: message.clone(),
                failures: failures.clone(),
            }
        ]),
        WsEnvelope::Heartbeat { sequence } => {
            serde_json::json!([TYPE_HEARTBEAT, sequence, {}])
        }
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Decode wire text into an envelope.
pub fn decode(text: &str) -> Result<WsEnvelope, WsCodecError> {
    let frame: serde_json::Value = serde_json::from_str(text)?;
    let elements = frame
        .as_array()
        .ok_or_else(|| WsCodecError::Malformed("frame is not an array".to_string()))?;
    if elements.len() != 3 {
        return Err(WsCodecError::Malformed(format!(
            "expected 3 elements, got {}",
            elements.len()
        )));
    }
    let message_type = elements[0]
        .as_i64()
        .ok_or_else(|| WsCodecError::Malformed("message type is not an integer".to_string()))?;
    let sequence = elements[1].as_u64();
    let payload = elements[2].clone();

    let require_sequence = || {
        sequence.ok_or_else(|| WsCodecError::Malformed("missing sequence number".to_string()))
    };

    match message_type {
        TYPE_HELLO => {
            let payload: HelloPayload = serde_json::from_value(payload)?;
            Ok(WsEnvelope::Hello {
                version: payload.version,
                format: payload.format,
            })
        }
        TYPE_WELCOME => Ok(WsEnvelope::Welcome {
            state: serde_json::from_value(payload)?,
            sequence: require_sequence()?,
        }),
        TYPE_UPDATE => Ok(WsEnvelope::Update {
            update: serde_json::from_value(payload)?,
            sequence: require_sequence()?,
        }),
        TYPE_ERROR => {
            let payload: ErrorPayload = serde_json::from_value(payload)?;
            Ok(WsEnvelope::Error {
                code: payload.code,
                message: payload.message,
                failures: payload.failures,
            })
        }
        TYPE_HEARTBEAT => Ok(WsEnvelope::Heartbeat {
            sequence: require_sequence()?,
        }),
        other => Err(WsCodecError::UnknownType(other)),
    }
}
