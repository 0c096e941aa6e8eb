//! Envelope codec for the WebSocket sub-protocol.
//!
//! Wire shape (one CBOR array per WebSocket message):
//!
//! ```text
//! [
//!   { "stId": u64?, "isEnd": bool?, "err": tstr? },   ; control record
//!   bstr                                              ; payload
//! ]
//! ```
//!
//! A control record without `stId` opens a new stream; its payload is then a
//! header block (a flat CBOR map of scalar fields). A control record with
//! `stId` continues an existing stream; its payload is the next body chunk
//! and may be empty when only `isEnd`/`err` matters.

use std::collections::BTreeMap;

use bytes::Bytes;
use ciborium::value::{Integer, Value};

use crate::error::{GateError, Result};

/// Header block of one logical stream: flat scalar fields only, mirroring
/// the HTTP/2 header set. Integer and bool values are rendered as text.
pub type Headers = BTreeMap<String, String>;

/// Leading control record of one envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlRecord {
    /// Stream identity; absent means "open a new stream".
    pub stream_id: Option<u64>,
    /// End-of-input marker for the referenced stream.
    pub is_end: bool,
    /// Client-visible error, set on reject replies.
    pub error: Option<String>,
}

impl ControlRecord {
    /// Continuation record for an existing stream.
    pub fn for_stream(stream_id: u64) -> Self {
        Self {
            stream_id: Some(stream_id),
            ..Self::default()
        }
    }

    /// Error reply record: always ends the referenced stream.
    pub fn error_reply(stream_id: Option<u64>, error: &str) -> Self {
        Self {
            stream_id,
            is_end: true,
            error: Some(error.to_string()),
        }
    }
}

/// One decoded WebSocket message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub control: ControlRecord,
    pub payload: Bytes,
}

// Wire keys, fixed by the protocol.
const KEY_STREAM_ID: &str = "stId";
const KEY_IS_END: &str = "isEnd";
const KEY_ERROR: &str = "err";

fn bad(msg: impl Into<String>) -> GateError {
    GateError::BadEnvelope(msg.into())
}

fn as_u64(v: &Value, what: &str) -> Result<u64> {
    match v {
        Value::Integer(i) => {
            u64::try_from(i128::from(*i)).map_err(|_| bad(format!("{what} out of range")))
        }
        _ => Err(bad(format!("{what} must be an unsigned integer"))),
    }
}

/// Decode one WebSocket message into a control record plus payload bytes.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    let doc: Value =
        ciborium::de::from_reader(bytes).map_err(|e| bad(format!("cbor decode: {e}")))?;

    let items = match doc {
        Value::Array(items) => items,
        _ => return Err(bad("envelope must be a two-element array")),
    };
    if items.len() != 2 {
        return Err(bad("envelope must be a two-element array"));
    }
    let mut items = items.into_iter();
    // len checked above, but stay panic-free
    let control_value = items.next().ok_or_else(|| bad("missing control record"))?;
    let payload_value = items.next().ok_or_else(|| bad("missing payload segment"))?;

    let entries = match control_value {
        Value::Map(entries) => entries,
        _ => return Err(bad("control record must be a map")),
    };

    let mut control = ControlRecord::default();
    for (key, value) in &entries {
        let key = match key {
            Value::Text(t) => t.as_str(),
            _ => return Err(bad("control record keys must be text")),
        };
        match key {
            KEY_STREAM_ID => control.stream_id = Some(as_u64(value, KEY_STREAM_ID)?),
            KEY_IS_END => {
                control.is_end = match value {
                    Value::Bool(b) => *b,
                    _ => return Err(bad("isEnd must be a bool")),
                }
            }
            KEY_ERROR => {
                control.error = match value {
                    Value::Text(t) => Some(t.clone()),
                    Value::Null => None,
                    _ => return Err(bad("err must be text")),
                }
            }
            // Unknown control fields are ignored for forward compatibility.
            _ => {}
        }
    }

    let payload = match payload_value {
        Value::Bytes(b) => Bytes::from(b),
        Value::Null => Bytes::new(),
        _ => return Err(bad("payload segment must be a byte string")),
    };

    Ok(Envelope { control, payload })
}

/// Encode a control record plus payload into one WebSocket message.
pub fn encode_envelope(control: &ControlRecord, payload: &[u8]) -> Result<Vec<u8>> {
    let mut entries: Vec<(Value, Value)> = Vec::with_capacity(3);
    if let Some(id) = control.stream_id {
        entries.push((
            Value::Text(KEY_STREAM_ID.into()),
            Value::Integer(Integer::from(id)),
        ));
    }
    if control.is_end {
        entries.push((Value::Text(KEY_IS_END.into()), Value::Bool(true)));
    }
    if let Some(err) = &control.error {
        entries.push((Value::Text(KEY_ERROR.into()), Value::Text(err.clone())));
    }

    let doc = Value::Array(vec![Value::Map(entries), Value::Bytes(payload.to_vec())]);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&doc, &mut out)
        .map_err(|e| GateError::Internal(format!("cbor encode: {e}")))?;
    Ok(out)
}

/// Decode a stream-open payload as a header block.
///
/// Header blocks are flat maps with text keys; values may be text, integers
/// or bools (rendered as text). Anything nested is rejected, same as the
/// HTTP/2 header convention this mirrors.
pub fn decode_header_block(bytes: &[u8]) -> Result<Headers> {
    let doc: Value =
        ciborium::de::from_reader(bytes).map_err(|_| GateError::MissingHeaders)?;
    let entries = match doc {
        Value::Map(entries) => entries,
        _ => return Err(GateError::MissingHeaders),
    };

    let mut headers = Headers::new();
    for (key, value) in entries {
        let key = match key {
            Value::Text(t) => t.to_ascii_lowercase(),
            _ => return Err(GateError::MissingHeaders),
        };
        let value = match value {
            Value::Text(t) => t,
            Value::Integer(i) => i128::from(i).to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return Err(GateError::MissingHeaders),
        };
        headers.insert(key, value);
    }
    Ok(headers)
}

/// Encode a header block for a response envelope.
pub fn encode_header_block(headers: &Headers) -> Result<Vec<u8>> {
    let entries: Vec<(Value, Value)> = headers
        .iter()
        .map(|(k, v)| (Value::Text(k.clone()), Value::Text(v.clone())))
        .collect();
    let mut out = Vec::new();
    ciborium::ser::into_writer(&Value::Map(entries), &mut out)
        .map_err(|e| GateError::Internal(format!("cbor encode: {e}")))?;
    Ok(out)
}
