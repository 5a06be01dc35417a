//! Control messages sent over the data channel as JSON-array text
//! frames. Binary frames never reach this module — they are opaque
//! PTY/stdin bytes handled directly by the I/O loops.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("not a JSON array")]
    NotArray,
    #[error("empty control frame")]
    Empty,
    #[error("unrecognised control tag: {0}")]
    UnknownTag(String),
    #[error("malformed {0} payload")]
    Malformed(&'static str),
}

/// Parsed terminal resize request. The leading array element is a
/// sentinel tag (`"set_size"`) that carries no dimension information
/// and must never be read as a row/col/x/y value — the 1-to-N legacy
/// handler's bug was exactly this, treating the tag as the first
/// numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Stdin(Vec<u8>),
    SetSize(WindowSize),
    Quit,
}

impl ControlMessage {
    /// Parse a text frame. A bare `"quit"` string (not a JSON array)
    /// is also accepted, matching the wire contract that `quit` is a
    /// terminal frame regardless of array wrapping.
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        if text == "quit" {
            return Ok(ControlMessage::Quit);
        }

        let value: Value = serde_json::from_str(text).map_err(|_| ControlError::NotArray)?;
        let Value::Array(items) = value else {
            return Err(ControlError::NotArray);
        };
        let Some(tag) = items.first().and_then(Value::as_str) else {
            return Err(ControlError::Empty);
        };

        match tag {
            "stdin" => {
                let payload = items
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or(ControlError::Malformed("stdin"))?;
                Ok(ControlMessage::Stdin(payload.as_bytes().to_vec()))
            }
            "set_size" => parse_set_size(&items),
            "quit" => Ok(ControlMessage::Quit),
            other => Err(ControlError::UnknownTag(other.to_string())),
        }
    }

    /// Serialise a `set_size` message: `["set_size",rows,cols,x,y]`.
    pub fn encode_set_size(size: WindowSize) -> String {
        serde_json::json!(["set_size", size.rows, size.cols, size.x, size.y]).to_string()
    }

    pub fn encode_stdin(bytes: &[u8]) -> String {
        serde_json::json!(["stdin", String::from_utf8_lossy(bytes)]).to_string()
    }
}

/// Accepts 3- or 5-element arrays: `[tag, rows, cols]` or
/// `[tag, rows, cols, x, y]`. The tag itself is discarded; trailing
/// pixel dimensions default to 0 when absent.
fn parse_set_size(items: &[Value]) -> Result<ControlMessage, ControlError> {
    let as_u16 = |v: &Value| v.as_u64().and_then(|n| u16::try_from(n).ok());

    let rows = items.get(1).and_then(as_u16).ok_or(ControlError::Malformed("set_size"))?;
    let cols = items.get(2).and_then(as_u16).ok_or(ControlError::Malformed("set_size"))?;
    let x = items.get(3).and_then(as_u16).unwrap_or(0);
    let y = items.get(4).and_then(as_u16).unwrap_or(0);

    Ok(ControlMessage::SetSize(WindowSize { rows, cols, x, y }))
}
