/// Event-stream framing for advisor streams
///
/// Every frame is a single `data:` line holding one JSON document, followed
/// by a blank line.
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Frames generated by the stream itself rather than by a notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// First frame on every stream
    Connected { message: String, time: String },

    /// Keep-alive written after a quiet heartbeat interval
    Heartbeat { time: String },
}

impl ControlFrame {
    pub fn connected() -> Self {
        ControlFrame::Connected {
            message: "SSE connection established".to_string(),
            time: now_rfc3339(),
        }
    }

    pub fn heartbeat() -> Self {
        ControlFrame::Heartbeat {
            time: now_rfc3339(),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Serialize a payload into one `data: <json>\n\n` frame
pub fn encode_event<T: Serialize>(payload: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(payload)?;
    Ok(Bytes::from(format!("data: {}\n\n", json)))
}

/// Comment frame written between events. Clients ignore it; writing it
/// makes a dead socket fail the next write.
pub fn keepalive_comment() -> Bytes {
    Bytes::from_static(b": ping\n\n")
}

/// Parse the JSON document out of one frame
pub fn decode_event(frame: &[u8]) -> Option<serde_json::Value> {
    let text = std::str::from_utf8(frame).ok()?;
    let json = text.strip_prefix("data: ")?.strip_suffix("\n\n")?;
    serde_json::from_str(json).ok()
}
