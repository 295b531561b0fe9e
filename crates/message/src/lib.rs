//! Message codec: typed segments, CQ code strings and resource validation.

pub mod cq;
pub mod resource;
pub mod segment;

use serde_json::Value;

pub use segment::{AtTarget, Image, Record, Segment, Video};

/// An ordered list of segments.
pub type Message = Vec<Segment>;

/// Decode the `message` field of an event, which is either a segment array or
/// a CQ string. Array elements that are not segment objects become neutral.
pub fn from_value(value: &Value) -> Message {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| serde_json::from_value(item.clone()).unwrap_or_else(|_| Segment::neutral()))
            .collect(),
        Value::String(s) => cq::parse(s),
        _ => Vec::new(),
    }
}

/// Encode a message as a segment array.
pub fn to_value(message: &[Segment]) -> Value {
    Value::Array(
        message
            .iter()
            .map(|segment| {
                let (kind, data) = segment.encode();
                serde_json::json!({ "type": kind, "data": data })
            })
            .collect(),
    )
}

/// Concatenated text of all text segments.
pub fn plain_text(message: &[Segment]) -> String {
    message
        .iter()
        .filter_map(|segment| match segment {
            Segment::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
