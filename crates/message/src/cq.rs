//! CQ code: the inline string form of a message.
//!
//! `hello[CQ:face,id=14][CQ:image,file=a.png,cache=0]` is text interleaved
//! with `[CQ:kind,key=value,...]` codes. `&`, `[` and `]` are escaped
//! everywhere; `,` is additionally escaped inside parameter values.

use serde_json::{Map, Value};

use crate::{Message, segment::Segment};

const CODE_OPEN: &str = "[CQ:";

/// Escape text outside of codes, or a parameter value when `in_param` is set.
pub fn escape(text: &str, in_param: bool) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;");
    if in_param {
        escaped.replace(',', "&#44;")
    } else {
        escaped
    }
}

pub fn unescape(text: &str) -> String {
    text.replace("&#44;", ",")
        .replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&amp;", "&")
}

/// Split a CQ string into segments. An unterminated code is kept as text.
pub fn parse(input: &str) -> Message {
    let mut segments = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        let Some(start) = rest.find(CODE_OPEN) else {
            push_text(&mut segments, rest);
            break;
        };
        let Some(len) = rest[start..].find(']') else {
            push_text(&mut segments, rest);
            break;
        };
        push_text(&mut segments, &rest[..start]);
        let body = &rest[start + CODE_OPEN.len()..start + len];
        match parse_code(body) {
            Some(segment) => segments.push(segment),
            None => push_text(&mut segments, &rest[start..=start + len]),
        }
        rest = &rest[start + len + 1..];
    }
    segments
}

fn push_text(segments: &mut Message, raw: &str) {
    if !raw.is_empty() {
        segments.push(Segment::text(unescape(raw)));
    }
}

fn parse_code(body: &str) -> Option<Segment> {
    let mut parts = body.split(',');
    let kind = parts.next().map(str::trim).filter(|k| !k.is_empty())?;
    let mut data = Map::new();
    for param in parts {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        data.insert(key.trim().to_string(), Value::String(unescape(value)));
    }
    Some(Segment::decode(kind, &data))
}

/// Render segments back into a CQ string.
pub fn to_cq_string(message: &[Segment]) -> String {
    let mut out = String::new();
    for segment in message {
        if let Segment::Text { text } = segment {
            out.push_str(&escape(text, false));
            continue;
        }
        let (kind, data) = segment.encode();
        out.push_str(CODE_OPEN);
        out.push_str(&kind);
        for (key, value) in &data {
            out.push(',');
            out.push_str(key);
            out.push('=');
            out.push_str(&escape(&param_string(value), true));
        }
        out.push(']');
    }
    out
}

fn param_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
