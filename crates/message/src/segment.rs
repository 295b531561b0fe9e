//! Message segments.
//!
//! Every segment kind has an explicit encoder and decoder. On the wire a
//! segment is `{"type": kind, "data": {...}}`; the same field map is used for
//! CQ codes, where every value is a string.
//!
//! Constructing or decoding a segment never fails. A rejected resource
//! reference or an out-of-range id yields the neutral segment (empty text) so
//! one bad segment cannot abort a whole message.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tracing::debug,
};

use crate::resource;

pub const FACE_ID_MIN: i64 = 0;
pub const FACE_ID_MAX: i64 = 244;

pub mod kinds {
    pub const TEXT: &str = "text";
    pub const FACE: &str = "face";
    pub const IMAGE: &str = "image";
    pub const RECORD: &str = "record";
    pub const VIDEO: &str = "video";
    pub const AT: &str = "at";
    pub const REPLY: &str = "reply";
}

// ── Media payloads ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub file: String,
    /// Sent as `type=flash`.
    pub flash: bool,
    pub cache: bool,
    pub proxy: bool,
    pub timeout: Option<u64>,
    /// Download URL, only present on received images.
    pub url: Option<String>,
}

impl Image {
    /// Validate `file` and build an image with default flags.
    pub fn new(file: &str) -> Option<Self> {
        Some(Self {
            file: resource::normalize(Some(file))?,
            flash: false,
            cache: true,
            proxy: true,
            timeout: None,
            url: None,
        })
    }

    pub fn with_flash(mut self, flash: bool) -> Self {
        self.flash = flash;
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<u64>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub file: String,
    /// Voice changer flag.
    pub magic: bool,
    pub cache: bool,
    pub proxy: bool,
    pub timeout: Option<u64>,
    pub url: Option<String>,
}

impl Record {
    pub fn new(file: &str) -> Option<Self> {
        Some(Self {
            file: resource::normalize(Some(file))?,
            magic: false,
            cache: true,
            proxy: true,
            timeout: None,
            url: None,
        })
    }

    pub fn with_magic(mut self, magic: bool) -> Self {
        self.magic = magic;
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<u64>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub file: String,
    pub cache: bool,
    pub proxy: bool,
    pub timeout: Option<u64>,
    pub url: Option<String>,
}

impl Video {
    pub fn new(file: &str) -> Option<Self> {
        Some(Self {
            file: resource::normalize(Some(file))?,
            cache: true,
            proxy: true,
            timeout: None,
            url: None,
        })
    }
}

/// Target of an `at` segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtTarget {
    All,
    User(i64),
}

// ── Segment ──────────────────────────────────────────────────────────────────

/// One typed unit of a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSegment", into = "RawSegment")]
pub enum Segment {
    Text { text: String },
    Face { id: i64 },
    Image(Image),
    Record(Record),
    Video(Video),
    At { target: AtTarget },
    Reply { id: i64 },
    /// A kind this codec does not model; data is carried through untouched.
    Unknown {
        kind: String,
        data: Map<String, Value>,
    },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The empty text segment that replaces rejected input.
    pub fn neutral() -> Self {
        Self::Text {
            text: String::new(),
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Self::Text { text } if text.is_empty())
    }

    pub fn face(id: i64) -> Self {
        if !(FACE_ID_MIN..=FACE_ID_MAX).contains(&id) {
            debug!(id, "face id out of range");
            return Self::neutral();
        }
        Self::Face { id }
    }

    pub fn image(file: &str) -> Self {
        Image::new(file).map_or_else(|| rejected(kinds::IMAGE, file), Self::Image)
    }

    pub fn flash_image(file: &str) -> Self {
        Image::new(file).map_or_else(
            || rejected(kinds::IMAGE, file),
            |img| Self::Image(img.with_flash(true)),
        )
    }

    pub fn record(file: &str) -> Self {
        Record::new(file).map_or_else(|| rejected(kinds::RECORD, file), Self::Record)
    }

    pub fn video(file: &str) -> Self {
        Video::new(file).map_or_else(|| rejected(kinds::VIDEO, file), Self::Video)
    }

    pub fn at(user_id: i64) -> Self {
        Self::At {
            target: AtTarget::User(user_id),
        }
    }

    pub fn at_all() -> Self {
        Self::At {
            target: AtTarget::All,
        }
    }

    pub fn reply(message_id: i64) -> Self {
        Self::Reply { id: message_id }
    }

    /// Kind tag used on the wire.
    pub fn kind(&self) -> &str {
        match self {
            Self::Text { .. } => kinds::TEXT,
            Self::Face { .. } => kinds::FACE,
            Self::Image(_) => kinds::IMAGE,
            Self::Record(_) => kinds::RECORD,
            Self::Video(_) => kinds::VIDEO,
            Self::At { .. } => kinds::AT,
            Self::Reply { .. } => kinds::REPLY,
            Self::Unknown { kind, .. } => kind.as_str(),
        }
    }

    /// Serialize into a kind tag and its field map.
    pub fn encode(&self) -> (String, Map<String, Value>) {
        let mut data = Map::new();
        match self {
            Self::Text { text } => {
                data.insert("text".into(), Value::from(text.as_str()));
            },
            Self::Face { id } => {
                data.insert("id".into(), Value::from(*id));
            },
            Self::Image(img) => {
                data.insert("file".into(), Value::from(img.file.as_str()));
                if img.flash {
                    data.insert("type".into(), Value::from("flash"));
                }
                data.insert("cache".into(), flag(img.cache));
                data.insert("proxy".into(), flag(img.proxy));
                insert_opt(&mut data, "timeout", img.timeout.map(Value::from));
                insert_opt(&mut data, "url", img.url.as_deref().map(Value::from));
            },
            Self::Record(rec) => {
                data.insert("file".into(), Value::from(rec.file.as_str()));
                data.insert("magic".into(), flag(rec.magic));
                data.insert("cache".into(), flag(rec.cache));
                data.insert("proxy".into(), flag(rec.proxy));
                insert_opt(&mut data, "timeout", rec.timeout.map(Value::from));
                insert_opt(&mut data, "url", rec.url.as_deref().map(Value::from));
            },
            Self::Video(video) => {
                data.insert("file".into(), Value::from(video.file.as_str()));
                data.insert("cache".into(), flag(video.cache));
                data.insert("proxy".into(), flag(video.proxy));
                insert_opt(&mut data, "timeout", video.timeout.map(Value::from));
                insert_opt(&mut data, "url", video.url.as_deref().map(Value::from));
            },
            Self::At { target } => {
                let qq = match target {
                    AtTarget::All => "all".to_string(),
                    AtTarget::User(id) => id.to_string(),
                };
                data.insert("qq".into(), Value::from(qq));
            },
            Self::Reply { id } => {
                data.insert("id".into(), Value::from(id.to_string()));
            },
            Self::Unknown { data: raw, .. } => data.clone_from(raw),
        }
        (self.kind().to_string(), data)
    }

    /// Build a segment from a kind tag and its field map.
    ///
    /// Values may be JSON-typed or strings (as found in CQ codes).
    pub fn decode(kind: &str, data: &Map<String, Value>) -> Self {
        match kind {
            kinds::TEXT => Self::text(str_field(data, "text").unwrap_or_default()),
            kinds::FACE => match int_field(data, "id") {
                Some(id) => Self::face(id),
                None => rejected(kinds::FACE, "missing id"),
            },
            kinds::IMAGE => {
                let Some(img) = str_field(data, "file").and_then(|f| Image::new(&f)) else {
                    return rejected(kinds::IMAGE, &str_field(data, "file").unwrap_or_default());
                };
                Self::Image(Image {
                    flash: str_field(data, "type").as_deref() == Some("flash"),
                    cache: flag_field(data, "cache", true),
                    proxy: flag_field(data, "proxy", true),
                    timeout: uint_field(data, "timeout"),
                    url: str_field(data, "url"),
                    ..img
                })
            },
            kinds::RECORD => {
                let Some(rec) = str_field(data, "file").and_then(|f| Record::new(&f)) else {
                    return rejected(kinds::RECORD, &str_field(data, "file").unwrap_or_default());
                };
                Self::Record(Record {
                    magic: flag_field(data, "magic", false),
                    cache: flag_field(data, "cache", true),
                    proxy: flag_field(data, "proxy", true),
                    timeout: uint_field(data, "timeout"),
                    url: str_field(data, "url"),
                    ..rec
                })
            },
            kinds::VIDEO => {
                let Some(video) = str_field(data, "file").and_then(|f| Video::new(&f)) else {
                    return rejected(kinds::VIDEO, &str_field(data, "file").unwrap_or_default());
                };
                Self::Video(Video {
                    cache: flag_field(data, "cache", true),
                    proxy: flag_field(data, "proxy", true),
                    timeout: uint_field(data, "timeout"),
                    url: str_field(data, "url"),
                    ..video
                })
            },
            kinds::AT => match str_field(data, "qq").as_deref() {
                Some("all") => Self::at_all(),
                Some(qq) => qq
                    .parse()
                    .map_or_else(|_| rejected(kinds::AT, qq), Self::at),
                None => rejected(kinds::AT, "missing qq"),
            },
            kinds::REPLY => match int_field(data, "id") {
                Some(id) => Self::reply(id),
                None => rejected(kinds::REPLY, "missing id"),
            },
            other => Self::Unknown {
                kind: other.to_string(),
                data: data.clone(),
            },
        }
    }
}

fn rejected(kind: &str, input: &str) -> Segment {
    debug!(kind, input, "rejected segment input, using neutral text");
    Segment::neutral()
}

fn flag(value: bool) -> Value {
    Value::from(u8::from(value))
}

fn insert_opt(data: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        data.insert(key.to_string(), v);
    }
}

fn str_field(data: &Map<String, Value>, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn int_field(data: &Map<String, Value>, key: &str) -> Option<i64> {
    match data.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn uint_field(data: &Map<String, Value>, key: &str) -> Option<u64> {
    int_field(data, key).and_then(|v| u64::try_from(v).ok())
}

/// Accepts `true`/`false`, `0`/`1` and their string forms.
fn flag_field(data: &Map<String, Value>, key: &str, default: bool) -> bool {
    match data.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map_or(default, |v| v != 0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        _ => default,
    }
}

// ── Serde bridge ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSegment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Map<String, Value>,
}

impl From<RawSegment> for Segment {
    fn from(raw: RawSegment) -> Self {
        Segment::decode(&raw.kind, &raw.data)
    }
}

impl From<Segment> for RawSegment {
    fn from(segment: Segment) -> Self {
        let (kind, data) = segment.encode();
        RawSegment { kind, data }
    }
}
