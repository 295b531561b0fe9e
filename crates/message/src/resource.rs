//! Resource references for media segments.
//!
//! A reference is a plain string: an absolute path, a `base64://` blob, an
//! HTTP(S) URL or a bare media filename. There is no type tag; the string is
//! recognized by matching it against a fixed list of patterns.

use std::sync::LazyLock;

use {
    base64::{
        Engine,
        alphabet,
        engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    },
    regex::Regex,
};

const BASE64_PREFIX: &str = "base64://";

/// Accepts bodies with or without `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[allow(clippy::expect_used)]
static WINDOWS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[A-Za-z]:\\(?:[^\\/:*?"<>|\r\n]+\\)*[^\\/:*?"<>|\r\n]*$"#)
        .expect("windows path pattern")
});

#[allow(clippy::expect_used)]
static UNIX_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/[^/\x00\r\n][^\x00\r\n]*$").expect("unix path pattern"));

#[allow(clippy::expect_used)]
static BASE64_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").expect("base64 pattern"));

#[allow(clippy::expect_used)]
static HTTP_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://[^\s/?#]+\S*$").expect("url pattern"));

#[allow(clippy::expect_used)]
static MEDIA_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[\w\-. ,()\[\]]+\.(?:png|jpe?g|gif|bmp|webp|image|amr|silk|mp3|wav|ogg|flac|m4a|mp4)$",
    )
    .expect("filename pattern")
});

#[allow(clippy::expect_used)]
static FILE_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^file:///?[^\x00\r\n]+$").expect("file uri pattern"));

/// What a reference string was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    AbsolutePath,
    Base64,
    Url,
    FileName,
    FileUri,
}

fn is_absolute_path(input: &str) -> bool {
    WINDOWS_PATH.is_match(input) || UNIX_PATH.is_match(input)
}

fn is_base64(input: &str) -> bool {
    let Some(body) = input.strip_prefix(BASE64_PREFIX) else {
        return false;
    };
    BASE64_BODY.is_match(body) && LENIENT_BASE64.decode(body).is_ok()
}

/// First matching kind, in matcher order.
pub fn classify(input: &str) -> Option<ResourceKind> {
    if input.is_empty() {
        return None;
    }
    if is_absolute_path(input) {
        Some(ResourceKind::AbsolutePath)
    } else if is_base64(input) {
        Some(ResourceKind::Base64)
    } else if HTTP_URL.is_match(input) {
        Some(ResourceKind::Url)
    } else if MEDIA_FILENAME.is_match(input) {
        Some(ResourceKind::FileName)
    } else if FILE_URI.is_match(input) {
        Some(ResourceKind::FileUri)
    } else {
        None
    }
}

/// Validate a reference and return the form to put on the wire.
///
/// Absolute paths become `file://` URIs; every other recognized reference is
/// returned unchanged. `None` means the reference was rejected.
pub fn normalize(input: Option<&str>) -> Option<String> {
    let input = input?;
    match classify(input)? {
        ResourceKind::AbsolutePath if input.starts_with('/') => Some(format!("file://{input}")),
        ResourceKind::AbsolutePath => Some(format!("file:///{input}")),
        _ => Some(input.to_string()),
    }
}
