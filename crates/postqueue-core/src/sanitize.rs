//! Sanitization of data that leaves the process through logs or the API

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

lazy_static! {
    // Absolute paths (unix and windows) down to a source-ish extension
    static ref FILE_PATH_RE: Regex =
        Regex::new(r"[A-Za-z]:\\[^\s]+|/[^\s]+\.(rs|py|js|ts|json|yaml|yml|toml)").unwrap();
    static ref LINE_NUMBER_RE: Regex = Regex::new(r"line \d+").unwrap();
    static ref OBJECT_REPR_RE: Regex = Regex::new(r"<[^>]+>").unwrap();
}

/// Scrub an error message before it reaches logs or API clients.
///
/// Removes absolute file paths, `line N` fragments and `<object repr>`
/// details that would leak internal structure.
pub fn sanitize_error(error: &str) -> String {
    let s = FILE_PATH_RE.replace_all(error, "[FILE_PATH]");
    let s = LINE_NUMBER_RE.replace_all(&s, "[LINE]");
    let s = OBJECT_REPR_RE.replace_all(&s, "[OBJECT]");
    s.into_owned()
}

/// Short stable digest of post content for log correlation.
///
/// Post bodies are never logged verbatim; this prefix is enough to match
/// duplicate submissions across log lines.
pub fn content_digest(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..8])
}
