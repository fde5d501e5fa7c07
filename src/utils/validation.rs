use std::sync::LazyLock;

use regex::Regex;

use crate::digest::Digest;

const MAX_NAME_LEN: usize = 255;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap()
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").unwrap());

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([0-9]+)-([0-9]+)$").unwrap());

pub fn is_valid_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && NAME_RE.is_match(name)
}

pub fn is_valid_digest(digest: &str) -> bool {
    Digest::parse(digest).is_ok()
}

pub fn is_valid_tag(tag: &str) -> bool {
    TAG_RE.is_match(tag)
}

pub fn is_valid_reference(reference: &str) -> bool {
    is_valid_digest(reference) || is_valid_tag(reference)
}

/// Parses a `Content-Range`-style `<start>-<end>` pair.
pub fn parse_range(range: &str) -> Option<(u64, u64)> {
    let captures = RANGE_RE.captures(range)?;
    let start = captures[1].parse().ok()?;
    let end = captures[2].parse().ok()?;
    Some((start, end))
}
