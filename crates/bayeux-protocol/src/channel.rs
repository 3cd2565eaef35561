//! Channel naming rules.
//!
//! Channel names are absolute, slash-separated paths such as `/chat/lobby`.
//! A pattern replaces the last segment with `*` (exactly one segment) or
//! `**` (any number of segments).

/// Handshake meta channel.
pub const HANDSHAKE: &str = "/meta/handshake";
/// Connect meta channel.
pub const CONNECT: &str = "/meta/connect";
/// Subscribe meta channel.
pub const SUBSCRIBE: &str = "/meta/subscribe";
/// Unsubscribe meta channel.
pub const UNSUBSCRIBE: &str = "/meta/unsubscribe";
/// Disconnect meta channel.
pub const DISCONNECT: &str = "/meta/disconnect";

const META_PREFIX: &str = "/meta/";
const SERVICE_PREFIX: &str = "/service/";

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '!' | '~' | '(' | ')' | '$' | '@')
}

fn is_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(is_segment_char)
}

/// Split a channel name into its segments.
///
/// Returns `None` if the name is not absolute or has an empty segment.
#[must_use]
pub fn parse(name: &str) -> Option<Vec<&str>> {
    let rest = name.strip_prefix('/')?;
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}

/// Check whether `name` is a concrete channel name (no wildcards).
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    parse(name).is_some_and(|segments| segments.iter().all(|s| is_segment(s)))
}

/// Check whether `name` is a wildcard pattern ending in `/*` or `/**`.
#[must_use]
pub fn is_pattern(name: &str) -> bool {
    let prefix = name
        .strip_suffix("/**")
        .or_else(|| name.strip_suffix("/*"));

    match prefix {
        Some("") => true,
        Some(prefix) => is_valid_name(prefix),
        None => false,
    }
}

/// Check whether `name` is a `/meta/` channel.
#[must_use]
pub fn is_meta(name: &str) -> bool {
    name.starts_with(META_PREFIX)
}

/// Check whether `name` is a `/service/` channel.
#[must_use]
pub fn is_service(name: &str) -> bool {
    name.starts_with(SERVICE_PREFIX)
}

/// Check whether a client may subscribe to `name`.
///
/// Valid names and patterns are subscribable unless they sit under `/meta/`
/// or `/service/`.
#[must_use]
pub fn is_subscribable(name: &str) -> bool {
    (is_valid_name(name) || is_pattern(name)) && !is_meta(name) && !is_service(name)
}

/// Expand a concrete channel name into every pattern that matches it.
///
/// `/foo/bar/baz` expands to `/**`, `/foo/bar/baz`, `/foo/bar/*`,
/// `/foo/**` and `/foo/bar/**`.
#[must_use]
pub fn expand(name: &str) -> Vec<String> {
    let Some(segments) = parse(name) else {
        return vec![name.to_string()];
    };

    let mut channels = vec!["/**".to_string(), name.to_string()];

    let parent = &segments[..segments.len() - 1];
    channels.push(unparse(parent.iter().copied().chain(["*"])));

    for i in 1..segments.len() {
        channels.push(unparse(segments[..i].iter().copied().chain(["**"])));
    }

    channels
}

fn unparse<'a>(segments: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}
