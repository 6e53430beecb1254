//! History pagination classifier.
//!
//! A request counts as history pagination only when all of these hold:
//!
//! - **Host**: one of the chat application's hostnames.
//! - **Method**: GET or POST.
//! - **Allow-list**: the session check and model list paths are never
//!   pagination, whatever their query says.
//! - **Path family**: conversation/message/thread/graphql endpoints.
//! - **Marker**: an explicit pagination marker in the query string
//!   (`cursor`, `before`, `offset > 0`, `page > 1`, backwards `direction`).
//!
//! Unparameterized loads never match, so a first page load is never blocked.

use url::Url;

/// Hostnames of the chat application.
pub const HOSTS: [&str; 2] = ["chat.openai.com", "chatgpt.com"];

/// Paths that must always reach the network.
const ALLOW_LISTED_SUFFIXES: [&str; 2] = ["/api/auth/session", "/backend-api/models"];

/// Path fragments of the history endpoint family.
const HISTORY_PATH_FRAGMENTS: [&str; 10] = [
    "backend-api/conversation",
    "backend-api/messages",
    "/history",
    "/messages",
    "/conversation",
    "/threads",
    "/graphql",
    "/gql",
    "/v1/messages",
    "/v1/threads",
];

/// Whether `host` is one of the application's hostnames.
pub fn is_target_host(host: &str) -> bool {
    HOSTS.contains(&host)
}

/// Classify an absolute request URL. Malformed URLs are never history.
pub fn is_history_request(method: &str, url: &str) -> bool {
    match Url::parse(url) {
        Ok(u) => is_history_method(method) && is_history_url(&u),
        Err(_) => false,
    }
}

/// Classify a possibly-relative URL against the page origin.
pub fn classify_relative(method: &str, url: &str, base: &Url) -> bool {
    match base.join(url) {
        Ok(u) => is_history_method(method) && is_history_url(&u),
        Err(_) => false,
    }
}

fn is_history_method(method: &str) -> bool {
    method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("POST")
}

/// Host, allow-list, path family and pagination marker checks on a parsed URL.
pub fn is_history_url(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if !is_target_host(host) {
        return false;
    }

    let path = url.path().to_ascii_lowercase();
    if ALLOW_LISTED_SUFFIXES.iter().any(|s| path.ends_with(s)) {
        return false;
    }
    if !HISTORY_PATH_FRAGMENTS.iter().any(|f| path.contains(f)) {
        return false;
    }

    has_pagination_marker(url)
}

/// Whether the query string carries an explicit "older data" marker.
pub fn has_pagination_marker(url: &Url) -> bool {
    let first = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };

    if first("cursor").is_some() || first("before").is_some() {
        return true;
    }
    if first("offset").and_then(|v| parse_number(&v)).is_some_and(|n| n > 0.0) {
        return true;
    }
    if first("page").and_then(|v| parse_number(&v)).is_some_and(|n| n > 1.0) {
        return true;
    }
    let direction = first("direction").unwrap_or_default().to_ascii_lowercase();
    direction.contains("back") || direction.contains("prev")
}

/// Lenient numeric parse: an empty value counts as zero.
fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

// ─── Tests ──────────────────────────────────────────────────────────
