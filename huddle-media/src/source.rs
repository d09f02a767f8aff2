//! Query classification and URL canonicalisation.
//!
//! Decides whether a query is already playable, a platform page that needs
//! a stream lookup, or free text to search for. Canonical URLs are used to
//! recognise the same track across repeated radio batches.

use crate::config::ResolverConfig;
use crate::types::SourceKind;
use url::Url;

/// Query parameters that never identify a track and are stripped.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "si",
    "feature",
    "list",
    "index",
    "pp",
];

/// Classify a user query.
///
/// Only `http`/`https` URLs count as URLs; anything else (including
/// `ytsearch:foo`, which parses as a URL with an odd scheme) is a search term.
pub fn classify(query: &str, config: &ResolverConfig) -> SourceKind {
    let Some(parsed) = parse_http_url(query.trim()) else {
        return SourceKind::SearchTerm;
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if is_platform_host(&host, &config.platform_hosts) {
        SourceKind::PlatformUrl
    } else {
        SourceKind::DirectUrl
    }
}

/// Returns true when `query` is an `http` or `https` URL.
pub fn is_url(query: &str) -> bool {
    parse_http_url(query.trim()).is_some()
}

fn parse_http_url(raw: &str) -> Option<Url> {
    if raw.contains(char::is_whitespace) {
        return None;
    }
    let parsed = Url::parse(raw).ok()?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Some(parsed),
        _ => None,
    }
}

fn is_platform_host(host: &str, platform_hosts: &[String]) -> bool {
    let host = host.strip_prefix("www.").unwrap_or(host);
    platform_hosts.iter().any(|p| {
        let p = p.trim().to_ascii_lowercase();
        !p.is_empty() && (host == p || host.ends_with(&format!(".{p}")))
    })
}

/// Canonicalise a URL for identity comparison.
///
/// Lowercases scheme and host, drops the fragment, drops tracking and
/// playlist-position parameters, and sorts what is left. Unparseable input
/// is returned trimmed but otherwise unchanged.
pub fn canonical_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw.trim()) else {
        return raw.trim().to_owned();
    };
    parsed.set_fragment(None);

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.to_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        parsed.set_query(None);
    } else {
        let qs = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&qs));
    }

    let mut out = parsed.to_string();
    if out.ends_with('/') && parsed.path() != "/" {
        out.pop();
    }
    out
}
