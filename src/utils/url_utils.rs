//! URL normalization and domain admission checks
//!
//! The normalized form of a URL is the cache's primary key: scheme unified
//! to https, host lowercased with any `www.` prefix stripped, fragment
//! dropped, query pairs sorted, and the trailing slash removed. Two spellings
//! of the same page normalize to the same key.

use anyhow::{Context, Result, bail};
use url::Url;

/// Produce the canonical cache key for a raw URL.
///
/// Inputs without a scheme are given `default_scheme` before parsing, so
/// `example.com/page` is accepted. Only http(s) URLs are analyzable.
pub fn normalize_url(raw: &str, default_scheme: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("empty URL");
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{default_scheme}://{trimmed}")
    };

    let mut url = Url::parse(&candidate).with_context(|| format!("failed to parse URL: {trimmed}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => bail!("unsupported scheme: {other}"),
    }

    // Unify scheme so http:// and https:// spellings share one cache entry
    if url.scheme() == "http" && url.set_scheme("https").is_err() {
        bail!("failed to unify scheme for {trimmed}");
    }

    if url.host_str().is_none() {
        bail!("URL has no host: {trimmed}");
    }
    let bare_host: Option<String> = url
        .host_str()
        .and_then(|h| h.strip_prefix("www."))
        .filter(|h| !h.is_empty())
        .map(str::to_string);
    if let Some(bare) = bare_host {
        url.set_host(Some(&bare))
            .with_context(|| format!("invalid host in {trimmed}"))?;
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            pairs.sort();
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut key = url.to_string();
    // Url serializes a bare host as "https://host/"; drop the lone slash
    if url.path() == "/" && url.query().is_none() && key.ends_with('/') {
        key.pop();
    }

    Ok(key)
}

/// Extract the host from a normalized key
#[must_use]
pub fn host_of(key: &str) -> Option<String> {
    Url::parse(key)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Check whether a host passes the configured domain lists.
///
/// Rules, highest precedence first: a match in the blocked list denies; a
/// non-empty allowlist admits only matching hosts; an empty allowlist admits
/// everything else. Matching is case-insensitive substring on the host.
#[must_use]
pub fn is_domain_allowed(host: &str, allowed: &[String], blocked: &[String]) -> bool {
    let host = host.to_ascii_lowercase();

    if blocked
        .iter()
        .any(|b| !b.is_empty() && host.contains(&b.to_ascii_lowercase()))
    {
        return false;
    }

    if allowed.is_empty() {
        return true;
    }

    allowed
        .iter()
        .any(|a| !a.is_empty() && host.contains(&a.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(
            normalize_url("https://example.com/page", "https").unwrap(),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_normalize_unifies_scheme_and_host() {
        assert_eq!(
            normalize_url("http://WWW.Example.COM/page", "https").unwrap(),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_normalize_strips_trailing_slash_and_fragment() {
        assert_eq!(
            normalize_url("https://example.com/a/b/#section", "https").unwrap(),
            "https://example.com/a/b"
        );
        assert_eq!(
            normalize_url("https://example.com/", "https").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn test_normalize_sorts_query() {
        assert_eq!(
            normalize_url("https://example.com/p?b=2&a=1", "https").unwrap(),
            normalize_url("https://example.com/p?a=1&b=2", "https").unwrap()
        );
    }

    #[test]
    fn test_normalize_default_scheme() {
        assert_eq!(
            normalize_url("example.com/page", "https").unwrap(),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        assert!(normalize_url("", "https").is_err());
        assert!(normalize_url("   ", "https").is_err());
        assert!(normalize_url("ftp://example.com", "https").is_err());
        assert!(normalize_url("javascript:alert(1)", "https").is_err());
    }

    #[test]
    fn test_domain_allowed_rules() {
        let allowed = vec!["example.com".to_string()];
        let blocked = vec!["evil.com".to_string()];

        assert!(is_domain_allowed("example.com", &allowed, &blocked));
        assert!(is_domain_allowed("sub.example.com", &allowed, &blocked));
        assert!(!is_domain_allowed("other.com", &allowed, &blocked));
        assert!(!is_domain_allowed("evil.com", &[], &blocked));
        // blocked wins even when allowlisted
        assert!(!is_domain_allowed(
            "evil.com",
            &["evil.com".to_string()],
            &blocked
        ));
        // empty allowlist admits everything not blocked
        assert!(is_domain_allowed("anything.org", &[], &blocked));
    }
}
