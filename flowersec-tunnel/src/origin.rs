//! Origin allow-list matching for the Attach handshake (spec.md §4.3, §8).
//!
//! Patterns come in four shapes: a full `scheme://host[:port]` origin, a bare
//! `host[:port]`, a bare hostname, and a `*.base` wildcard matching any
//! strict subdomain of `base`. Host comparison is always case-insensitive;
//! ports are canonicalized against the scheme's default the way `url`
//! already canonicalizes `Url::port()`.

fn split_host_port(s: &str) -> (&str, Option<u16>) {
    if let Some(idx) = s.rfind(':') {
        let (host, rest) = s.split_at(idx);
        if let Ok(port) = rest[1..].parse::<u16>() {
            return (host, Some(port));
        }
    }
    (s, None)
}

fn parse_origin(origin: &str) -> Option<(String, Option<u16>)> {
    let url = url::Url::parse(origin).ok()?;
    let host = url.host_str()?.to_string();
    Some((host, url.port()))
}

fn pattern_matches(pattern: &str, host: &str, port: Option<u16>) -> bool {
    if pattern.eq_ignore_ascii_case("null") {
        return false;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host.len() > suffix.len() && host.to_ascii_lowercase().ends_with(&format!(".{}", suffix.to_ascii_lowercase()));
    }
    if pattern.contains("://") {
        let Ok(parsed) = url::Url::parse(pattern) else { return false };
        let Some(phost) = parsed.host_str() else { return false };
        return phost.eq_ignore_ascii_case(host) && parsed.port() == port;
    }
    let (phost, pport) = split_host_port(pattern);
    match pport {
        Some(pport) => phost.eq_ignore_ascii_case(host) && Some(pport) == port,
        None => phost.eq_ignore_ascii_case(host),
    }
}

/// Whether `origin` (the WebSocket `Origin` header value, if any) passes
/// `allowed_origins` under `allow_no_origin`.
pub fn is_origin_allowed(origin: Option<&str>, allowed_origins: &[String], allow_no_origin: bool) -> bool {
    let origin = match origin {
        Some(o) if !o.is_empty() => o,
        _ => return allow_no_origin,
    };
    if origin.eq_ignore_ascii_case("null") {
        return allowed_origins.iter().any(|p| p.eq_ignore_ascii_case("null"));
    }
    let Some((host, port)) = parse_origin(origin) else { return false };
    allowed_origins.iter().any(|pattern| pattern_matches(pattern, &host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_origin_rejected_unless_enabled() {
        let allowed = vec!["example.com".to_string()];
        assert!(!is_origin_allowed(None, &allowed, false));
        assert!(is_origin_allowed(None, &allowed, true));
    }

    #[test]
    fn null_origin_requires_exact_null_pattern() {
        let allowed = vec!["null".to_string()];
        assert!(is_origin_allowed(Some("null"), &allowed, false));
        assert!(!is_origin_allowed(Some("null"), &[], false));
    }

    #[test]
    fn bare_hostname_matches_case_insensitively() {
        let allowed = vec!["example.com".to_string()];
        assert!(is_origin_allowed(Some("https://EXAMPLE.com"), &allowed, false));
        assert!(is_origin_allowed(Some("https://example.com:443"), &allowed, false));
    }

    #[test]
    fn wildcard_rejects_bare_base_accepts_subdomain() {
        let allowed = vec!["*.example.com".to_string()];
        assert!(!is_origin_allowed(Some("https://example.com"), &allowed, false));
        assert!(is_origin_allowed(Some("https://a.EXAMPLE.com"), &allowed, false));
    }

    #[test]
    fn host_port_pattern_matches_case_insensitively_and_rejects_wrong_port() {
        let allowed = vec!["example.com:5173".to_string()];
        assert!(is_origin_allowed(Some("http://EXAMPLE.com:5173"), &allowed, false));
        assert!(!is_origin_allowed(Some("http://example.com:5174"), &allowed, false));
    }

    #[test]
    fn scheme_qualified_pattern_matches_host_and_port() {
        let allowed = vec!["https://app.example.com".to_string()];
        assert!(is_origin_allowed(Some("https://app.example.com"), &allowed, false));
        assert!(!is_origin_allowed(Some("https://other.example.com"), &allowed, false));
    }

    #[test]
    fn malformed_origin_is_rejected() {
        let allowed = vec!["example.com".to_string()];
        assert!(!is_origin_allowed(Some("not a url"), &allowed, false));
    }
}
