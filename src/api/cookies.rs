//! Minimal cookie helpers. The middleware stack only ever needs to read
//! one cookie at a time and set one at a time, so this skips pulling in a
//! dedicated cookie-jar crate in favor of the teacher's pattern of reaching
//! for `axum`/`http` primitives directly wherever a full crate would be
//! overkill.

use axum::http::{header, HeaderMap, HeaderValue};

pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let pair = pair.trim();
        let (key, value) = pair.split_once('=')?;
        if key == name {
            Some(value.to_string())
        } else {
            None
        }
    })
}

pub struct CookieOpts {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: &'static str,
    pub max_age_seconds: Option<u64>,
}

impl Default for CookieOpts {
    fn default() -> Self {
        Self { http_only: true, secure: false, same_site: "Strict", max_age_seconds: None }
    }
}

pub fn set_cookie_header(name: &str, value: &str, opts: &CookieOpts) -> HeaderValue {
    let mut raw = format!("{name}={value}; Path=/; SameSite={}", opts.same_site);
    if opts.http_only {
        raw.push_str("; HttpOnly");
    }
    if opts.secure {
        raw.push_str("; Secure");
    }
    if let Some(max_age) = opts.max_age_seconds {
        raw.push_str(&format!("; Max-Age={max_age}"));
    }
    HeaderValue::from_str(&raw).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn clear_cookie_header(name: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("{name}=; Path=/; Max-Age=0")).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Bytewise constant-time equality, used for CSRF token and credential
/// comparisons so string length/content mismatches can't be timed.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Request is TLS-direct (never true behind this process) or arrived via
/// a reverse proxy that set `X-Forwarded-Proto: https`.
pub fn is_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_cookie_finds_named_value_among_several() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("a=1; session=tok123; csrf_token=xyz"));
        assert_eq!(get_cookie(&headers, "session"), Some("tok123".to_string()));
        assert_eq!(get_cookie(&headers, "missing"), None);
    }

    #[test]
    fn constant_time_eq_rejects_differing_length_and_content() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn is_https_reads_forwarded_proto_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert!(is_https(&headers));
        assert!(!is_https(&HeaderMap::new()));
    }
}
