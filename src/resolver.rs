use axum::http::HeaderMap;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Returned when no proxy header identifies the client (local development).
pub const SENTINEL_IP: &str = "127.0.0.1";

type Extractor = fn(&str) -> Option<String>;

/// Proxy headers in priority order. The first one present decides the result.
const PRECEDENCE: [(&str, Extractor); 5] = [
    ("x-forwarded-for", first_hop),
    ("x-real-ip", verbatim),
    ("cf-connecting-ip", verbatim),
    ("x-vercel-forwarded-for", first_hop),
    ("forwarded", forwarded_for),
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
    pub timestamp: String,
    pub headers: RawHeaders,
}

/// The proxy header values as received, for diagnosis.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHeaders {
    pub forwarded: Option<String>,
    pub real_ip: Option<String>,
    pub cf_connecting_ip: Option<String>,
    pub vercel_forwarded_for: Option<String>,
    pub forwarded_standard: Option<String>,
}

/// All values of a header joined with `", "`, or `None` if it is absent.
fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<_> = headers
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

fn first_hop(value: &str) -> Option<String> {
    let first = value.split(',').next().unwrap_or(value);
    Some(first.trim().to_string())
}

fn verbatim(value: &str) -> Option<String> {
    Some(value.to_string())
}

/// Value of the first `for=` parameter of an RFC 7239 `Forwarded` header,
/// with quotes and IPv6 brackets removed.
fn forwarded_for(value: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `value`.
    let lower = value.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("for=") {
        let start = from + pos + "for=".len();
        let rest = &value[start..];
        let end = rest.find(&[';', ','][..]).unwrap_or(rest.len());
        if end > 0 {
            let raw = &rest[..end];
            let raw = raw.strip_prefix('"').unwrap_or(raw);
            let raw = raw.strip_suffix('"').unwrap_or(raw);
            let raw = raw.strip_prefix('[').unwrap_or(raw);
            let raw = raw.strip_suffix(']').unwrap_or(raw);
            return Some(raw.to_string());
        }
        from = start;
    }
    None
}

/// Best-guess client IP from the proxy headers.
///
/// Empty header values count as absent. Once a header from the precedence
/// table is present its extractor decides: if it yields nothing, the result
/// is [`SENTINEL_IP`] and lower-priority headers are not consulted.
pub fn client_ip(headers: &HeaderMap) -> String {
    for (name, extract) in PRECEDENCE {
        let Some(value) = header(headers, name).filter(|v| !v.is_empty()) else {
            continue;
        };
        return extract(&value).unwrap_or_else(|| SENTINEL_IP.to_string());
    }
    SENTINEL_IP.to_string()
}

pub fn resolve(headers: &HeaderMap) -> ResolvedIdentity {
    ResolvedIdentity {
        ip: client_ip(headers),
        user_agent: header(headers, "user-agent")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        referer: header(headers, "referer")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "Direct".to_string()),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        headers: RawHeaders {
            forwarded: header(headers, "x-forwarded-for"),
            real_ip: header(headers, "x-real-ip"),
            cf_connecting_ip: header(headers, "cf-connecting-ip"),
            vercel_forwarded_for: header(headers, "x-vercel-forwarded-for"),
            forwarded_standard: header(headers, "forwarded"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use proptest::prelude::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_no_headers_yields_sentinel() {
        assert_eq!(client_ip(&HeaderMap::new()), "127.0.0.1");
    }

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let h = headers(&[("x-forwarded-for", " 203.0.113.7 , 10.0.0.1, 10.0.0.2")]);
        assert_eq!(client_ip(&h), "203.0.113.7");
    }

    #[test]
    fn test_precedence_order() {
        let h = headers(&[
            ("x-real-ip", "1.1.1.1"),
            ("cf-connecting-ip", "2.2.2.2"),
            ("x-vercel-forwarded-for", "3.3.3.3"),
            ("forwarded", "for=4.4.4.4"),
        ]);
        assert_eq!(client_ip(&h), "1.1.1.1");

        let h = headers(&[
            ("cf-connecting-ip", "2.2.2.2"),
            ("x-vercel-forwarded-for", "3.3.3.3"),
        ]);
        assert_eq!(client_ip(&h), "2.2.2.2");

        let h = headers(&[
            ("x-vercel-forwarded-for", "3.3.3.3, 9.9.9.9"),
            ("forwarded", "for=4.4.4.4"),
        ]);
        assert_eq!(client_ip(&h), "3.3.3.3");
    }

    #[test]
    fn test_real_ip_is_verbatim() {
        let h = headers(&[("x-real-ip", "1.1.1.1, 2.2.2.2")]);
        assert_eq!(client_ip(&h), "1.1.1.1, 2.2.2.2");
    }

    #[test]
    fn test_empty_header_is_skipped() {
        let h = headers(&[("x-forwarded-for", ""), ("x-real-ip", "1.1.1.1")]);
        assert_eq!(client_ip(&h), "1.1.1.1");
    }

    #[test]
    fn test_forwarded_ipv6_unwrapped() {
        let h = headers(&[("forwarded", r#"for="[2001:db8::1]""#)]);
        assert_eq!(client_ip(&h), "2001:db8::1");
    }

    #[test]
    fn test_forwarded_stops_at_semicolon() {
        let h = headers(&[("forwarded", "for=1.2.3.4;proto=https")]);
        assert_eq!(client_ip(&h), "1.2.3.4");
    }

    #[test]
    fn test_forwarded_case_insensitive_and_first_element() {
        let h = headers(&[("forwarded", "proto=http;FOR=5.6.7.8, for=9.9.9.9")]);
        assert_eq!(client_ip(&h), "5.6.7.8");
    }

    #[test]
    fn test_forwarded_skips_empty_for_value() {
        assert_eq!(forwarded_for("for=;for=1.2.3.4"), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn test_forwarded_without_for_falls_to_sentinel() {
        // Present but unparsable: lower-priority headers are not consulted.
        let h = headers(&[("forwarded", "proto=https;by=10.0.0.1")]);
        assert_eq!(client_ip(&h), SENTINEL_IP);
        assert_eq!(forwarded_for("for="), None);
    }

    #[test]
    fn test_repeated_headers_are_joined() {
        let mut h = HeaderMap::new();
        h.append("forwarded", HeaderValue::from_static("proto=https;by=10.0.0.1"));
        h.append("forwarded", HeaderValue::from_static("for=198.51.100.4"));
        assert_eq!(client_ip(&h), "198.51.100.4");
        assert_eq!(
            resolve(&h).headers.forwarded_standard.as_deref(),
            Some("proto=https;by=10.0.0.1, for=198.51.100.4")
        );

        let mut h = HeaderMap::new();
        h.append("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        h.append("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        assert_eq!(client_ip(&h), "203.0.113.1");
    }

    #[test]
    fn test_resolve_defaults_and_raw_headers() {
        let h = headers(&[("x-real-ip", "1.1.1.1"), ("forwarded", "for=2.2.2.2")]);
        let identity = resolve(&h);
        assert_eq!(identity.ip, "1.1.1.1");
        assert_eq!(identity.user_agent, "Unknown");
        assert_eq!(identity.referer, "Direct");
        assert_eq!(identity.headers.real_ip.as_deref(), Some("1.1.1.1"));
        assert_eq!(identity.headers.forwarded_standard.as_deref(), Some("for=2.2.2.2"));
        assert!(identity.headers.forwarded.is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(&identity.timestamp).is_ok());
        assert!(identity.timestamp.ends_with('Z'));
    }

    #[test]
    fn test_resolve_serializes_camel_case() {
        let h = headers(&[("user-agent", "curl/8.0"), ("referer", "https://example.com")]);
        let json = serde_json::to_value(resolve(&h)).unwrap();
        assert_eq!(json["ip"], "127.0.0.1");
        assert_eq!(json["userAgent"], "curl/8.0");
        assert_eq!(json["referer"], "https://example.com");
        assert!(json["headers"]["cfConnectingIp"].is_null());
        assert!(json["headers"]["vercelForwardedFor"].is_null());
        assert!(json["headers"]["forwardedStandard"].is_null());
    }

    proptest! {
        #[test]
        fn prop_forwarded_for_wins(
            first in "[0-9a-f.:]{1,39}",
            rest in "[0-9., ]{0,30}",
            real in "[0-9.]{1,15}",
        ) {
            let xff = format!("{},{}", first, rest);
            let h = headers(&[
                ("x-forwarded-for", xff.as_str()),
                ("x-real-ip", real.as_str()),
                ("cf-connecting-ip", real.as_str()),
                ("forwarded", "for=8.8.8.8"),
            ]);
            prop_assert_eq!(client_ip(&h), first.trim().to_string());
        }
    }
}
