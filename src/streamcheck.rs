use std::time::Duration;

use log::debug;
use url::{Host, Url};

use crate::encoding;
use crate::models::{ProbeResult, UNKNOWN};
use crate::request::{HttpHeaders, Request};

const MAX_REDIRECTS: u32 = 5;

/// Header-only probe of one candidate stream URL.
///
/// Rejects private and loopback targets before any network traffic, prefers
/// an https upgrade for plain http URLs and falls back to the original only
/// on transport failure, then classifies the response by content type and
/// extracts ICY metadata headers.
pub fn probe(url_str: &str, timeout: Duration) -> ProbeResult {
    let url = match Url::parse(url_str) {
        Ok(url) => url,
        Err(err) => return ProbeResult::failed(url_str, format!("invalid url: {}", err)),
    };
    if blocked_target(&url) {
        return ProbeResult::failed(url_str, String::from("blocked private or loopback address"));
    }
    let url = normalize_url(url);

    let (final_url, response) = if url.scheme() == "http" {
        match https_variant(&url) {
            Some(upgraded) => match fetch_headers(&upgraded, timeout) {
                Ok(response) => (upgraded, Ok(response)),
                // transport-level failure only, a completed https probe is
                // never retried over plain http
                Err(_) => (url.clone(), fetch_headers(&url, timeout)),
            },
            None => (url.clone(), fetch_headers(&url, timeout)),
        }
    } else {
        (url.clone(), fetch_headers(&url, timeout))
    };

    let response = match response {
        Ok(response) => response,
        Err(err) => return ProbeResult::failed(final_url.as_str(), err.to_string()),
    };
    classify(final_url, response)
}

fn fetch_headers(url: &Url, timeout: Duration) -> Result<HttpHeaders, Box<dyn std::error::Error>> {
    let mut current = url.clone();
    for _ in 0..MAX_REDIRECTS {
        let response = Request::new(current.as_str(), timeout)?.connect()?;
        if response.code >= 300 && response.code < 400 {
            let location = response
                .headers
                .get("location")
                .cloned()
                .ok_or_else(|| crate::request::RequestError::new("redirect without location"))?;
            current = current.join(&location)?;
            if blocked_target(&current) {
                return Err(Box::new(crate::request::RequestError::new(
                    "redirect to blocked address",
                )));
            }
            debug!("following redirect to {}", current);
            continue;
        }
        return Ok(response);
    }
    Err(Box::new(crate::request::RequestError::new(
        "too many redirects",
    )))
}

fn classify(url: Url, response: HttpHeaders) -> ProbeResult {
    if response.code < 200 || response.code >= 300 {
        return ProbeResult::failed(
            url.as_str(),
            format!("http status {} {}", response.code, response.message),
        );
    }
    let content_type = response
        .headers
        .get("content-type")
        .map(|value| value.split(';').next().unwrap_or("").trim().to_lowercase())
        .unwrap_or_default();
    if !content_type.starts_with("audio/") {
        return ProbeResult::failed(
            url.as_str(),
            format!("not an audio stream (content-type '{}')", content_type),
        );
    }

    let header = |key: &str| response.headers.get(key).cloned().unwrap_or_default();
    let raw_name = header("icy-name");
    let description = encoding::repair(&header("icy-description"));
    let homepage_hint = header("icy-url");
    let genre = encoding::repair(&header("icy-genre"));
    let bitrate = parse_bitrate(&header("icy-br"));

    let name = if !raw_name.trim().is_empty() {
        encoding::repair(raw_name.trim())
    } else if !homepage_hint.trim().is_empty() {
        homepage_hint.trim().to_string()
    } else if !description.trim().is_empty() {
        description.trim().to_string()
    } else {
        UNKNOWN.to_string()
    };

    ProbeResult {
        ok: true,
        url: url.to_string(),
        name,
        description,
        homepage_hint,
        is_live: true,
        genre,
        content_type,
        bitrate,
        error: String::new(),
    }
}

/// First element of a comma separated bitrate header, 0 when unparseable.
pub fn parse_bitrate(raw: &str) -> u32 {
    raw.split(',')
        .next()
        .unwrap_or("")
        .trim()
        .parse()
        .unwrap_or(0)
}

/// Private, loopback and link-local targets are refused outright. This is a
/// security boundary for user-submitted URLs, not input validation.
pub fn blocked_target(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.to_lowercase();
            domain == "localhost" || domain.ends_with(".localhost") || domain == "localhost."
        }
        Some(Host::Ipv4(ip)) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Some(Host::Ipv6(ip)) => {
            ip.is_loopback()
                || ip.is_unspecified()
                || (ip.segments()[0] & 0xfe00) == 0xfc00
                || (ip.segments()[0] & 0xffc0) == 0xfe80
        }
        None => true,
    }
}

/// Canonical form: lowercased host and scheme, default ports stripped
/// (the url crate drops those on serialization), trailing '?' removed.
pub fn normalize_url(mut url: Url) -> Url {
    if url.query() == Some("") {
        url.set_query(None);
    }
    url
}

pub fn https_variant(url: &Url) -> Option<Url> {
    let mut upgraded = url.clone();
    upgraded.set_scheme("https").ok()?;
    Some(upgraded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[test]
    fn private_and_loopback_targets_are_blocked() {
        for url in &[
            "http://localhost/stream",
            "http://localhost:8000/stream",
            "http://127.0.0.1/",
            "http://127.8.8.8:8000/",
            "http://10.0.0.1/stream",
            "http://172.16.4.4/stream",
            "http://192.168.1.50:8000/",
            "http://169.254.13.37/",
            "http://0.0.0.0:8000/",
            "http://[::1]/stream",
            "http://[fe80::1]/stream",
            "http://[fd00::2]/stream",
        ] {
            assert!(blocked_target(&parse(url)), "{} should be blocked", url);
        }
    }

    #[test]
    fn public_targets_are_not_blocked() {
        for url in &[
            "http://stream.example.com:8000/live",
            "http://8.8.8.8/stream",
            "https://radio.example.org/",
        ] {
            assert!(!blocked_target(&parse(url)), "{} should pass", url);
        }
    }

    #[test]
    fn blocked_target_fails_without_network() {
        let result = probe("http://192.168.0.1:8000/live", Duration::from_millis(1));
        assert!(!result.ok);
        assert!(result.error.contains("blocked"));
    }

    #[test]
    fn invalid_url_fails_fast() {
        let result = probe("not a url", Duration::from_millis(1));
        assert!(!result.ok);
        assert!(result.error.contains("invalid url"));
    }

    #[test]
    fn bitrate_parsing() {
        assert_eq!(parse_bitrate("128,128"), 128);
        assert_eq!(parse_bitrate("192"), 192);
        assert_eq!(parse_bitrate(" 64 "), 64);
        assert_eq!(parse_bitrate("abc"), 0);
        assert_eq!(parse_bitrate(""), 0);
    }

    #[test]
    fn normalization_strips_default_port_and_bare_query() {
        assert_eq!(
            normalize_url(parse("http://example.com:80/stream?")).as_str(),
            "http://example.com/stream"
        );
        assert_eq!(
            normalize_url(parse("https://Example.COM:443/live")).as_str(),
            "https://example.com/live"
        );
        // real query strings survive
        assert_eq!(
            normalize_url(parse("http://example.com/s?mount=a")).as_str(),
            "http://example.com/s?mount=a"
        );
    }

    #[test]
    fn https_variant_keeps_path() {
        let upgraded = https_variant(&parse("http://example.com/live")).unwrap();
        assert_eq!(upgraded.as_str(), "https://example.com/live");
    }

    fn response(code: u32, pairs: &[(&str, &str)]) -> HttpHeaders {
        HttpHeaders {
            code,
            message: String::new(),
            version: String::from("1.1"),
            headers: pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    #[test]
    fn non_audio_content_type_is_not_ok() {
        let result = classify(
            parse("http://x.example/"),
            response(200, &[("content-type", "text/html; charset=utf-8")]),
        );
        assert!(!result.ok);
        assert!(result.error.contains("not an audio stream"));
        assert!(result.error.contains("text/html"));
    }

    #[test]
    fn missing_content_type_is_not_ok() {
        let result = classify(parse("http://x.example/"), response(200, &[]));
        assert!(!result.ok);
        assert!(result.error.contains("not an audio stream"));
    }

    #[test]
    fn non_2xx_status_is_not_ok() {
        let result = classify(
            parse("http://x.example/"),
            response(404, &[("content-type", "audio/mpeg")]),
        );
        assert!(!result.ok);
        assert!(result.error.contains("404"));
    }

    #[test]
    fn audio_response_yields_metadata() {
        let result = classify(
            parse("http://x.example/stream"),
            response(
                200,
                &[
                    ("content-type", "audio/mpeg"),
                    ("icy-name", "Test FM"),
                    ("icy-genre", "rock"),
                    ("icy-br", "128,128"),
                    ("icy-url", "http://testfm.example/"),
                ],
            ),
        );
        assert!(result.ok);
        assert!(result.is_live);
        assert_eq!(result.name, "Test FM");
        assert_eq!(result.genre, "rock");
        assert_eq!(result.bitrate, 128);
        assert_eq!(result.content_type, "audio/mpeg");
        assert_eq!(result.homepage_hint, "http://testfm.example/");
        assert!(result.error.is_empty());
    }

    #[test]
    fn name_falls_back_to_homepage_hint_then_unknown() {
        let with_hint = classify(
            parse("http://x.example/"),
            response(
                200,
                &[("content-type", "audio/aacp"), ("icy-url", "http://hint.example/")],
            ),
        );
        assert_eq!(with_hint.name, "http://hint.example/");

        let bare = classify(
            parse("http://x.example/"),
            response(200, &[("content-type", "audio/aacp")]),
        );
        assert_eq!(bare.name, UNKNOWN);
    }
}
