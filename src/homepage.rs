use std::time::Duration;

use log::debug;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::request::USER_AGENT;
use crate::streamcheck;

/// Best-effort check of a station's advertised homepage. Returns the usable
/// homepage URL only when the target answers 2xx with an HTML content type;
/// any failure is a `None`, never an error.
pub fn resolve(hint: &str, timeout: Duration) -> Option<String> {
    let url = candidate_url(hint)?;
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .ok()?;
    let response = match client.head(url.as_str()).send() {
        Ok(response) => response,
        Err(err) => {
            debug!("homepage check failed for {}: {}", url, err);
            return None;
        }
    };
    if !response.status().is_success() {
        return None;
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if content_type.starts_with("text/html") || content_type.starts_with("application/xhtml") {
        Some(url.to_string())
    } else {
        None
    }
}

/// Shape a raw homepage hint into something fetchable: trim, default the
/// scheme to http, refuse non-http schemes and blocked addresses.
pub fn candidate_url(hint: &str) -> Option<Url> {
    let hint = hint.trim();
    if hint.is_empty() {
        return None;
    }
    let with_scheme = if hint.contains("://") {
        hint.to_string()
    } else {
        format!("http://{}", hint)
    };
    let url = Url::parse(&with_scheme).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    if streamcheck::blocked_target(&url) {
        return None;
    }
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::candidate_url;

    #[test]
    fn bare_hostname_gets_a_scheme() {
        assert_eq!(
            candidate_url("www.example.com").unwrap().as_str(),
            "http://www.example.com/"
        );
    }

    #[test]
    fn existing_scheme_is_kept() {
        assert_eq!(
            candidate_url("https://example.com/radio").unwrap().as_str(),
            "https://example.com/radio"
        );
    }

    #[test]
    fn junk_hints_are_rejected() {
        assert!(candidate_url("").is_none());
        assert!(candidate_url("   ").is_none());
        assert!(candidate_url("ftp://example.com/").is_none());
        assert!(candidate_url("http://192.168.0.1/").is_none());
        assert!(candidate_url("http://localhost/").is_none());
    }
}
