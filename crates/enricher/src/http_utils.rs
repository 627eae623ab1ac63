use crate::{EnrichError, EnrichErrorKind};

/// Scheme, host and port only. RPC URLs carry API keys in the path, so the
/// full URL must never reach logs or audit records.
pub fn redacted_endpoint_label(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return "unknown".to_string();
    }
    match reqwest::Url::parse(endpoint) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("unknown");
            match url.port() {
                Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                None => format!("{}://{}", url.scheme(), host),
            }
        }
        Err(_) => "invalid_endpoint".to_string(),
    }
}

pub(crate) fn classify_request_error(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else if error.is_request() {
        "request"
    } else if error.is_body() {
        "body"
    } else if error.is_decode() {
        "decode"
    } else if error.is_redirect() {
        "redirect"
    } else if error.is_status() {
        "status"
    } else {
        "other"
    }
}

/// Maps a reqwest failure to an [`EnrichError`] without echoing the URL.
pub(crate) fn request_error(error: reqwest::Error, endpoint_label: &str) -> EnrichError {
    let class = classify_request_error(&error);
    let kind = match class {
        "timeout" => EnrichErrorKind::Timeout,
        "decode" | "body" => EnrichErrorKind::Decode,
        "status" => EnrichErrorKind::HttpStatus,
        _ => EnrichErrorKind::Transport,
    };
    EnrichError::new(
        kind,
        format!(
            "{class} error talking to {endpoint_label}: {}",
            error.without_url()
        ),
    )
}
