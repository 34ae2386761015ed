//! Shared ureq plumbing for the HTTP backends: one JSON POST, with every
//! failure mode mapped onto a [`FailureCategory`].

use crate::failure::{FailureCategory, ProviderFailure};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct HttpReply<T> {
    pub status: u16,
    pub body: T,
}

pub fn post_json<T: DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
    headers: &[(&str, String)],
    body: &Value,
    timeout: Duration,
) -> Result<HttpReply<T>, ProviderFailure> {
    let mut request = agent.post(url).timeout(timeout);
    for (name, value) in headers {
        request = request.set(name, value);
    }

    match request.send_json(body) {
        Ok(response) => {
            let status = response.status();
            let raw = response.into_string().map_err(|err| {
                ProviderFailure::new(
                    classify_io_error(&err),
                    format!("failed to read response body: {err}"),
                )
                .with_status(status)
            })?;
            let body = serde_json::from_str::<T>(&raw).map_err(|err| {
                ProviderFailure::new(
                    FailureCategory::UnknownError,
                    format!(
                        "malformed response body: {err}: {}",
                        truncate(&raw, MAX_ERROR_BODY_CHARS)
                    ),
                )
                .with_status(status)
            })?;
            Ok(HttpReply { status, body })
        }
        Err(ureq::Error::Status(status, response)) => {
            let retry_after = response.header("retry-after").and_then(parse_retry_after);
            let text = response.into_string().unwrap_or_default();
            Err(ProviderFailure::new(
                classify_http_status(status),
                format!("HTTP {status}: {}", truncate(text.trim(), MAX_ERROR_BODY_CHARS)),
            )
            .with_status(status)
            .with_retry_after(retry_after))
        }
        Err(ureq::Error::Transport(transport)) => Err(ProviderFailure::new(
            classify_transport(&transport),
            format!("transport error: {transport}"),
        )),
    }
}

pub fn classify_http_status(status: u16) -> FailureCategory {
    match status {
        400 | 404 | 413 | 415 | 422 => FailureCategory::ValidationError,
        401 | 403 => FailureCategory::AuthError,
        429 => FailureCategory::RateLimitError,
        408 | 504 => FailureCategory::TimeoutError,
        500..=599 => FailureCategory::ServerError,
        _ => FailureCategory::UnknownError,
    }
}

fn classify_transport(transport: &ureq::Transport) -> FailureCategory {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return classify_io_error(io);
        }
        source = err.source();
    }
    match transport.kind() {
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Io => {
            if transport.to_string().to_ascii_lowercase().contains("timed out") {
                FailureCategory::TimeoutError
            } else {
                FailureCategory::ServerError
            }
        }
        _ => FailureCategory::UnknownError,
    }
}

fn classify_io_error(err: &std::io::Error) -> FailureCategory {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            FailureCategory::TimeoutError
        }
        _ => FailureCategory::ServerError,
    }
}

/// Only the delay-seconds form; HTTP-date values are ignored.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn truncate(raw: &str, max_chars: usize) -> String {
    if raw.chars().count() <= max_chars {
        return raw.to_string();
    }
    let mut cut = raw.chars().take(max_chars).collect::<String>();
    cut.push('…');
    cut
}
