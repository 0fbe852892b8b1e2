//! Shared HTTP plumbing for the GitHub and SonarQube clients.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gitsonar_core::{GitSonarError, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};

/// Boxed future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const BODY_PREVIEW_CHARS: usize = 200;
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
/// Longest wait honoured from a rate-limit answer.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);

/// Retry policy for transient request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the first retry; doubled for every later retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry)
    }
}

/// Send the request built by `build`, retrying transient failures.
///
/// Retried requests must be safe to repeat: reads, the read-only GraphQL
/// query and the create-or-reuse project call. Non-success answers are
/// turned into errors; see [`status_error`]. A rate-limited answer is retried
/// after the wait the server asks for, capped at fifteen minutes.
pub async fn send<B>(service: &'static str, retry: RetryPolicy, build: B) -> Result<Response>
where
    B: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        let (outcome, requested_wait) = match build().send().await {
            Ok(response) => {
                let wait = rate_limit_wait(response.headers(), SystemTime::now());
                (check_status(service, response).await, wait)
            }
            Err(err) => (
                Err(GitSonarError::Network(format!(
                    "{service} request failed: {err}"
                ))),
                None,
            ),
        };
        match outcome {
            Err(err) if err.is_transient() && attempt + 1 < retry.attempts => {
                let delay = requested_wait
                    .unwrap_or_else(|| retry.delay(attempt))
                    .min(MAX_RATE_LIMIT_WAIT);
                log::warn!("{err}; retrying in {}ms", delay.as_millis());
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

async fn check_status(service: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    Err(status_error(service, status, &headers, &body))
}

/// Map an unsuccessful status to the matching error kind.
///
/// Only 401 is an authentication failure. A 403 is a rate limit when the
/// server says so, and otherwise a refusal scoped to the one resource.
pub fn status_error(
    service: &'static str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> GitSonarError {
    let body = preview(body);
    match status {
        StatusCode::UNAUTHORIZED => {
            GitSonarError::Auth(format!("{service} answered {status}: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            GitSonarError::Network(format!("{service} rate limited the request: {body}"))
        }
        StatusCode::FORBIDDEN if is_rate_limited(headers, &body) => {
            GitSonarError::Network(format!("{service} rate limited the request: {body}"))
        }
        status if status.is_server_error() => {
            GitSonarError::Network(format!("{service} answered {status}: {body}"))
        }
        status => GitSonarError::Http {
            service,
            status: status.as_u16(),
            body,
        },
    }
}

fn is_rate_limited(headers: &HeaderMap, body: &str) -> bool {
    header_str(headers, RATE_LIMIT_REMAINING).is_some_and(|remaining| remaining.trim() == "0")
        || headers.contains_key(RETRY_AFTER)
        || body.to_ascii_lowercase().contains("rate limit")
}

/// Wait requested by `retry-after`, or until `x-ratelimit-reset` once the quota is spent.
pub fn rate_limit_wait(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    if let Some(seconds) = header_str(headers, RETRY_AFTER.as_str())
        .and_then(|value| value.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_secs(seconds));
    }
    if header_str(headers, RATE_LIMIT_REMAINING)?.trim() != "0" {
        return None;
    }
    let reset = header_str(headers, RATE_LIMIT_RESET)?
        .trim()
        .parse::<u64>()
        .ok()?;
    let now = now.duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Decode a JSON body.
pub async fn read_json(service: &'static str, response: Response) -> Result<serde_json::Value> {
    response.json::<serde_json::Value>().await.map_err(|err| {
        GitSonarError::MalformedResponse(format!("{service} response decode failed: {err}"))
    })
}

/// Whether a `Link` header advertises another page.
pub fn has_next_page(link: Option<&str>) -> bool {
    link.is_some_and(|link| link.contains("rel=\"next\""))
}

/// Trim a base URL so paths can be appended with a single slash.
pub fn normalize_base_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(GitSonarError::Config("base url is required".to_string()));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut short: String = trimmed.chars().take(BODY_PREVIEW_CHARS).collect();
    short.push_str("...");
    short
}
