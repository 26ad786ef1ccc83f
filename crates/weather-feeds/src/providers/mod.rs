use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::{PROVIDER_TIMEOUT_SECS, RetryPolicy};

pub mod openweathermap;

const PROVIDER_NAME: &str = "http";
const REDACTED: &str = "***";
const SECRET_MARKERS: &[&str] = &["appid=", "api_key=", "key=", "token=", "secret="];

/// "Fetch URL, get bytes".
pub trait FeedFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}

impl<T: FeedFetcher + ?Sized> FeedFetcher for &T {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        (**self).fetch(url)
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    retry_policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            retry_policy: RetryPolicy::default(),
        })
    }
}

impl FeedFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        debug!(url = %redact_secrets(url), "fetching feed document");
        execute_with_retry(
            PROVIDER_NAME,
            self.retry_policy,
            || execute_request(self.client.get(url)),
            std::thread::sleep,
        )
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn execute_request(request: RequestBuilder) -> Result<Vec<u8>, ProviderError> {
    let response = request
        .send()
        .map_err(|error| ProviderError::Transport(error.to_string()))?;
    let status = response.status();
    let body = response
        .bytes()
        .map_err(|error| ProviderError::Transport(error.to_string()))?;

    if status.is_success() {
        return Ok(body.to_vec());
    }

    let message = extract_error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });

    Err(ProviderError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Pulls `message` out of a JSON error body such as
/// `{"cod":401,"message":"Invalid API key"}`.
fn extract_error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|payload| payload.message)
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
}

/// Masks credential values (`appid=`, `key=`, ...) in a URL or message so
/// it is safe to log or print.
pub fn redact_secrets(text: &str) -> String {
    let mut output = text.to_string();
    for marker in SECRET_MARKERS {
        output = redact_after_marker(&output, marker);
    }
    output
}

fn redact_after_marker(input: &str, marker: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let mut output = String::with_capacity(input.len());
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find(marker) {
        let value_start = cursor + found + marker.len();
        output.push_str(&input[cursor..value_start]);

        if input[value_start..].starts_with(REDACTED) {
            output.push_str(REDACTED);
            cursor = value_start + REDACTED.len();
            continue;
        }

        let value_end = find_value_end(input, value_start);
        if value_start < value_end {
            output.push_str(REDACTED);
        }
        cursor = value_end;
    }

    output.push_str(&input[cursor..]);
    output
}

fn find_value_end(input: &str, mut index: usize) -> usize {
    let bytes = input.as_bytes();
    while index < bytes.len() {
        let byte = bytes[index];
        if byte.is_ascii_whitespace() || matches!(byte, b'&' | b',' | b';' | b')' | b']' | b'}') {
            break;
        }
        index += 1;
    }
    index
}

pub fn execute_with_retry<T, F, S>(
    provider_name: &'static str,
    policy: RetryPolicy,
    mut operation: F,
    mut sleep_fn: S,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Result<T, ProviderError>,
    S: FnMut(Duration),
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.retryable() || attempt == max_attempts {
                    return Err(error.with_provider(provider_name));
                }

                let delay = policy.backoff_for_attempt(attempt + 1);
                debug!(attempt, delay_ms = delay, %error, "retrying fetch");
                sleep_fn(Duration::from_millis(delay));
            }
        }
    }

    Err(ProviderError::InvalidResponse(format!(
        "{provider_name}: exhausted retry attempts"
    )))
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            ProviderError::InvalidResponse(_) => false,
        }
    }

    pub fn with_provider(self, provider: &'static str) -> Self {
        match self {
            ProviderError::Transport(message) => {
                ProviderError::Transport(format!("{provider}: {message}"))
            }
            ProviderError::Http { status, message } => ProviderError::Http {
                status,
                message: format!("{provider}: {message}"),
            },
            ProviderError::InvalidResponse(message) => {
                ProviderError::InvalidResponse(format!("{provider}: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn transient_failures_are_retried_with_backoff() {
        let attempts = Rc::new(RefCell::new(0usize));
        let observed_sleep = Rc::new(RefCell::new(Vec::<u64>::new()));
        let attempts_for_op = Rc::clone(&attempts);
        let sleeps_for_op = Rc::clone(&observed_sleep);

        let result = execute_with_retry(
            "owm",
            RetryPolicy {
                max_attempts: 2,
                base_backoff_ms: 25,
            },
            move || {
                let mut value = attempts_for_op.borrow_mut();
                *value += 1;
                if *value < 2 {
                    return Err(ProviderError::Transport("timeout".to_string()));
                }
                Ok(b"{}".to_vec())
            },
            move |delay| sleeps_for_op.borrow_mut().push(delay.as_millis() as u64),
        )
        .expect("should succeed on retry");

        assert_eq!(result, b"{}".to_vec());
        assert_eq!(*attempts.borrow(), 2);
        assert_eq!(*observed_sleep.borrow(), vec![25]);
    }

    #[test]
    fn client_errors_fail_without_retry() {
        let attempts = Rc::new(RefCell::new(0usize));
        let attempts_for_op = Rc::clone(&attempts);

        let error = execute_with_retry::<(), _, _>(
            "owm",
            RetryPolicy::default(),
            move || {
                *attempts_for_op.borrow_mut() += 1;
                Err(ProviderError::Http {
                    status: 401,
                    message: "Invalid API key".to_string(),
                })
            },
            |_| {},
        )
        .expect_err("401 is final");

        assert_eq!(*attempts.borrow(), 1);
        assert_eq!(error.to_string(), "http error (401): owm: Invalid API key");
    }

    #[test]
    fn retryable_statuses_are_rate_limit_and_server_errors() {
        let http = |status| ProviderError::Http {
            status,
            message: String::new(),
        };
        assert!(http(429).retryable());
        assert!(http(503).retryable());
        assert!(!http(400).retryable());
        assert!(!ProviderError::InvalidResponse("x".to_string()).retryable());
    }

    #[test]
    fn redact_secrets_masks_credentials_only() {
        assert_eq!(
            redact_secrets("https://api.example.test/onecall?lat=1&appid=secret&units=metric"),
            "https://api.example.test/onecall?lat=1&appid=***&units=metric"
        );
        assert_eq!(
            redact_secrets("request failed: api_key=abc, token=xyz"),
            "request failed: api_key=***, token=***"
        );
        assert_eq!(redact_secrets("https://a.test/path"), "https://a.test/path");
    }

    #[test]
    fn error_body_message_is_extracted() {
        assert_eq!(
            extract_error_message(br#"{"cod":401,"message":" Invalid API key "}"#).as_deref(),
            Some("Invalid API key")
        );
        assert_eq!(extract_error_message(b"<html/>"), None);
    }
}
