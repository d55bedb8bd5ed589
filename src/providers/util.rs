use crate::core::config::AppConfig;
use crate::core::rate::FetchError;
use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP behaviour shared by every source.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub insecure_tls: bool,
    pub retries: usize,
    pub retry_delay_ms: u64,
}

impl HttpSettings {
    pub fn from_config(config: &AppConfig, insecure_tls: bool) -> Self {
        Self {
            timeout: config.timeout(),
            insecure_tls,
            retries: config.retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            insecure_tls: false,
            retries: 0,
            retry_delay_ms: 500,
        }
    }
}

pub fn build_client(settings: &HttpSettings) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("ratekeeper/", env!("CARGO_PKG_VERSION")))
        .timeout(settings.timeout);
    if settings.insecure_tls {
        warn!("TLS certificate verification is DISABLED for this source");
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build().context("Failed to build HTTP client")
}

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// # Returns
/// Either the successful result or the error after all attempts
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    retries: usize,
    delay_ms: u64,
) -> Result<T, reqwest::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

/// GETs `url` and returns the body of a successful response.
pub async fn get_text(
    client: &reqwest::Client,
    url: &str,
    settings: &HttpSettings,
) -> Result<String, FetchError> {
    debug!("Requesting {}", url);
    let response = with_retry(
        || async { client.get(url).send().await?.error_for_status() },
        settings.retries,
        settings.retry_delay_ms,
    )
    .await
    .map_err(|e| FetchError::Transport(format!("GET {url}: {e}")))?;

    response
        .text()
        .await
        .map_err(|e| FetchError::Transport(format!("reading body from {url}: {e}")))
}

/// First `max` characters of a response body, for diagnostics.
pub fn snippet(body: &str, max: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_text_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rates"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let settings = HttpSettings::default();
        let client = build_client(&settings).unwrap();
        let body = get_text(&client, &format!("{}/rates", server.uri()), &settings)
            .await
            .unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn test_get_text_maps_error_status_to_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let settings = HttpSettings::default();
        let client = build_client(&settings).unwrap();
        let err = get_text(&client, &server.uri(), &settings)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[tokio::test]
    async fn test_retry_stops_after_configured_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let settings = HttpSettings {
            retries: 2,
            retry_delay_ms: 1,
            ..HttpSettings::default()
        };
        let client = build_client(&settings).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let result = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { client.get(server.uri()).send().await?.error_for_status() }
            },
            settings.retries,
            settings.retry_delay_ms,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_insecure_client_builds() {
        let settings = HttpSettings {
            insecure_tls: true,
            ..HttpSettings::default()
        };
        assert!(build_client(&settings).is_ok());
    }

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        assert_eq!(snippet("  short ", 10), "short");
        assert_eq!(snippet("курс валют", 4), "курс...");
    }
}
