//! The executor boundary: what actually performs a scrape.
//!
//! The queue and workers never look inside a job's target or config; they
//! hand both to an [`Executor`] and record whatever comes back. Real
//! scraping logic (stealth, rendering, enrichment) plugs in here.
//!
//! Two implementations ship with the crate:
//!
//! - [`FnExecutor`]: wraps an async closure, handy for tests and embedding
//! - [`HttpExecutor`]: a plain HTTP GET used by the command-line tool

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Url};
use serde_json::{json, Value};

use crate::error::ExecutorError;
use crate::scheduler::job::JobConfig;

/// User agent sent by `HttpExecutor` when the job config names none.
pub const DEFAULT_USER_AGENT: &str = concat!("scrape-queue/", env!("CARGO_PKG_VERSION"));

/// Performs the work of one job attempt.
///
/// Implementations must be cheap to share across workers. Any error is
/// reported to the queue as a failed attempt and may be retried.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Scrapes `target` using `config` and returns the result payload.
    async fn execute(&self, target: &str, config: &JobConfig) -> Result<Value, ExecutorError>;
}

/// Executor backed by an async closure.
///
/// ```ignore
/// let executor = FnExecutor::new(|target, _config| async move {
///     Ok(serde_json::json!({ "target": target }))
/// });
/// ```
pub struct FnExecutor<F> {
    func: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(String, JobConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(String, JobConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
{
    async fn execute(&self, target: &str, config: &JobConfig) -> Result<Value, ExecutorError> {
        (self.func)(target.to_string(), config.clone()).await
    }
}

/// Fetches the target with a single HTTP GET.
///
/// Recognized job config keys:
///
/// - `user_agent`: string sent as the `User-Agent` header
/// - `headers`: object of extra header names to string values
///
/// The result holds the final URL, status, content type and body text.
/// Non-2xx responses are errors.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl HttpExecutor {
    /// Creates an executor whose requests give up after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Creates an executor from an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, target: &str, config: &JobConfig) -> Result<Value, ExecutorError> {
        let url = parse_target(target)?;
        let headers = request_headers(config)?;

        let response = self.client.get(url).headers(headers).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            return Err(ExecutorError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        tracing::debug!(url = %final_url, bytes = body.len(), "Fetched target");

        Ok(json!({
            "url": target,
            "final_url": final_url,
            "status": status.as_u16(),
            "content_type": content_type,
            "content_length": body.len(),
            "body": body,
        }))
    }
}

fn parse_target(target: &str) -> Result<Url, ExecutorError> {
    let url = Url::parse(target).map_err(|e| ExecutorError::InvalidTarget {
        target: target.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ExecutorError::InvalidTarget {
            target: target.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

fn request_headers(config: &JobConfig) -> Result<HeaderMap, ExecutorError> {
    let mut headers = HeaderMap::new();

    let user_agent = match config.get("user_agent") {
        None => DEFAULT_USER_AGENT,
        Some(Value::String(ua)) => ua.as_str(),
        Some(_) => {
            return Err(ExecutorError::InvalidConfig(
                "user_agent must be a string".to_string(),
            ))
        }
    };
    headers.insert(USER_AGENT, header_value("user_agent", user_agent)?);

    match config.get("headers") {
        None => {}
        Some(Value::Object(extra)) => {
            for (name, value) in extra {
                let Value::String(value) = value else {
                    return Err(ExecutorError::InvalidConfig(format!(
                        "header '{}' must be a string",
                        name
                    )));
                };
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    ExecutorError::InvalidConfig(format!("invalid header name '{}': {}", name, e))
                })?;
                let value = header_value(name.as_str(), value)?;
                headers.insert(name, value);
            }
        }
        Some(_) => {
            return Err(ExecutorError::InvalidConfig(
                "headers must be an object".to_string(),
            ))
        }
    }

    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ExecutorError> {
    HeaderValue::from_str(value).map_err(|e| {
        ExecutorError::InvalidConfig(format!("invalid value for header '{}': {}", name, e))
    })
}
