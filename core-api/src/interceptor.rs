//! # Interceptor Pipeline
//!
//! Three ordered chains run around every network round trip:
//!
//! - request interceptors rewrite the outgoing [`RequestDescriptor`]
//! - response interceptors rewrite the [`ResponseEnvelope`]
//! - error interceptors enrich an [`ApiError`] before it reaches the caller
//!
//! Stages run strictly in registration order and each one receives the
//! previous stage's output. A failing request or response stage aborts the
//! chain with [`ErrorKind::InterceptorFailure`](crate::ErrorKind). Error
//! interceptors cannot fail; they must hand back an error.
//!
//! The pipeline is assembled once with [`InterceptorPipeline::builder`] and
//! is immutable afterwards.
//!
//! ```rust
//! use core_api::interceptor::InterceptorPipeline;
//!
//! let pipeline = InterceptorPipeline::builder().with_default_logging().build();
//! assert_eq!(pipeline.len(), 3);
//! ```

use crate::error::ApiError;
use async_trait::async_trait;
use bridge_traits::http::{HttpMethod, HttpRequest};
use bytes::Bytes;
use chrono::Utc;
use core_runtime::logging::redact_if_sensitive;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Free-form per-request annotations shared between stages.
pub type Metadata = serde_json::Map<String, Value>;

/// Error type interceptors may return from request and response stages.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Metadata key holding the epoch-millisecond time the request left.
pub const START_TIME_KEY: &str = "startTime";
/// Metadata key holding the orchestrator's retry counter.
pub const RETRY_COUNT_KEY: &str = "retryCount";

/// Outgoing request as seen by interceptors.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub metadata: Metadata,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HashMap::new(),
            body: None,
            metadata: Metadata::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn json_body(mut self, body: &Value) -> serde_json::Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    pub(crate) fn to_http_request(&self, timeout: Duration) -> HttpRequest {
        HttpRequest {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            timeout: Some(timeout),
        }
    }
}

/// Response of one network round trip as seen by interceptors.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub status_code: u16,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Carried over from the request descriptor
    pub metadata: Metadata,
    pub body: Bytes,
}

impl ResponseEnvelope {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Decodes the body; an empty body decodes as JSON `null`.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_value(Value::Null);
        }
        serde_json::from_slice(&self.body)
    }

    /// Best human-readable failure message: the body's `message` or `error`
    /// field when present, otherwise a generic status line.
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<Value>(&self.body)
            .ok()
            .and_then(|body| {
                ["message", "error"]
                    .iter()
                    .find_map(|field| body.get(field).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or_else(|| format!("Request failed with status {}", self.status_code))
    }
}

#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn on_request(&self, request: RequestDescriptor) -> Result<RequestDescriptor, BoxError>;
}

#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_response(&self, response: ResponseEnvelope) -> Result<ResponseEnvelope, BoxError>;
}

#[async_trait]
pub trait ErrorInterceptor: Send + Sync {
    async fn on_error(&self, error: ApiError) -> ApiError;
}

/// Immutable, ordered interceptor chains.
#[derive(Clone, Default)]
pub struct InterceptorPipeline {
    request: Vec<Arc<dyn RequestInterceptor>>,
    response: Vec<Arc<dyn ResponseInterceptor>>,
    error: Vec<Arc<dyn ErrorInterceptor>>,
}

impl InterceptorPipeline {
    pub fn builder() -> InterceptorPipelineBuilder {
        InterceptorPipelineBuilder::default()
    }

    /// Total number of registered stages.
    pub fn len(&self) -> usize {
        self.request.len() + self.response.len() + self.error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn run_request(&self, mut request: RequestDescriptor) -> Result<RequestDescriptor, ApiError> {
        for interceptor in &self.request {
            let url = request.url.clone();
            request = interceptor
                .on_request(request)
                .await
                .map_err(|e| ApiError::interceptor(url, format!("Request interceptor failed: {}", e)))?;
        }
        Ok(request)
    }

    pub async fn run_response(&self, mut response: ResponseEnvelope) -> Result<ResponseEnvelope, ApiError> {
        for interceptor in &self.response {
            let url = response.url.clone();
            response = interceptor.on_response(response).await.map_err(|e| {
                ApiError::interceptor(url, format!("Response interceptor failed: {}", e))
            })?;
        }
        Ok(response)
    }

    pub async fn run_error(&self, mut error: ApiError) -> ApiError {
        for interceptor in &self.error {
            error = interceptor.on_error(error).await;
        }
        error
    }
}

impl std::fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorPipeline")
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .field("error", &self.error.len())
            .finish()
    }
}

/// Collects stages in registration order.
#[derive(Default)]
pub struct InterceptorPipelineBuilder {
    pipeline: InterceptorPipeline,
}

impl InterceptorPipelineBuilder {
    pub fn request<I: RequestInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.pipeline.request.push(Arc::new(interceptor));
        self
    }

    pub fn response<I: ResponseInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.pipeline.response.push(Arc::new(interceptor));
        self
    }

    pub fn error<I: ErrorInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.pipeline.error.push(Arc::new(interceptor));
        self
    }

    /// Appends the built-in request, response and error loggers.
    pub fn with_default_logging(self) -> Self {
        self.request(RequestLogger)
            .response(ResponseLogger)
            .error(ErrorLogger)
    }

    pub fn build(self) -> InterceptorPipeline {
        self.pipeline
    }
}

// ============================================================================
// Built-in interceptors
// ============================================================================

/// Stamps `metadata.startTime` and logs the outgoing request.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogger;

#[async_trait]
impl RequestInterceptor for RequestLogger {
    async fn on_request(&self, mut request: RequestDescriptor) -> Result<RequestDescriptor, BoxError> {
        request
            .metadata
            .insert(START_TIME_KEY.to_string(), Utc::now().timestamp_millis().into());

        let headers: Vec<String> = request
            .headers
            .iter()
            .map(|(name, value)| format!("{}={}", name, redact_if_sensitive(name, value)))
            .collect();

        debug!(
            method = %request.method,
            url = %request.url,
            headers = ?headers,
            retry_count = ?request.metadata.get(RETRY_COUNT_KEY),
            "API request"
        );
        Ok(request)
    }
}

/// Logs status and elapsed time measured from `metadata.startTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseLogger;

#[async_trait]
impl ResponseInterceptor for ResponseLogger {
    async fn on_response(&self, response: ResponseEnvelope) -> Result<ResponseEnvelope, BoxError> {
        let duration_ms = response
            .metadata
            .get(START_TIME_KEY)
            .and_then(Value::as_i64)
            .map(|start| Utc::now().timestamp_millis() - start);

        debug!(
            status = response.status_code,
            url = %response.url,
            duration_ms = ?duration_ms,
            "API response"
        );
        Ok(response)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorLogger;

#[async_trait]
impl ErrorInterceptor for ErrorLogger {
    async fn on_error(&self, error: ApiError) -> ApiError {
        warn!(
            kind = %error.kind,
            status = ?error.status_code,
            endpoint = %error.endpoint,
            message = %error.message,
            "API error"
        );
        error
    }
}
