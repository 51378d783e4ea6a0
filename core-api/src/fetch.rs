//! Timeout-bounded network call wrapped in the interceptor pipeline.

use crate::error::{ApiError, Result};
use crate::interceptor::{InterceptorPipeline, RequestDescriptor, ResponseEnvelope};
use bridge_traits::http::{HttpClient, HttpResponse};
use bridge_traits::BridgeError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// One network round trip: request interceptors, transport call bounded by a
/// timer (and optionally a caller's cancellation token), then response or
/// error interceptors.
///
/// Non-2xx statuses are returned as responses; deciding what they mean is
/// the orchestrator's job.
#[derive(Clone)]
pub struct ResilientFetch {
    http_client: Arc<dyn HttpClient>,
    pipeline: InterceptorPipeline,
}

impl ResilientFetch {
    pub fn new(http_client: Arc<dyn HttpClient>, pipeline: InterceptorPipeline) -> Self {
        Self {
            http_client,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &InterceptorPipeline {
        &self.pipeline
    }

    /// Sends `request`, failing with `RequestTimeout` if no response arrives
    /// within `timeout` and with `Cancelled` if `cancel` fires first.
    ///
    /// The timer is dropped on every exit path.
    #[instrument(skip(self, request, cancel), fields(method = %request.method, url = %request.url))]
    pub async fn fetch(
        &self,
        request: RequestDescriptor,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<ResponseEnvelope> {
        let endpoint = request.url.clone();

        let request = match self.pipeline.run_request(request).await {
            Ok(request) => request,
            Err(error) => return Err(self.pipeline.run_error(error).await),
        };

        let call = tokio::time::timeout(
            timeout,
            self.http_client.execute(request.to_http_request(timeout)),
        );

        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(ApiError::cancelled(&endpoint)),
                result = call => classify(result, &endpoint, timeout),
            },
            None => classify(call.await, &endpoint, timeout),
        };

        match outcome {
            Ok(response) => {
                let envelope = ResponseEnvelope {
                    status_code: response.status,
                    url: request.url,
                    headers: response.headers,
                    metadata: request.metadata,
                    body: response.body,
                };
                match self.pipeline.run_response(envelope).await {
                    Ok(envelope) => Ok(envelope),
                    Err(error) => Err(self.pipeline.run_error(error).await),
                }
            }
            Err(error) => Err(self.pipeline.run_error(error).await),
        }
    }
}

fn classify(
    result: std::result::Result<bridge_traits::error::Result<HttpResponse>, Elapsed>,
    endpoint: &str,
    timeout: Duration,
) -> Result<HttpResponse> {
    match result {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(BridgeError::Timeout(_))) | Err(_) => Err(ApiError::timeout(endpoint, timeout)),
        Ok(Err(error)) => Err(ApiError::from_bridge(error, endpoint)),
    }
}
