use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use super::budget::BudgetPolicy;
use super::http_transport::HttpTransport;
use crate::config::AppConfig;
use crate::error::RelayError;
use crate::protocol::canonical::GenerationRequest;
use crate::protocol::workers_ai::{parse_error_envelope, ErrorEnvelope, TextGenerationBody};

/// Streaming response body of a successful generation call.
pub type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Issues generation calls against `<base_url>/<model>` and recovers once
/// from the over-budget error by shrinking `max_tokens`.
pub struct RequestExecutor {
    transport: HttpTransport,
    base_url: String,
    api_key: String,
    policy: BudgetPolicy,
}

/// A non-success response with its body already read.
struct UpstreamFailure {
    status: u16,
    body: String,
    envelope: ErrorEnvelope,
}

impl UpstreamFailure {
    fn message(&self) -> String {
        self.envelope.first_message(&self.body)
    }

    fn into_error(self) -> RelayError {
        let message = self.message();
        RelayError::Upstream {
            status: self.status,
            message,
        }
    }
}

impl RequestExecutor {
    #[must_use]
    pub fn new(
        transport: HttpTransport,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        policy: BudgetPolicy,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            api_key: api_key.into(),
            policy,
        }
    }

    /// Build an executor with its own connection pool from the app config.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, RelayError> {
        let transport = HttpTransport::new(&config.http, config.provider.proxy.as_deref())?;
        Ok(Self::new(
            transport,
            config.provider.base_url.clone(),
            config.provider.api_key.clone(),
            BudgetPolicy::from(&config.generation),
        ))
    }

    /// Endpoint for a model: the identifier is appended as the final path.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the joined URL does not parse.
    pub fn model_url(&self, model: &str) -> Result<url::Url, RelayError> {
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            model.trim_start_matches('/')
        );
        url::Url::parse(&joined)
            .map_err(|err| RelayError::Config(format!("invalid model URL '{joined}': {err}")))
    }

    /// Send a streamed generation request.
    ///
    /// At most two attempts are made: the original request and, when the
    /// upstream answers with the over-budget error code, one retry with a
    /// reduced `max_tokens`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Upstream`] for any other non-success status or
    /// a failing retry, and [`RelayError::Transport`] when a request cannot be
    /// sent.
    pub async fn execute(&self, request: &GenerationRequest) -> Result<ByteStream, RelayError> {
        tracing::debug!(
            model = request.model(),
            max_tokens = request.max_tokens(),
            "sending generation request"
        );
        let response = self.send(request).await?;
        if response.status().is_success() {
            tracing::debug!(status = response.status().as_u16(), "generation request accepted");
            return Ok(response.bytes_stream().boxed());
        }

        let failure = read_failure(response).await?;
        if !self.policy.is_over_budget(&failure.envelope) {
            tracing::debug!(status = failure.status, "generation request failed");
            return Err(failure.into_error());
        }

        let adjusted = self
            .policy
            .adjusted_ceiling(request.max_tokens(), &failure.message());
        tracing::warn!(
            status = failure.status,
            original_max_tokens = request.max_tokens(),
            adjusted_max_tokens = adjusted,
            "requested tokens exceed context window, retrying with smaller max_tokens"
        );

        let retry = request.with_max_tokens(adjusted);
        let response = self.send(&retry).await?;
        if response.status().is_success() {
            tracing::debug!(
                status = response.status().as_u16(),
                "generation retry accepted"
            );
            return Ok(response.bytes_stream().boxed());
        }

        let failure = read_failure(response).await?;
        tracing::debug!(status = failure.status, "generation retry failed");
        Err(failure.into_error())
    }

    /// POST an already serialized body to a model endpoint, single attempt.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the request cannot be sent.
    pub async fn post_to_model(
        &self,
        model: &str,
        body: Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        let url = self.model_url(model)?;
        self.transport.post_json(&url, &self.api_key, body).await
    }

    async fn send(&self, request: &GenerationRequest) -> Result<reqwest::Response, RelayError> {
        let body = serde_json::to_vec(&TextGenerationBody::from(request))
            .map_err(|err| RelayError::Internal(format!("failed to encode request: {err}")))?;
        self.post_to_model(request.model(), Bytes::from(body)).await
    }
}

async fn read_failure(response: reqwest::Response) -> Result<UpstreamFailure, RelayError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|err| RelayError::Transport(format!("failed to read error body: {err}")))?;
    let envelope = parse_error_envelope(&body);
    Ok(UpstreamFailure {
        status,
        body,
        envelope,
    })
}

/// Turn a non-success response into [`RelayError::Upstream`], or
/// [`RelayError::Transport`] when its body cannot be read.
pub(crate) async fn upstream_error(response: reqwest::Response) -> RelayError {
    match read_failure(response).await {
        Ok(failure) => failure.into_error(),
        Err(err) => err,
    }
}
