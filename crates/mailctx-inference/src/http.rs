use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use mailctx_core::errors::InferenceError;
use mailctx_core::provider::{SignalExtractor, TextGenerator};
use mailctx_core::signal::AnalysisSignal;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_client(timeout: Duration) -> Result<Client, InferenceError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .map_err(|e| InferenceError::InvalidRequest(format!("failed to build HTTP client: {e}")))
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout(timeout)
    } else {
        InferenceError::NetworkError(e.to_string())
    }
}

/// Turn a non-success response into a classified error, honouring a
/// `Retry-After` header (in seconds) on 429.
async fn error_from_response(resp: Response) -> InferenceError {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return InferenceError::RateLimited { retry_after };
    }
    InferenceError::from_status(status.as_u16(), body)
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
}

/// Signal extraction delegated to a remote service that accepts
/// `{"text": ...}` and answers with an [`AnalysisSignal`] document.
pub struct HttpExtractor {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpExtractor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, InferenceError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SignalExtractor for HttpExtractor {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, text), fields(url = %self.url, len = text.len()))]
    async fn infer(&self, text: &str) -> Result<AnalysisSignal, InferenceError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&ExtractRequest { text })
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        if !resp.status().is_success() {
            let err = error_from_response(resp).await;
            warn!(kind = err.error_kind(), error = %err, "extraction request failed");
            return Err(err);
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;
        serde_json::from_slice(&body).map_err(|e| InferenceError::MalformedOutput(e.to_string()))
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(alias = "content")]
    text: String,
}

/// Text generation against a remote completion endpoint that accepts
/// `{"model", "prompt"}` and answers with `{"text": ...}`.
pub struct HttpGenerator {
    client: Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl HttpGenerator {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            model: model.into(),
            timeout,
        })
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    fn name(&self) -> &str {
        "http"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt), fields(url = %self.url, model = %self.model))]
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
            })
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        if !resp.status().is_success() {
            let err = error_from_response(resp).await;
            warn!(kind = err.error_kind(), error = %err, "generation request failed");
            return Err(err);
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;
        let parsed: GenerateResponse = serde_json::from_slice(&body)
            .map_err(|e| InferenceError::MalformedOutput(e.to_string()))?;
        if parsed.text.trim().is_empty() {
            return Err(InferenceError::MalformedOutput("empty completion".into()));
        }
        Ok(parsed.text)
    }
}
