use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mediaforge_contracts::context::present;
use mediaforge_contracts::providers::{NamedProvider, GEMINI_PROVIDER};
use mediaforge_contracts::{
    BusinessContext, Dimensions, FailureKind, GenerationRequest, ProviderFailure,
};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::provider::{
    api_base_from_env, compose_prompt, string_field, transport_failure, truncate_text, Generated,
    MediaProvider, ProviderOutcome,
};
use crate::retry::RetryPolicy;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_MODELS: &[&str] = &[
    "gemini-2.5-flash-image",
    "gemini-2.0-flash-preview-image-generation",
];

/// Multi-model diffusion backend. Models are tried in order and the next one
/// is used only when the current one is unknown to the backend. Retryable
/// failures are retried on the current model, so a missing model is asked
/// once per invocation.
pub struct GeminiProvider {
    api_base: String,
    models: Vec<String>,
    model_retry: Option<RetryPolicy>,
    http: Client,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self::with_api_base(api_base_from_env("GEMINI_API_BASE", DEFAULT_API_BASE))
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            models: DEFAULT_MODELS.iter().map(|model| model.to_string()).collect(),
            model_retry: None,
            http: Client::new(),
        }
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let models: Vec<String> = models
            .into_iter()
            .map(Into::into)
            .filter(|model| !model.trim().is_empty())
            .collect();
        if !models.is_empty() {
            self.models = models;
        }
        self
    }

    /// Pins the per-model policy instead of following the orchestrator's.
    pub fn with_model_retry(mut self, policy: RetryPolicy) -> Self {
        self.model_retry = Some(policy);
        self
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn nearest_ratio(dimensions: Dimensions) -> &'static str {
        let target = dimensions.aspect_ratio();
        let candidates = [
            ("1:1", 1.0f64),
            ("2:3", 2.0 / 3.0),
            ("3:2", 3.0 / 2.0),
            ("3:4", 3.0 / 4.0),
            ("4:3", 4.0 / 3.0),
            ("4:5", 4.0 / 5.0),
            ("5:4", 5.0 / 4.0),
            ("9:16", 9.0 / 16.0),
            ("16:9", 16.0 / 9.0),
            ("21:9", 21.0 / 9.0),
        ];
        let mut best_key = "1:1";
        let mut best_delta = f64::MAX;
        for (key, ratio) in candidates {
            let delta = (ratio - target).abs();
            if delta < best_delta {
                best_key = key;
                best_delta = delta;
            }
        }
        best_key
    }

    fn payload(request: &GenerationRequest, context: &BusinessContext) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": compose_prompt(request, context) }],
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "aspectRatio": Self::nearest_ratio(request.dimensions),
                },
            },
        })
    }

    /// Error bodies are `{"error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": ...}}`.
    fn failure_from_body(status: u16, body: &str) -> ProviderFailure {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error = parsed.as_ref().and_then(|value| value.get("error"));
        let code = error.and_then(|value| string_field(value, "status"));
        let message = error
            .and_then(|value| string_field(value, "message"))
            .map(str::to_string)
            .unwrap_or_else(|| truncate_text(body.trim(), 512));
        ProviderFailure::classify(
            Some(status),
            code,
            format!("gemini request failed ({status}): {message}"),
        )
    }

    fn blocked_reason(payload: &Value) -> Option<String> {
        if let Some(reason) = payload
            .get("promptFeedback")
            .and_then(|feedback| string_field(feedback, "blockReason"))
        {
            return Some(reason.to_string());
        }
        payload
            .get("candidates")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|candidate| string_field(candidate, "finishReason"))
            .find(|reason| {
                matches!(
                    reason.to_ascii_uppercase().as_str(),
                    "SAFETY" | "PROHIBITED_CONTENT" | "IMAGE_SAFETY" | "BLOCKLIST"
                )
            })
            .map(str::to_string)
    }

    fn extract_image(payload: &Value) -> Result<Option<(Vec<u8>, String)>, ProviderFailure> {
        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for part in parts {
                let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data"))
                else {
                    continue;
                };
                let Some(data) = string_field(inline, "data") else {
                    continue;
                };
                let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
                    ProviderFailure::new(
                        FailureKind::UnknownProviderError,
                        format!("gemini image base64 decode failed: {err}"),
                    )
                })?;
                let mime_type = string_field(inline, "mimeType")
                    .or_else(|| string_field(inline, "mime_type"))
                    .unwrap_or("image/png")
                    .to_string();
                return Ok(Some((bytes, mime_type)));
            }
        }
        Ok(None)
    }

    async fn call_model(
        &self,
        model: &str,
        api_key: &str,
        payload: &Value,
        deadline: Duration,
    ) -> ProviderOutcome {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(deadline)
            .json(payload)
            .send()
            .await
            .map_err(|err| transport_failure(GEMINI_PROVIDER, &err))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| transport_failure(GEMINI_PROVIDER, &err))?;
        if !status.is_success() {
            return Err(Self::failure_from_body(status.as_u16(), &body));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            ProviderFailure::new(
                FailureKind::UnknownProviderError,
                format!("gemini returned invalid JSON payload: {err}"),
            )
        })?;
        if let Some(reason) = Self::blocked_reason(&parsed) {
            return Err(ProviderFailure::classify(
                None,
                Some("safety"),
                format!("gemini blocked the request ({reason})"),
            ));
        }
        match Self::extract_image(&parsed)? {
            Some((bytes, mime_type)) => Ok(Generated::bytes(bytes, mime_type).with_model(model)),
            None => Err(ProviderFailure::new(
                FailureKind::UnknownProviderError,
                format!("gemini model {model} returned no image"),
            )),
        }
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NamedProvider for GeminiProvider {
    fn name(&self) -> &str {
        GEMINI_PROVIDER
    }
}

#[async_trait]
impl MediaProvider for GeminiProvider {
    fn required_credentials(&self) -> &'static [&'static str] {
        &["GEMINI_API_KEY"]
    }

    fn is_available(&self, context: &BusinessContext) -> bool {
        present(&context.credentials.gemini_api_key)
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
        context: &BusinessContext,
        deadline: Duration,
    ) -> ProviderOutcome {
        let policy = self.model_retry.unwrap_or_default();
        self.run_models(request, context, deadline, &policy).await
    }

    fn retries_internally(&self) -> bool {
        true
    }

    async fn attempt_with_policy(
        &self,
        request: &GenerationRequest,
        context: &BusinessContext,
        deadline: Duration,
        policy: &RetryPolicy,
    ) -> ProviderOutcome {
        let policy = self.model_retry.unwrap_or(*policy);
        self.run_models(request, context, deadline, &policy).await
    }
}

impl GeminiProvider {
    async fn run_models(
        &self,
        request: &GenerationRequest,
        context: &BusinessContext,
        deadline: Duration,
        policy: &RetryPolicy,
    ) -> ProviderOutcome {
        let Some(api_key) = context.credentials.gemini_api_key.as_deref().map(str::trim) else {
            return Err(ProviderFailure::new(
                FailureKind::InvalidCredential,
                "GEMINI_API_KEY or GOOGLE_API_KEY not set",
            ));
        };
        let payload = Self::payload(request, context);
        let mut last_failure = ProviderFailure::new(
            FailureKind::ModelNotFound,
            "no gemini image models configured",
        );

        for model in &self.models {
            let mut attempt_index = 0;
            let failure = loop {
                debug!(model = %model, attempt = attempt_index + 1, "gemini model attempt");
                match self.call_model(model, api_key, &payload, deadline).await {
                    Ok(generated) => return Ok(generated),
                    Err(failure) => {
                        let decision = policy.should_retry(&failure, attempt_index);
                        if !decision.retry {
                            break failure;
                        }
                        warn!(
                            model = %model,
                            delay_ms = decision.delay.as_millis() as u64,
                            error = %failure,
                            "retrying gemini model"
                        );
                        tokio::time::sleep(decision.delay).await;
                        attempt_index += 1;
                    }
                }
            };
            if failure.kind != FailureKind::ModelNotFound {
                return Err(failure);
            }
            warn!(model = %model, error = %failure, "gemini model unavailable; trying next model");
            last_failure = failure;
        }
        Err(last_failure)
    }
}
