use std::time::Duration;

use async_trait::async_trait;
use mediaforge_contracts::providers::NamedProvider;
use mediaforge_contracts::{BusinessContext, FailureKind, GenerationRequest, ProviderFailure};
use serde_json::Value;

use crate::retry::RetryPolicy;

/// What a successful provider attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedPayload {
    /// Already durable and addressable (template renders).
    Url(String),
    Bytes { bytes: Vec<u8>, mime_type: String },
}

impl GeneratedPayload {
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            GeneratedPayload::Url(_) => None,
            GeneratedPayload::Bytes { mime_type, .. } => Some(mime_type.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub payload: GeneratedPayload,
    pub model: Option<String>,
    pub warnings: Vec<String>,
}

impl Generated {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            payload: GeneratedPayload::Url(url.into()),
            model: None,
            warnings: Vec::new(),
        }
    }

    pub fn bytes(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            payload: GeneratedPayload::Bytes {
                bytes,
                mime_type: mime_type.into(),
            },
            model: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

pub type ProviderOutcome = Result<Generated, ProviderFailure>;

/// One backend able to fulfil a generation request.
#[async_trait]
pub trait MediaProvider: NamedProvider + Send + Sync {
    /// Credential names reported when the provider is unavailable.
    fn required_credentials(&self) -> &'static [&'static str] {
        &[]
    }

    /// Cheap and side-effect free: credential presence only.
    fn is_available(&self, context: &BusinessContext) -> bool;

    /// One round trip (or one model-fallback sequence) bounded by `deadline`.
    async fn attempt(
        &self,
        request: &GenerationRequest,
        context: &BusinessContext,
        deadline: Duration,
    ) -> ProviderOutcome;

    /// When true the orchestrator calls `attempt_with_policy` once and the
    /// provider applies the retry policy itself, with `deadline` bounding each
    /// backend call rather than the whole sequence.
    fn retries_internally(&self) -> bool {
        false
    }

    async fn attempt_with_policy(
        &self,
        request: &GenerationRequest,
        context: &BusinessContext,
        deadline: Duration,
        _policy: &RetryPolicy,
    ) -> ProviderOutcome {
        self.attempt(request, context, deadline).await
    }
}

/// Runs `attempt` under `deadline`; expiry drops the in-flight call.
pub async fn attempt_with_deadline(
    provider: &dyn MediaProvider,
    request: &GenerationRequest,
    context: &BusinessContext,
    deadline: Duration,
) -> ProviderOutcome {
    match tokio::time::timeout(deadline, provider.attempt(request, context, deadline)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProviderFailure::timeout(format!(
            "{} did not respond within {:.1}s",
            provider.name(),
            deadline.as_secs_f64()
        ))),
    }
}

/// Description, style hint, modifiers and brand tokens joined into one prompt.
pub fn compose_prompt(request: &GenerationRequest, context: &BusinessContext) -> String {
    let mut parts: Vec<String> = vec![request.description.trim().to_string()];
    if let Some(hint) = request
        .style_hint
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        parts.push(format!("Style: {hint}"));
    }
    let modifiers: Vec<&str> = request
        .style_modifiers
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();
    if !modifiers.is_empty() {
        parts.push(modifiers.join(", "));
    }
    if let Some(brand) = context.brand.prompt_hint() {
        parts.push(format!("Use {brand}"));
    }
    parts.retain(|part| !part.is_empty());
    parts.join(". ")
}

pub(crate) fn transport_failure(provider: &str, err: &reqwest::Error) -> ProviderFailure {
    let message = format!("{provider} request failed: {err}");
    if err.is_timeout() {
        return ProviderFailure::timeout(message);
    }
    if err.is_builder() {
        return ProviderFailure::new(FailureKind::UnknownProviderError, message);
    }
    ProviderFailure::transport(message)
}

pub(crate) fn api_base_from_env(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn string_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|inner| !inner.is_empty())
}

/// Body of a non-success response; a failed read becomes the text instead.
pub(crate) fn error_body_text(body: Result<String, reqwest::Error>) -> String {
    match body {
        Ok(body) => body,
        Err(err) => format!("response body unreadable: {err}"),
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

pub(crate) fn mime_for_format(output_format: &str) -> &'static str {
    match output_format.trim().to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

pub(crate) fn extension_for_mime(mime_type: &str) -> &'static str {
    let lowered = mime_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    if lowered.contains("png") {
        return "png";
    }
    "bin"
}
