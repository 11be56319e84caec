use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mediaforge_contracts::context::present;
use mediaforge_contracts::providers::{NamedProvider, STABILITY_PROVIDER};
use mediaforge_contracts::{
    BusinessContext, Dimensions, FailureKind, GenerationRequest, ProviderFailure,
};
use reqwest::multipart::Form;
use reqwest::Client;
use serde_json::Value;

use crate::provider::{
    api_base_from_env, compose_prompt, error_body_text, mime_for_format, string_field,
    transport_failure, truncate_text, Generated, MediaProvider, ProviderOutcome,
};

const DEFAULT_API_BASE: &str = "https://api.stability.ai";
const MODEL: &str = "stable-image-core";
const STYLE_PRESETS: &[&str] = &[
    "3d-model",
    "analog-film",
    "anime",
    "cinematic",
    "comic-book",
    "digital-art",
    "enhance",
    "fantasy-art",
    "isometric",
    "line-art",
    "low-poly",
    "modeling-compound",
    "neon-punk",
    "origami",
    "photographic",
    "pixel-art",
    "tile-texture",
];

pub struct StabilityProvider {
    api_base: String,
    http: Client,
}

impl StabilityProvider {
    pub fn new() -> Self {
        Self::with_api_base(api_base_from_env("STABILITY_API_BASE", DEFAULT_API_BASE))
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v2beta/stable-image/generate/core", self.api_base)
    }

    fn aspect_ratio(dimensions: Dimensions) -> &'static str {
        if dimensions.width == 0 || dimensions.height == 0 {
            return "1:1";
        }
        let ratio = dimensions.aspect_ratio();
        let candidates = [
            ("1:1", 1.0),
            ("16:9", 16.0 / 9.0),
            ("9:16", 9.0 / 16.0),
            ("3:2", 3.0 / 2.0),
            ("2:3", 2.0 / 3.0),
            ("4:5", 4.0 / 5.0),
            ("5:4", 5.0 / 4.0),
            ("21:9", 21.0 / 9.0),
            ("9:21", 9.0 / 21.0),
        ];
        let mut best = "1:1";
        let mut best_delta = f64::MAX;
        for (name, value) in candidates {
            let delta = (ratio - value).abs();
            if delta < best_delta {
                best_delta = delta;
                best = name;
            }
        }
        best
    }

    /// Only hints naming a known preset are forwarded; others stay in the prompt.
    fn style_preset(request: &GenerationRequest) -> Option<&'static str> {
        let hint = request
            .style_hint
            .as_deref()?
            .trim()
            .to_ascii_lowercase()
            .replace([' ', '_'], "-");
        STYLE_PRESETS.iter().copied().find(|preset| *preset == hint)
    }

    /// Error bodies look like `{"name": "content_moderation", "errors": [...]}`.
    fn failure_from_body(status: u16, body: &str) -> ProviderFailure {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let code = parsed.as_ref().and_then(|value| string_field(value, "name"));
        let message = parsed
            .as_ref()
            .and_then(|value| value.get("errors"))
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .filter(|joined| !joined.is_empty())
            .or_else(|| {
                parsed
                    .as_ref()
                    .and_then(|value| string_field(value, "message"))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| truncate_text(body.trim(), 512));
        ProviderFailure::classify(
            Some(status),
            code,
            format!("stability request failed ({status}): {message}"),
        )
    }

    fn content_filtered(finish_reason: Option<&str>) -> Option<ProviderFailure> {
        let reason = finish_reason?.trim();
        if reason.eq_ignore_ascii_case("CONTENT_FILTERED") {
            return Some(ProviderFailure::classify(
                None,
                Some("content_moderation"),
                "stability filtered the generated image",
            ));
        }
        None
    }

    fn decode_json_image(payload: &Value) -> Result<Vec<u8>, ProviderFailure> {
        let image_b64 = payload
            .get("image")
            .or_else(|| payload.get("base64"))
            .or_else(|| {
                payload
                    .get("artifacts")
                    .and_then(Value::as_array)
                    .and_then(|rows| rows.first())
                    .and_then(|row| row.get("base64"))
            })
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ProviderFailure::new(
                    FailureKind::UnknownProviderError,
                    "stability JSON response missing image bytes",
                )
            })?;
        BASE64.decode(image_b64.as_bytes()).map_err(|err| {
            ProviderFailure::new(
                FailureKind::UnknownProviderError,
                format!("stability image base64 decode failed: {err}"),
            )
        })
    }
}

impl Default for StabilityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NamedProvider for StabilityProvider {
    fn name(&self) -> &str {
        STABILITY_PROVIDER
    }
}

#[async_trait]
impl MediaProvider for StabilityProvider {
    fn required_credentials(&self) -> &'static [&'static str] {
        &["STABILITY_API_KEY"]
    }

    fn is_available(&self, context: &BusinessContext) -> bool {
        present(&context.credentials.stability_api_key)
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
        context: &BusinessContext,
        deadline: Duration,
    ) -> ProviderOutcome {
        let Some(api_key) = context.credentials.stability_api_key.as_deref() else {
            return Err(ProviderFailure::new(
                FailureKind::InvalidCredential,
                "STABILITY_API_KEY not set",
            ));
        };

        let output_format = context.format_support.preferred_output_format();
        let mut form = Form::new()
            .text("prompt", compose_prompt(request, context))
            .text("aspect_ratio", Self::aspect_ratio(request.dimensions))
            .text("output_format", output_format);
        if let Some(preset) = Self::style_preset(request) {
            form = form.text("style_preset", preset);
        }

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key.trim())
            .header("Accept", "image/*")
            .timeout(deadline)
            .multipart(form)
            .send()
            .await
            .map_err(|err| transport_failure(STABILITY_PROVIDER, &err))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body_text(response.text().await);
            return Err(Self::failure_from_body(status.as_u16(), &body));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        if let Some(failure) = Self::content_filtered(header("finish-reason").as_deref()) {
            return Err(failure);
        }
        let content_type = header(reqwest::header::CONTENT_TYPE.as_str())
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();

        let generated = if content_type.starts_with("image/") {
            let bytes = response
                .bytes()
                .await
                .map_err(|err| transport_failure(STABILITY_PROVIDER, &err))?;
            Generated::bytes(bytes.to_vec(), content_type)
        } else {
            let payload: Value = response
                .json()
                .await
                .map_err(|err| transport_failure(STABILITY_PROVIDER, &err))?;
            if let Some(failure) =
                Self::content_filtered(string_field(&payload, "finish_reason"))
            {
                return Err(failure);
            }
            Generated::bytes(Self::decode_json_image(&payload)?, mime_for_format(output_format))
        };
        Ok(generated.with_model(MODEL))
    }
}

#[cfg(test)]
mod tests {
    use mediaforge_contracts::{AssetClass, Dimensions, FailureKind, GenerationRequest};
    use serde_json::json;

    use super::StabilityProvider;

    #[test]
    fn aspect_ratio_snaps_to_supported_values() {
        assert_eq!(StabilityProvider::aspect_ratio(Dimensions::new(1200, 630)), "16:9");
        assert_eq!(StabilityProvider::aspect_ratio(Dimensions::new(800, 1000)), "4:5");
        assert_eq!(StabilityProvider::aspect_ratio(Dimensions::new(512, 512)), "1:1");
    }

    #[test]
    fn only_known_presets_are_forwarded() {
        let request = GenerationRequest::new(AssetClass::Scene, Dimensions::new(512, 512), "harbor")
            .with_style_hint("Digital Art");
        assert_eq!(StabilityProvider::style_preset(&request), Some("digital-art"));
        let request = request.with_style_hint("moody and warm");
        assert_eq!(StabilityProvider::style_preset(&request), None);
    }

    #[test]
    fn moderation_name_is_content_policy() {
        let failure = StabilityProvider::failure_from_body(
            403,
            r#"{"id":"abc","name":"content_moderation","errors":["Your request was flagged by our content moderation system"]}"#,
        );
        assert_eq!(failure.kind, FailureKind::ContentPolicyRejected);
        assert_eq!(failure.code.as_deref(), Some("content_moderation"));
        assert!(failure.message.contains("flagged"));
    }

    #[test]
    fn filtered_finish_reason_is_rejected() {
        let failure = StabilityProvider::content_filtered(Some("CONTENT_FILTERED"));
        assert_eq!(failure.map(|f| f.kind), Some(FailureKind::ContentPolicyRejected));
        assert!(StabilityProvider::content_filtered(Some("SUCCESS")).is_none());
    }

    #[test]
    fn json_artifacts_decode() -> anyhow::Result<()> {
        let payload = json!({ "artifacts": [{ "base64": "aGVsbG8=" }] });
        let bytes = StabilityProvider::decode_json_image(&payload)?;
        assert_eq!(bytes, b"hello");
        assert!(StabilityProvider::decode_json_image(&json!({})).is_err());
        Ok(())
    }

    #[test]
    fn unreadable_body_still_classifies_by_status() {
        let failure = StabilityProvider::failure_from_body(
            503,
            "response body unreadable: connection closed before message completed",
        );
        assert_eq!(failure.kind, FailureKind::TransportError);
        assert!(failure.message.contains("connection closed before message completed"));
    }
}
