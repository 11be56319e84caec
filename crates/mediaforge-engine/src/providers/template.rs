use std::time::Duration;

use async_trait::async_trait;
use mediaforge_contracts::context::present;
use mediaforge_contracts::providers::{NamedProvider, TEMPLATE_PROVIDER};
use mediaforge_contracts::{BusinessContext, FailureKind, GenerationRequest, ProviderFailure};
use reqwest::Client;
use serde_json::{json, Value};

use crate::provider::{
    api_base_from_env, string_field, transport_failure, truncate_text, Generated, MediaProvider,
    ProviderOutcome,
};

const DEFAULT_API_BASE: &str = "https://sync.api.bannerbear.com";

/// Renders a pre-designed template with text and brand colour layers.
///
/// The backend answers synchronously with a hosted image URL, so the result
/// never goes through asset persistence.
pub struct TemplateProvider {
    api_base: String,
    http: Client,
}

impl TemplateProvider {
    pub fn new() -> Self {
        Self::with_api_base(api_base_from_env("TEMPLATE_API_BASE", DEFAULT_API_BASE))
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v2/images", self.api_base)
    }

    fn modifications(request: &GenerationRequest, context: &BusinessContext) -> Vec<Value> {
        let headline = request
            .text_overlay
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(request.description.trim());
        let mut layers = vec![json!({ "name": "title", "text": headline })];
        if request.text_overlay.is_some() && !request.description.trim().is_empty() {
            layers.push(json!({ "name": "subtitle", "text": request.description.trim() }));
        }
        if let Some(color) = context.brand.primary_color.as_deref() {
            layers.push(json!({ "name": "background", "color": color }));
        }
        if let Some(color) = context.brand.secondary_color.as_deref() {
            layers.push(json!({ "name": "accent", "color": color }));
        }
        if let Some(font) = context.brand.font_family.as_deref() {
            layers.push(json!({ "name": "title", "font_family": font }));
        }
        layers
    }

    /// Error bodies are `{"message": ..., "code": ...}` or a bare string.
    fn failure_from_body(status: u16, body: &str) -> ProviderFailure {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let code = parsed
            .as_ref()
            .and_then(|value| string_field(value, "code").or_else(|| string_field(value, "error")));
        let message = parsed
            .as_ref()
            .and_then(|value| string_field(value, "message"))
            .map(str::to_string)
            .unwrap_or_else(|| truncate_text(body.trim(), 512));
        ProviderFailure::classify(
            Some(status),
            code,
            format!("template render failed ({status}): {message}"),
        )
    }

    fn image_url(payload: &Value) -> Option<&str> {
        string_field(payload, "image_url_png")
            .or_else(|| string_field(payload, "image_url"))
            .or_else(|| string_field(payload, "image_url_jpg"))
    }
}

impl Default for TemplateProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NamedProvider for TemplateProvider {
    fn name(&self) -> &str {
        TEMPLATE_PROVIDER
    }
}

#[async_trait]
impl MediaProvider for TemplateProvider {
    fn required_credentials(&self) -> &'static [&'static str] {
        &["TEMPLATE_API_KEY", "TEMPLATE_ID"]
    }

    fn is_available(&self, context: &BusinessContext) -> bool {
        present(&context.credentials.template_api_key) && present(&context.credentials.template_id)
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
        context: &BusinessContext,
        deadline: Duration,
    ) -> ProviderOutcome {
        let credentials = &context.credentials;
        let (Some(api_key), Some(template_id)) = (
            credentials.template_api_key.as_deref(),
            credentials.template_id.as_deref(),
        ) else {
            return Err(ProviderFailure::new(
                FailureKind::InvalidCredential,
                "TEMPLATE_API_KEY or TEMPLATE_ID not set",
            ));
        };

        let payload = json!({
            "template": template_id.trim(),
            "modifications": Self::modifications(request, context),
            "width": request.dimensions.width,
            "height": request.dimensions.height,
            "transparent": false,
        });
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key.trim())
            .timeout(deadline)
            .json(&payload)
            .send()
            .await
            .map_err(|err| transport_failure(TEMPLATE_PROVIDER, &err))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| transport_failure(TEMPLATE_PROVIDER, &err))?;
        if !status.is_success() {
            return Err(Self::failure_from_body(status.as_u16(), &body));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            ProviderFailure::new(
                FailureKind::UnknownProviderError,
                format!("template render returned invalid JSON: {err}"),
            )
        })?;
        let Some(url) = Self::image_url(&parsed) else {
            return Err(ProviderFailure::new(
                FailureKind::UnknownProviderError,
                "template render response missing image url",
            ));
        };
        Ok(Generated::url(url).with_model(format!("template:{}", template_id.trim())))
    }
}

#[cfg(test)]
mod tests {
    use mediaforge_contracts::{
        AssetClass, BrandTokens, BusinessContext, Dimensions, FailureKind, GenerationRequest,
    };

    use super::TemplateProvider;

    #[test]
    fn overlay_becomes_title_and_description_subtitle() {
        let request = GenerationRequest::new(AssetClass::Hero, Dimensions::new(1200, 630), "Sourdough workshop")
            .with_text_overlay("Bake with us");
        let context = BusinessContext {
            brand: BrandTokens {
                primary_color: Some("#112233".to_string()),
                ..BrandTokens::default()
            },
            ..BusinessContext::default()
        };
        let layers = TemplateProvider::modifications(&request, &context);
        assert_eq!(layers[0]["text"], "Bake with us");
        assert_eq!(layers[1]["text"], "Sourdough workshop");
        assert_eq!(layers[2]["color"], "#112233");
    }

    #[test]
    fn error_body_code_drives_classification() {
        let failure = TemplateProvider::failure_from_body(
            400,
            r#"{"message":"Quota reached for this month","code":"quota_exceeded"}"#,
        );
        assert_eq!(failure.kind, FailureKind::RateLimited);
        assert!(failure.message.contains("Quota reached"));

        let failure = TemplateProvider::failure_from_body(401, "Unauthorized");
        assert_eq!(failure.kind, FailureKind::InvalidCredential);
    }

    #[test]
    fn needs_both_key_and_template() {
        use crate::provider::MediaProvider;

        let provider = TemplateProvider::with_api_base("http://localhost");
        let mut context = BusinessContext::default();
        context.credentials.template_api_key = Some("key".to_string());
        assert!(!provider.is_available(&context));
        context.credentials.template_id = Some("tpl-1".to_string());
        assert!(provider.is_available(&context));
    }
}
