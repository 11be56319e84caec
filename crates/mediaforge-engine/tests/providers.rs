use std::sync::Arc;
use std::time::Duration;

use httpmock::Method::{POST, PUT};
use httpmock::MockServer;
use indexmap::IndexMap;
use mediaforge_contracts::providers::ProviderOrdering;
use mediaforge_contracts::{
    AssetClass, BusinessContext, Dimensions, FailureKind, GenerationRequest, ProgressSink,
};
use mediaforge_engine::providers::{GeminiProvider, StabilityProvider, TemplateProvider};
use mediaforge_engine::{
    AssetPersister, AssetStore, GeneratedPayload, HttpObjectStore, MediaProvider, Orchestrator,
    ProviderSet, RetryPolicy,
};

const DEADLINE: Duration = Duration::from_secs(10);

fn should_skip_httpmock() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(listener) => {
            drop(listener);
            false
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            eprintln!("skipping httpmock test: sandbox forbids binding to localhost");
            true
        }
        Err(err) => panic!("failed to bind localhost for httpmock tests: {err}"),
    }
}

fn context() -> BusinessContext {
    let mut context = BusinessContext {
        business_name: "Crumb & Co".to_string(),
        ..BusinessContext::default()
    };
    context.credentials.template_api_key = Some("tk-test".to_string());
    context.credentials.template_id = Some("tpl-1".to_string());
    context.credentials.stability_api_key = Some("sk-test".to_string());
    context.credentials.gemini_api_key = Some("gk-test".to_string());
    context
}

fn request() -> GenerationRequest {
    GenerationRequest::new(AssetClass::Hero, Dimensions::new(1200, 630), "Fresh sourdough")
        .with_text_overlay("Open Sundays")
}

#[tokio::test]
async fn template_render_returns_hosted_url() -> anyhow::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v2/images")
                .header("authorization", "Bearer tk-test")
                .body_includes("\"template\":\"tpl-1\"")
                .body_includes("\"text\":\"Open Sundays\"");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    serde_json::json!({
                        "uid": "img_1",
                        "status": "completed",
                        "image_url_png": "https://cdn.example.com/img_1.png"
                    })
                    .to_string(),
                );
        })
        .await;

    let provider = TemplateProvider::with_api_base(server.base_url());
    let generated = provider.attempt(&request(), &context(), DEADLINE).await?;

    assert_eq!(
        generated.payload,
        GeneratedPayload::Url("https://cdn.example.com/img_1.png".to_string())
    );
    assert_eq!(generated.model.as_deref(), Some("template:tpl-1"));
    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn template_rejected_key_is_credential_failure() -> anyhow::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v2/images");
            then.status(401)
                .body(r#"{"message":"Invalid API key"}"#);
        })
        .await;

    let provider = TemplateProvider::with_api_base(server.base_url());
    let failure = provider.attempt(&request(), &context(), DEADLINE).await.err();

    assert_eq!(failure.as_ref().map(|f| f.kind), Some(FailureKind::InvalidCredential));
    assert_eq!(failure.and_then(|f| f.status), Some(401));
    Ok(())
}

#[tokio::test]
async fn stability_returns_raw_image_bytes() -> anyhow::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v2beta/stable-image/generate/core")
                .header("authorization", "Bearer sk-test")
                .body_includes("name=\"aspect_ratio\"")
                .body_includes("16:9");
            then.status(200)
                .header("content-type", "image/png")
                .body(b"\x89PNG-fake");
        })
        .await;

    let provider = StabilityProvider::with_api_base(server.base_url());
    let generated = provider.attempt(&request(), &context(), DEADLINE).await?;

    assert_eq!(
        generated.payload,
        GeneratedPayload::Bytes {
            bytes: b"\x89PNG-fake".to_vec(),
            mime_type: "image/png".to_string(),
        }
    );
    assert_eq!(generated.model.as_deref(), Some("stable-image-core"));
    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn stability_rate_limit_is_retried_by_the_orchestrator() -> anyhow::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v2beta/stable-image/generate/core");
            then.status(429)
                .header("content-type", "application/json")
                .body(r#"{"name":"rate_limit_exceeded","errors":["You have exceeded the rate limit"]}"#);
        })
        .await;

    let mut orders = IndexMap::new();
    orders.insert(AssetClass::Hero, vec!["stability".to_string()]);
    let mut set = ProviderSet::new(ProviderOrdering::new(Some(orders)));
    set.register(Arc::new(StabilityProvider::with_api_base(server.base_url())));
    let orchestrator =
        Orchestrator::new(set).with_retry_policy(RetryPolicy::new(2, Duration::from_millis(5)));

    let asset = orchestrator
        .generate(&request(), &context(), ProgressSink::disabled())
        .await;

    let error = asset.error.as_ref();
    assert_eq!(error.map(|e| e.kind), Some(FailureKind::RateLimited));
    assert!(error.is_some_and(|e| e.message.starts_with("stability: ")));
    mock.assert_calls_async(2).await;
    Ok(())
}

#[tokio::test]
async fn gemini_advances_to_next_model_when_unknown() -> anyhow::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let missing = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1beta/models/retired-model:generateContent")
                .query_param("key", "gk-test");
            then.status(404).body(
                r#"{"error":{"code":404,"message":"models/retired-model is not found","status":"NOT_FOUND"}}"#,
            );
        })
        .await;
    let working = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1beta/models/current-model:generateContent")
                .body_includes("\"responseModalities\":[\"IMAGE\"]");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    serde_json::json!({
                        "candidates": [{
                            "content": { "parts": [
                                { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } }
                            ]},
                            "finishReason": "STOP"
                        }]
                    })
                    .to_string(),
                );
        })
        .await;

    let provider = GeminiProvider::with_api_base(server.url("/v1beta"))
        .with_models(["retired-model", "current-model"]);
    let generated = provider.attempt(&request(), &context(), DEADLINE).await?;

    assert_eq!(generated.model.as_deref(), Some("current-model"));
    assert_eq!(generated.payload.mime_type(), Some("image/png"));
    missing.assert_async().await;
    working.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn gemini_stops_model_loop_on_rate_limit() -> anyhow::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let limited = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1beta/models/first:generateContent");
            then.status(429).body(
                r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#,
            );
        })
        .await;
    let untouched = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1beta/models/second:generateContent");
            then.status(200).body("{}");
        })
        .await;

    let provider = GeminiProvider::with_api_base(server.url("/v1beta"))
        .with_models(["first", "second"])
        .with_model_retry(RetryPolicy::new(2, Duration::from_millis(5)));
    let failure = provider.attempt(&request(), &context(), DEADLINE).await.err();

    assert_eq!(failure.map(|f| f.kind), Some(FailureKind::RateLimited));
    limited.assert_calls_async(2).await;
    untouched.assert_calls_async(0).await;
    Ok(())
}

#[tokio::test]
async fn gemini_retries_in_place_without_revisiting_missing_models() -> anyhow::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let retired = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1beta/models/retired:generateContent");
            then.status(404).body(
                r#"{"error":{"code":404,"message":"models/retired is not found","status":"NOT_FOUND"}}"#,
            );
        })
        .await;
    let current = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1beta/models/current:generateContent");
            then.status(503).body(
                r#"{"error":{"code":503,"message":"The model is overloaded","status":"UNAVAILABLE"}}"#,
            );
        })
        .await;

    let mut orders = IndexMap::new();
    orders.insert(AssetClass::Hero, vec!["gemini".to_string()]);
    let mut set = ProviderSet::new(ProviderOrdering::new(Some(orders)));
    set.register(Arc::new(
        GeminiProvider::with_api_base(server.url("/v1beta")).with_models(["retired", "current"]),
    ));
    let orchestrator =
        Orchestrator::new(set).with_retry_policy(RetryPolicy::new(3, Duration::from_millis(5)));

    let asset = orchestrator
        .generate(&request(), &context(), ProgressSink::disabled())
        .await;

    assert_eq!(asset.error.map(|e| e.kind), Some(FailureKind::TransportError));
    retired.assert_calls_async(1).await;
    current.assert_calls_async(3).await;
    Ok(())
}

#[tokio::test]
async fn gemini_safety_block_is_content_policy() -> anyhow::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1beta/models/only:generateContent");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        })
        .await;

    let provider = GeminiProvider::with_api_base(server.url("/v1beta")).with_models(["only"]);
    let failure = provider.attempt(&request(), &context(), DEADLINE).await.err();

    assert_eq!(failure.map(|f| f.kind), Some(FailureKind::ContentPolicyRejected));
    Ok(())
}

#[tokio::test]
async fn http_store_puts_object_and_returns_public_url() -> anyhow::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/storage/v1/object/media/hero/a.png")
                .header("authorization", "Bearer store-key")
                .header("content-type", "image/png")
                .body("abc");
            then.status(200).body(r#"{"Key":"media/hero/a.png"}"#);
        })
        .await;

    let store = HttpObjectStore::new(server.base_url(), "media", Some("store-key".to_string()));
    let url = store.put("hero/a.png", b"abc", "image/png").await?;

    assert_eq!(url, server.url("/storage/v1/object/public/media/hero/a.png"));
    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn http_store_error_degrades_to_data_url() -> anyhow::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(PUT).path("/storage/v1/object/media/a.png");
            then.status(500).body("bucket offline");
        })
        .await;

    let store = HttpObjectStore::new(server.base_url(), "media", Some("store-key".to_string()));
    let outcome = AssetPersister::new(Some(Arc::new(store)))
        .persist("a.png", b"abc", "image/png")
        .await;

    assert!(!outcome.stored);
    assert_eq!(outcome.url, "data:image/png;base64,YWJj");
    assert!(outcome
        .warning
        .is_some_and(|warning| warning.contains("bucket offline")));
    Ok(())
}
