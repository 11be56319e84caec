use std::sync::Arc;
use std::time::Duration;

use mediaforge_contracts::providers::NamedProvider;
use mediaforge_contracts::{
    BusinessContext, Dimensions, FailureKind, GenerationRequest, PersistedAsset, ProgressError,
    ProgressEvent, ProgressPhase, ProgressSink, ProgressTracker, ProviderFailure,
    UPLOAD_PROVENANCE,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::builder::{alt_text_for, asset_filename, build_asset, clamp_alt_text, AssetDraft};
use crate::error::EngineError;
use crate::persist::{sniff_image, store_from_config, AssetPersister, AssetStore};
use crate::provider::{
    attempt_with_deadline, extension_for_mime, push_unique_warning, Generated, GeneratedPayload,
    MediaProvider,
};
use crate::registry::ProviderSet;
use crate::retry::RetryPolicy;

const QUEUED_PERCENT: u8 = 0;
const GENERATING_START: u8 = 10;
const GENERATING_SPAN: u8 = 60;
const UPLOADING_PERCENT: u8 = 80;
const DONE_PERCENT: u8 = 100;

/// Tries providers in order until one succeeds, then persists the result.
///
/// One orchestrator is shared (via `Arc`) by every concurrent request; it
/// holds no per-request state.
pub struct Orchestrator {
    providers: ProviderSet,
    retry: RetryPolicy,
    store: Option<Arc<dyn AssetStore>>,
    cancel: CancellationToken,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Orchestrator {
    pub fn new(providers: ProviderSet) -> Self {
        Self {
            providers,
            retry: RetryPolicy::default(),
            store: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ProviderSet::with_defaults())
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Overrides the store the business context would otherwise select.
    pub fn with_store(mut self, store: Arc<dyn AssetStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn persister_for(&self, context: &BusinessContext) -> AssetPersister {
        match self.store.as_ref() {
            Some(store) => AssetPersister::new(Some(Arc::clone(store))),
            None => AssetPersister::new(store_from_config(&context.persistence)),
        }
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        context: &BusinessContext,
        sink: ProgressSink,
    ) -> PersistedAsset {
        let mut tracker = ProgressTracker::new(sink);
        tracker.emit(ProgressEvent::new(
            ProgressPhase::Queued,
            QUEUED_PERCENT,
            format!("queued {} image", request.asset_class),
        ));
        let mut warnings = Vec::new();
        match self.run(request, context, &mut tracker, &mut warnings).await {
            Ok(asset) => asset,
            Err(err) => fail(&mut tracker, err, warnings),
        }
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        context: &BusinessContext,
        tracker: &mut ProgressTracker,
        warnings: &mut Vec<String>,
    ) -> Result<PersistedAsset, EngineError> {
        request.validate().map_err(EngineError::InvalidRequest)?;
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let candidates = self.providers.candidates(request.asset_class, context);
        if candidates.is_empty() {
            return Err(EngineError::NoProviderAvailable {
                asset_class: request.asset_class,
                detail: candidates.missing_credentials(),
            });
        }

        let deadline = request.attempt_timeout();
        let count = candidates.available.len();
        let span = (GENERATING_SPAN as usize / count).max(1) as u8;
        let mut last: Option<(String, ProviderFailure)> = None;

        for (idx, provider) in candidates.available.iter().enumerate() {
            let name = provider.name().to_string();
            let base = GENERATING_START + (idx * GENERATING_SPAN as usize / count) as u8;
            tracker.emit(
                ProgressEvent::new(
                    ProgressPhase::Generating,
                    base,
                    format!("generating with {name}"),
                )
                .with_provider(&name),
            );

            match self
                .attempt_with_retries(provider.as_ref(), request, context, deadline, tracker, base, span)
                .await
            {
                Ok(generated) => {
                    info!(provider = %name, asset_class = %request.asset_class, "provider succeeded");
                    return Ok(self
                        .finish(request, context, &name, generated, tracker, std::mem::take(warnings))
                        .await);
                }
                Err(failure) if failure.kind == FailureKind::Cancelled => {
                    return Err(EngineError::Cancelled);
                }
                Err(failure) => {
                    warn!(provider = %name, kind = %failure.kind, error = %failure.message, "provider failed; advancing");
                    if let Some((previous, earlier)) = last.replace((name, failure)) {
                        push_unique_warning(warnings, format!("{previous}: {}", earlier.message));
                    }
                }
            }
        }

        match last {
            Some((provider, failure)) => Err(EngineError::ProvidersExhausted { provider, failure }),
            None => Err(EngineError::NoProviderAvailable {
                asset_class: request.asset_class,
                detail: candidates.missing_credentials(),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_with_retries(
        &self,
        provider: &dyn MediaProvider,
        request: &GenerationRequest,
        context: &BusinessContext,
        deadline: Duration,
        tracker: &mut ProgressTracker,
        base: u8,
        span: u8,
    ) -> Result<Generated, ProviderFailure> {
        if provider.retries_internally() {
            debug!(provider = provider.name(), "provider applies retry policy itself");
            return tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(cancelled()),
                outcome = provider.attempt_with_policy(request, context, deadline, &self.retry) => outcome,
            };
        }

        let max_attempts = self.retry.max_attempts;
        let mut attempt_index: u32 = 0;
        loop {
            debug!(provider = provider.name(), attempt = attempt_index + 1, max_attempts, "provider attempt");
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(cancelled()),
                outcome = attempt_with_deadline(provider, request, context, deadline) => outcome,
            };
            let failure = match outcome {
                Ok(generated) => return Ok(generated),
                Err(failure) => failure,
            };

            let decision = self.retry.should_retry(&failure, attempt_index);
            if !decision.retry {
                return Err(failure);
            }
            warn!(
                provider = provider.name(),
                attempt = attempt_index + 1,
                delay_ms = decision.delay.as_millis() as u64,
                error = %failure,
                "retrying provider"
            );
            let step = (u32::from(span) * (attempt_index + 1) / max_attempts.max(1)) as u8;
            tracker.emit(
                ProgressEvent::new(
                    ProgressPhase::Generating,
                    base.saturating_add(step.min(span.saturating_sub(1))),
                    format!(
                        "retrying {} in {:.1}s (attempt {} of {max_attempts})",
                        provider.name(),
                        decision.delay.as_secs_f64(),
                        attempt_index + 2
                    ),
                )
                .with_provider(provider.name())
                .with_error(ProgressError::from_failure(&failure)),
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep(decision.delay) => {}
            }
            attempt_index += 1;
        }
    }

    async fn finish(
        &self,
        request: &GenerationRequest,
        context: &BusinessContext,
        provider: &str,
        generated: Generated,
        tracker: &mut ProgressTracker,
        mut warnings: Vec<String>,
    ) -> PersistedAsset {
        tracker.emit(
            ProgressEvent::new(ProgressPhase::Uploading, UPLOADING_PERCENT, "storing asset")
                .with_provider(provider),
        );
        for warning in generated.warnings {
            push_unique_warning(&mut warnings, warning);
        }
        let label = request.asset_class.as_str();
        let (url, filename) = match generated.payload {
            GeneratedPayload::Url(url) => {
                let filename = asset_filename(
                    &request.description,
                    label,
                    url.as_bytes(),
                    extension_from_url(&url),
                );
                (url, filename)
            }
            GeneratedPayload::Bytes { bytes, mime_type } => {
                let filename = asset_filename(
                    &request.description,
                    label,
                    &bytes,
                    extension_for_mime(&mime_type),
                );
                let outcome = self
                    .persister_for(context)
                    .persist(&format!("{label}/{filename}"), &bytes, &mime_type)
                    .await;
                if let Some(warning) = outcome.warning {
                    push_unique_warning(&mut warnings, warning);
                }
                (outcome.url, filename)
            }
        };

        let asset = build_asset(
            AssetDraft {
                url,
                filename,
                alt_text: alt_text_for(request),
                generated_by: provider.to_string(),
                model: generated.model,
                dimensions: request.dimensions,
                warnings,
            },
            context,
        );
        tracker.emit(
            ProgressEvent::new(ProgressPhase::Complete, DONE_PERCENT, "asset ready")
                .with_provider(provider),
        );
        asset
    }

    /// Stores caller-supplied bytes through the same persistence path as
    /// generated assets. No provider is involved.
    pub async fn upload(
        &self,
        bytes: &[u8],
        alt_text: &str,
        filename_hint: &str,
        context: &BusinessContext,
        sink: ProgressSink,
    ) -> PersistedAsset {
        let mut tracker = ProgressTracker::new(sink);
        tracker.emit(ProgressEvent::new(ProgressPhase::Queued, QUEUED_PERCENT, "queued upload"));
        if bytes.is_empty() {
            let err = EngineError::InvalidRequest("upload is empty".to_string());
            return fail(&mut tracker, err, Vec::new());
        }

        let mut warnings = Vec::new();
        let (mime_type, dimensions) = match sniff_image(bytes) {
            Some(probe) => (probe.mime_type, Dimensions::new(probe.width, probe.height)),
            None => {
                warn!(filename = filename_hint, "could not detect uploaded image format");
                push_unique_warning(
                    &mut warnings,
                    "could not detect the image format; stored as application/octet-stream"
                        .to_string(),
                );
                ("application/octet-stream", Dimensions::new(0, 0))
            }
        };

        tracker.emit(
            ProgressEvent::new(ProgressPhase::Uploading, UPLOADING_PERCENT, "storing upload")
                .with_provider(UPLOAD_PROVENANCE),
        );
        let stem = filename_hint
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(filename_hint);
        let filename = asset_filename(stem, UPLOAD_PROVENANCE, bytes, extension_for_mime(mime_type));
        let outcome = self
            .persister_for(context)
            .persist(&format!("{UPLOAD_PROVENANCE}/{filename}"), bytes, mime_type)
            .await;
        if let Some(warning) = outcome.warning {
            push_unique_warning(&mut warnings, warning);
        }

        let asset = build_asset(
            AssetDraft {
                url: outcome.url,
                filename,
                alt_text: clamp_alt_text(alt_text),
                generated_by: UPLOAD_PROVENANCE.to_string(),
                model: None,
                dimensions,
                warnings,
            },
            context,
        );
        tracker.emit(
            ProgressEvent::new(ProgressPhase::Complete, DONE_PERCENT, "upload ready")
                .with_provider(UPLOAD_PROVENANCE),
        );
        asset
    }

    /// Runs independent requests concurrently; results keep input order.
    pub async fn generate_batch<F>(
        self: &Arc<Self>,
        requests: Vec<GenerationRequest>,
        context: Arc<BusinessContext>,
        concurrency: usize,
        sink_for: F,
    ) -> Vec<PersistedAsset>
    where
        F: Fn(usize) -> ProgressSink,
    {
        let total = requests.len();
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (idx, request) in requests.into_iter().enumerate() {
            let orchestrator = Arc::clone(self);
            let context = Arc::clone(&context);
            let permits = Arc::clone(&permits);
            let sink = sink_for(idx);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (idx, PersistedAsset::failed(FailureKind::Cancelled, "batch closed", Vec::new()));
                };
                (idx, orchestrator.generate(&request, &context, sink).await)
            });
        }

        let mut slots: Vec<Option<PersistedAsset>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, asset)) => {
                    if let Some(slot) = slots.get_mut(idx) {
                        *slot = Some(asset);
                    }
                }
                Err(err) => warn!(error = %err, "batch generation task failed"),
            }
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    PersistedAsset::failed(
                        FailureKind::UnknownProviderError,
                        "generation task did not complete",
                        Vec::new(),
                    )
                })
            })
            .collect()
    }
}

fn fail(tracker: &mut ProgressTracker, err: EngineError, warnings: Vec<String>) -> PersistedAsset {
    let kind = err.kind();
    let message = err.to_string();
    warn!(kind = %kind, error = %message, "generation failed");
    let mut event = ProgressEvent::new(ProgressPhase::Error, DONE_PERCENT, message.clone())
        .with_error(ProgressError::from_kind(kind, message.clone()));
    if let EngineError::ProvidersExhausted { provider, .. } = &err {
        event = event.with_provider(provider);
    }
    tracker.emit(event);
    PersistedAsset::failed(kind, message, warnings)
}

fn cancelled() -> ProviderFailure {
    ProviderFailure::new(FailureKind::Cancelled, "generation cancelled")
}

fn extension_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "jpg",
        "webp" => "webp",
        "gif" => "gif",
        _ => "png",
    }
}
