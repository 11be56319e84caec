pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod persist;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod retry;

pub use builder::{build_asset, AssetDraft};
pub use error::{EngineError, PersistError};
pub use orchestrator::Orchestrator;
pub use persist::{
    ephemeral_url, store_from_config, AssetPersister, AssetStore, HttpObjectStore, LocalDirStore,
    PersistOutcome,
};
pub use provider::{
    attempt_with_deadline, compose_prompt, Generated, GeneratedPayload, MediaProvider,
    ProviderOutcome,
};
pub use registry::{probe_format_support, Candidates, ProviderSet, ProviderStatus};
pub use retry::{should_retry, RetryDecision, RetryPolicy};
