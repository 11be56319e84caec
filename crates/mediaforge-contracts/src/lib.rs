pub mod asset;
pub mod context;
pub mod events;
pub mod failure;
pub mod progress;
pub mod providers;
pub mod request;

pub use asset::{AssetError, AssetMetadata, AssetStatus, PersistedAsset, UPLOAD_PROVENANCE};
pub use context::{
    BrandTokens, BusinessContext, ContextError, FormatProbe, FormatSupport, PersistenceConfig,
    ProviderCredentials,
};
pub use failure::{FailureKind, ProviderFailure, Remediation};
pub use progress::{ProgressError, ProgressEvent, ProgressPhase, ProgressSink, ProgressTracker};
pub use request::{AssetClass, Dimensions, GenerationRequest};
