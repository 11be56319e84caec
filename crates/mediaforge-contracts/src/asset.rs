use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::failure::FailureKind;

pub const UPLOAD_PROVENANCE: &str = "upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    /// Produced by a provider.
    Generated,
    /// Supplied by the user through `upload`.
    Uploaded,
    Error,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Generated => "generated",
            AssetStatus::Uploaded => "uploaded",
            AssetStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub filename: String,
    pub alt_text: String,
    pub author: String,
    pub rights: String,
    pub structured_data: Value,
    pub generated_by: String,
    #[serde(default)]
    pub model: Option<String>,
    pub width: u32,
    pub height: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetError {
    pub kind: FailureKind,
    pub message: String,
    pub remediation: String,
}

/// Terminal value of one orchestrator invocation. Owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedAsset {
    pub status: AssetStatus,
    pub url: String,
    #[serde(default)]
    pub metadata: Option<AssetMetadata>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<AssetError>,
}

impl PersistedAsset {
    pub fn failed(kind: FailureKind, message: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            status: AssetStatus::Error,
            url: String::new(),
            metadata: None,
            warnings,
            error: Some(AssetError {
                kind,
                message: message.into(),
                remediation: kind.remediation().suggestion().to_string(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != AssetStatus::Error
    }

    pub fn generated_by(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .map(|metadata| metadata.generated_by.as_str())
    }

    /// True when the URL only lives as long as the caller holds it.
    pub fn is_ephemeral(&self) -> bool {
        self.url.starts_with("data:")
    }
}

#[cfg(test)]
mod tests {
    use super::{AssetStatus, PersistedAsset};
    use crate::failure::FailureKind;

    #[test]
    fn failed_asset_carries_remediation() {
        let asset = PersistedAsset::failed(
            FailureKind::RateLimited,
            "stability: rate limited",
            vec!["gemini: timeout".to_string()],
        );
        assert_eq!(asset.status, AssetStatus::Error);
        assert!(!asset.is_success());
        assert!(asset.url.is_empty());
        let error = asset.error.as_ref().map(|error| error.remediation.as_str());
        assert_eq!(error, Some("The provider is busy; wait a minute and retry."));
        assert_eq!(asset.generated_by(), None);
    }

    #[test]
    fn status_serializes_snake_case() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_value(AssetStatus::Uploaded)?, "uploaded");
        assert_eq!(AssetStatus::Generated.as_str(), "generated");
        Ok(())
    }
}
