use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::AssetClass;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to read context file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid context file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Which provider credentials are configured. Values are secrets; never log them.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub template_api_key: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub stability_api_key: Option<String>,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flag = |value: &Option<String>| if present(value) { "<set>" } else { "<unset>" };
        f.debug_struct("ProviderCredentials")
            .field("template_api_key", &flag(&self.template_api_key))
            .field("template_id", &flag(&self.template_id))
            .field("stability_api_key", &flag(&self.stability_api_key))
            .field("gemini_api_key", &flag(&self.gemini_api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandTokens {
    #[serde(default)]
    pub primary_color: Option<String>,
    #[serde(default)]
    pub secondary_color: Option<String>,
    #[serde(default)]
    pub font_family: Option<String>,
}

impl BrandTokens {
    /// Short prompt suffix describing the brand palette, if any token is set.
    pub fn prompt_hint(&self) -> Option<String> {
        let colors: Vec<&str> = [&self.primary_color, &self.secondary_color]
            .into_iter()
            .filter_map(|value| value.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .collect();
        let mut parts = Vec::new();
        if !colors.is_empty() {
            parts.push(format!("brand colors {}", colors.join(" and ")));
        }
        if let Some(font) = self
            .font_family
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            parts.push(format!("typography in the style of {font}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Durable storage backend for generated bytes.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistenceConfig {
    #[default]
    None,
    Http {
        base_url: String,
        bucket: String,
        #[serde(default)]
        api_key: Option<String>,
    },
    LocalDir {
        dir: PathBuf,
    },
}

impl std::fmt::Debug for PersistenceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceConfig::None => f.write_str("None"),
            PersistenceConfig::Http {
                base_url,
                bucket,
                api_key,
            } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("bucket", bucket)
                .field("api_key", &if present(api_key) { "<set>" } else { "<unset>" })
                .finish(),
            PersistenceConfig::LocalDir { dir } => {
                f.debug_struct("LocalDir").field("dir", dir).finish()
            }
        }
    }
}

/// Result of the output-format capability probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSupport {
    pub webp: bool,
}

impl FormatSupport {
    pub fn preferred_output_format(&self) -> &'static str {
        if self.webp {
            "webp"
        } else {
            "png"
        }
    }
}

/// Caller-owned memo for the format probe so it runs at most once.
#[derive(Debug, Default)]
pub struct FormatProbe {
    cell: OnceLock<FormatSupport>,
}

impl FormatProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_probe(&self, probe: impl FnOnce() -> FormatSupport) -> FormatSupport {
        *self.cell.get_or_init(probe)
    }
}

/// Read-only configuration shared by every concurrent request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessContext {
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license_url: Option<String>,
    #[serde(default)]
    pub credentials: ProviderCredentials,
    #[serde(default)]
    pub brand: BrandTokens,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub provider_order: IndexMap<AssetClass, Vec<String>>,
    #[serde(default)]
    pub format_support: FormatSupport,
    #[serde(default)]
    pub enable_dryrun: bool,
}

impl BusinessContext {
    pub fn from_env() -> Self {
        let mut context = Self::default();
        context.merge_env_with(non_empty_env);
        context
    }

    /// Loads a JSON context file; environment values fill unset credentials.
    pub fn from_json_file(path: &Path) -> Result<Self, ContextError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut context: BusinessContext =
            serde_json::from_str(&raw).map_err(|source| ContextError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        context.merge_env_with(non_empty_env);
        Ok(context)
    }

    pub fn merge_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let credentials = &mut self.credentials;
        fill(&mut credentials.template_api_key, || lookup("TEMPLATE_API_KEY"));
        fill(&mut credentials.template_id, || lookup("TEMPLATE_ID"));
        fill(&mut credentials.stability_api_key, || lookup("STABILITY_API_KEY"));
        fill(&mut credentials.gemini_api_key, || {
            lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY"))
        });

        if matches!(self.persistence, PersistenceConfig::None) {
            if let (Some(base_url), Some(bucket)) = (lookup("STORAGE_URL"), lookup("STORAGE_BUCKET")) {
                self.persistence = PersistenceConfig::Http {
                    base_url,
                    bucket,
                    api_key: lookup("STORAGE_API_KEY"),
                };
            }
        } else if let PersistenceConfig::Http { api_key, .. } = &mut self.persistence {
            fill(api_key, || lookup("STORAGE_API_KEY"));
        }

        if let Some(flag) = lookup("MEDIAFORGE_ENABLE_DRYRUN") {
            self.enable_dryrun = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    pub fn author_or_business(&self) -> String {
        self.author
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.business_name.trim())
            .to_string()
    }
}

pub fn present(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|inner| !inner.trim().is_empty())
        .unwrap_or(false)
}

fn fill(slot: &mut Option<String>, source: impl FnOnce() -> Option<String>) {
    if !present(slot) {
        if let Some(value) = source() {
            *slot = Some(value);
        }
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
