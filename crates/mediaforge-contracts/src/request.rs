use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MAX_DIMENSION: u32 = 4096;

/// Categorical type of media requested. Selects the provider ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Hero,
    Portrait,
    Scene,
    Product,
    Diagram,
    Infographic,
    Inline,
}

impl AssetClass {
    pub const ALL: [AssetClass; 7] = [
        AssetClass::Hero,
        AssetClass::Portrait,
        AssetClass::Scene,
        AssetClass::Product,
        AssetClass::Diagram,
        AssetClass::Infographic,
        AssetClass::Inline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Hero => "hero",
            AssetClass::Portrait => "portrait",
            AssetClass::Scene => "scene",
            AssetClass::Product => "product",
            AssetClass::Diagram => "diagram",
            AssetClass::Infographic => "infographic",
            AssetClass::Inline => "inline",
        }
    }

    /// Per-attempt timeout used when the caller does not set one.
    pub fn default_timeout(&self) -> Duration {
        match self {
            AssetClass::Hero | AssetClass::Infographic | AssetClass::Diagram => {
                Duration::from_secs(45)
            }
            _ => Duration::from_secs(30),
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        AssetClass::ALL
            .into_iter()
            .find(|class| class.as_str() == normalized)
            .ok_or_else(|| format!("unknown asset class '{raw}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parses `1200x630` style sizes.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let (left, right) = normalized.split_once('x')?;
        let width = left.trim().parse::<u32>().ok()?;
        let height = right.trim().parse::<u32>().ok()?;
        Some(Self { width, height })
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What must be produced for one placeholder. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub asset_class: AssetClass,
    pub dimensions: Dimensions,
    pub description: String,
    #[serde(default)]
    pub style_hint: Option<String>,
    #[serde(default)]
    pub text_overlay: Option<String>,
    #[serde(default)]
    pub style_modifiers: Vec<String>,
    #[serde(default, with = "timeout_ms")]
    pub timeout: Option<Duration>,
}

impl GenerationRequest {
    pub fn new(asset_class: AssetClass, dimensions: Dimensions, description: impl Into<String>) -> Self {
        Self {
            asset_class,
            dimensions,
            description: description.into(),
            style_hint: None,
            text_overlay: None,
            style_modifiers: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_style_hint(mut self, hint: impl Into<String>) -> Self {
        self.style_hint = Some(hint.into());
        self
    }

    pub fn with_text_overlay(mut self, text: impl Into<String>) -> Self {
        self.text_overlay = Some(text.into());
        self
    }

    pub fn with_style_modifiers<I, S>(mut self, modifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.style_modifiers = modifiers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.timeout
            .unwrap_or_else(|| self.asset_class.default_timeout())
    }

    /// Structural checks only; prompt semantics belong to the caller.
    pub fn validate(&self) -> Result<(), String> {
        let Dimensions { width, height } = self.dimensions;
        if width == 0 || height == 0 {
            return Err(format!("dimensions must be non-zero (got {})", self.dimensions));
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(format!(
                "dimensions {} exceed the {MAX_DIMENSION}px limit",
                self.dimensions
            ));
        }
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err("timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

mod timeout_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<u64>::deserialize(deserializer)?;
        Ok(raw.map(Duration::from_millis))
    }
}
