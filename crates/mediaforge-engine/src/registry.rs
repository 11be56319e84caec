use std::sync::Arc;

use image::ImageFormat;
use mediaforge_contracts::providers::{NamedProvider, ProviderOrdering, ProviderRegistry};
use mediaforge_contracts::{AssetClass, BusinessContext, FormatSupport};
use serde::Serialize;

use crate::provider::MediaProvider;
use crate::providers::{DryrunProvider, GeminiProvider, StabilityProvider, TemplateProvider};

/// Ordered providers for one request, split by availability.
pub struct Candidates {
    pub available: Vec<Arc<dyn MediaProvider>>,
    pub unavailable: Vec<(String, &'static [&'static str])>,
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    /// e.g. `configure template (TEMPLATE_API_KEY, TEMPLATE_ID), gemini (GEMINI_API_KEY)`.
    pub fn missing_credentials(&self) -> String {
        if self.unavailable.is_empty() {
            return "no providers are configured for this asset class".to_string();
        }
        let parts = self
            .unavailable
            .iter()
            .map(|(name, credentials)| {
                if credentials.is_empty() {
                    name.clone()
                } else {
                    format!("{name} ({})", credentials.join(", "))
                }
            })
            .collect::<Vec<_>>();
        format!("configure {}", parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub available: bool,
    pub required_credentials: Vec<String>,
}

pub struct ProviderSet {
    registry: ProviderRegistry<Arc<dyn MediaProvider>>,
    ordering: ProviderOrdering,
}

impl Default for ProviderSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProviderSet {
    pub fn new(ordering: ProviderOrdering) -> Self {
        Self {
            registry: ProviderRegistry::default(),
            ordering,
        }
    }

    /// The network providers plus the offline dry-run provider.
    pub fn with_defaults() -> Self {
        let mut set = Self::new(ProviderOrdering::default());
        set.register(Arc::new(TemplateProvider::new()));
        set.register(Arc::new(GeminiProvider::new()));
        set.register(Arc::new(StabilityProvider::new()));
        set.register(Arc::new(DryrunProvider::new()));
        set
    }

    pub fn register(&mut self, provider: Arc<dyn MediaProvider>) {
        self.registry.register(provider);
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.list()
    }

    pub fn candidates(&self, class: AssetClass, context: &BusinessContext) -> Candidates {
        let names = self.ordering.for_class(class, context);
        let mut available = Vec::new();
        let mut unavailable = Vec::new();
        for provider in self.registry.resolve(&names) {
            if provider.is_available(context) {
                available.push(Arc::clone(provider));
            } else {
                unavailable.push((provider.name().to_string(), provider.required_credentials()));
            }
        }
        Candidates {
            available,
            unavailable,
        }
    }

    pub fn describe(&self, class: AssetClass, context: &BusinessContext) -> Vec<ProviderStatus> {
        let names = self.ordering.for_class(class, context);
        self.registry
            .resolve(&names)
            .into_iter()
            .map(|provider| ProviderStatus {
                name: provider.name().to_string(),
                available: provider.is_available(context),
                required_credentials: provider
                    .required_credentials()
                    .iter()
                    .map(|key| key.to_string())
                    .collect(),
            })
            .collect()
    }
}

/// Output formats this build can encode. Callers memoize via `FormatProbe`.
pub fn probe_format_support() -> FormatSupport {
    FormatSupport {
        webp: ImageFormat::WebP.writing_enabled(),
    }
}

#[cfg(test)]
mod tests {
    use mediaforge_contracts::providers::NamedProvider;
    use mediaforge_contracts::{AssetClass, BusinessContext, FormatProbe};

    use super::{probe_format_support, ProviderSet};

    #[test]
    fn defaults_register_every_provider() {
        let set = ProviderSet::with_defaults();
        assert_eq!(set.names(), vec!["dryrun", "gemini", "stability", "template"]);
    }

    #[test]
    fn unavailable_providers_are_filtered_and_named() {
        let set = ProviderSet::with_defaults();
        let mut context = BusinessContext::default();
        context.credentials.stability_api_key = Some("sk".to_string());

        let candidates = set.candidates(AssetClass::Hero, &context);
        let names: Vec<&str> = candidates
            .available
            .iter()
            .map(|provider| provider.name())
            .collect();
        assert_eq!(names, vec!["stability"]);
        assert_eq!(
            candidates.missing_credentials(),
            "configure template (TEMPLATE_API_KEY, TEMPLATE_ID), gemini (GEMINI_API_KEY)"
        );
    }

    #[test]
    fn dryrun_joins_when_enabled() {
        let set = ProviderSet::with_defaults();
        let context = BusinessContext {
            enable_dryrun: true,
            ..BusinessContext::default()
        };
        let statuses = set.describe(AssetClass::Product, &context);
        let summary: Vec<(&str, bool)> = statuses
            .iter()
            .map(|status| (status.name.as_str(), status.available))
            .collect();
        assert_eq!(
            summary,
            vec![("stability", false), ("gemini", false), ("dryrun", true)]
        );
    }

    #[test]
    fn probe_runs_once() {
        let probe = FormatProbe::new();
        let first = probe.get_or_probe(probe_format_support);
        let second = probe.get_or_probe(|| panic!("probe must be memoized"));
        assert_eq!(first, second);
    }
}
