use indexmap::IndexMap;

use crate::context::BusinessContext;
use crate::request::AssetClass;

pub const TEMPLATE_PROVIDER: &str = "template";
pub const STABILITY_PROVIDER: &str = "stability";
pub const GEMINI_PROVIDER: &str = "gemini";
pub const DRYRUN_PROVIDER: &str = "dryrun";

pub trait NamedProvider {
    fn name(&self) -> &str;
}

impl<T: NamedProvider + ?Sized> NamedProvider for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Providers in registration order; lookups are by name.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

impl<T: NamedProvider> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    /// Replaces any provider already registered under the same name.
    pub fn register(&mut self, provider: T) {
        if let Some(slot) = self
            .providers
            .iter_mut()
            .find(|existing| existing.name() == provider.name())
        {
            *slot = provider;
            return;
        }
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }

    /// Resolves an ordered name list to registered providers, skipping unknown
    /// and duplicate names.
    pub fn resolve(&self, names: &[String]) -> Vec<&T> {
        let mut out: Vec<&T> = Vec::new();
        for name in names {
            let Some(provider) = self.get(name) else {
                tracing::debug!(provider = %name, "ordering names an unregistered provider");
                continue;
            };
            if out.iter().any(|existing| existing.name() == provider.name()) {
                continue;
            }
            out.push(provider);
        }
        out
    }
}

/// Preference order of provider names per asset class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOrdering {
    orders: IndexMap<AssetClass, Vec<String>>,
}

impl Default for ProviderOrdering {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProviderOrdering {
    pub fn new(orders: Option<IndexMap<AssetClass, Vec<String>>>) -> Self {
        Self {
            orders: orders.unwrap_or_else(default_orders),
        }
    }

    /// Business override first, then the built-in table. The dry-run provider
    /// is appended last when the context enables it.
    pub fn for_class(&self, class: AssetClass, context: &BusinessContext) -> Vec<String> {
        let mut names = context
            .provider_order
            .get(&class)
            .filter(|names| !names.is_empty())
            .or_else(|| self.orders.get(&class))
            .cloned()
            .unwrap_or_default();
        if context.enable_dryrun && !names.iter().any(|name| name == DRYRUN_PROVIDER) {
            names.push(DRYRUN_PROVIDER.to_string());
        }
        names
    }
}

fn default_orders() -> IndexMap<AssetClass, Vec<String>> {
    let mut map = IndexMap::new();

    let mut insert = |class: AssetClass, names: &[&str]| {
        map.insert(
            class,
            names.iter().map(|name| (*name).to_string()).collect(),
        );
    };

    insert(
        AssetClass::Hero,
        &[TEMPLATE_PROVIDER, GEMINI_PROVIDER, STABILITY_PROVIDER],
    );
    insert(
        AssetClass::Infographic,
        &[TEMPLATE_PROVIDER, GEMINI_PROVIDER, STABILITY_PROVIDER],
    );
    insert(
        AssetClass::Diagram,
        &[GEMINI_PROVIDER, TEMPLATE_PROVIDER, STABILITY_PROVIDER],
    );
    insert(AssetClass::Portrait, &[GEMINI_PROVIDER, STABILITY_PROVIDER]);
    insert(AssetClass::Scene, &[GEMINI_PROVIDER, STABILITY_PROVIDER]);
    insert(AssetClass::Product, &[STABILITY_PROVIDER, GEMINI_PROVIDER]);
    insert(AssetClass::Inline, &[GEMINI_PROVIDER, STABILITY_PROVIDER]);

    map
}
