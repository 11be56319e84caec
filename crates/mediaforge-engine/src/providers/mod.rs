mod dryrun;
mod gemini;
mod stability;
mod template;

pub use dryrun::DryrunProvider;
pub use gemini::{GeminiProvider, DEFAULT_MODELS as GEMINI_DEFAULT_MODELS};
pub use stability::StabilityProvider;
pub use template::TemplateProvider;
