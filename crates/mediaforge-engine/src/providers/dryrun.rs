use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use mediaforge_contracts::providers::{NamedProvider, DRYRUN_PROVIDER};
use mediaforge_contracts::{BusinessContext, FailureKind, GenerationRequest, ProviderFailure};
use sha2::{Digest, Sha256};

use crate::provider::{Generated, MediaProvider, ProviderOutcome};

/// Offline provider: a solid colour derived from the description.
#[derive(Debug, Default)]
pub struct DryrunProvider;

impl DryrunProvider {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn render_png(width: u32, height: u32, prompt: &str) -> Result<Vec<u8>, image::ImageError> {
    let (r, g, b) = color_from_prompt(prompt);
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

impl NamedProvider for DryrunProvider {
    fn name(&self) -> &str {
        DRYRUN_PROVIDER
    }
}

#[async_trait]
impl MediaProvider for DryrunProvider {
    fn required_credentials(&self) -> &'static [&'static str] {
        &["MEDIAFORGE_ENABLE_DRYRUN"]
    }

    fn is_available(&self, context: &BusinessContext) -> bool {
        context.enable_dryrun
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
        _context: &BusinessContext,
        _deadline: Duration,
    ) -> ProviderOutcome {
        let dims = request.dimensions;
        let prompt = request.description.clone();
        let rendered =
            tokio::task::spawn_blocking(move || render_png(dims.width, dims.height, &prompt))
                .await
                .map_err(|err| {
                    ProviderFailure::new(
                        FailureKind::UnknownProviderError,
                        format!("dryrun render task failed: {err}"),
                    )
                })?;
        let bytes = rendered.map_err(|err| {
            ProviderFailure::new(
                FailureKind::UnknownProviderError,
                format!("dryrun render failed: {err}"),
            )
        })?;
        Ok(Generated::bytes(bytes, "image/png").with_model("dryrun-image-1"))
    }
}
