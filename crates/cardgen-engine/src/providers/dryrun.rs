use std::io::Cursor;

use anyhow::{Context, Result};
use cardgen_contracts::models::ProviderKind;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{map_object, parse_dims, ImageProvider, ProviderGenerateRequest, ProviderGenerateResponse};

/// Offline stand-in for a real provider: answers with a solid PNG whose
/// color is derived from the prompt.
pub struct DryrunProvider {
    kind: ProviderKind,
}

impl DryrunProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }
}

impl ImageProvider for DryrunProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn generate(&self, request: &ProviderGenerateRequest) -> Result<ProviderGenerateResponse> {
        let (width, height) = parse_dims(&request.params.size);
        let image = render_dryrun_image(width, height, &request.prompt, self.kind)?;
        Ok(ProviderGenerateResponse {
            image,
            mime_type: Some("image/png".to_string()),
            provider_request: map_object(json!({
                "endpoint": "dryrun-native",
                "payload": {
                    "model": request.model,
                    "size": request.params.size,
                    "quality": request.params.quality,
                    "reference_images": request.reference_images.len(),
                }
            })),
            provider_response: map_object(json!({
                "status": "ok",
                "model": request.model,
            })),
            warnings: Vec::new(),
        })
    }
}

fn render_dryrun_image(width: u32, height: u32, prompt: &str, kind: ProviderKind) -> Result<Vec<u8>> {
    let (r, g, b) = color_from_prompt(prompt, kind);
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .context("failed to encode dryrun image")?;
    Ok(bytes.into_inner())
}

fn color_from_prompt(prompt: &str, kind: ProviderKind) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(kind.name().as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cardgen_contracts::models::transport_params;
    use cardgen_contracts::request::QualityTier;

    use super::*;

    #[test]
    fn dryrun_renders_requested_size() -> anyhow::Result<()> {
        let provider = DryrunProvider::new(ProviderKind::OpenAi);
        let response = provider.generate(&ProviderGenerateRequest {
            prompt: "Clinical-Precision front".to_string(),
            model: ProviderKind::OpenAi.model().to_string(),
            params: transport_params(ProviderKind::OpenAi, QualityTier::Production),
            reference_images: Vec::new(),
            timeout: Duration::from_secs(1),
        })?;
        let decoded = image::load_from_memory(&response.image)?;
        assert_eq!((decoded.width(), decoded.height()), (1536, 1024));
        Ok(())
    }

    #[test]
    fn color_is_stable_per_prompt() {
        assert_eq!(
            color_from_prompt("a", ProviderKind::Gemini),
            color_from_prompt("a", ProviderKind::Gemini)
        );
    }
}
