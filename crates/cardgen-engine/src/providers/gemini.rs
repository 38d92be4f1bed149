use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cardgen_contracts::models::ProviderKind;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{
    map_object, parse_dims, push_unique_warning, response_json_or_error, sniff_image_type,
    ImageBytes, ImageProvider, MissingImageError, ProviderGenerateRequest,
    ProviderGenerateResponse,
};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const RATIO_CANDIDATES: [(&str, f64); 10] = [
    ("1:1", 1.0),
    ("2:3", 2.0 / 3.0),
    ("3:2", 3.0 / 2.0),
    ("3:4", 3.0 / 4.0),
    ("4:3", 4.0 / 3.0),
    ("4:5", 4.0 / 5.0),
    ("5:4", 5.0 / 4.0),
    ("9:16", 9.0 / 16.0),
    ("16:9", 16.0 / 9.0),
    ("21:9", 21.0 / 9.0),
];

pub struct GeminiProvider {
    api_key: String,
    api_base: String,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        let api_base = api_base.into();
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_key: api_key.into(),
            api_base: if api_base.is_empty() {
                DEFAULT_GEMINI_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_parts(request: &ProviderGenerateRequest) -> Vec<Value> {
        let mut parts: Vec<Value> = request
            .reference_images
            .iter()
            .map(|bytes| {
                let (mime_type, _) = sniff_image_type(bytes);
                json!({
                    "inlineData": {
                        "mimeType": mime_type,
                        "data": BASE64.encode(bytes),
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": request.prompt }));
        parts
    }

    fn nearest_ratio_from_size(size: &str, warnings: &mut Vec<String>) -> String {
        let (width, height) = parse_dims(size);
        let target = width as f64 / height as f64;
        let mut best_key = "1:1";
        let mut best_delta = f64::MAX;
        for (key, ratio) in RATIO_CANDIDATES {
            let delta = (ratio - target).abs();
            if delta < best_delta {
                best_key = key;
                best_delta = delta;
            }
        }
        if best_delta > f64::EPSILON {
            push_unique_warning(
                warnings,
                format!("Gemini aspect ratio snapped to {best_key}."),
            );
        }
        best_key.to_string()
    }

    fn extract_image_item(response_payload: &Value) -> Result<ImageBytes> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Ok(ImageBytes { bytes, mime_type });
            }
        }

        Err(MissingImageError {
            provider: "Gemini".to_string(),
        }
        .into())
    }
}

impl ImageProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn generate(&self, request: &ProviderGenerateRequest) -> Result<ProviderGenerateResponse> {
        let endpoint = self.endpoint_for_model(&request.model);
        let mut warnings = Vec::new();

        let mut image_config = Map::new();
        image_config.insert(
            "aspectRatio".to_string(),
            Value::String(Self::nearest_ratio_from_size(
                &request.params.size,
                &mut warnings,
            )),
        );
        image_config.insert(
            "imageSize".to_string(),
            Value::String(request.params.quality.clone()),
        );
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": Self::build_parts(request),
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
                "imageConfig": image_config,
            },
        });

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        let item = Self::extract_image_item(&response_payload)?;

        Ok(ProviderGenerateResponse {
            image: item.bytes,
            mime_type: item.mime_type,
            provider_request: map_object(json!({
                "endpoint": endpoint,
                "generation_config": payload.get("generationConfig").cloned().unwrap_or(Value::Null),
                "reference_images": request.reference_images.len(),
            })),
            provider_response: map_object(json!({
                "candidates": response_payload
                    .get("candidates")
                    .and_then(Value::as_array)
                    .map(|rows| rows.len())
                    .unwrap_or(0),
                "usage_metadata": response_payload.get("usageMetadata").cloned().unwrap_or(Value::Null),
            })),
            warnings,
        })
    }
}
