use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cardgen_contracts::models::ProviderKind;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{
    map_object, response_json_or_error, sniff_image_type, truncate_text, ImageBytes,
    ImageProvider, MissingImageError, ProviderGenerateRequest, ProviderGenerateResponse,
};

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// `gpt-image-1` over the Images API. Reference images switch the call to
/// the multipart `/images/edits` endpoint.
pub struct OpenAiProvider {
    api_key: String,
    api_base: String,
    http: HttpClient,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        let api_base = api_base.into();
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_key: api_key.into(),
            api_base: if api_base.is_empty() {
                DEFAULT_OPENAI_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            http: HttpClient::new(),
        }
    }

    fn generate_image(&self, request: &ProviderGenerateRequest) -> Result<ProviderGenerateResponse> {
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "n": 1,
            "size": request.params.size,
            "quality": request.params.quality,
            "output_format": "png",
        });

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        let status_code = response.status().as_u16();
        let response_payload = response_json_or_error("OpenAI", response)?;
        let item = self.first_image_item(&response_payload, request)?;

        Ok(ProviderGenerateResponse {
            image: item.bytes,
            mime_type: item.mime_type,
            provider_request: map_object(json!({
                "endpoint": endpoint,
                "payload": payload,
            })),
            provider_response: map_object(json!({
                "status_code": status_code,
                "created": response_payload.get("created").cloned().unwrap_or(Value::Null),
                "usage": response_payload.get("usage").cloned().unwrap_or(Value::Null),
            })),
            warnings: Vec::new(),
        })
    }

    fn edit_image(&self, request: &ProviderGenerateRequest) -> Result<ProviderGenerateResponse> {
        let endpoint = format!("{}/images/edits", self.api_base);
        let mut form = MultipartForm::new()
            .text("model", request.model.clone())
            .text("prompt", request.prompt.clone())
            .text("n", "1")
            .text("size", request.params.size.clone())
            .text("quality", request.params.quality.clone());

        for (idx, bytes) in request.reference_images.iter().enumerate() {
            let (mime_type, extension) = sniff_image_type(bytes);
            let part = MultipartPart::bytes(bytes.clone())
                .file_name(format!("reference-{idx:02}.{extension}"))
                .mime_str(mime_type)
                .context("invalid reference image mime")?;
            form = form.part("image[]", part);
        }

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .multipart(form)
            .send()
            .context("OpenAI edits request failed")?;
        let status_code = response.status().as_u16();
        let response_payload = response_json_or_error("OpenAI edits", response)?;
        let item = self.first_image_item(&response_payload, request)?;

        Ok(ProviderGenerateResponse {
            image: item.bytes,
            mime_type: item.mime_type,
            provider_request: map_object(json!({
                "endpoint": endpoint,
                "payload": {
                    "model": request.model,
                    "size": request.params.size,
                    "quality": request.params.quality,
                    "reference_images": request.reference_images.len(),
                },
            })),
            provider_response: map_object(json!({
                "status_code": status_code,
                "created": response_payload.get("created").cloned().unwrap_or(Value::Null),
            })),
            warnings: Vec::new(),
        })
    }

    fn first_image_item(
        &self,
        response_payload: &Value,
        request: &ProviderGenerateRequest,
    ) -> Result<ImageBytes> {
        let rows = response_payload
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for row in rows {
            let Some(obj) = row.as_object() else {
                continue;
            };
            if let Some(b64) = obj.get("b64_json").and_then(Value::as_str) {
                let bytes = BASE64
                    .decode(b64.as_bytes())
                    .context("OpenAI image base64 decode failed")?;
                return Ok(ImageBytes {
                    bytes,
                    mime_type: Some("image/png".to_string()),
                });
            }
            if let Some(url) = obj.get("url").and_then(Value::as_str) {
                return self.download_image(url, request);
            }
        }

        Err(MissingImageError {
            provider: "OpenAI".to_string(),
        }
        .into())
    }

    fn download_image(&self, url: &str, request: &ProviderGenerateRequest) -> Result<ImageBytes> {
        let response = self
            .http
            .get(url)
            .timeout(request.timeout)
            .send()
            .with_context(|| format!("failed downloading provider image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "provider image download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .context("failed reading provider image bytes")?
            .to_vec();
        Ok(ImageBytes { bytes, mime_type })
    }
}

impl ImageProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn generate(&self, request: &ProviderGenerateRequest) -> Result<ProviderGenerateResponse> {
        if request.reference_images.is_empty() {
            self.generate_image(request)
        } else {
            self.edit_image(request)
        }
    }
}
