use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use cardgen_contracts::models::{ProviderKind, TransportParams};
use cardgen_contracts::runs::TransportFailure;
use reqwest::blocking::Response as HttpResponse;
use serde_json::{Map, Value};

mod dryrun;
mod gemini;
mod openai;

pub use dryrun::DryrunProvider;
pub use gemini::{GeminiProvider, DEFAULT_GEMINI_API_BASE};
pub use openai::{OpenAiProvider, DEFAULT_OPENAI_API_BASE};

/// Uniform call shape every provider adapter accepts.
#[derive(Debug, Clone)]
pub struct ProviderGenerateRequest {
    pub prompt: String,
    pub model: String,
    pub params: TransportParams,
    pub reference_images: Vec<Vec<u8>>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ProviderGenerateResponse {
    pub image: Vec<u8>,
    pub mime_type: Option<String>,
    pub provider_request: Map<String, Value>,
    pub provider_response: Map<String, Value>,
    pub warnings: Vec<String>,
}

pub trait ImageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn generate(&self, request: &ProviderGenerateRequest) -> Result<ProviderGenerateResponse>;
}

/// Providers registered at engine construction. A provider missing here is
/// unavailable for the lifetime of the engine.
#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<ProviderKind, Box<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers.insert(provider.kind(), Box::new(provider));
    }

    pub fn with<P: ImageProvider + 'static>(mut self, provider: P) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&dyn ImageProvider> {
        self.providers.get(&kind).map(|provider| provider.as_ref())
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }
}

/// Non-2xx HTTP answer from a provider endpoint.
#[derive(Debug, thiserror::Error)]
#[error("{provider} request failed ({status}): {body}")]
pub struct ProviderHttpError {
    pub provider: String,
    pub status: u16,
    pub body: String,
}

/// The provider answered successfully but returned no image part.
#[derive(Debug, thiserror::Error)]
#[error("{provider} response contained no image data")]
pub struct MissingImageError {
    pub provider: String,
}

pub(crate) struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        return Err(ProviderHttpError {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: truncate_text(&body, 512),
        }
        .into());
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub fn classify_transport_failure(err: &anyhow::Error) -> TransportFailure {
    for cause in err.chain() {
        if let Some(http) = cause.downcast_ref::<ProviderHttpError>() {
            return failure_for_status(http.status);
        }
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_timeout() {
                return TransportFailure::Timeout;
            }
            if let Some(status) = reqwest_err.status() {
                return failure_for_status(status.as_u16());
            }
        }
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::TimedOut {
                return TransportFailure::Timeout;
            }
        }
    }
    TransportFailure::Other
}

fn failure_for_status(status: u16) -> TransportFailure {
    match status {
        401 | 403 => TransportFailure::Authentication,
        429 => TransportFailure::RateLimited,
        408 | 504 => TransportFailure::Timeout,
        _ => TransportFailure::Other,
    }
}

pub fn is_missing_image(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<MissingImageError>().is_some())
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_dims(size: &str) -> (u32, u32) {
    let raw = size.trim().to_ascii_lowercase();
    if let Some((w, h)) = raw.split_once('x') {
        let width = w.trim().parse::<u32>().unwrap_or(1024);
        let height = h.trim().parse::<u32>().unwrap_or(1024);
        return (width.max(1), height.max(1));
    }
    (1024, 1024)
}

pub(crate) fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() || warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

/// Mime type and file extension of reference image bytes, PNG when unknown.
pub(crate) fn sniff_image_type(bytes: &[u8]) -> (&'static str, &'static str) {
    match image::guess_format(bytes) {
        Ok(format) => (
            format.to_mime_type(),
            format.extensions_str().first().copied().unwrap_or("img"),
        ),
        Err(_) => ("image/png", "png"),
    }
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
