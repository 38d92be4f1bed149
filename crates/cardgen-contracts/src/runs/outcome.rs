use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::ProviderKind;
use crate::request::{GenerationRequest, QualityTier, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoProviderAvailable,
    Transport,
    InvalidImage,
    PersistenceFailed,
    /// A worker panicked while handling the item.
    Unhandled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NoProviderAvailable => "no_provider_available",
            ErrorKind::Transport => "transport",
            ErrorKind::InvalidImage => "invalid_image",
            ErrorKind::PersistenceFailed => "persistence_failed",
            ErrorKind::Unhandled => "unhandled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailure {
    Timeout,
    Authentication,
    RateLimited,
    Other,
}

impl TransportFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportFailure::Timeout => "timeout",
            TransportFailure::Authentication => "authentication",
            TransportFailure::RateLimited => "rate_limited",
            TransportFailure::Other => "other",
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one generation attempt.
///
/// `image_bytes` and `output_path` are set only on success; `error_kind` and
/// `error_message` only on failure. Use the constructors to keep that shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutcome {
    pub concept: String,
    pub side: Side,
    pub quality: QualityTier,
    pub success: bool,
    #[serde(skip)]
    pub image_bytes: Option<Vec<u8>>,
    pub output_path: Option<PathBuf>,
    pub provider_used: Option<ProviderKind>,
    pub fallback_reason: Option<String>,
    pub cost_estimate: f64,
    pub processing_time_seconds: f64,
    pub error_kind: Option<ErrorKind>,
    pub transport_failure: Option<TransportFailure>,
    pub error_message: Option<String>,
}

impl GenerationOutcome {
    pub fn succeeded(
        request: &GenerationRequest,
        provider: ProviderKind,
        image_bytes: Vec<u8>,
        output_path: PathBuf,
        cost_estimate: f64,
        processing_time_seconds: f64,
        fallback_reason: Option<String>,
    ) -> Self {
        Self {
            concept: request.concept().to_string(),
            side: request.side(),
            quality: request.quality(),
            success: true,
            image_bytes: Some(image_bytes),
            output_path: Some(output_path),
            provider_used: Some(provider),
            fallback_reason,
            cost_estimate: cost_estimate.max(0.0),
            processing_time_seconds,
            error_kind: None,
            transport_failure: None,
            error_message: None,
        }
    }

    pub fn failed(
        request: &GenerationRequest,
        error_kind: ErrorKind,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            concept: request.concept().to_string(),
            side: request.side(),
            quality: request.quality(),
            success: false,
            image_bytes: None,
            output_path: None,
            provider_used: None,
            fallback_reason: None,
            cost_estimate: 0.0,
            processing_time_seconds: 0.0,
            error_kind: Some(error_kind),
            transport_failure: None,
            error_message: Some(error_message.into()),
        }
    }

    pub fn with_provider(mut self, provider: ProviderKind, cost_estimate: f64) -> Self {
        self.provider_used = Some(provider);
        self.cost_estimate = cost_estimate.max(0.0);
        self
    }

    pub fn with_transport_failure(mut self, failure: TransportFailure) -> Self {
        self.transport_failure = Some(failure);
        self
    }

    pub fn with_fallback_reason(mut self, reason: Option<String>) -> Self {
        self.fallback_reason = reason;
        self
    }

    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time_seconds = seconds.max(0.0);
        self
    }
}
