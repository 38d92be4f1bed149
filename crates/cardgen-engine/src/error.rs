use std::io;
use std::path::PathBuf;

use cardgen_contracts::models::{ProviderKind, SelectionError};
use cardgen_contracts::runs::{ErrorKind, TransportFailure};

use crate::providers::{classify_transport_failure, error_chain_text, is_missing_image};
use crate::validate::ValidationError;

/// Every way a single generation can fail. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("no image provider available")]
    NoProviderAvailable,
    #[error("{provider} transport error ({failure}): {detail}")]
    Transport {
        provider: ProviderKind,
        failure: TransportFailure,
        detail: String,
    },
    #[error("{provider} returned an unusable image: {source}")]
    InvalidImage {
        provider: ProviderKind,
        #[source]
        source: ValidationError,
    },
    #[error("failed to persist {}: {source}", path.display())]
    PersistenceFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::NoProviderAvailable => ErrorKind::NoProviderAvailable,
            GenerationError::Transport { .. } => ErrorKind::Transport,
            GenerationError::InvalidImage { .. } => ErrorKind::InvalidImage,
            GenerationError::PersistenceFailed { .. } => ErrorKind::PersistenceFailed,
        }
    }

    pub fn transport_failure(&self) -> Option<TransportFailure> {
        match self {
            GenerationError::Transport { failure, .. } => Some(*failure),
            _ => None,
        }
    }

    /// Maps an adapter error chain onto the taxonomy. A successful answer
    /// without image data counts as an invalid image, not a transport fault.
    pub fn from_provider(provider: ProviderKind, err: anyhow::Error) -> Self {
        if is_missing_image(&err) {
            return GenerationError::InvalidImage {
                provider,
                source: ValidationError::NoImageData,
            };
        }
        GenerationError::Transport {
            provider,
            failure: classify_transport_failure(&err),
            detail: error_chain_text(&err, 512),
        }
    }
}

impl From<SelectionError> for GenerationError {
    fn from(value: SelectionError) -> Self {
        match value {
            SelectionError::NoProviderAvailable => GenerationError::NoProviderAvailable,
        }
    }
}
