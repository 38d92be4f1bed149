use serde::Serialize;

use super::registry::ProviderKind;
use crate::request::{ModelChoice, QualityTier};

/// Which providers were usable when the engine was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProviderAvailability {
    pub openai: bool,
    pub gemini: bool,
}

impl ProviderAvailability {
    pub fn new(openai: bool, gemini: bool) -> Self {
        Self { openai, gemini }
    }

    pub fn is_available(&self, provider: ProviderKind) -> bool {
        match provider {
            ProviderKind::OpenAi => self.openai,
            ProviderKind::Gemini => self.gemini,
        }
    }

    pub fn any(&self) -> bool {
        self.openai || self.gemini
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSelection {
    pub provider: ProviderKind,
    pub requested: ModelChoice,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no image provider available (configure OPENAI_API_KEY and/or GEMINI_API_KEY)")]
    NoProviderAvailable,
}

#[derive(Debug, Clone)]
pub struct ProviderSelector {
    availability: ProviderAvailability,
}

impl ProviderSelector {
    pub fn new(availability: ProviderAvailability) -> Self {
        Self { availability }
    }

    pub fn availability(&self) -> ProviderAvailability {
        self.availability
    }

    pub fn select(
        &self,
        requested: ModelChoice,
        quality: QualityTier,
    ) -> Result<ProviderSelection, SelectionError> {
        let fallback_reason = match requested {
            ModelChoice::Provider(provider) if self.availability.is_available(provider) => {
                return Ok(ProviderSelection {
                    provider,
                    requested,
                    fallback_reason: None,
                });
            }
            ModelChoice::Provider(provider) => Some(format!(
                "Requested provider '{provider}' unavailable; using automatic selection."
            )),
            ModelChoice::Auto => None,
        };

        let (preferred, secondary) = match quality {
            QualityTier::Production => (ProviderKind::OpenAi, ProviderKind::Gemini),
            QualityTier::Draft | QualityTier::Review => {
                (ProviderKind::Gemini, ProviderKind::OpenAi)
            }
        };
        let provider = if self.availability.is_available(preferred) {
            preferred
        } else if self.availability.is_available(secondary) {
            secondary
        } else {
            return Err(SelectionError::NoProviderAvailable);
        };

        Ok(ProviderSelection {
            provider,
            requested,
            fallback_reason,
        })
    }
}
