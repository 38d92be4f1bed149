use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::ProviderKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown side '{0}' (expected front or back)")]
    UnknownSide(String),
    #[error("unknown quality tier '{0}' (expected draft, review or production)")]
    UnknownQuality(String),
    #[error("unknown model '{0}' (expected openai, gemini or auto)")]
    UnknownModel(String),
    #[error("concept must not be empty")]
    EmptyConcept,
    #[error("concept '{0}' must not contain path separators")]
    InvalidConcept(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Front, Side::Back];

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Front => "front",
            Side::Back => "back",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Side::Front),
            "back" => Ok(Side::Back),
            _ => Err(ParseError::UnknownSide(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Draft,
    Review,
    Production,
}

impl QualityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::Draft => "draft",
            QualityTier::Review => "review",
            QualityTier::Production => "production",
        }
    }

    /// Subdirectory of the output root that receives this tier's files.
    pub fn output_dir_name(self) -> &'static str {
        match self {
            QualityTier::Production => "production",
            QualityTier::Draft | QualityTier::Review => "drafts",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(QualityTier::Draft),
            "review" => Ok(QualityTier::Review),
            "production" => Ok(QualityTier::Production),
            _ => Err(ParseError::UnknownQuality(raw.to_string())),
        }
    }
}

/// Explicit provider request, or `Auto` to let the quality tier decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelChoice {
    #[default]
    Auto,
    Provider(ProviderKind),
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelChoice::Auto => f.write_str("auto"),
            ModelChoice::Provider(kind) => f.write_str(kind.name()),
        }
    }
}

impl FromStr for ModelChoice {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().eq_ignore_ascii_case("auto") {
            return Ok(ModelChoice::Auto);
        }
        raw.parse::<ProviderKind>().map(ModelChoice::Provider)
    }
}

impl TryFrom<String> for ModelChoice {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelChoice> for String {
    fn from(value: ModelChoice) -> Self {
        value.to_string()
    }
}

/// One card to generate. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    concept: String,
    side: Side,
    quality: QualityTier,
    model: ModelChoice,
}

impl GenerationRequest {
    pub fn new(
        concept: impl Into<String>,
        side: Side,
        quality: QualityTier,
        model: ModelChoice,
    ) -> Result<Self, ParseError> {
        let concept = validate_concept(concept.into())?;
        Ok(Self {
            concept,
            side,
            quality,
            model,
        })
    }

    pub fn concept(&self) -> &str {
        &self.concept
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn quality(&self) -> QualityTier {
        self.quality
    }

    pub fn model(&self) -> ModelChoice {
        self.model
    }
}

fn validate_concept(raw: String) -> Result<String, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyConcept);
    }
    // The concept is embedded verbatim in the output file name.
    if trimmed.contains(['/', '\\']) || trimmed == ".." {
        return Err(ParseError::InvalidConcept(raw));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_tier_rejects_unknown_values() {
        assert_eq!("Production".parse::<QualityTier>(), Ok(QualityTier::Production));
        assert_eq!(
            "final".parse::<QualityTier>(),
            Err(ParseError::UnknownQuality("final".to_string()))
        );
    }

    #[test]
    fn review_tier_shares_drafts_directory() {
        assert_eq!(QualityTier::Draft.output_dir_name(), "drafts");
        assert_eq!(QualityTier::Review.output_dir_name(), "drafts");
        assert_eq!(QualityTier::Production.output_dir_name(), "production");
    }

    #[test]
    fn model_choice_round_trips_through_strings() {
        assert_eq!("auto".parse::<ModelChoice>(), Ok(ModelChoice::Auto));
        assert_eq!(
            "gpt-image-1".parse::<ModelChoice>(),
            Ok(ModelChoice::Provider(ProviderKind::OpenAi))
        );
        let encoded = serde_json::to_string(&ModelChoice::Provider(ProviderKind::Gemini))
            .unwrap_or_default();
        assert_eq!(encoded, "\"gemini\"");
        let decoded: ModelChoice = serde_json::from_str("\"AUTO\"").unwrap_or_default();
        assert_eq!(decoded, ModelChoice::Auto);
        assert!(serde_json::from_str::<ModelChoice>("\"midjourney\"").is_err());
    }

    #[test]
    fn request_rejects_empty_and_path_like_concepts() {
        assert_eq!(
            GenerationRequest::new("  ", Side::Front, QualityTier::Draft, ModelChoice::Auto),
            Err(ParseError::EmptyConcept)
        );
        assert!(matches!(
            GenerationRequest::new("../etc", Side::Back, QualityTier::Draft, ModelChoice::Auto),
            Err(ParseError::InvalidConcept(_))
        ));
        let request = GenerationRequest::new(
            " Athletic-Edge ",
            Side::Back,
            QualityTier::Review,
            ModelChoice::Auto,
        )
        .ok();
        assert_eq!(request.as_ref().map(GenerationRequest::concept), Some("Athletic-Edge"));
    }
}
