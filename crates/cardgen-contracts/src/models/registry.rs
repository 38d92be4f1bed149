use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::request::{ParseError, QualityTier};

/// The two backing image services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Higher fidelity, higher cost.
    OpenAi,
    /// Lower cost, faster.
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::OpenAi, ProviderKind::Gemini];

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn short_name(self) -> &'static str {
        self.spec().short_name
    }

    pub fn model(self) -> &'static str {
        self.spec().model
    }

    pub fn spec(self) -> &'static ProviderSpec {
        match self {
            ProviderKind::OpenAi => &OPENAI_SPEC,
            ProviderKind::Gemini => &GEMINI_SPEC,
        }
    }

    pub fn index(self) -> usize {
        match self {
            ProviderKind::OpenAi => 0,
            ProviderKind::Gemini => 1,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "openai" | "gpt" | "gpt1" | "gpt-image-1" | "provider_a" => Ok(ProviderKind::OpenAi),
            "gemini" | "google" | "gemini-2.5-flash-image-preview" | "provider_b" => {
                Ok(ProviderKind::Gemini)
            }
            _ => Err(ParseError::UnknownModel(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub kind: ProviderKind,
    pub name: &'static str,
    pub display_name: &'static str,
    pub model: &'static str,
    /// Token used in output file names.
    pub short_name: &'static str,
}

static OPENAI_SPEC: ProviderSpec = ProviderSpec {
    kind: ProviderKind::OpenAi,
    name: "openai",
    display_name: "OpenAI GPT Image 1",
    model: "gpt-image-1",
    short_name: "GPT1",
};

static GEMINI_SPEC: ProviderSpec = ProviderSpec {
    kind: ProviderKind::Gemini,
    name: "gemini",
    display_name: "Google Gemini 2.5 Flash Image",
    model: "gemini-2.5-flash-image-preview",
    short_name: "GEMINI",
};

/// Provider-native knobs sent along with the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportParams {
    pub size: String,
    pub quality: String,
}

pub fn transport_params(provider: ProviderKind, quality: QualityTier) -> TransportParams {
    let (size, knob) = match (provider, quality) {
        (ProviderKind::OpenAi, QualityTier::Draft) => ("1024x1024", "low"),
        (ProviderKind::OpenAi, QualityTier::Review) => ("1536x1024", "medium"),
        (ProviderKind::OpenAi, QualityTier::Production) => ("1536x1024", "high"),
        // Gemini has no quality knob; the size hint picks aspect ratio and resolution.
        (ProviderKind::Gemini, _) => ("1536x1024", "1K"),
    };
    TransportParams {
        size: size.to_string(),
        quality: knob.to_string(),
    }
}
