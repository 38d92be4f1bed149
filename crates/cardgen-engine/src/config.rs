use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use cardgen_contracts::models::{ProviderAvailability, ProviderKind};
use serde::Serialize;

use crate::providers::{non_empty_env, DEFAULT_GEMINI_API_BASE, DEFAULT_OPENAI_API_BASE};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const MIN_REQUEST_TIMEOUT_SECS: f64 = 5.0;
const MAX_REQUEST_TIMEOUT_SECS: f64 = 600.0;
const MIN_KEY_LEN: usize = 20;

/// Everything the engine needs from the environment, read once at startup.
#[derive(Clone, PartialEq)]
pub struct EngineConfig {
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub output_root: PathBuf,
    pub request_timeout: Duration,
    pub file_prefix: Option<String>,
    pub pricing_override_path: Option<PathBuf>,
    /// Swap both providers for the offline renderer.
    pub dryrun: bool,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<set>"))
            .field("openai_api_base", &self.openai_api_base)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<set>"))
            .field("gemini_api_base", &self.gemini_api_base)
            .field("output_root", &self.output_root)
            .field("request_timeout", &self.request_timeout)
            .field("file_prefix", &self.file_prefix)
            .field("pricing_override_path", &self.pricing_override_path)
            .field("dryrun", &self.dryrun)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            gemini_api_key: None,
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            output_root: PathBuf::from("output"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            file_prefix: None,
            pricing_override_path: None,
            dryrun: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let api_base = |key: &str, default: String| {
            lookup(key)
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(default)
        };
        let pricing_override_path = lookup("CARDGEN_PRICING_OVERRIDES")
            .map(PathBuf::from)
            .or_else(|| {
                lookup("HOME")
                    .map(PathBuf::from)
                    .map(|home| home.join(".cardgen").join("pricing_overrides.json"))
            });

        Self {
            openai_api_key: lookup("OPENAI_API_KEY"),
            openai_api_base: api_base("OPENAI_API_BASE", defaults.openai_api_base),
            gemini_api_key: lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")),
            gemini_api_base: api_base("GEMINI_API_BASE", defaults.gemini_api_base),
            output_root: lookup("CARDGEN_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_root),
            request_timeout: lookup("CARDGEN_REQUEST_TIMEOUT")
                .and_then(|raw| parse_timeout(&raw))
                .unwrap_or(defaults.request_timeout),
            file_prefix: lookup("CARDGEN_FILE_PREFIX"),
            pricing_override_path,
            dryrun: false,
        }
    }

    pub fn api_status(&self) -> ApiStatus {
        ApiStatus {
            openai: check_key(
                ProviderKind::OpenAi,
                self.openai_api_key.as_deref(),
                "sk-",
                "OPENAI_API_KEY",
            ),
            gemini: check_key(
                ProviderKind::Gemini,
                self.gemini_api_key.as_deref(),
                "AIza",
                "GEMINI_API_KEY or GOOGLE_API_KEY",
            ),
        }
    }

    /// Availability flags fixed for the lifetime of an engine. Dryrun makes
    /// both providers available.
    pub fn availability(&self) -> ProviderAvailability {
        if self.dryrun {
            return ProviderAvailability::new(true, true);
        }
        let status = self.api_status();
        ProviderAvailability::new(
            status.openai.status == KeyStatus::Available,
            status.gemini.status == KeyStatus::Available,
        )
    }
}

pub fn parse_timeout(raw: &str) -> Option<Duration> {
    let seconds = raw.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(
        seconds.clamp(MIN_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Available,
    MissingKey,
    InvalidKey,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Available => "available",
            KeyStatus::MissingKey => "missing_key",
            KeyStatus::InvalidKey => "invalid_key",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiHealthCheck {
    pub provider: ProviderKind,
    pub status: KeyStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiStatus {
    pub openai: ApiHealthCheck,
    pub gemini: ApiHealthCheck,
}

impl ApiStatus {
    pub fn checks(&self) -> [&ApiHealthCheck; 2] {
        [&self.openai, &self.gemini]
    }

    pub fn available_count(&self) -> usize {
        self.checks()
            .iter()
            .filter(|check| check.status == KeyStatus::Available)
            .count()
    }

    pub fn format_report(&self, detailed: bool) -> String {
        let mut lines = vec!["API status".to_string(), "=".repeat(50)];
        for check in self.checks() {
            lines.push(format!(
                "[{}] {}: {}",
                indicator(check.status),
                check.provider.spec().display_name,
                check.status.as_str()
            ));
            if detailed {
                lines.push(format!("    {}", check.message));
            }
        }
        lines.push(String::new());
        let available = self.available_count();
        let total = self.checks().len();
        lines.push(match available {
            0 => "No APIs available; configure API keys".to_string(),
            n if n == total => "All APIs ready for use".to_string(),
            n => format!("{n}/{total} APIs available"),
        });
        lines.push(self.recommend_workflow().to_string());
        lines.join("\n")
    }

    pub fn recommend_workflow(&self) -> &'static str {
        let openai = self.openai.status == KeyStatus::Available;
        let gemini = self.gemini.status == KeyStatus::Available;
        match (openai, gemini) {
            (true, true) => "Recommended: dual model workflow for cost/quality balance",
            (true, false) => "Recommended: OpenAI GPT Image 1 for high-quality results",
            (false, true) => "Recommended: Gemini for cost-effective generation",
            (false, false) => "No workflow available; configure API keys",
        }
    }
}

fn indicator(status: KeyStatus) -> &'static str {
    match status {
        KeyStatus::Available => "ok",
        KeyStatus::MissingKey => "missing",
        KeyStatus::InvalidKey => "invalid",
    }
}

fn check_key(
    provider: ProviderKind,
    key: Option<&str>,
    prefix: &str,
    env_names: &str,
) -> ApiHealthCheck {
    let (status, message) = match key.map(str::trim).filter(|key| !key.is_empty()) {
        None => (
            KeyStatus::MissingKey,
            format!("{env_names} not found in environment"),
        ),
        Some(key) if !key.starts_with(prefix) || key.len() < MIN_KEY_LEN => (
            KeyStatus::InvalidKey,
            format!("API key format appears invalid (should start with '{prefix}')"),
        ),
        Some(_) => (
            KeyStatus::Available,
            "API key found and format looks valid".to_string(),
        ),
    };
    ApiHealthCheck {
        provider,
        status,
        message,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config.output_root, PathBuf::from("output"));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.openai_api_base, DEFAULT_OPENAI_API_BASE);
        assert!(config.pricing_override_path.is_none());
        assert_eq!(config.availability(), ProviderAvailability::new(false, false));
    }

    #[test]
    fn environment_overrides_are_read() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-abcdefghijklmnopqrstuvwxyz"),
            ("GOOGLE_API_KEY", "AIzaabcdefghijklmnopqrstuvwxyz"),
            ("OPENAI_API_BASE", "https://proxy.local/v1/"),
            ("CARDGEN_OUTPUT_DIR", "/tmp/cards"),
            ("CARDGEN_REQUEST_TIMEOUT", "45"),
            ("HOME", "/home/card"),
        ]));
        assert_eq!(config.openai_api_base, "https://proxy.local/v1");
        assert_eq!(config.output_root, PathBuf::from("/tmp/cards"));
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(
            config.pricing_override_path,
            Some(PathBuf::from("/home/card/.cardgen/pricing_overrides.json"))
        );
        assert_eq!(config.availability(), ProviderAvailability::new(true, true));
    }

    #[test]
    fn malformed_keys_are_reported_invalid() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "not-a-key"),
            ("GEMINI_API_KEY", "AIzashort"),
        ]));
        let status = config.api_status();
        assert_eq!(status.openai.status, KeyStatus::InvalidKey);
        assert_eq!(status.gemini.status, KeyStatus::InvalidKey);
        assert_eq!(status.available_count(), 0);
        assert!(status.format_report(true).contains("should start with 'sk-'"));
    }

    #[test]
    fn recommendation_tracks_available_providers() {
        let config = EngineConfig::from_lookup(lookup(&[(
            "GEMINI_API_KEY",
            "AIzaabcdefghijklmnopqrstuvwxyz",
        )]));
        let status = config.api_status();
        assert_eq!(status.openai.status, KeyStatus::MissingKey);
        assert_eq!(
            status.recommend_workflow(),
            "Recommended: Gemini for cost-effective generation"
        );
        assert!(status.format_report(false).contains("1/2 APIs available"));
    }

    #[test]
    fn dryrun_marks_both_available() {
        let config = EngineConfig {
            dryrun: true,
            ..EngineConfig::default()
        };
        assert!(config.availability().openai && config.availability().gemini);
    }

    #[test]
    fn timeout_parsing_rejects_nonsense() {
        assert_eq!(parse_timeout("abc"), None);
        assert_eq!(parse_timeout("-3"), None);
        assert_eq!(parse_timeout("1"), Some(Duration::from_secs(5)));
    }
}
