use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use cardgen_contracts::models::ProviderKind;
use cardgen_contracts::request::QualityTier;
use serde_json::Value;
use tracing::{debug, warn};

const DEFAULT_PRICING_JSON: &str = include_str!("../resources/default_pricing.json");

/// USD per image, keyed by provider name then quality tier name.
#[derive(Debug, Clone, PartialEq)]
pub struct CostTable {
    rows: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Default for CostTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.merge_json(DEFAULT_PRICING_JSON);
        table
    }
}

impl CostTable {
    pub fn empty() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }

    /// Embedded defaults with the override file (if any) merged on top.
    pub fn load(override_path: Option<&Path>) -> Self {
        let mut table = Self::default();
        let Some(path) = override_path else {
            return table;
        };
        match fs::read_to_string(path) {
            Ok(raw) => {
                let applied = table.merge_json(&raw);
                debug!(path = %path.display(), applied, "pricing overrides merged");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %path.display(), error = %err, "pricing overrides unreadable");
            }
        }
        table
    }

    /// Merges `{provider: {quality: usd}}` rows; returns how many cells were
    /// applied. Negative or non-numeric values are skipped.
    pub fn merge_json(&mut self, raw: &str) -> usize {
        let payload = match serde_json::from_str::<Value>(raw) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "pricing table is not valid JSON");
                return 0;
            }
        };
        let Some(table) = payload.as_object() else {
            return 0;
        };

        let mut applied = 0;
        for (provider, row_value) in table {
            let Some(row) = row_value.as_object() else {
                continue;
            };
            for (quality, cell) in row {
                match cell.as_f64() {
                    Some(usd) if usd >= 0.0 && usd.is_finite() => {
                        self.rows
                            .entry(provider.trim().to_ascii_lowercase())
                            .or_default()
                            .insert(quality.trim().to_ascii_lowercase(), usd);
                        applied += 1;
                    }
                    _ => warn!(%provider, %quality, value = %cell, "ignoring invalid price"),
                }
            }
        }
        applied
    }

    pub fn set(&mut self, provider: ProviderKind, quality: QualityTier, usd: f64) {
        if usd < 0.0 || !usd.is_finite() {
            return;
        }
        self.rows
            .entry(provider.name().to_string())
            .or_default()
            .insert(quality.as_str().to_string(), usd);
    }

    /// Static lookup; a missing row costs nothing.
    pub fn estimate(&self, provider: ProviderKind, quality: QualityTier) -> f64 {
        self.rows
            .get(provider.name())
            .and_then(|row| row.get(quality.as_str()))
            .copied()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_published_prices() {
        let table = CostTable::default();
        assert_eq!(table.estimate(ProviderKind::OpenAi, QualityTier::Draft), 0.02);
        assert_eq!(table.estimate(ProviderKind::OpenAi, QualityTier::Review), 0.07);
        assert_eq!(table.estimate(ProviderKind::OpenAi, QualityTier::Production), 0.19);
        for quality in [QualityTier::Draft, QualityTier::Review, QualityTier::Production] {
            assert_eq!(table.estimate(ProviderKind::Gemini, quality), 0.005);
        }
    }

    #[test]
    fn override_file_replaces_cells_and_skips_bad_values() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("pricing_overrides.json");
        fs::write(
            &path,
            r#"{"openai": {"production": 0.25, "draft": -1}, "gemini": {"review": "cheap"}}"#,
        )?;

        let table = CostTable::load(Some(&path));
        assert_eq!(table.estimate(ProviderKind::OpenAi, QualityTier::Production), 0.25);
        assert_eq!(table.estimate(ProviderKind::OpenAi, QualityTier::Draft), 0.02);
        assert_eq!(table.estimate(ProviderKind::Gemini, QualityTier::Review), 0.005);
        Ok(())
    }

    #[test]
    fn missing_override_file_keeps_defaults() {
        let table = CostTable::load(Some(Path::new("/nonexistent/cardgen/pricing.json")));
        assert_eq!(table, CostTable::default());
    }

    #[test]
    fn empty_table_costs_nothing() {
        let mut table = CostTable::empty();
        assert_eq!(table.estimate(ProviderKind::Gemini, QualityTier::Draft), 0.0);
        table.set(ProviderKind::Gemini, QualityTier::Draft, -3.0);
        assert_eq!(table.estimate(ProviderKind::Gemini, QualityTier::Draft), 0.0);
    }
}
