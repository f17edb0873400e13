// =============================================================================
// MomentumConfig — hot-loadable engine settings with atomic save (§6.4)
// =============================================================================
//
// Every tunable the engine spec names lives here so the binary never
// hard-codes a threshold. Persistence follows `runtime_config.rs`'s
// tmp-file-plus-rename pattern to avoid corrupting the config file on a
// crash mid-write. All fields carry `#[serde(default = "...")]` so new
// fields never break loading an older config file. Environment variables
// named in §6.4 override the loaded (or default) values in `load_with_env`,
// the way `main.rs` overrides `config.symbols` from `AURORA_SYMBOLS`.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ValidationError;

fn default_news_api_key() -> Option<String> {
    None
}

fn default_market_data_source() -> String {
    "alpaca".to_string()
}

fn default_premarket_min_change_pct() -> f64 {
    5.0
}

fn default_volume_ratio_min() -> f64 {
    2.0
}

fn default_pole_min_gain_pct() -> f64 {
    8.0
}

fn default_flag_range_min_pct() -> f64 {
    3.0
}

fn default_flag_range_max_pct() -> f64 {
    5.0
}

fn default_composite_weights() -> CompositeWeights {
    CompositeWeights {
        catalyst: 0.25,
        premarket: 0.35,
        bull_flag: 0.40,
    }
}

fn default_max_concurrency_per_adapter() -> usize {
    8
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_s() -> f64 {
    2.0
}

fn default_retry_backoff_factor() -> f64 {
    2.0
}

fn default_circuit_breaker_failures() -> u32 {
    5
}

fn default_circuit_breaker_cooldown_s() -> f64 {
    60.0
}

fn default_log_root() -> String {
    "./logs".to_string()
}

/// Weights applied by `MomentumRanker::rank` (§4.8). Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CompositeWeights {
    pub catalyst: f64,
    pub premarket: f64,
    pub bull_flag: f64,
}

impl CompositeWeights {
    pub fn sum(&self) -> f64 {
        self.catalyst + self.premarket + self.bull_flag
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        // Allow a small epsilon for floating-point round-trips through JSON.
        if (self.sum() - 1.0).abs() > 1e-6 {
            return Err(ValidationError::WeightsDoNotSumToOne(self.sum()));
        }
        Ok(())
    }
}

/// Full engine configuration (§6.4). All fields have defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumConfig {
    #[serde(default = "default_news_api_key")]
    pub news_api_key: Option<String>,

    #[serde(default = "default_market_data_source")]
    pub market_data_source: String,

    #[serde(default = "default_premarket_min_change_pct")]
    pub premarket_min_change_pct: f64,

    #[serde(default = "default_volume_ratio_min")]
    pub volume_ratio_min: f64,

    #[serde(default = "default_pole_min_gain_pct")]
    pub pole_min_gain_pct: f64,

    #[serde(default = "default_flag_range_min_pct")]
    pub flag_range_min_pct: f64,

    #[serde(default = "default_flag_range_max_pct")]
    pub flag_range_max_pct: f64,

    #[serde(default = "default_composite_weights")]
    pub composite_weights: CompositeWeights,

    #[serde(default = "default_max_concurrency_per_adapter")]
    pub max_concurrency_per_adapter: usize,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_delay_s")]
    pub retry_base_delay_s: f64,

    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,

    #[serde(default = "default_circuit_breaker_failures")]
    pub circuit_breaker_failures: u32,

    #[serde(default = "default_circuit_breaker_cooldown_s")]
    pub circuit_breaker_cooldown_s: f64,

    #[serde(default = "default_log_root")]
    pub log_root: String,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            news_api_key: default_news_api_key(),
            market_data_source: default_market_data_source(),
            premarket_min_change_pct: default_premarket_min_change_pct(),
            volume_ratio_min: default_volume_ratio_min(),
            pole_min_gain_pct: default_pole_min_gain_pct(),
            flag_range_min_pct: default_flag_range_min_pct(),
            flag_range_max_pct: default_flag_range_max_pct(),
            composite_weights: default_composite_weights(),
            max_concurrency_per_adapter: default_max_concurrency_per_adapter(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_s: default_retry_base_delay_s(),
            retry_backoff_factor: default_retry_backoff_factor(),
            circuit_breaker_failures: default_circuit_breaker_failures(),
            circuit_breaker_cooldown_s: default_circuit_breaker_cooldown_s(),
            log_root: default_log_root(),
        }
    }
}

impl MomentumConfig {
    /// Load from `path`, falling back to defaults if the file is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no config file found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        info!(path = %path.display(), "momentum config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename) — identical durability discipline to
    /// the teacher's `runtime_config.rs::save`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise momentum config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "momentum config saved (atomic)");
        Ok(())
    }

    /// Apply the environment-variable overrides named in §6.4 on top of
    /// whatever was loaded from disk (or the defaults).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("NEWS_API_KEY") {
            if !key.is_empty() {
                self.news_api_key = Some(key);
            }
        }
        if let Ok(source) = std::env::var("MARKET_DATA_SOURCE") {
            self.market_data_source = source;
        }
        apply_f64_env(&mut self.premarket_min_change_pct, "PREMARKET_MIN_CHANGE_PCT");
        apply_f64_env(&mut self.volume_ratio_min, "VOLUME_RATIO_MIN");
        apply_f64_env(&mut self.pole_min_gain_pct, "POLE_MIN_GAIN_PCT");
        apply_f64_env(&mut self.flag_range_min_pct, "FLAG_RANGE_MIN_PCT");
        apply_f64_env(&mut self.flag_range_max_pct, "FLAG_RANGE_MAX_PCT");

        if let Ok(raw) = std::env::var("COMPOSITE_WEIGHTS") {
            match parse_weights(&raw) {
                Some(weights) => self.composite_weights = weights,
                None => warn!(value = %raw, "COMPOSITE_WEIGHTS env var malformed, ignoring"),
            }
        }

        apply_usize_env(&mut self.max_concurrency_per_adapter, "MAX_CONCURRENCY_PER_ADAPTER");
        apply_u32_env(&mut self.retry_max_attempts, "RETRY_MAX_ATTEMPTS");
        apply_f64_env(&mut self.retry_base_delay_s, "RETRY_BASE_DELAY_S");
        apply_f64_env(&mut self.retry_backoff_factor, "RETRY_BACKOFF_FACTOR");
        apply_u32_env(&mut self.circuit_breaker_failures, "CIRCUIT_BREAKER_FAILURES");
        apply_f64_env(&mut self.circuit_breaker_cooldown_s, "CIRCUIT_BREAKER_COOLDOWN_S");

        if let Ok(root) = std::env::var("LOG_ROOT") {
            self.log_root = root;
        }
    }

    /// Validate startup invariants: composite weights must sum to 1.0
    /// (§4.8, §7). Called once at engine construction; a violation is a
    /// `ValidationError`, never silently clamped.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.composite_weights.validate()
    }
}

fn apply_f64_env(field: &mut f64, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<f64>() {
            Ok(value) => *field = value,
            Err(_) => warn!(var, value = %raw, "failed to parse f64 env override, ignoring"),
        }
    }
}

fn apply_u32_env(field: &mut u32, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<u32>() {
            Ok(value) => *field = value,
            Err(_) => warn!(var, value = %raw, "failed to parse u32 env override, ignoring"),
        }
    }
}

fn apply_usize_env(field: &mut usize, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<usize>() {
            Ok(value) => *field = value,
            Err(_) => warn!(var, value = %raw, "failed to parse usize env override, ignoring"),
        }
    }
}

fn parse_weights(raw: &str) -> Option<CompositeWeights> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }
    Some(CompositeWeights {
        catalyst: parts[0].parse().ok()?,
        premarket: parts[1].parse().ok()?,
        bull_flag: parts[2].parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let cfg = MomentumConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: MomentumConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.premarket_min_change_pct, 5.0);
        assert_eq!(cfg.volume_ratio_min, 2.0);
        assert_eq!(cfg.pole_min_gain_pct, 8.0);
        assert_eq!(cfg.composite_weights.catalyst, 0.25);
    }

    #[test]
    fn weights_not_summing_to_one_fail_validation() {
        let mut cfg = MomentumConfig::default();
        cfg.composite_weights = CompositeWeights {
            catalyst: 0.5,
            premarket: 0.5,
            bull_flag: 0.5,
        };
        assert!(matches!(
            cfg.validate(),
            Err(ValidationError::WeightsDoNotSumToOne(_))
        ));
    }

    #[test]
    fn parse_weights_rejects_malformed_input() {
        assert!(parse_weights("0.25,0.35").is_none());
        assert!(parse_weights("a,b,c").is_none());
        assert!(parse_weights("0.25,0.35,0.40").is_some());
    }

    #[test]
    fn roundtrip_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("momentum_config.json");
        let cfg = MomentumConfig::default();
        cfg.save(&path).unwrap();

        let loaded = MomentumConfig::load(&path).unwrap();
        assert_eq!(loaded.pole_min_gain_pct, cfg.pole_min_gain_pct);
        assert_eq!(loaded.composite_weights, cfg.composite_weights);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.json");
        let cfg = MomentumConfig::load(&path).unwrap();
        assert_eq!(cfg.premarket_min_change_pct, 5.0);
    }
}
