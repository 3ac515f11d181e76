//! Pipeline configuration.
//!
//! Every threshold here is tuning, not correctness: the escalation limits in
//! particular are a proxy for false negatives and are expected to move.

use std::path::Path;
use std::time::Duration;

use redline_core::AnalysisFamily;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scorer::ScorerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub family: AnalysisFamily,
    /// Participates in every cache fingerprint, so bumping it after a prompt
    /// or schema change invalidates stale entries.
    pub prompt_version: String,
    pub chunking: ChunkingConfig,
    pub tiers: TierConfig,
    pub cache: CacheConfig,
    pub scoring: ScorerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            family: AnalysisFamily::Grammar,
            prompt_version: "v1".to_string(),
            chunking: ChunkingConfig::default(),
            tiers: TierConfig::default(),
            cache: CacheConfig::default(),
            scoring: ScorerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Texts longer than this many UTF-16 code units are chunked.
    pub max_chunk_size: usize,
    pub chunk_overlap: usize,
    /// Upper bound on chunk requests in flight at once.
    pub concurrency: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            chunk_overlap: 200,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Inputs longer than this go straight to the thorough tier.
    pub thorough_threshold: usize,
    /// Minimum input length for parse warnings to trigger escalation.
    pub escalate_on_warnings_min_len: usize,
    /// Minimum input length for an empty fast result to trigger escalation.
    pub escalate_on_empty_min_len: usize,
    pub fast_max_tokens: u32,
    pub thorough_max_tokens: u32,
    pub temperature: f32,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            thorough_threshold: 1500,
            escalate_on_warnings_min_len: 200,
            escalate_on_empty_min_len: 600,
            fast_max_tokens: 2048,
            thorough_max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            max_bytes: 5 * 1024 * 1024,
            ttl_secs: 3600,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;
        if chunking.max_chunk_size == 0 {
            return Err(invalid("chunking.max_chunk_size", "must be non-zero"));
        }
        if chunking.chunk_overlap >= chunking.max_chunk_size {
            return Err(invalid(
                "chunking.chunk_overlap",
                format!(
                    "{} must be smaller than max_chunk_size {}",
                    chunking.chunk_overlap, chunking.max_chunk_size
                ),
            ));
        }
        if chunking.concurrency == 0 {
            return Err(invalid("chunking.concurrency", "must be non-zero"));
        }
        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", "must be non-zero"));
        }
        let t = self.tiers.temperature;
        if !(0.0..=2.0).contains(&t) {
            return Err(invalid(
                "tiers.temperature",
                format!("{t} is outside [0, 2]"),
            ));
        }
        let threshold = self.scoring.auto_apply_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(
                "scoring.auto_apply_threshold",
                format!("{threshold} is outside [0, 1]"),
            ));
        }
        if self.prompt_version.trim().is_empty() {
            return Err(invalid("prompt_version", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "family": "style", "chunking": {{ "max_chunk_size": 800 }} }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.family, AnalysisFamily::Style);
        assert_eq!(config.chunking.max_chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let mut config = PipelineConfig::default();
        config.chunking.chunk_overlap = config.chunking.max_chunk_size;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "chunking.chunk_overlap",
                ..
            }
        ));
    }

    #[test]
    fn temperature_range_checked() {
        let mut config = PipelineConfig::default();
        config.tiers.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_file_is_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = PipelineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn ttl_is_seconds() {
        let cache = CacheConfig {
            ttl_secs: 90,
            ..Default::default()
        };
        assert_eq!(cache.ttl(), Duration::from_secs(90));
    }
}
