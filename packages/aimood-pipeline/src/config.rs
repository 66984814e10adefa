//! Pipeline configuration (YAML)
//!
//! ```yaml
//! version: 1
//! snapshot_root: data
//! snapshot_interval_secs: 60
//! stages:
//!   - name: metadata
//!     max_concurrent_calls: 4
//!     rate_limit: { calls: 4, period_secs: 60 }
//! ```
//!
//! `PipelineConfig::default()` mirrors the production harvest: NYT search,
//! Wayback fetch and LLM labelling, each capped at its API's per-minute quota.

use crate::error::{PipelineError, Result};
use crate::rate_limit::RateLimiter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RATE_PERIOD_SECS: u64 = 60;

fn default_snapshot_interval_secs() -> u64 {
    DEFAULT_SNAPSHOT_INTERVAL_SECS
}

fn default_rate_period_secs() -> u64 {
    DEFAULT_RATE_PERIOD_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    pub calls: u32,
    #[serde(default = "default_rate_period_secs")]
    pub period_secs: u64,
}

impl RateLimitSettings {
    pub fn per_minute(calls: u32) -> Self {
        Self {
            calls,
            period_secs: DEFAULT_RATE_PERIOD_SECS,
        }
    }

    pub fn build(&self) -> Result<RateLimiter> {
        RateLimiter::new(self.calls, Duration::from_secs(self.period_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSettings {
    /// Also the snapshot namespace of the stage's output registry
    pub name: String,
    pub max_concurrent_calls: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSettings>,
}

impl StageSettings {
    pub fn new(name: impl Into<String>, max_concurrent_calls: usize) -> Self {
        Self {
            name: name.into(),
            max_concurrent_calls,
            rate_limit: None,
        }
    }

    pub fn rate_limited(mut self, limit: RateLimitSettings) -> Self {
        self.rate_limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub version: u32,
    pub snapshot_root: PathBuf,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    pub stages: Vec<StageSettings>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            snapshot_root: PathBuf::from("data"),
            snapshot_interval_secs: DEFAULT_SNAPSHOT_INTERVAL_SECS,
            stages: vec![
                StageSettings::new("metadata", 4).rate_limited(RateLimitSettings::per_minute(4)),
                StageSettings::new("content", 14).rate_limited(RateLimitSettings::per_minute(14)),
                StageSettings::new("labels", 50).rate_limited(RateLimitSettings::per_minute(50)),
            ],
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(PipelineError::Config(format!(
                "unsupported config version {} (supported: {})",
                self.version, CONFIG_VERSION
            )));
        }
        if self.snapshot_interval_secs == 0 {
            return Err(PipelineError::config("snapshot_interval_secs must be positive"));
        }
        if self.stages.is_empty() {
            return Err(PipelineError::config("at least one stage is required"));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(PipelineError::config("stage name must not be empty"));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
            if stage.max_concurrent_calls == 0 {
                return Err(PipelineError::Config(format!(
                    "stage '{}': max_concurrent_calls must be at least 1",
                    stage.name
                )));
            }
            if let Some(limit) = &stage.rate_limit {
                if limit.calls == 0 || limit.period_secs == 0 {
                    return Err(PipelineError::Config(format!(
                        "stage '{}': rate_limit needs positive calls and period_secs",
                        stage.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_matches_harvest_quotas() {
        let config = PipelineConfig::default();
        config.validate().unwrap();

        let names: Vec<&str> = config.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["metadata", "content", "labels"]);
        assert_eq!(config.stages[1].rate_limit, Some(RateLimitSettings::per_minute(14)));
        assert_eq!(config.snapshot_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = PipelineConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("name: labels"));

        assert_eq!(PipelineConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_yaml_loading_with_defaults() {
        let yaml_content = r#"
version: 1
snapshot_root: out
stages:
  - name: metadata
    max_concurrent_calls: 2
    rate_limit:
      calls: 4
  - name: content
    max_concurrent_calls: 8
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = PipelineConfig::from_yaml(temp_file.path()).unwrap();
        assert_eq!(config.snapshot_interval_secs, DEFAULT_SNAPSHOT_INTERVAL_SECS);
        assert_eq!(config.stages[0].rate_limit.as_ref().unwrap().period_secs, 60);
        assert!(config.stages[1].rate_limit.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "version: 1\nsnapshot_root: out\nstages: []\nretries: 3\n";
        assert!(matches!(
            PipelineConfig::from_yaml_str(yaml),
            Err(PipelineError::Yaml(_))
        ));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PipelineConfig::default();
        config.version = 2;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.stages[0].max_concurrent_calls = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.stages[2].name = "metadata".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let mut config = PipelineConfig::default();
        config.stages.clear();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.snapshot_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.stages[0].rate_limit = Some(RateLimitSettings {
            calls: 0,
            period_secs: 60,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::from_yaml("/nonexistent/aimood.yaml").unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
