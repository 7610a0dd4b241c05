//! Server configuration from YAML or environment
use anyhow::Context;
use aps_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8787";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub addr: String,
    /// Site overrides, checked before the bundled scripts
    pub scripts_dir: Option<PathBuf>,
    pub bundled_scripts_dir: Option<PathBuf>,
    /// Writable settings documents (`<name>.json`)
    pub settings_dir: Option<PathBuf>,
    /// Read-only fallbacks for settings missing from `settings_dir`
    pub default_settings_dir: Option<PathBuf>,
    pub pipeline: PipelineConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            scripts_dir: None,
            bundled_scripts_dir: None,
            settings_dir: None,
            default_settings_dir: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(raw).context("parsing API config")
    }

    /// YAML file named by `APS_CONFIG` (if any), then environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let base = match std::env::var("APS_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {}", path))?;
                Self::from_yaml(&raw)?
            }
            Err(_) => Self::default(),
        };
        base.with_env(|key| std::env::var(key).ok())
    }

    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        if let Some(addr) = var("APS_ADDR") {
            self.addr = addr;
        }
        if let Some(size) = var("APS_POOL_SIZE") {
            self.pipeline.pool.capacity = size
                .parse()
                .with_context(|| format!("APS_POOL_SIZE must be a positive integer, got {:?}", size))?;
        }
        if let Some(dir) = var("APS_SCRIPTS_DIR") {
            self.scripts_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = var("APS_SETTINGS_DIR") {
            self.settings_dir = Some(PathBuf::from(dir));
        }
        anyhow::ensure!(self.pipeline.pool.capacity > 0, "pool capacity must be at least 1");
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_core::OverflowPolicy;
    use std::collections::HashMap;

    #[test]
    fn yaml_fills_in_missing_fields() {
        let config = ApiConfig::from_yaml(
            "addr: 127.0.0.1:9000\npipeline:\n  glucose_limit: 48\n  pool:\n    overflow: grow\n",
        )
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:9000");
        assert_eq!(config.pipeline.glucose_limit, 48);
        assert_eq!(config.pipeline.pool.overflow, OverflowPolicy::Grow);
        assert_eq!(config.pipeline.pool.capacity, 5);
        assert_eq!(config.pipeline.autosens_max_age_minutes, 30);
    }

    #[test]
    fn environment_overrides_win() {
        let vars: HashMap<&str, &str> = [("APS_ADDR", "0.0.0.0:1"), ("APS_POOL_SIZE", "2"), ("APS_SCRIPTS_DIR", "/srv/js")]
            .into_iter()
            .collect();
        let config = ApiConfig::default()
            .with_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.addr, "0.0.0.0:1");
        assert_eq!(config.pipeline.pool.capacity, 2);
        assert_eq!(config.scripts_dir, Some(PathBuf::from("/srv/js")));
        assert_eq!(config.settings_dir, None);
    }

    #[test]
    fn bad_pool_size_is_rejected() {
        assert!(ApiConfig::default().with_env(|k| (k == "APS_POOL_SIZE").then(|| "many".to_string())).is_err());
        assert!(ApiConfig::default().with_env(|k| (k == "APS_POOL_SIZE").then(|| "0".to_string())).is_err());
    }
}
