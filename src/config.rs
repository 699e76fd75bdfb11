use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::backend::BackendKind;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EsrConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub fanout: FanoutConfig,
    pub metabolism: MetabolismConfig,
    pub recall: RecallConfig,
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    pub promotion_threshold: u64,
    pub eviction_policy: String,
    pub persist_cache: bool,
    pub cache_file: String,
    /// Number of entries reported as "hot" by pattern analysis.
    pub hot_entries: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FanoutConfig {
    pub recall_timeout_ms: u64,
    pub store_timeout_ms: u64,
    /// Logical partition name attached to every durable write.
    pub namespace: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetabolismConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub forget_after_days: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RecallConfig {
    pub similar_max_depth: usize,
    pub keyword_threshold: f64,
    pub context_max_seeds: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BackendConfig {
    pub name: String,
    pub kind: BackendKind,
    #[serde(default = "default_provider")]
    pub provider: String,
}

fn default_provider() -> String {
    "memory".into()
}

impl Default for EsrConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            fanout: FanoutConfig::default(),
            metabolism: MetabolismConfig::default(),
            recall: RecallConfig::default(),
            backends: default_backends(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let cache_file = default_esr_dir()
            .join("cache.json")
            .to_string_lossy()
            .into_owned();
        Self {
            max_size: 100_000,
            promotion_threshold: 2,
            eviction_policy: "lru".into(),
            persist_cache: false,
            cache_file,
            hot_entries: 10,
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            recall_timeout_ms: 3000,
            store_timeout_ms: 5000,
            namespace: "esr".into(),
        }
    }
}

impl Default for MetabolismConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            forget_after_days: 30,
        }
    }
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            similar_max_depth: 3,
            keyword_threshold: 0.1,
            context_max_seeds: 5,
        }
    }
}

/// One in-process backend per family.
fn default_backends() -> Vec<BackendConfig> {
    [
        ("vector", BackendKind::Vector),
        ("graph", BackendKind::Graph),
        ("sql", BackendKind::Relational),
        ("document", BackendKind::Document),
        ("kv", BackendKind::KeyValue),
    ]
    .into_iter()
    .map(|(name, kind)| BackendConfig {
        name: name.into(),
        kind,
        provider: default_provider(),
    })
    .collect()
}

impl FanoutConfig {
    pub fn recall_timeout(&self) -> Duration {
        Duration::from_millis(self.recall_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl MetabolismConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn forget_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.forget_after_days as i64)
    }
}

/// Returns `~/.esr/`
pub fn default_esr_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".esr")
}

/// Returns the default config file path: `~/.esr/config.toml`
pub fn default_config_path() -> PathBuf {
    default_esr_dir().join("config.toml")
}

impl EsrConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EsrConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (ESR_CACHE_FILE, ESR_CACHE_SIZE, ESR_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ESR_CACHE_FILE") {
            self.cache.cache_file = val;
        }
        if let Ok(val) = std::env::var("ESR_CACHE_SIZE") {
            match val.parse() {
                Ok(size) => self.cache.max_size = size,
                Err(_) => tracing::warn!(value = %val, "ignoring invalid ESR_CACHE_SIZE"),
            }
        }
        if let Ok(val) = std::env::var("ESR_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the cache snapshot path, expanding `~` if needed.
    pub fn resolved_cache_file(&self) -> PathBuf {
        expand_tilde(&self.cache.cache_file)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
