use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::TianyiConfig;

/// Loads and reloads the Tianyi configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<TianyiConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > TIANYI_CONFIG env > ~/.tianyi/tianyi.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("TIANYI_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tianyi")
            .join("tianyi.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> tianyi_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            TianyiConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Build a loader around an in-memory config (tests, embedding in other binaries).
    pub fn from_config(config: TianyiConfig) -> tianyi_core::Result<Self> {
        Self::check(&config)?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::new(),
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> TianyiConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<TianyiConfig>> {
        Arc::clone(&self.config)
    }

    /// Path the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse_file(path: &Path) -> tianyi_core::Result<TianyiConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<TianyiConfig>(&raw).map_err(|e| {
            tianyi_core::TianyiError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Validate config: log warnings, fail on errors.
    fn check(config: &TianyiConfig) -> tianyi_core::Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(tianyi_core::TianyiError::Config(e)),
        }
    }

    /// Apply env var overrides (TIANYI_LOG_LEVEL, TIANYI_WINDOW_SIZE, etc.)
    fn apply_env_overrides(mut config: TianyiConfig) -> TianyiConfig {
        if let Ok(v) = std::env::var("TIANYI_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("TIANYI_VECTOR_BACKEND") {
            config.memory.vector.backend = v;
        }
        if let Ok(v) = std::env::var("TIANYI_GRAPH_BACKEND") {
            config.memory.graph.backend = v;
        }
        if let Ok(v) = std::env::var("TIANYI_WINDOW_SIZE") {
            if let Ok(size) = v.parse::<usize>() {
                config.memory.buffer.window_size = size;
            }
        }
        // API key: config file takes priority, env is the fallback.
        if config.memory.embedding.api_key.is_none() {
            if let Ok(v) = std::env::var("TIANYI_EMBEDDING_API_KEY") {
                config.memory.embedding.api_key = Some(v);
            }
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> tianyi_core::Result<()> {
        if !self.config_path.exists() {
            return Err(tianyi_core::TianyiError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::parse_file(&self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
