use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Configuration store backed by a JSON file
///
/// Uses `ArcSwap` for lock-free reads, so hot paths can load the current
/// configuration without contention.
#[derive(Clone)]
pub struct ConfigStore {
    /// Backing file; `None` keeps the configuration in memory only
    path: Option<PathBuf>,
    cache: Arc<ArcSwap<BridgeConfig>>,
}

impl ConfigStore {
    /// Open a store, creating the file with defaults if it does not exist
    pub async fn open(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice::<BridgeConfig>(&bytes)
                .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = BridgeConfig::default();
                Self::save_to_file(path, &config).await?;
                config
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;

        Ok(Self::with_path(Some(path.to_path_buf()), config))
    }

    /// Store that is never persisted
    pub fn in_memory(config: BridgeConfig) -> Self {
        Self::with_path(None, config)
    }

    fn with_path(path: Option<PathBuf>, config: BridgeConfig) -> Self {
        Self {
            path,
            cache: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    async fn save_to_file(path: &Path, config: &BridgeConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(config)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<BridgeConfig> {
        self.cache.load_full()
    }

    /// Replace the entire configuration
    pub async fn set(&self, config: BridgeConfig) -> Result<()> {
        config.validate()?;
        if let Some(path) = &self.path {
            Self::save_to_file(path, &config).await?;
        }
        self.cache.store(Arc::new(config));
        Ok(())
    }

    /// Update configuration with a closure
    ///
    /// Read-modify-write; concurrent updates are last-write-wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BridgeConfig),
    {
        let mut config = (**self.cache.load()).clone();
        f(&mut config);
        self.set(config).await
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
