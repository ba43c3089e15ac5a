//! Configuration loading
//!
//! Priority order, highest first:
//! 1. Command-line flag
//! 2. Environment variable (`CHART_PIPELINE_ROOT`, `CHART_PIPELINE_WORKERS`)
//! 3. TOML config file (`--config`, else `<config dir>/chart-pipeline/config.toml`)
//! 4. Compiled defaults
//!
//! Flags and environment are merged by the command line parser; this module
//! handles the file and the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::parallel::DEFAULT_POOL_SIZE;

/// Default data root, relative to the working directory
pub const DEFAULT_DATA_ROOT: &str = "data";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Directory holding the store and its datasets
    pub data_root: PathBuf,
    /// Worker threads for per-image work
    pub pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl Config {
    /// Parse a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::config(format!("invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build the effective configuration.
    ///
    /// An explicit `config_file` must exist; the per-user default file is only read
    /// when present. `data_root` and `pool_size` override whatever the file says.
    pub fn resolve(
        config_file: Option<&Path>,
        data_root: Option<PathBuf>,
        pool_size: Option<usize>,
    ) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::load(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => {
                    debug!("Using config file {}", path.display());
                    Self::load(&path)?
                }
                None => Self::default(),
            },
        };

        if let Some(root) = data_root {
            config.data_root = root;
        }
        if let Some(size) = pool_size {
            config.pool_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::config("pool_size must be at least 1"));
        }
        if self.data_root.as_os_str().is_empty() {
            return Err(Error::config("data_root must not be empty"));
        }
        Ok(())
    }
}

/// `<config dir>/chart-pipeline/config.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("chart-pipeline").join("config.toml"))
}
