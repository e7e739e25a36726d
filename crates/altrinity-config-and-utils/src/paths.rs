//! On-disk layout.
//!
//! ```text
//! <base>/               ~/.altrinity unless overridden
//!   config.json
//!   store.sqlite        queue slots and auth tokens
//!   logs/dev.jsonl
//! ```

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

const BASE_DIR_NAME: &str = ".altrinity";
const CONFIG_FILE: &str = "config.json";
const STORE_FILE: &str = "store.sqlite";
const LOGS_DIR: &str = "logs";
const LOG_FILE: &str = "dev.jsonl";

/// Locations of everything the sync client keeps on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Layout under `~/.altrinity`.
    pub fn new() -> CoreResult<Self> {
        dirs::home_dir()
            .map(|home| Self::with_base_dir(home.join(BASE_DIR_NAME)))
            .ok_or_else(|| CoreError::Path("home directory not found".to_string()))
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE)
    }

    pub fn store_file(&self) -> PathBuf {
        self.base_dir.join(STORE_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join(LOGS_DIR)
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE)
    }

    /// Create the base and log directories if missing.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        // logs/ lives under the base, so this creates both.
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
