mod file_config;

pub use file_config::FileConfig;

use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub attachments_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub attachments_dir: PathBuf,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let attachments_dir = file
            .attachments_dir
            .map(PathBuf::from)
            .or_else(|| cli.attachments_dir.clone())
            .unwrap_or_else(|| db_dir.join("attachments"));

        Ok(Self {
            db_dir,
            attachments_dir,
        })
    }

    pub fn records_db_path(&self) -> PathBuf {
        self.db_dir.join("records.db")
    }
}
