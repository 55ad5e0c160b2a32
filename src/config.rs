//! Config loading from file and environment variables.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use logscope_logs::DEFAULT_CHUNK_SIZE;

pub const CONFIG_ENV: &str = "LOGSCOPE_CONFIG";
const CHUNK_SIZE_ENV: &str = "LOGSCOPE_CHUNK_SIZE";
const PAGE_SIZE_ENV: &str = "LOGSCOPE_PAGE_SIZE";
const LOG_ENV: &str = "LOGSCOPE_LOG";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bytes read per window
    pub chunk_size: usize,
    pub page_size: usize,
    /// Default tracing directive, applied on top of `RUST_LOG`
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            page_size: 100,
            log_level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load configuration.
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Override fields from variables visible through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(CHUNK_SIZE_ENV) {
            self.chunk_size = value
                .parse()
                .with_context(|| format!("{CHUNK_SIZE_ENV} is not a number: {value}"))?;
        }
        if let Some(value) = lookup(PAGE_SIZE_ENV) {
            self.page_size = value
                .parse()
                .with_context(|| format!("{PAGE_SIZE_ENV} is not a number: {value}"))?;
        }
        if let Some(value) = lookup(LOG_ENV) {
            self.log_level = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.chunk_size > 0, "chunk_size must be > 0");
        ensure!(self.page_size > 0, "page_size must be > 0");
        Ok(())
    }
}
