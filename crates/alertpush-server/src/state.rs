use crate::config::{Config, Result};
use crate::registry::Registry;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub config_file: Arc<PathBuf>,
    /// `--web.external-url`, applied over every loaded config.
    pub external_url: Option<Arc<str>>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    /// Loads `config_file` and builds the initial registry.
    pub fn load(config_file: impl Into<PathBuf>, external_url: Option<String>) -> Result<Self> {
        let config_file = config_file.into();
        let external_url: Option<Arc<str>> = external_url.map(Into::into);
        let config = read_config(&config_file, external_url.as_deref())?;
        let template = config.template()?;
        Ok(Self {
            registry: Arc::new(Registry::new(config, template)?),
            config_file: Arc::new(config_file),
            external_url,
            start_time: Utc::now(),
        })
    }

    /// Re-reads the config file and templates and swaps them in. On error
    /// the running configuration stays in place.
    pub fn reload(&self) -> Result<()> {
        let config = read_config(&self.config_file, self.external_url.as_deref())?;
        let template = config.template()?;
        self.registry.update(config, template)?;
        tracing::info!(file = %self.config_file.display(), "Configuration reloaded");
        Ok(())
    }
}

fn read_config(path: &Path, external_url: Option<&str>) -> Result<Config> {
    let mut config = Config::load(path)?;
    if let Some(url) = external_url {
        config.global.external_url = url.to_string();
    }
    Ok(config)
}
