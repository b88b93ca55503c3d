use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

pub const DEFAULT_USER_AGENT: &str = "recipe_crawler/0.1 (+https://github.com/recipe-crawler)";

/// Runtime settings: defaults, then `recipes.toml` if present, then
/// `RECIPES_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_path: PathBuf,
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Extra attempts for 429 and 5xx responses.
    pub fetch_retries: u32,
    /// Only enqueue discovered URLs on the host they were found on.
    pub same_site_only: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("recipes").required(false))
                .add_source(Environment::with_prefix("RECIPES")),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings = builder
            .set_default("database_path", "data/recipes.sqlite")?
            .set_default("concurrency", 8)?
            .set_default("request_timeout_secs", 30)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("fetch_retries", 2)?
            .set_default("same_site_only", true)?
            .build()
            .context("Failed to read settings")?
            .try_deserialize::<Settings>()
            .context("Invalid settings")?;
        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/recipes.sqlite"),
            concurrency: 8,
            request_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_retries: 2,
            same_site_only: true,
        }
    }
}
