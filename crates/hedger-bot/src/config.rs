//! Application configuration.
//!
//! Layers, lowest first: compiled defaults, the TOML file, then `HEDGER_`
//! environment variables (`HEDGER_OMS__PRICE_STOP__ENABLED=true`).

use crate::error::{AppError, AppResult};
use config::{Config, Environment, File, FileFormat};
use hedger_core::Market;
use hedger_oms::OmsConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_PATH_ENV: &str = "HEDGER_CONFIG";

const ENV_PREFIX: &str = "HEDGER";

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Market the replay starts on.
    #[serde(default)]
    pub market: MarketConfig,

    #[serde(default)]
    pub oms: OmsConfig,

    #[serde(default)]
    pub replay: ReplayConfig,
}

/// Initial market. `cycle` events in the replay switch away from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_slug")]
    pub slug: String,
    #[serde(default = "default_up_asset_id")]
    pub up_asset_id: String,
    #[serde(default = "default_down_asset_id")]
    pub down_asset_id: String,
}

fn default_slug() -> String {
    "btc-updown-15m".to_string()
}

fn default_up_asset_id() -> String {
    "up-token".to_string()
}

fn default_down_asset_id() -> String {
    "down-token".to_string()
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            slug: default_slug(),
            up_asset_id: default_up_asset_id(),
            down_asset_id: default_down_asset_id(),
        }
    }
}

impl MarketConfig {
    pub fn to_market(&self) -> Market {
        Market::new(
            self.slug.as_str(),
            self.up_asset_id.as_str(),
            self.down_asset_id.as_str(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Granularity of simulated time during `wait` events (ms).
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,

    /// Extra time given to background tasks after the last event (ms).
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
}

fn default_step_ms() -> u64 {
    100
}

fn default_drain_ms() -> u64 {
    500
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            step_ms: default_step_ms(),
            drain_ms: default_drain_ms(),
        }
    }
}

impl AppConfig {
    /// Load the layered configuration.
    ///
    /// `path` wins over `HEDGER_CONFIG`. Without either, only defaults and
    /// the environment apply.
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok());

        let defaults = Config::try_from(&Self::default())?;
        let mut builder = Config::builder().add_source(defaults);
        match &path {
            Some(path) => {
                tracing::info!(path = %path, "Loading configuration");
                builder = builder.add_source(File::new(path, FileFormat::Toml).required(true));
            }
            None => tracing::warn!("No config file given, using defaults"),
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file, without the environment layer.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.market.slug.is_empty() {
            return Err(AppError::Config("market.slug must not be empty".to_string()));
        }
        if self.market.up_asset_id == self.market.down_asset_id {
            return Err(AppError::Config(
                "market up and down asset ids must differ".to_string(),
            ));
        }
        if self.replay.step_ms == 0 {
            return Err(AppError::Config("replay.step_ms must be positive".to_string()));
        }
        Ok(())
    }
}
