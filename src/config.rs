//! Layered configuration
//!
//! Sources, lowest priority first: built-in defaults, a TOML file
//! (`stepsync.toml`, `STEPSYNC_CONFIG_PATH` or an explicit path), then
//! `STEPSYNC_*` environment variables using `__` between nested keys, e.g.
//! `STEPSYNC_TIMING__PREVIEW_DEBOUNCE_MS=250`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;

const ENV_PREFIX: &str = "STEPSYNC";
const CONFIG_PATH_ENV: &str = "STEPSYNC_CONFIG_PATH";
const DEFAULT_FILE: &str = "stepsync";

pub const DEFAULT_PREVIEW_URL: &str = "http://localhost:3000/workflow_steps/preview";
pub const DEFAULT_VARIABLES_URL: &str = "http://localhost:3000/workflows/{workflow_id}/variables";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub preview_url: String,
    /// May contain `{workflow_id}`
    pub variables_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    pub preview_debounce_ms: u64,
    pub catalog_reload_debounce_ms: u64,
    pub blur_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub endpoints: EndpointConfig,
    pub timing: TimingConfig,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: EndpointConfig {
                preview_url: DEFAULT_PREVIEW_URL.to_string(),
                variables_url: DEFAULT_VARIABLES_URL.to_string(),
            },
            timing: TimingConfig {
                preview_debounce_ms: 500,
                catalog_reload_debounce_ms: 300,
                blur_grace_ms: 150,
            },
            http: HttpConfig { timeout_secs: 10 },
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default sources with no overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn preview_debounce(&self) -> Duration {
        Duration::from_millis(self.timing.preview_debounce_ms)
    }

    pub fn catalog_reload_debounce(&self) -> Duration {
        Duration::from_millis(self.timing.catalog_reload_debounce_ms)
    }

    pub fn blur_grace(&self) -> Duration {
        Duration::from_millis(self.timing.blur_grace_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.preview_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "endpoints.preview_url must not be empty".to_string(),
            ));
        }

        let timings = [
            ("timing.preview_debounce_ms", self.timing.preview_debounce_ms),
            (
                "timing.catalog_reload_debounce_ms",
                self.timing.catalog_reload_debounce_ms,
            ),
            ("timing.blur_grace_ms", self.timing.blur_grace_ms),
            ("http.timeout_secs", self.http.timeout_secs),
        ];
        for (key, value) in timings {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than 0", key)));
            }
        }

        Ok(())
    }

    /// The effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    preview_url: Option<String>,
    variables_url: Option<String>,
    env: Option<HashMap<String, String>>,
}

impl ConfigBuilder {
    /// Config file to read instead of the default search
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn preview_url(mut self, url: Option<String>) -> Self {
        self.preview_url = url;
        self
    }

    pub fn variables_url(mut self, url: Option<String>) -> Self {
        self.variables_url = url;
        self
    }

    /// Read environment overrides from `vars` instead of the process environment.
    pub fn env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if self.env.is_none() {
            let _ = dotenvy::dotenv();
        }

        let defaults = Config::default();
        let mut builder = config::Config::builder()
            .set_default("endpoints.preview_url", defaults.endpoints.preview_url)?
            .set_default("endpoints.variables_url", defaults.endpoints.variables_url)?
            .set_default(
                "timing.preview_debounce_ms",
                defaults.timing.preview_debounce_ms as i64,
            )?
            .set_default(
                "timing.catalog_reload_debounce_ms",
                defaults.timing.catalog_reload_debounce_ms as i64,
            )?
            .set_default("timing.blur_grace_ms", defaults.timing.blur_grace_ms as i64)?
            .set_default("http.timeout_secs", defaults.http.timeout_secs as i64)?;

        let path = self.config_path.or_else(|| {
            let from_env = match &self.env {
                Some(vars) => vars.get(CONFIG_PATH_ENV).cloned(),
                None => std::env::var(CONFIG_PATH_ENV).ok(),
            };
            from_env.map(PathBuf::from)
        });

        builder = match path {
            Some(path) => {
                debug!(path = %path.display(), "loading config file");
                builder.add_source(config::File::from(path).required(true))
            }
            None => builder.add_source(config::File::with_name(DEFAULT_FILE).required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.env),
        );

        if let Some(url) = self.preview_url {
            builder = builder.set_override("endpoints.preview_url", url)?;
        }
        if let Some(url) = self.variables_url {
            builder = builder.set_override("endpoints.variables_url", url)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
