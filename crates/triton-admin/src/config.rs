//! Application configuration: defaults, TOML file, environment overrides.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;

pub const APP_NAME: &str = "triton-admin";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Base URLs of the per-family resource services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub vmapi_url: Option<String>,
    pub cnapi_url: Option<String>,
    pub napi_url: Option<String>,
    pub imgapi_url: Option<String>,
    pub papi_url: Option<String>,
    pub workflow_url: Option<String>,
    /// Upstream request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            vmapi_url: None,
            cnapi_url: None,
            napi_url: None,
            imgapi_url: None,
            papi_url: None,
            workflow_url: None,
            request_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional TOML file and
    /// `TRITON_ADMIN__SECTION__KEY` environment variables, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_prefix = env_prefix();
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080_i64)?
            .set_default("logging.level", "info")?;

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let built = builder
            .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
            .build()
            .context("building configuration")?;

        let config: AppConfig = built
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(config)
    }

    /// Copy safe to print: the signing secret is masked unless it is an
    /// `env:` reference.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Some(secret) = &config.auth.jwt_secret
            && !secret.starts_with("env:")
        {
            config.auth.jwt_secret = Some("<redacted>".to_string());
        }
        for user in &mut config.auth.dev_users {
            user.password_hash = "<redacted>".to_string();
        }
        config
    }
}

/// Config file used when `--config` is not given.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join("config.toml"))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

/// Expand `~` and environment variables in a user-supplied path.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => {
            let expanded = shellexpand::full(text).context("expanding path")?;
            Ok(PathBuf::from(expanded.to_string()))
        }
        None => Ok(path.to_path_buf()),
    }
}

pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
