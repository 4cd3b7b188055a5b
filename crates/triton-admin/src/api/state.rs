//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::auth::{AuthConfig, AuthState, Authenticator};
use crate::config::{AppConfig, ServicesConfig};

use super::proxy::Upstream;

/// CORS settings for the router.
#[derive(Clone, Debug, Default)]
pub struct CorsSettings {
    pub dev_mode: bool,
    pub allowed_origins: Vec<String>,
}

impl CorsSettings {
    pub fn from_auth(config: &AuthConfig) -> Self {
        Self {
            dev_mode: config.dev_mode,
            allowed_origins: config.allowed_origins.clone(),
        }
    }
}

/// Resolved upstream base URLs for resource pass-through.
#[derive(Clone, Debug, Default)]
pub struct UpstreamUrls {
    vmapi: Option<String>,
    cnapi: Option<String>,
    napi: Option<String>,
    imgapi: Option<String>,
    papi: Option<String>,
    workflow: Option<String>,
}

impl UpstreamUrls {
    pub fn from_config(config: &ServicesConfig) -> Self {
        let clean = |url: &Option<String>| {
            url.as_deref()
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty())
        };
        Self {
            vmapi: clean(&config.vmapi_url),
            cnapi: clean(&config.cnapi_url),
            napi: clean(&config.napi_url),
            imgapi: clean(&config.imgapi_url),
            papi: clean(&config.papi_url),
            workflow: clean(&config.workflow_url),
        }
    }

    /// Base URL of an upstream, `None` when not configured.
    pub fn base_url(&self, upstream: Upstream) -> Option<&str> {
        match upstream {
            Upstream::Vmapi => self.vmapi.as_deref(),
            Upstream::Cnapi => self.cnapi.as_deref(),
            Upstream::Napi => self.napi.as_deref(),
            Upstream::Imgapi => self.imgapi.as_deref(),
            Upstream::Papi => self.papi.as_deref(),
            Upstream::Workflow => self.workflow.as_deref(),
        }
    }

    /// Names of the configured upstreams.
    pub fn configured(&self) -> Vec<&'static str> {
        Upstream::ALL
            .iter()
            .filter(|u| self.base_url(**u).is_some())
            .map(|u| u.name())
            .collect()
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Token issuing and validation.
    pub auth: AuthState,
    /// Credential verification.
    pub authenticator: Authenticator,
    /// Resource service endpoints.
    pub upstreams: Arc<UpstreamUrls>,
    /// HTTP client for resource pass-through.
    pub http: reqwest::Client,
    /// CORS settings.
    pub cors: CorsSettings,
    /// Datacenter identifier.
    pub datacenter: String,
}

impl AppState {
    pub fn new(
        auth: AuthState,
        authenticator: Authenticator,
        upstreams: UpstreamUrls,
        http: reqwest::Client,
        cors: CorsSettings,
        datacenter: String,
    ) -> Self {
        Self {
            auth,
            authenticator,
            upstreams: Arc::new(upstreams),
            http,
            cors,
            datacenter,
        }
    }

    /// Build the production state from validated configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let auth = AuthState::from_config(&config.auth).context("creating token keys")?;
        let authenticator = Authenticator::from_config(&config.auth)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.services.request_timeout_secs))
            .build()
            .context("creating upstream HTTP client")?;

        Ok(Self::new(
            auth,
            authenticator,
            UpstreamUrls::from_config(&config.services),
            http,
            CorsSettings::from_auth(&config.auth),
            config.auth.datacenter.clone(),
        ))
    }
}
