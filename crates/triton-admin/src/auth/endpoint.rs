//! Identity-source endpoint parsing and login mode selection.
//!
//! The configured identity URL is parsed once at startup. Its scheme decides
//! which verifier handles every login for the lifetime of the process:
//!
//! - `ldaps://` / `ldap://` select directory mode (direct bind)
//! - `http://` / `https://` select gateway mode (HTTP identity endpoint)

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// Base DN used when the directory URL carries no path.
pub const DEFAULT_BASE_DN: &str = "o=smartdc";

/// Errors raised while parsing the identity-source URL. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("identity URL is not a valid URL: {0}")]
    Malformed(String),

    #[error("identity URL scheme '{0}' is not supported (expected ldaps, ldap, http or https)")]
    UnsupportedScheme(String),

    #[error("identity URL has no host")]
    MissingHost,

    #[error("identity URL base path is not valid UTF-8 after decoding")]
    InvalidBasePath,
}

/// Transport scheme of the identity source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    SecureDirectory,
    PlainDirectory,
    Http,
    Https,
}

impl Scheme {
    fn from_url_scheme(scheme: &str) -> Result<Self, EndpointError> {
        match scheme {
            "ldaps" => Ok(Scheme::SecureDirectory),
            "ldap" => Ok(Scheme::PlainDirectory),
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Scheme::SecureDirectory => 636,
            Scheme::PlainDirectory => 389,
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Scheme::SecureDirectory => "ldaps",
            Scheme::PlainDirectory => "ldap",
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Whether this scheme speaks the directory protocol.
    pub fn is_directory(self) -> bool {
        matches!(self, Scheme::SecureDirectory | Scheme::PlainDirectory)
    }
}

/// Parsed identity-source endpoint. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Decoded path without the leading slash; `None` when the URL has no path.
    pub base_path: Option<String>,
}

impl IdentityEndpoint {
    /// `scheme://host:port` without any path.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl FromStr for IdentityEndpoint {
    type Err = EndpointError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(raw.trim()).map_err(|e| EndpointError::Malformed(e.to_string()))?;
        let scheme = Scheme::from_url_scheme(url.scheme())?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(EndpointError::MissingHost)?
            .to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        let path = url.path().trim_start_matches('/').trim_end_matches('/');
        let base_path = if path.is_empty() {
            None
        } else {
            let decoded =
                urlencoding::decode(path).map_err(|_| EndpointError::InvalidBasePath)?;
            Some(decoded.into_owned())
        };

        Ok(Self {
            scheme,
            host,
            port,
            base_path,
        })
    }
}

impl fmt::Display for IdentityEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base_path {
            Some(path) => write!(f, "{}/{}", self.origin(), path),
            None => write!(f, "{}", self.origin()),
        }
    }
}

/// Parameters for directory-mode verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTarget {
    /// Connection URL, `ldaps://host:port` or `ldap://host:port`.
    pub url: String,
    /// Base DN searched for user entries.
    pub base_dn: String,
    /// Whether the transport is TLS.
    pub secure: bool,
}

impl DirectoryTarget {
    /// Bind DN for a username: `cn={username},ou=users,{base_dn}`.
    pub fn user_dn(&self, username: &str) -> String {
        format!(
            "cn={},ou=users,{}",
            ldap3::dn_escape(username),
            self.base_dn
        )
    }

    /// Search filter for a username.
    pub fn user_filter(&self, username: &str) -> String {
        format!(
            "(&(objectClass=sdcPerson)(cn={}))",
            ldap3::ldap_escape(username)
        )
    }
}

/// Parameters for gateway-mode verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTarget {
    /// Base URL of the identity gateway, without trailing slash.
    pub base_url: String,
}

impl GatewayTarget {
    /// URL the credentials are POSTed to.
    pub fn auth_url(&self) -> String {
        format!("{}/auth", self.base_url)
    }
}

/// Login mode chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    Directory(DirectoryTarget),
    Gateway(GatewayTarget),
}

impl AuthMode {
    /// Select the login mode for an endpoint. Pure and deterministic.
    pub fn select(endpoint: &IdentityEndpoint) -> Self {
        if endpoint.scheme.is_directory() {
            AuthMode::Directory(DirectoryTarget {
                url: endpoint.origin(),
                base_dn: endpoint
                    .base_path
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BASE_DN.to_string()),
                secure: endpoint.scheme == Scheme::SecureDirectory,
            })
        } else {
            let base_url = match &endpoint.base_path {
                Some(path) => format!("{}/{}", endpoint.origin(), path),
                None => endpoint.origin(),
            };
            AuthMode::Gateway(GatewayTarget { base_url })
        }
    }

    /// Parse a raw identity URL and select its mode.
    pub fn from_url(raw: &str) -> Result<Self, EndpointError> {
        let endpoint: IdentityEndpoint = raw.parse()?;
        Ok(Self::select(&endpoint))
    }

    /// Short name for logs and the ping endpoint.
    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::Directory(_) => "directory",
            AuthMode::Gateway(_) => "gateway",
        }
    }
}
