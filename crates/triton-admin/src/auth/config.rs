//! Authentication configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::error;

use super::endpoint::{AuthMode, EndpointError};
use super::user::{ADMIN_ROLE, UserRecord};

/// Signing secret shipped in old sample configs. Always rejected.
const INSECURE_DEFAULT_SECRET: &str = "dev-secret-change-in-production";

/// Minimum signing secret length.
const MIN_SECRET_LENGTH: usize = 32;

/// Datacenter name prefixes treated as non-production.
const NON_PRODUCTION_PREFIXES: &[&str] = &["dev", "local", "test", "lab", "coal"];

/// Longest accepted session token lifetime (one year).
pub const MAX_TOKEN_LIFETIME_HOURS: i64 = 24 * 365;

/// Longest accepted identity cache TTL (one day).
pub const MAX_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// bcrypt cost for the built-in development identities.
const BUILTIN_HASH_COST: u32 = 4;

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Identity source URL. `ldaps://`/`ldap://` select directory mode,
    /// `http://`/`https://` select gateway mode.
    pub identity_url: String,

    /// Verify the directory's TLS certificate.
    pub verify_certificates: bool,

    /// HS256 signing secret. Supports `env:VAR_NAME`.
    pub jwt_secret: Option<String>,

    /// Session token lifetime in hours.
    pub token_lifetime_hours: i64,

    /// Datacenter identifier.
    pub datacenter: String,

    /// Explicit production marker. `true` forces production; otherwise it is
    /// derived from `datacenter`.
    pub production: Option<bool>,

    /// Insecure development mode: enables the development identities.
    pub dev_mode: bool,

    /// Development identities. Replaces the built-in ones when non-empty.
    pub dev_users: Vec<DevUser>,

    /// Deadline for one identity-source round trip, in seconds.
    pub identity_timeout_secs: u64,

    /// Identity cache TTL in seconds. 0 disables the cache.
    pub cache_ttl_secs: u64,

    /// Allowed CORS origins. If empty in production, cross-origin requests are denied.
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_url: String::new(),
            verify_certificates: true,
            // No default JWT secret - must be explicitly configured
            jwt_secret: None,
            token_lifetime_hours: 60,
            datacenter: String::new(),
            production: None,
            dev_mode: false,
            dev_users: Vec::new(),
            identity_timeout_secs: 10,
            cache_ttl_secs: 60,
            allowed_origins: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Resolve the JWT secret, expanding `env:VAR_NAME` syntax.
    /// Returns the resolved secret or None if not configured.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        match &self.jwt_secret {
            None => Ok(None),
            Some(value) => {
                if let Some(var_name) = value.strip_prefix("env:") {
                    match std::env::var(var_name) {
                        Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                        Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                        Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
                    }
                } else {
                    Ok(Some(value.clone()))
                }
            }
        }
    }

    /// Resolve the secret and enforce the strength rules.
    pub fn signing_secret(&self) -> Result<String, ConfigValidationError> {
        let secret = self
            .resolve_jwt_secret()?
            .ok_or(ConfigValidationError::MissingJwtSecret)?;

        if secret == INSECURE_DEFAULT_SECRET {
            return Err(ConfigValidationError::InsecureJwtSecret);
        }
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigValidationError::JwtSecretTooShort);
        }
        Ok(secret)
    }

    /// Parse the identity URL and select the login mode.
    pub fn auth_mode(&self) -> Result<AuthMode, ConfigValidationError> {
        AuthMode::from_url(&self.identity_url).map_err(ConfigValidationError::InvalidIdentityUrl)
    }

    /// Whether this deployment is a production datacenter. The explicit
    /// marker can only add production status, never remove it.
    pub fn is_production(&self) -> bool {
        if self.production == Some(true) {
            return true;
        }
        let dc = self.datacenter.trim().to_ascii_lowercase();
        !(dc.is_empty() || NON_PRODUCTION_PREFIXES.iter().any(|p| dc.starts_with(p)))
    }

    /// Validate the configuration.
    /// Returns the first rule the configuration breaks.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.auth_mode()?;
        self.signing_secret()?;

        if !(1..=MAX_TOKEN_LIFETIME_HOURS).contains(&self.token_lifetime_hours) {
            return Err(ConfigValidationError::InvalidTokenLifetime(
                self.token_lifetime_hours,
            ));
        }

        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigValidationError::InvalidCacheTtl(self.cache_ttl_secs));
        }

        if self.is_production() {
            if self.dev_mode {
                return Err(ConfigValidationError::DevModeInProduction(
                    self.datacenter.clone(),
                ));
            }
            if !self.verify_certificates {
                return Err(
                    ConfigValidationError::CertificateVerificationDisabledInProduction(
                        self.datacenter.clone(),
                    ),
                );
            }
        }

        Ok(())
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_secs(self.identity_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Development identities in effect, `None` unless dev mode is on.
    pub fn effective_dev_users(&self) -> Option<Vec<DevUser>> {
        if !self.dev_mode {
            return None;
        }
        if self.dev_users.is_empty() {
            Some(Self::builtin_dev_users())
        } else {
            Some(self.dev_users.clone())
        }
    }

    /// The `admin/admin` and `operator/operator` development identities.
    pub fn builtin_dev_users() -> Vec<DevUser> {
        [
            (
                "00000000-0000-0000-0000-000000000000",
                "admin",
                "Administrator",
                "admin@example.com",
                true,
            ),
            (
                "11111111-1111-1111-1111-111111111111",
                "operator",
                "System Operator",
                "operator@example.com",
                false,
            ),
        ]
        .into_iter()
        .filter_map(|(id, username, name, email, is_admin)| {
            let password_hash = match bcrypt::hash(username, BUILTIN_HASH_COST) {
                Ok(hash) => hash,
                Err(e) => {
                    error!(username, error = %e, "failed to hash development identity");
                    return None;
                }
            };
            Some(DevUser {
                id: id.to_string(),
                username: username.to_string(),
                name: name.to_string(),
                email: email.to_string(),
                password_hash,
                is_admin,
                roles: if is_admin {
                    vec![ADMIN_ROLE.to_string()]
                } else {
                    vec![username.to_string()]
                },
            })
        })
        .collect()
    }

    /// Generate a secure random JWT secret using cryptographically secure RNG.
    ///
    /// Uses the `rand` crate with `ThreadRng` which is backed by the OS's
    /// cryptographically secure random number generator (via `getrandom`).
    pub fn generate_jwt_secret() -> String {
        use rand::Rng;

        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        const SECRET_LENGTH: usize = 64;

        let mut rng = rand::rng();
        (0..SECRET_LENGTH)
            .map(|_| {
                let idx = rng.random_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }
}

/// Configuration validation errors. Any of these stops the process at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// Identity URL could not be parsed or has an unsupported scheme.
    InvalidIdentityUrl(EndpointError),
    /// JWT secret is required.
    MissingJwtSecret,
    /// JWT secret is the insecure default value.
    InsecureJwtSecret,
    /// JWT secret is too short (minimum 32 characters).
    JwtSecretTooShort,
    /// Environment variable not found (for `env:VAR_NAME` syntax).
    EnvVarNotFound(String),
    /// Environment variable is empty (for `env:VAR_NAME` syntax).
    EnvVarEmpty(String),
    /// Token lifetime outside 1 hour to one year.
    InvalidTokenLifetime(i64),
    /// Identity cache TTL above one day.
    InvalidCacheTtl(u64),
    /// Development identities requested on a production datacenter.
    DevModeInProduction(String),
    /// Certificate verification disabled on a production datacenter.
    CertificateVerificationDisabledInProduction(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentityUrl(err) => {
                write!(f, "Invalid auth.identity_url: {}", err)
            }
            Self::MissingJwtSecret => {
                write!(
                    f,
                    "JWT secret is required. Set TRITON_ADMIN__AUTH__JWT_SECRET or auth.jwt_secret in config."
                )
            }
            Self::InsecureJwtSecret => {
                write!(
                    f,
                    "JWT secret cannot be the default insecure value. Please configure a secure secret."
                )
            }
            Self::JwtSecretTooShort => {
                write!(
                    f,
                    "JWT secret must be at least {} characters long.",
                    MIN_SECRET_LENGTH
                )
            }
            Self::EnvVarNotFound(var) => {
                write!(
                    f,
                    "Environment variable '{}' not found (referenced via env:{} in config).",
                    var, var
                )
            }
            Self::EnvVarEmpty(var) => {
                write!(
                    f,
                    "Environment variable '{}' is empty (referenced via env:{} in config).",
                    var, var
                )
            }
            Self::InvalidTokenLifetime(hours) => {
                write!(
                    f,
                    "auth.token_lifetime_hours must be between 1 and {} (got {}).",
                    MAX_TOKEN_LIFETIME_HOURS, hours
                )
            }
            Self::InvalidCacheTtl(secs) => {
                write!(
                    f,
                    "auth.cache_ttl_secs must be at most {} (got {}).",
                    MAX_CACHE_TTL_SECS, secs
                )
            }
            Self::DevModeInProduction(dc) => {
                write!(
                    f,
                    "auth.dev_mode cannot be enabled for production datacenter '{}'.",
                    dc
                )
            }
            Self::CertificateVerificationDisabledInProduction(dc) => {
                write!(
                    f,
                    "auth.verify_certificates cannot be disabled for production datacenter '{}'.",
                    dc
                )
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidIdentityUrl(err) => Some(err),
            _ => None,
        }
    }
}

/// Development identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevUser {
    /// User ID.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Display name.
    pub name: String,
    /// Email address.
    #[serde(default)]
    pub email: String,
    /// Password hash (bcrypt).
    pub password_hash: String,
    /// Admin flag.
    #[serde(default)]
    pub is_admin: bool,
    /// Role names.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl DevUser {
    /// Whether a submitted login names this user. Only the username counts,
    /// so the issued token always carries the name that was submitted.
    pub fn matches(&self, login: &str) -> bool {
        self.username == login
    }

    /// Verify a password against this user's hash.
    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }

    pub fn to_record(&self) -> UserRecord {
        UserRecord {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            surname: None,
            given_name: None,
            groups: self.roles.clone(),
            is_admin: self.is_admin,
        }
    }
}
