//! Login orchestration across the selected verifier and the identity cache.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::blocking::{BlockingRunner, TokioBlockingRunner};
use super::cache::{IdentityCache, MemoryIdentityCache, NoopIdentityCache};
use super::config::AuthConfig;
use super::directory::{DirectoryConnector, DirectoryVerifier, LdapConnector};
use super::endpoint::AuthMode;
use super::gateway::GatewayVerifier;
use super::{AuthError, Credentials, UserRecord};

/// Phases of a single login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPhase {
    Received,
    ModeSelected,
    Verifying,
    Verified,
    TokenIssued,
    Denied,
}

impl std::fmt::Display for LoginPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoginPhase::Received => "received",
            LoginPhase::ModeSelected => "mode_selected",
            LoginPhase::Verifying => "verifying",
            LoginPhase::Verified => "verified",
            LoginPhase::TokenIssued => "token_issued",
            LoginPhase::Denied => "denied",
        };
        f.write_str(s)
    }
}

/// The verifier chosen at startup.
#[derive(Clone)]
pub enum Verifier {
    Directory(DirectoryVerifier),
    Gateway(GatewayVerifier),
}

impl Verifier {
    /// Build the production verifier for a login mode.
    pub fn for_mode(mode: AuthMode, config: &AuthConfig) -> Result<Self> {
        let timeout = config.identity_timeout();
        match mode {
            AuthMode::Directory(target) => {
                let connector: Arc<dyn DirectoryConnector> =
                    Arc::new(LdapConnector::new(config.verify_certificates, timeout));
                let runner: Arc<dyn BlockingRunner> = Arc::new(TokioBlockingRunner::new(timeout));
                Ok(Verifier::Directory(DirectoryVerifier::new(
                    target, connector, runner,
                )))
            }
            AuthMode::Gateway(target) => {
                let verifier =
                    GatewayVerifier::new(target, timeout, config.effective_dev_users())
                        .context("creating identity gateway client")?;
                if verifier.dev_bypass_enabled() {
                    warn!("development identities accept logins without the identity gateway");
                }
                Ok(Verifier::Gateway(verifier))
            }
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            Verifier::Directory(_) => "directory",
            Verifier::Gateway(_) => "gateway",
        }
    }
}

/// Verifies logins and maintains the identity cache.
#[derive(Clone)]
pub struct Authenticator {
    verifier: Verifier,
    cache: Arc<dyn IdentityCache>,
    cache_ttl: Duration,
}

impl Authenticator {
    pub fn new(verifier: Verifier, cache: Arc<dyn IdentityCache>, cache_ttl: Duration) -> Self {
        Self {
            verifier,
            cache,
            cache_ttl,
        }
    }

    /// Build from configuration: mode selection, verifier and cache.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let mode = config.auth_mode().context("selecting login mode")?;
        let verifier = Verifier::for_mode(mode, config)?;

        let cache: Arc<dyn IdentityCache> = if config.cache_ttl_secs == 0 {
            Arc::new(NoopIdentityCache)
        } else {
            Arc::new(MemoryIdentityCache::new())
        };

        Ok(Self::new(verifier, cache, config.cache_ttl()))
    }

    pub fn mode_name(&self) -> &'static str {
        self.verifier.mode_name()
    }

    /// Evict expired identity cache entries, returning how many were dropped.
    pub fn purge_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Fresh cached record for a username, if any.
    pub fn cached(&self, username: &str) -> Option<UserRecord> {
        self.cache.get(username)
    }

    /// Verify credentials and return the canonical identity.
    pub async fn login(&self, credentials: Credentials) -> Result<UserRecord, AuthError> {
        let username = credentials.username.clone();
        debug!(username = %username, phase = %LoginPhase::Received, "login");

        if username.trim().is_empty() {
            info!(phase = %LoginPhase::Denied, "login without username");
            return Err(AuthError::InvalidCredentials);
        }

        debug!(
            username = %username,
            mode = self.mode_name(),
            phase = %LoginPhase::ModeSelected,
            "login"
        );

        let cached = self.cache.get(&username);
        let fresh_lookup = cached.is_none();

        debug!(
            username = %username,
            cached = !fresh_lookup,
            phase = %LoginPhase::Verifying,
            "login"
        );
        let outcome = match &self.verifier {
            Verifier::Directory(v) => v.verify(credentials, cached).await,
            Verifier::Gateway(v) => v.verify(&credentials).await,
        };

        match outcome {
            Ok(record) => {
                if fresh_lookup {
                    self.cache.put(&username, record.clone(), self.cache_ttl);
                }
                info!(
                    username = %username,
                    user_id = %record.id,
                    phase = %LoginPhase::Verified,
                    "login"
                );
                Ok(record)
            }
            Err(err) => {
                warn!(
                    username = %username,
                    code = err.error_code(),
                    phase = %LoginPhase::Denied,
                    "login"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::field_reassign_with_default)]
mod tests {
    use super::*;
    use crate::auth::blocking::InlineRunner;
    use crate::auth::directory::fake::{FakeConnector, FakeDirectory, entry};
    use crate::auth::endpoint::DirectoryTarget;

    const DN: &str = "cn=jdoe,ou=users,o=smartdc";

    fn directory(dir: Arc<FakeDirectory>) -> Verifier {
        Verifier::Directory(DirectoryVerifier::new(
            DirectoryTarget {
                url: "ldaps://ufds:636".to_string(),
                base_dn: "o=smartdc".to_string(),
                secure: true,
            },
            Arc::new(FakeConnector(dir)),
            Arc::new(InlineRunner),
        ))
    }

    fn fake_dir() -> Arc<FakeDirectory> {
        Arc::new(FakeDirectory::default().with_user(
            DN,
            "secret",
            Some(entry(&[
                ("uuid", &["930896af-bf8c-48d4-885c-6573a94b1853"]),
                ("cn", &["jdoe"]),
                ("memberof", &["cn=operators,ou=groups,o=smartdc"]),
            ])),
        ))
    }

    #[tokio::test]
    async fn test_cache_skips_search_but_not_bind() {
        let dir = fake_dir();
        let auth = Authenticator::new(
            directory(Arc::clone(&dir)),
            Arc::new(MemoryIdentityCache::new()),
            Duration::from_secs(60),
        );

        let first = auth.login(Credentials::new("jdoe", "secret")).await.unwrap();
        let second = auth.login(Credentials::new("jdoe", "secret")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(dir.search_count(), 1);
        assert_eq!(dir.binds.lock().unwrap().len(), 2);

        let err = auth.login(Credentials::new("jdoe", "wrong")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(auth.cached("jdoe").is_some());
    }

    #[tokio::test]
    async fn test_noop_cache_searches_every_time() {
        let dir = fake_dir();
        let auth = Authenticator::new(
            directory(Arc::clone(&dir)),
            Arc::new(NoopIdentityCache),
            Duration::from_secs(60),
        );

        auth.login(Credentials::new("jdoe", "secret")).await.unwrap();
        auth.login(Credentials::new("jdoe", "secret")).await.unwrap();
        assert_eq!(dir.search_count(), 2);
        assert!(auth.cached("jdoe").is_none());
    }

    #[tokio::test]
    async fn test_empty_username_denied() {
        let auth = Authenticator::new(
            directory(fake_dir()),
            Arc::new(NoopIdentityCache),
            Duration::from_secs(60),
        );
        let err = auth.login(Credentials::new("  ", "secret")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn test_from_config_selects_mode() {
        let mut config = AuthConfig::default();
        config.identity_url = "ldaps://ufds.local".to_string();
        assert_eq!(Authenticator::from_config(&config).unwrap().mode_name(), "directory");

        config.identity_url = "http://127.0.0.1:3000/ufds".to_string();
        assert_eq!(Authenticator::from_config(&config).unwrap().mode_name(), "gateway");

        config.identity_url = "gopher://x".to_string();
        assert!(Authenticator::from_config(&config).is_err());
    }

    #[test]
    fn test_login_phase_display() {
        assert_eq!(LoginPhase::TokenIssued.to_string(), "token_issued");
        assert_eq!(LoginPhase::Denied.to_string(), "denied");
    }
}
