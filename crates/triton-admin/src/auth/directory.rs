//! Directory-mode verification: bind as the user, then read their entry.
//!
//! The directory client is synchronous. All connection work happens inside a
//! [`BlockingJob`] handed to a [`BlockingRunner`], so the async side only
//! awaits a result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ldap3::{LdapConn, LdapConnSettings, Scope, SearchEntry};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::blocking::{BlockingJob, BlockingRunner};
use super::endpoint::DirectoryTarget;
use super::user::display_name;
use super::{AuthError, Credentials, UserRecord};

/// Attributes requested for a user entry.
pub const USER_ATTRIBUTES: &[&str] = &["uuid", "email", "cn", "sn", "givenName", "memberof", "isAdmin"];

/// Directory result code for a rejected simple bind.
const RC_INVALID_CREDENTIALS: u32 = 49;
/// Directory result code when the search base does not exist.
const RC_NO_SUCH_OBJECT: u32 = 32;

/// Low-level directory failures. Never shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryFailure {
    #[error("cannot connect to directory: {0}")]
    Connect(String),

    #[error("bind rejected: invalid credentials")]
    InvalidCredentials,

    #[error("bind failed: {0}")]
    Bind(String),

    #[error("search failed: {0}")]
    Search(String),
}

impl DirectoryFailure {
    fn is_trust_failure(&self) -> bool {
        match self {
            DirectoryFailure::Connect(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("certificate") || msg.contains("handshake") || msg.contains("tls")
            }
            _ => false,
        }
    }
}

/// A directory entry as a case-insensitive attribute map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// All values of an attribute; attribute names compare case-insensitively.
    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// First value of an attribute.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }
}

/// An open directory connection.
pub trait DirectoryConnection {
    fn bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryFailure>;

    fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryFailure>;

    fn unbind(&mut self) {}
}

/// Opens connections to the directory server.
pub trait DirectoryConnector: Send + Sync {
    fn connect(
        &self,
        target: &DirectoryTarget,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryFailure>;
}

/// Connector backed by the `ldap3` synchronous client.
#[derive(Debug, Clone)]
pub struct LdapConnector {
    verify_certificates: bool,
    timeout: Duration,
}

impl LdapConnector {
    pub fn new(verify_certificates: bool, timeout: Duration) -> Self {
        Self {
            verify_certificates,
            timeout,
        }
    }
}

impl DirectoryConnector for LdapConnector {
    fn connect(
        &self,
        target: &DirectoryTarget,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryFailure> {
        if target.secure && !self.verify_certificates {
            warn!(
                url = %target.url,
                "connecting to directory with certificate verification DISABLED"
            );
        }

        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_no_tls_verify(!self.verify_certificates);

        let conn = LdapConn::with_settings(settings, &target.url)
            .map_err(|e| DirectoryFailure::Connect(e.to_string()))?;

        Ok(Box::new(LdapSession {
            conn,
            timeout: self.timeout,
        }))
    }
}

struct LdapSession {
    conn: LdapConn,
    timeout: Duration,
}

impl DirectoryConnection for LdapSession {
    fn bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryFailure> {
        let result = self
            .conn
            .with_timeout(self.timeout)
            .simple_bind(dn, password)
            .map_err(|e| DirectoryFailure::Bind(e.to_string()))?;

        match result.rc {
            0 => Ok(()),
            RC_INVALID_CREDENTIALS => Err(DirectoryFailure::InvalidCredentials),
            rc => Err(DirectoryFailure::Bind(format!(
                "result code {rc}: {}",
                result.text
            ))),
        }
    }

    fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryFailure> {
        let result = self
            .conn
            .with_timeout(self.timeout)
            .search(base, Scope::Subtree, filter, attrs.to_vec())
            .map_err(|e| DirectoryFailure::Search(e.to_string()))?;

        let ldap3::SearchResult(entries, status) = result;
        match status.rc {
            0 => {}
            RC_NO_SUCH_OBJECT => return Ok(Vec::new()),
            rc => {
                return Err(DirectoryFailure::Search(format!(
                    "result code {rc}: {}",
                    status.text
                )));
            }
        }

        Ok(entries
            .into_iter()
            .map(|raw| {
                let entry = SearchEntry::construct(raw);
                DirectoryEntry {
                    dn: entry.dn,
                    attrs: entry.attrs,
                }
            })
            .collect())
    }

    fn unbind(&mut self) {
        if let Err(e) = self.conn.unbind() {
            debug!(error = %e, "directory unbind failed");
        }
    }
}

/// Verifies operators by binding to the directory as them.
#[derive(Clone)]
pub struct DirectoryVerifier {
    target: DirectoryTarget,
    connector: Arc<dyn DirectoryConnector>,
    runner: Arc<dyn BlockingRunner>,
}

impl DirectoryVerifier {
    pub fn new(
        target: DirectoryTarget,
        connector: Arc<dyn DirectoryConnector>,
        runner: Arc<dyn BlockingRunner>,
    ) -> Self {
        Self {
            target,
            connector,
            runner,
        }
    }

    /// Verify credentials. When `cached` holds a fresh record for this user
    /// the attribute search is skipped, but the bind always happens.
    pub async fn verify(
        &self,
        credentials: Credentials,
        cached: Option<UserRecord>,
    ) -> Result<UserRecord, AuthError> {
        // An empty password is an anonymous bind, which directories accept.
        if credentials.password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let target = self.target.clone();
        let connector = Arc::clone(&self.connector);
        let job: BlockingJob = Box::new(move || {
            authenticate_blocking(connector.as_ref(), &target, &credentials, cached)
        });

        self.runner.run(job).await
    }
}

/// Bind and search on the current thread.
pub fn authenticate_blocking(
    connector: &dyn DirectoryConnector,
    target: &DirectoryTarget,
    credentials: &Credentials,
    cached: Option<UserRecord>,
) -> Result<UserRecord, AuthError> {
    let username = credentials.username.as_str();

    let mut conn = connector
        .connect(target)
        .map_err(|failure| normalize_failure(failure, username, target))?;

    let outcome = bind_and_lookup(conn.as_mut(), target, credentials, cached);
    conn.unbind();
    outcome
}

fn bind_and_lookup(
    conn: &mut dyn DirectoryConnection,
    target: &DirectoryTarget,
    credentials: &Credentials,
    cached: Option<UserRecord>,
) -> Result<UserRecord, AuthError> {
    let username = credentials.username.as_str();
    let user_dn = target.user_dn(username);

    debug!(user_dn = %user_dn, "binding to directory");
    conn.bind(&user_dn, &credentials.password)
        .map_err(|failure| normalize_failure(failure, username, target))?;
    info!(username = %username, "directory bind succeeded");

    if let Some(record) = cached {
        debug!(username = %username, "using cached directory entry");
        return Ok(record);
    }

    let filter = target.user_filter(username);
    let entries = conn
        .search(&target.base_dn, &filter, USER_ATTRIBUTES)
        .map_err(|failure| normalize_failure(failure, username, target))?;

    let Some(entry) = entries.first() else {
        warn!(username = %username, base_dn = %target.base_dn, "bind succeeded but no user entry found");
        return Err(AuthError::UserNotFound);
    };

    record_from_entry(entry, username)
}

/// Map a directory entry onto a [`UserRecord`].
pub fn record_from_entry(entry: &DirectoryEntry, username: &str) -> Result<UserRecord, AuthError> {
    let Some(id) = entry.first("uuid").filter(|id| !id.is_empty()) else {
        warn!(dn = %entry.dn, "directory entry has no uuid attribute");
        return Err(AuthError::DirectoryError);
    };

    let given_name = entry.first("givenName").map(str::to_string);
    let surname = entry.first("sn").map(str::to_string);
    let name = display_name(
        given_name.as_deref(),
        surname.as_deref(),
        entry.first("cn"),
        username,
    );

    Ok(UserRecord {
        id: id.to_string(),
        username: username.to_string(),
        email: entry.first("email").unwrap_or_default().to_string(),
        name,
        surname,
        given_name,
        groups: entry.values("memberof").to_vec(),
        is_admin: entry
            .first("isAdmin")
            .is_some_and(|v| v.eq_ignore_ascii_case("true")),
    })
}

fn normalize_failure(failure: DirectoryFailure, username: &str, target: &DirectoryTarget) -> AuthError {
    match &failure {
        DirectoryFailure::InvalidCredentials => {
            info!(username = %username, "directory rejected credentials");
            AuthError::InvalidCredentials
        }
        DirectoryFailure::Connect(_) if failure.is_trust_failure() => {
            warn!(
                url = %target.url,
                error = %failure,
                "directory TLS handshake failed; for self-signed test directories set auth.verify_certificates = false"
            );
            AuthError::DirectoryError
        }
        DirectoryFailure::Connect(_) => {
            warn!(url = %target.url, error = %failure, "directory unreachable");
            AuthError::DirectoryError
        }
        DirectoryFailure::Bind(_) | DirectoryFailure::Search(_) => {
            warn!(username = %username, error = %failure, "directory operation failed");
            AuthError::DirectoryError
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod fake {
    //! In-memory directory for tests, keyed by bind DN.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A user known to the fake directory.
    #[derive(Clone)]
    pub struct FakeUser {
        pub password: String,
        pub entry: Option<DirectoryEntry>,
    }

    /// Fake directory server.
    #[derive(Default)]
    pub struct FakeDirectory {
        pub users: Mutex<HashMap<String, FakeUser>>,
        pub connect_failure: Mutex<Option<DirectoryFailure>>,
        pub search_failure: Mutex<Option<DirectoryFailure>>,
        pub searches: AtomicUsize,
        pub binds: Mutex<Vec<String>>,
    }

    impl FakeDirectory {
        pub fn with_user(self, dn: &str, password: &str, entry: Option<DirectoryEntry>) -> Self {
            lock(&self.users).insert(
                dn.to_string(),
                FakeUser {
                    password: password.to_string(),
                    entry,
                },
            );
            self
        }

        pub fn search_count(&self) -> usize {
            self.searches.load(Ordering::SeqCst)
        }
    }

    pub struct FakeConnector(pub Arc<FakeDirectory>);

    struct FakeConnection {
        dir: Arc<FakeDirectory>,
        bound: Option<String>,
    }

    impl DirectoryConnector for FakeConnector {
        fn connect(
            &self,
            _target: &DirectoryTarget,
        ) -> Result<Box<dyn DirectoryConnection>, DirectoryFailure> {
            if let Some(failure) = lock(&self.0.connect_failure).clone() {
                return Err(failure);
            }
            Ok(Box::new(FakeConnection {
                dir: Arc::clone(&self.0),
                bound: None,
            }))
        }
    }

    impl DirectoryConnection for FakeConnection {
        fn bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryFailure> {
            lock(&self.dir.binds).push(dn.to_string());
            let users = lock(&self.dir.users);
            match users.get(dn) {
                Some(user) if user.password == password => {
                    self.bound = Some(dn.to_string());
                    Ok(())
                }
                _ => Err(DirectoryFailure::InvalidCredentials),
            }
        }

        fn search(
            &mut self,
            _base: &str,
            _filter: &str,
            _attrs: &[&str],
        ) -> Result<Vec<DirectoryEntry>, DirectoryFailure> {
            self.dir.searches.fetch_add(1, Ordering::SeqCst);
            if let Some(failure) = lock(&self.dir.search_failure).clone() {
                return Err(failure);
            }
            let bound = self.bound.clone().unwrap_or_default();
            let users = lock(&self.dir.users);
            Ok(users
                .get(&bound)
                .and_then(|u| u.entry.clone())
                .into_iter()
                .collect())
        }
    }

    /// Entry for a directory user with the given attributes.
    pub fn entry(pairs: &[(&str, &[&str])]) -> DirectoryEntry {
        DirectoryEntry {
            dn: "cn=test,ou=users,o=smartdc".to_string(),
            attrs: pairs
                .iter()
                .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                .collect(),
        }
    }
}
