//! Operator identity records and submitted credentials.

use serde::{Deserialize, Serialize};

/// Role granted to directory administrators.
pub const ADMIN_ROLE: &str = "admin";

/// Username and password submitted at login.
///
/// Lives only for the duration of a login call. The password is redacted
/// from `Debug` output so it can never leak through a log line.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Canonical operator identity produced by either verifier.
///
/// Never carries a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable identifier (directory `uuid` attribute).
    pub id: String,
    /// Login name.
    pub username: String,
    /// Email address, empty when the identity source has none.
    #[serde(default)]
    pub email: String,
    /// Display name.
    pub name: String,
    /// Surname (`sn`).
    #[serde(default)]
    pub surname: Option<String>,
    /// Given name (`givenName`).
    #[serde(default)]
    pub given_name: Option<String>,
    /// Group memberships: group DNs in directory mode, role names in gateway mode.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Directory admin flag.
    #[serde(default)]
    pub is_admin: bool,
}

impl UserRecord {
    /// Roles derived from group memberships and the admin flag.
    ///
    /// A membership of the form `cn=<role>,ou=groups,...` contributes `<role>`;
    /// a bare name is taken as-is. Duplicates are dropped, first occurrence wins.
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = Vec::new();
        for group in &self.groups {
            if let Some(role) = role_from_group(group)
                && !roles.iter().any(|r| r == role)
            {
                roles.push(role.to_string());
            }
        }
        if self.is_admin && !roles.iter().any(|r| r == ADMIN_ROLE) {
            roles.push(ADMIN_ROLE.to_string());
        }
        roles
    }
}

/// Build a display name from the given name and surname, falling back to the
/// common name and finally the username.
pub fn display_name(
    given_name: Option<&str>,
    surname: Option<&str>,
    common_name: Option<&str>,
    username: &str,
) -> String {
    let joined = format!(
        "{} {}",
        given_name.unwrap_or_default(),
        surname.unwrap_or_default()
    );
    let joined = joined.trim();
    if !joined.is_empty() {
        return joined.to_string();
    }
    common_name
        .filter(|cn| !cn.is_empty())
        .unwrap_or(username)
        .to_string()
}

fn role_from_group(group: &str) -> Option<&str> {
    let group = group.trim();
    if group.is_empty() {
        return None;
    }
    if !group.contains('=') {
        return Some(group);
    }
    let first_rdn = group.split(',').next()?.trim();
    let (attr, value) = first_rdn.split_once('=')?;
    if attr.trim().eq_ignore_ascii_case("cn") && !value.trim().is_empty() {
        Some(value.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(groups: &[&str], is_admin: bool) -> UserRecord {
        UserRecord {
            id: "930896af-bf8c-48d4-885c-6573a94b1853".to_string(),
            username: "jdoe".to_string(),
            email: "jdoe@example.com".to_string(),
            name: "Jane Doe".to_string(),
            surname: Some("Doe".to_string()),
            given_name: Some("Jane".to_string()),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            is_admin,
        }
    }

    #[test]
    fn test_roles_from_group_dns() {
        let user = record(
            &[
                "cn=operators,ou=groups,o=smartdc",
                "cn=readers,ou=groups,o=smartdc",
            ],
            false,
        );
        assert_eq!(user.roles(), vec!["operators", "readers"]);
    }

    #[test]
    fn test_roles_admin_flag_adds_admin_once() {
        let user = record(&["cn=admin,ou=groups,o=smartdc"], true);
        assert_eq!(user.roles(), vec!["admin"]);

        let user = record(&["operators"], true);
        assert_eq!(user.roles(), vec!["operators", "admin"]);
    }

    #[test]
    fn test_roles_skip_unparseable_groups() {
        let user = record(&["", "ou=groups,o=smartdc", "cn=ops,o=smartdc", "ops"], false);
        assert_eq!(user.roles(), vec!["ops"]);
    }

    #[test]
    fn test_display_name_fallbacks() {
        assert_eq!(
            display_name(Some("Jane"), Some("Doe"), Some("jdoe"), "jdoe"),
            "Jane Doe"
        );
        assert_eq!(display_name(None, Some("Doe"), None, "jdoe"), "Doe");
        assert_eq!(
            display_name(None, None, Some("Jane D"), "jdoe"),
            "Jane D"
        );
        assert_eq!(display_name(None, None, Some(""), "jdoe"), "jdoe");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }
}
