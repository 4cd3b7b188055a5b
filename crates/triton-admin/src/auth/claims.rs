//! Session token claims and route roles.

use serde::{Deserialize, Serialize};

use super::user::{ADMIN_ROLE, UserRecord};

/// Issuer written into every session token.
pub const TOKEN_ISSUER: &str = "triton-admin";

/// Role a route can demand. Reads only need a valid token, so the
/// admin role is the only one routes gate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => ADMIN_ROLE,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,

    /// Login name.
    pub username: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Email, empty when unknown.
    #[serde(default)]
    pub email: String,

    /// Role names.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Issued at (Unix seconds).
    pub iat: i64,

    /// Expiration (Unix seconds).
    pub exp: i64,

    /// Issuer.
    pub iss: String,

    /// Token id.
    pub jti: String,
}

impl Claims {
    /// Claims for a verified identity, valid from `iat` until `exp`.
    pub fn for_user(record: &UserRecord, iat: i64, exp: i64) -> Self {
        Self {
            sub: record.id.clone(),
            username: record.username.clone(),
            name: record.name.clone(),
            email: record.email.clone(),
            roles: record.roles(),
            iat,
            exp,
            iss: TOKEN_ISSUER.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Whether the token carries a role, compared case-insensitively.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    /// Rebuild a user record from the token alone.
    pub fn to_user_record(&self) -> UserRecord {
        UserRecord {
            id: self.sub.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            surname: None,
            given_name: None,
            groups: self.roles.clone(),
            is_admin: self.is_admin(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> UserRecord {
        UserRecord {
            id: "930896af-bf8c-48d4-885c-6573a94b1853".to_string(),
            username: "jdoe".to_string(),
            email: "jdoe@example.com".to_string(),
            name: "Jane Doe".to_string(),
            surname: Some("Doe".to_string()),
            given_name: Some("Jane".to_string()),
            groups: vec!["cn=operators,ou=groups,o=smartdc".to_string()],
            is_admin: true,
        }
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn test_claims_for_user() {
        let claims = Claims::for_user(&record(), 100, 200);
        assert_eq!(claims.sub, "930896af-bf8c-48d4-885c-6573a94b1853");
        assert_eq!(claims.username, "jdoe");
        assert_eq!(claims.roles, vec!["operators", "admin"]);
        assert_eq!(claims.iss, TOKEN_ISSUER);
        assert_eq!(claims.iat, 100);
        assert_eq!(claims.exp, 200);
        assert!(claims.is_admin());
        assert!(claims.has_role("Operators"));
    }

    #[test]
    fn test_token_ids_are_unique() {
        let a = Claims::for_user(&record(), 100, 200);
        let b = Claims::for_user(&record(), 100, 200);
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn test_to_user_record_preserves_roles() {
        let claims = Claims::for_user(&record(), 100, 200);
        let rebuilt = claims.to_user_record();
        assert_eq!(rebuilt.id, claims.sub);
        assert_eq!(rebuilt.roles(), claims.roles);
        assert!(rebuilt.is_admin);
    }
}
