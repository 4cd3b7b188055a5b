//! Gateway-mode verification through an HTTP identity endpoint.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::DevUser;
use super::endpoint::GatewayTarget;
use super::user::display_name;
use super::{AuthError, Credentials, UserRecord};

/// Body POSTed to the identity endpoint.
#[derive(Serialize)]
struct GatewayLogin<'a> {
    username: &'a str,
    password: &'a str,
}

/// Group membership in a gateway user document.
#[derive(Debug, Deserialize)]
struct Membership {
    #[serde(default)]
    role: Option<String>,
}

/// User document returned by the identity endpoint.
#[derive(Debug, Deserialize)]
struct GatewayUser {
    uuid: String,
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, rename = "givenName")]
    given_name: Option<String>,
    #[serde(default)]
    sn: Option<String>,
    #[serde(default)]
    memberships: Vec<Membership>,
    #[serde(default, rename = "isAdmin")]
    is_admin: bool,
}

impl GatewayUser {
    fn into_record(self, submitted_username: &str) -> UserRecord {
        if let Some(login) = self.login.as_deref()
            && login != submitted_username
        {
            debug!(login = %login, "gateway login differs from submitted username");
        }

        let name = match self.name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => display_name(
                self.given_name.as_deref(),
                self.sn.as_deref(),
                None,
                submitted_username,
            ),
        };

        UserRecord {
            id: self.uuid,
            username: submitted_username.to_string(),
            email: self.email.unwrap_or_default(),
            name,
            surname: self.sn,
            given_name: self.given_name,
            groups: self
                .memberships
                .into_iter()
                .filter_map(|m| m.role)
                .filter(|r| !r.is_empty())
                .collect(),
            is_admin: self.is_admin,
        }
    }
}

/// Verifies operators against an HTTP identity endpoint.
#[derive(Clone)]
pub struct GatewayVerifier {
    target: GatewayTarget,
    client: reqwest::Client,
    dev_users: Option<Vec<DevUser>>,
}

impl GatewayVerifier {
    /// Create a verifier. `dev_users` is `Some` only in insecure development mode.
    pub fn new(
        target: GatewayTarget,
        timeout: Duration,
        dev_users: Option<Vec<DevUser>>,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("building identity HTTP client: {e}")))?;

        Ok(Self {
            target,
            client,
            dev_users,
        })
    }

    /// Whether built-in development identities are active.
    pub fn dev_bypass_enabled(&self) -> bool {
        self.dev_users.is_some()
    }

    /// Verify credentials, consulting development identities first when enabled.
    pub async fn verify(&self, credentials: &Credentials) -> Result<UserRecord, AuthError> {
        if let Some(record) = self.dev_identity(credentials) {
            warn!(username = %credentials.username, "login accepted via development identity");
            return Ok(record);
        }

        if credentials.password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let url = self.target.auth_url();
        debug!(url = %url, "verifying credentials with identity gateway");

        let response = self
            .client
            .post(&url)
            .json(&GatewayLogin {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await
            .map_err(|e| {
                warn!(
                    url = %url,
                    connect = e.is_connect(),
                    timeout = e.is_timeout(),
                    error = %e.without_url(),
                    "identity gateway request failed"
                );
                AuthError::ServiceUnavailable
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            info!(username = %credentials.username, status = status.as_u16(), "identity gateway rejected credentials");
            return Err(AuthError::InvalidCredentials);
        }
        if status.is_server_error() {
            warn!(status = status.as_u16(), "identity gateway returned a server error");
            return Err(AuthError::ServiceUnavailable);
        }
        if !status.is_success() {
            info!(username = %credentials.username, status = status.as_u16(), "identity gateway refused login");
            return Err(AuthError::InvalidCredentials);
        }

        let user: GatewayUser = response.json().await.map_err(|e| {
            warn!(error = %e.without_url(), "identity gateway returned an unreadable user document");
            AuthError::ServiceUnavailable
        })?;

        Ok(user.into_record(&credentials.username))
    }

    fn dev_identity(&self, credentials: &Credentials) -> Option<UserRecord> {
        self.dev_users
            .as_deref()?
            .iter()
            .find(|u| u.matches(&credentials.username) && u.verify_password(&credentials.password))
            .map(DevUser::to_record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::config::AuthConfig;
    use axum::{Json, Router, http::StatusCode as AxumStatus, routing::post};
    use serde_json::{Value, json};

    async fn spawn_gateway(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/ufds")
    }

    async fn login_handler(Json(body): Json<Value>) -> Result<Json<Value>, AxumStatus> {
        match (body["username"].as_str(), body["password"].as_str()) {
            (Some("jdoe"), Some("pw")) => Ok(Json(json!({
                "uuid": "5f6a1c2e-0000-4000-8000-000000000001",
                "login": "jdoe",
                "name": "Jane Doe",
                "email": "jdoe@example.com",
                "memberships": [{"role": "operators"}, {"role": "readers"}],
                "isAdmin": false
            }))),
            (Some("boss"), Some("pw")) => Ok(Json(json!({
                "uuid": "5f6a1c2e-0000-4000-8000-000000000002",
                "givenName": "Big",
                "sn": "Boss",
                "isAdmin": true
            }))),
            (Some("broken"), _) => Err(AxumStatus::INTERNAL_SERVER_ERROR),
            (Some("garbled"), _) => Ok(Json(json!({"unexpected": true}))),
            (Some("unknown"), _) => Err(AxumStatus::NOT_FOUND),
            _ => Err(AxumStatus::UNAUTHORIZED),
        }
    }

    async fn verifier(dev_users: Option<Vec<DevUser>>) -> GatewayVerifier {
        let base_url = spawn_gateway(Router::new().route("/ufds/auth", post(login_handler))).await;
        GatewayVerifier::new(GatewayTarget { base_url }, Duration::from_secs(5), dev_users).unwrap()
    }

    #[tokio::test]
    async fn test_gateway_success_maps_user_document() {
        let v = verifier(None).await;
        let user = v.verify(&Credentials::new("jdoe", "pw")).await.unwrap();
        assert_eq!(user.id, "5f6a1c2e-0000-4000-8000-000000000001");
        assert_eq!(user.username, "jdoe");
        assert_eq!(user.name, "Jane Doe");
        assert_eq!(user.roles(), vec!["operators", "readers"]);
    }

    #[tokio::test]
    async fn test_gateway_admin_flag_and_name_fallback() {
        let v = verifier(None).await;
        let user = v.verify(&Credentials::new("boss", "pw")).await.unwrap();
        assert_eq!(user.name, "Big Boss");
        assert_eq!(user.email, "");
        assert_eq!(user.roles(), vec!["admin"]);
    }

    #[tokio::test]
    async fn test_gateway_status_mapping() {
        let v = verifier(None).await;
        let err = v.verify(&Credentials::new("jdoe", "bad")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let err = v.verify(&Credentials::new("unknown", "pw")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let err = v.verify(&Credentials::new("broken", "pw")).await.unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable));

        let err = v.verify(&Credentials::new("garbled", "pw")).await.unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable));
    }

    #[tokio::test]
    async fn test_gateway_unreachable_is_service_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let v = GatewayVerifier::new(
            GatewayTarget {
                base_url: format!("http://{addr}"),
            },
            Duration::from_secs(2),
            None,
        )
        .unwrap();
        let err = v.verify(&Credentials::new("jdoe", "pw")).await.unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable));
    }

    #[tokio::test]
    async fn test_dev_identities_only_when_enabled() {
        let v = verifier(None).await;
        let err = v.verify(&Credentials::new("admin", "admin")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(!v.dev_bypass_enabled());

        let v = verifier(Some(AuthConfig::builtin_dev_users())).await;
        assert!(v.dev_bypass_enabled());
        let admin = v.verify(&Credentials::new("admin", "admin")).await.unwrap();
        assert!(admin.roles().contains(&"admin".to_string()));

        let operator = v
            .verify(&Credentials::new("operator", "operator"))
            .await
            .unwrap();
        assert_eq!(operator.roles(), vec!["operator"]);

        // Wrong password falls through to the real gateway.
        let err = v.verify(&Credentials::new("admin", "nope")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_dev_identity_token_carries_submitted_username() {
        let auth = crate::auth::AuthState::new(
            "a-very-long-and-secure-jwt-secret-that-is-at-least-32-chars",
            chrono::Duration::hours(60),
        );
        let v = verifier(Some(AuthConfig::builtin_dev_users())).await;

        let record = v.verify(&Credentials::new("admin", "admin")).await.unwrap();
        let issued = auth.issue_token(&record).unwrap();
        let claims = auth.validate_token(&issued.token).unwrap();
        assert_eq!(claims.username, "admin");

        // Email and id are not alternate logins for development identities.
        for login in ["admin@example.com", "00000000-0000-0000-0000-000000000000"] {
            let err = v.verify(&Credentials::new(login, "admin")).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials), "{login}");
        }
    }
}
