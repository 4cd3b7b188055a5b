//! Auth and status handlers.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::auth::verifier::LoginPhase;
use crate::auth::{AuthError, Credentials, CurrentUser, UserRecord};

use super::error::ApiResult;
use super::state::AppState;

/// Ping response.
#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub status: String,
    pub version: String,
    pub auth_mode: String,
    pub datacenter: String,
    pub services: Vec<&'static str>,
    pub time: DateTime<Utc>,
}

/// Liveness check.
pub async fn ping(State(state): State<AppState>) -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        auth_mode: state.authenticator.mode_name().to_string(),
        datacenter: state.datacenter.clone(),
        services: state.upstreams.configured(),
        time: Utc::now(),
    })
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
}

/// User as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

impl From<&UserRecord> for UserInfo {
    fn from(record: &UserRecord) -> Self {
        let roles = record.roles();
        Self {
            id: record.id.clone(),
            username: record.username.clone(),
            email: record.email.clone(),
            name: record.name.clone(),
            surname: record.surname.clone(),
            given_name: record.given_name.clone(),
            is_admin: record.is_admin,
            roles,
        }
    }
}

/// Current user response.
#[derive(Debug, Serialize)]
pub struct CurrentUserResponse {
    pub user: UserInfo,
}

/// Verify credentials and issue a session token.
///
/// A body that is not a JSON `{username, password}` object is a failed login.
#[instrument(skip_all, fields(username))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let Json(credentials) = payload.map_err(|rejection| {
        debug!(error = %rejection.body_text(), "unreadable login body");
        AuthError::InvalidCredentials
    })?;
    tracing::Span::current().record("username", credentials.username.as_str());

    let record = state.authenticator.login(credentials).await?;
    let issued = state.auth.issue_token(&record)?;

    info!(
        user_id = %record.id,
        roles = ?issued.claims.roles,
        phase = %LoginPhase::TokenIssued,
        "login"
    );

    Ok(Json(LoginResponse {
        token: issued.token,
        user: UserInfo::from(&record),
    }))
}

/// Acknowledge a client-side logout. No server-side session exists.
pub async fn logout() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// Current user, from the identity cache when fresh, else from the token.
pub async fn current_user(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Json<CurrentUserResponse> {
    let record = state
        .authenticator
        .cached(user.username())
        .filter(|cached| cached.id == user.id())
        .unwrap_or_else(|| user.claims.to_user_record());

    let mut info = UserInfo::from(&record);
    // Roles are those granted at login.
    info.roles = user.roles().to_vec();

    Json(CurrentUserResponse { user: info })
}
