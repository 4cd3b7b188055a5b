//! Token issuing and validation, the auth gate and the role gate.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::sync::Arc;
use tracing::{debug, warn};

use super::claims::TOKEN_ISSUER;
use super::config::MAX_TOKEN_LIFETIME_HOURS;
use super::{AuthConfig, AuthError, Claims, ConfigValidationError, Role, UserRecord};

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }

    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

/// A freshly signed session token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: chrono::Duration,
}

/// Token issuing and validation state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    keys: Arc<TokenKeys>,
}

impl AuthState {
    /// Create auth state from an already validated secret.
    pub fn new(secret: &str, lifetime: chrono::Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss"]);
        validation.set_issuer(&[TOKEN_ISSUER]);

        Self {
            keys: Arc::new(TokenKeys {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
                validation,
                lifetime,
            }),
        }
    }

    /// Create auth state from config.
    /// Resolves `env:VAR_NAME` syntax in jwt_secret at construction time.
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigValidationError> {
        let secret = config.signing_secret()?;
        let hours = config.token_lifetime_hours;
        let lifetime = Some(hours)
            .filter(|h| (1..=MAX_TOKEN_LIFETIME_HOURS).contains(h))
            .and_then(chrono::Duration::try_hours)
            .ok_or(ConfigValidationError::InvalidTokenLifetime(hours))?;
        Ok(Self::new(&secret, lifetime))
    }

    /// Sign a token for a verified identity.
    pub fn issue_token(&self, user: &UserRecord) -> Result<IssuedToken, AuthError> {
        self.issue_at(user, Utc::now())
    }

    /// Sign a token as if issued at `issued_at`.
    pub fn issue_at(
        &self,
        user: &UserRecord,
        issued_at: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let iat = issued_at.timestamp();
        let exp = issued_at
            .checked_add_signed(self.keys.lifetime)
            .ok_or_else(|| AuthError::Internal("token expiry out of range".to_string()))?
            .timestamp();
        let claims = Claims::for_user(user, iat, exp);

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.keys.encoding)
            .map_err(|e| AuthError::Internal(format!("signing token: {e}")))?;

        Ok(IssuedToken { token, claims })
    }

    /// Validate a JWT token. Purely local.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let token_data =
            decode::<Claims>(token, &self.keys.decoding, &self.keys.validation).map_err(|e| {
                debug!("JWT validation failed: {:?}", e.kind());
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::InvalidToken,
                }
            })?;

        Ok(token_data.claims)
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// User claims.
    pub claims: Claims,
}

impl CurrentUser {
    /// Get the user ID.
    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    pub fn username(&self) -> &str {
        &self.claims.username
    }

    pub fn roles(&self) -> &[String] {
        &self.claims.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.claims.has_role(role)
    }
}

/// Extract authentication from request.
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

/// Authentication middleware.
///
/// Validates the `Authorization: Bearer <token>` header and injects
/// `CurrentUser` into request extensions.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let token = bearer_token_from_header(header)?;
    let claims = auth.validate_token(token)?;

    debug!(user_id = %claims.sub, path = %req.uri().path(), "authenticated request");
    req.extensions_mut().insert(CurrentUser { claims });

    Ok(next.run(req).await)
}

/// Role gate middleware.
///
/// Attach per route with `middleware::from_fn_with_state(Role::Admin, require_role)`
/// inside the auth gate.
pub async fn require_role(
    State(role): State<Role>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or(AuthError::MissingToken)?;

    if !user.has_role(role.as_str()) {
        warn!(
            user_id = %user.id(),
            required = %role,
            method = %req.method(),
            path = %req.uri().path(),
            "role requirement not met"
        );
        return Err(AuthError::Forbidden(role.to_string()));
    }

    Ok(next.run(req).await)
}
