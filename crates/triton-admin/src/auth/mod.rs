//! Authentication and authorization.
//!
//! Operators log in against one of two identity sources chosen once at
//! startup from the configured URL:
//! - Directory mode: bind to the directory as the user, then read their entry
//! - Gateway mode: POST the credentials to an HTTP identity endpoint
//!
//! A successful login yields a signed, stateless session token. Protected
//! routes validate it locally and may demand a role on top.

pub mod blocking;
pub mod cache;
mod claims;
mod config;
pub mod directory;
pub mod endpoint;
mod error;
pub mod gateway;
mod middleware;
mod user;
pub mod verifier;

pub use claims::{Claims, Role, TOKEN_ISSUER};
pub use config::{AuthConfig, ConfigValidationError, DevUser};
pub use endpoint::{AuthMode, EndpointError, IdentityEndpoint};
pub use error::{AuthError, AuthErrorResponse};
pub use middleware::{
    AuthState, CurrentUser, IssuedToken, auth_middleware, require_role,
};
pub use user::{ADMIN_ROLE, Credentials, UserRecord};
pub use verifier::{Authenticator, Verifier};
