//! HTTP API: auth endpoints, status, and resource pass-through.

mod error;
mod handlers;
mod proxy;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::{CurrentUserResponse, LoginResponse, PingResponse, UserInfo};
pub use proxy::{RESOURCE_ROUTES, ResourceRoute, Upstream};
pub use routes::create_router;
pub use state::{AppState, CorsSettings, UpstreamUrls};
