//! Router construction.

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{MethodRouter, get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::{Role, auth_middleware, require_role};

use super::handlers;
use super::proxy::{self, RESOURCE_ROUTES};
use super::state::{AppState, CorsSettings};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.cors);

    // Tracing layer with request IDs and timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let auth_state = state.auth.clone();

    // Protected routes (require authentication)
    let mut protected_routes = Router::new();
    for resource in RESOURCE_ROUTES {
        let methods = resource_methods(resource.mutable);
        protected_routes = protected_routes
            .route(&format!("/api/{}", resource.resource), methods.clone())
            .route(&format!("/api/{}/{{*rest}}", resource.resource), methods);
    }
    let protected_routes = protected_routes
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    // Login and logout are public; reading the session needs a token.
    let session_methods = get(handlers::current_user)
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .post(handlers::login)
        .delete(handlers::logout);

    // Public routes (no authentication)
    let public_routes = Router::new()
        .route("/api/ping", get(handlers::ping))
        .route("/api/auth", session_methods)
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(ServiceBuilder::new().layer(trace_layer).layer(cors))
}

/// Reads for any authenticated caller; mutations behind the admin role gate.
fn resource_methods(mutable: bool) -> MethodRouter<AppState> {
    let reads = get(proxy::forward);
    if !mutable {
        return reads;
    }

    let writes = post(proxy::forward)
        .put(proxy::forward)
        .patch(proxy::forward)
        .delete(proxy::forward)
        .route_layer(middleware::from_fn_with_state(Role::Admin, require_role));

    reads.merge(writes)
}

/// Build the CORS layer based on configuration.
///
/// In dev mode with no configured origins, allows any origin.
/// Otherwise only the configured origins are allowed.
fn build_cors_layer(settings: &CorsSettings) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::OPTIONS,
    ];

    let headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ORIGIN,
    ];

    if settings.allowed_origins.is_empty() {
        if settings.dev_mode {
            tracing::warn!("CORS: No origins configured in dev mode, allowing any origin");
            CorsLayer::new()
                .allow_origin(AllowOrigin::any())
                .allow_methods(methods)
                .allow_headers(headers)
        } else {
            tracing::info!("CORS: No origins configured, denying all cross-origin requests");
            CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")))
        }
    } else {
        let origins: Vec<HeaderValue> = settings
            .allowed_origins
            .iter()
            .filter_map(|origin| {
                origin.parse::<HeaderValue>().ok().or_else(|| {
                    tracing::warn!("CORS: Invalid origin in config: {}", origin);
                    None
                })
            })
            .collect();

        if origins.is_empty() {
            tracing::error!("CORS: All configured origins are invalid!");
            CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")))
        } else {
            tracing::info!("CORS: Allowing {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(methods)
                .allow_headers(headers)
        }
    }
}
