//! Test utilities and common setup.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    http::{Method, Request, Response, StatusCode, header},
    routing::any,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use triton_admin::api::{AppState, CorsSettings, UpstreamUrls};
use triton_admin::auth::blocking::InlineRunner;
use triton_admin::auth::cache::MemoryIdentityCache;
use triton_admin::auth::directory::DirectoryVerifier;
use triton_admin::auth::directory::fake::{FakeConnector, FakeDirectory, entry};
use triton_admin::auth::endpoint::{DirectoryTarget, GatewayTarget};
use triton_admin::auth::gateway::GatewayVerifier;
use triton_admin::auth::{AuthConfig, AuthState, Authenticator, Verifier};
use triton_admin::config::ServicesConfig;
use triton_admin::create_router;

pub const TEST_SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";
pub const ADMIN_UUID: &str = "930896af-bf8c-48d4-885c-6573a94b1853";
pub const OPERATOR_UUID: &str = "5a1c7a4e-2b0d-4d8e-9c7e-0a8b1f3e6d21";

fn user_dn(username: &str) -> String {
    format!("cn={username},ou=users,o=smartdc")
}

/// Directory with an `admin` (admin flag set) and an `operator` user.
pub fn standard_directory() -> FakeDirectory {
    FakeDirectory::default()
        .with_user(
            &user_dn("admin"),
            "secret",
            Some(entry(&[
                ("uuid", &[ADMIN_UUID]),
                ("email", &["admin@example.com"]),
                ("cn", &["admin"]),
                ("sn", &["Admin"]),
                ("givenName", &["Sys"]),
                ("memberof", &["cn=operators,ou=groups,o=smartdc"]),
                ("isadmin", &["true"]),
            ])),
        )
        .with_user(
            &user_dn("operator"),
            "secret",
            Some(entry(&[
                ("uuid", &[OPERATOR_UUID]),
                ("email", &["operator@example.com"]),
                ("cn", &["operator"]),
                ("memberof", &["cn=operators,ou=groups,o=smartdc"]),
            ])),
        )
        // Binds fine but has no searchable entry.
        .with_user(&user_dn("ghost"), "secret", None)
}

fn directory_authenticator(dir: FakeDirectory) -> Authenticator {
    let target = DirectoryTarget {
        url: "ldaps://ufds.test:636".to_string(),
        base_dn: "o=smartdc".to_string(),
        secure: true,
    };
    let verifier = DirectoryVerifier::new(
        target,
        Arc::new(FakeConnector(Arc::new(dir))),
        Arc::new(InlineRunner),
    );
    Authenticator::new(
        Verifier::Directory(verifier),
        Arc::new(MemoryIdentityCache::new()),
        Duration::from_secs(60),
    )
}

fn app_with(authenticator: Authenticator, upstreams: UpstreamUrls) -> Router {
    let state = AppState::new(
        AuthState::new(TEST_SECRET, chrono::Duration::hours(60)),
        authenticator,
        upstreams,
        reqwest::Client::new(),
        CorsSettings::default(),
        "coal".to_string(),
    );
    create_router(state)
}

/// App in directory mode with no upstream services configured.
pub fn test_app() -> Router {
    app_with(
        directory_authenticator(standard_directory()),
        UpstreamUrls::default(),
    )
}

/// App in directory mode whose VM service points at `vmapi_url`.
pub fn test_app_with_vmapi(vmapi_url: String) -> Router {
    let services = ServicesConfig {
        vmapi_url: Some(vmapi_url),
        ..ServicesConfig::default()
    };
    app_with(
        directory_authenticator(standard_directory()),
        UpstreamUrls::from_config(&services),
    )
}

/// App in gateway mode with the built-in development identities enabled.
pub fn test_gateway_app(gateway_url: String) -> Router {
    let verifier = GatewayVerifier::new(
        GatewayTarget {
            base_url: gateway_url,
        },
        Duration::from_secs(5),
        Some(AuthConfig::builtin_dev_users()),
    )
    .unwrap();
    app_with(
        Authenticator::new(
            Verifier::Gateway(verifier),
            Arc::new(MemoryIdentityCache::new()),
            Duration::from_secs(60),
        ),
        UpstreamUrls::default(),
    )
}

/// Serve a router on an ephemeral local port and return its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Stand-in VM service echoing the method and path it received.
pub async fn spawn_vmapi() -> String {
    let router = Router::new().route(
        "/{*path}",
        any(|method: Method, uri: axum::http::Uri| async move {
            Json(json!({ "method": method.as_str(), "path": uri.path() }))
        }),
    );
    spawn_server(router).await
}

/// Upstream that accepts connections and hangs up without answering.
pub async fn spawn_hangup_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    format!("http://{addr}")
}

/// Stand-in identity gateway that rejects every login.
pub async fn spawn_rejecting_gateway() -> String {
    let router = Router::new().route(
        "/auth",
        any(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"error": "nope"}))) }),
    );
    spawn_server(router).await
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(method)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn raw_request(method: Method, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(method)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn authed_request(method: Method, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(method)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Log in and return the issued token.
pub async fn login(app: &Router, username: &str, password: &str) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/auth",
            json!({ "username": username, "password": password }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string()
}
