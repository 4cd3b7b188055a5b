//! Authenticated pass-through to the resource services.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    response::Response,
};
use tracing::{debug, instrument, warn};

use crate::auth::CurrentUser;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Largest request body forwarded upstream.
const MAX_PROXY_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Resource service families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Vmapi,
    Cnapi,
    Napi,
    Imgapi,
    Papi,
    Workflow,
}

impl Upstream {
    pub const ALL: [Upstream; 6] = [
        Upstream::Vmapi,
        Upstream::Cnapi,
        Upstream::Napi,
        Upstream::Imgapi,
        Upstream::Papi,
        Upstream::Workflow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Upstream::Vmapi => "vmapi",
            Upstream::Cnapi => "cnapi",
            Upstream::Napi => "napi",
            Upstream::Imgapi => "imgapi",
            Upstream::Papi => "papi",
            Upstream::Workflow => "workflow",
        }
    }
}

/// One `/api/<resource>` family and where it is served from.
#[derive(Debug, Clone, Copy)]
pub struct ResourceRoute {
    pub resource: &'static str,
    pub upstream: Upstream,
    pub upstream_path: &'static str,
    /// Whether POST/PUT/PATCH/DELETE are routed (admin only).
    pub mutable: bool,
}

pub const RESOURCE_ROUTES: &[ResourceRoute] = &[
    ResourceRoute {
        resource: "vms",
        upstream: Upstream::Vmapi,
        upstream_path: "vms",
        mutable: true,
    },
    ResourceRoute {
        resource: "servers",
        upstream: Upstream::Cnapi,
        upstream_path: "servers",
        mutable: true,
    },
    ResourceRoute {
        resource: "platforms",
        upstream: Upstream::Cnapi,
        upstream_path: "platforms",
        mutable: false,
    },
    ResourceRoute {
        resource: "networks",
        upstream: Upstream::Napi,
        upstream_path: "networks",
        mutable: true,
    },
    ResourceRoute {
        resource: "images",
        upstream: Upstream::Imgapi,
        upstream_path: "images",
        mutable: true,
    },
    ResourceRoute {
        resource: "packages",
        upstream: Upstream::Papi,
        upstream_path: "packages",
        mutable: true,
    },
    ResourceRoute {
        resource: "jobs",
        upstream: Upstream::Workflow,
        upstream_path: "jobs",
        mutable: false,
    },
];

/// Find the resource route for a request path and the remainder after it.
fn route_for_path(path: &str) -> Option<(&'static ResourceRoute, &str)> {
    let tail = path.strip_prefix("/api/")?;
    let (resource, rest) = tail.split_once('/').unwrap_or((tail, ""));
    RESOURCE_ROUTES
        .iter()
        .find(|r| r.resource == resource)
        .map(|r| (r, rest.trim_matches('/')))
}

/// True when a forwarded path segment would walk out of the resource family.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    decoded == "." || decoded == ".."
}

fn build_target_url(base: &str, route: &ResourceRoute, rest: &str, query: Option<&str>) -> String {
    let mut url = format!("{}/{}", base, route.upstream_path);
    if !rest.is_empty() {
        url.push('/');
        url.push_str(rest);
    }
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in [header::CONTENT_TYPE, header::ACCEPT] {
        if let Some(value) = headers.get(&name) {
            out.insert(name, value.clone());
        }
    }
    out
}

/// Forward a resource request to its upstream service and relay the answer.
#[instrument(skip_all, fields(method = %req.method(), path = %req.uri().path(), user = %user.id()))]
pub async fn forward(
    State(state): State<AppState>,
    user: CurrentUser,
    req: Request,
) -> ApiResult<Response> {
    let (parts, body) = req.into_parts();
    let (route, rest) = route_for_path(parts.uri.path())
        .ok_or_else(|| ApiError::not_found(parts.uri.path().to_string()))?;
    if rest.split('/').any(is_dot_segment) {
        return Err(ApiError::bad_request("path must not contain '.' or '..' segments"));
    }

    let base = state
        .upstreams
        .base_url(route.upstream)
        .ok_or_else(|| {
            ApiError::service_unavailable(format!("{} is not configured", route.upstream.name()))
        })?;
    let target = build_target_url(base, route, rest, parts.uri.query());

    let body_bytes = axum::body::to_bytes(body, MAX_PROXY_BODY_BYTES)
        .await
        .map_err(|_| ApiError::PayloadTooLarge)?;

    debug!(target = %target, "forwarding resource request");

    let response = state
        .http
        .request(parts.method.clone(), &target)
        .headers(forwarded_headers(&parts.headers))
        .body(body_bytes)
        .send()
        .await
        .map_err(|e| {
            let upstream = route.upstream.name();
            let unreachable = e.is_connect() || e.is_timeout();
            warn!(upstream, error = %e.without_url(), "upstream request failed");
            if unreachable {
                ApiError::service_unavailable(format!("{upstream} unreachable"))
            } else {
                ApiError::bad_gateway(upstream)
            }
        })?;

    let status = response.status();
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = response.bytes().await.map_err(|e| {
        warn!(upstream = route.upstream.name(), error = %e.without_url(), "reading upstream body failed");
        ApiError::bad_gateway(route.upstream.name())
    })?;

    let mut relayed = Response::new(Body::from(bytes));
    *relayed.status_mut() = status;
    relayed.headers_mut().insert(
        header::CONTENT_TYPE,
        content_type.unwrap_or_else(|| HeaderValue::from_static("application/json")),
    );
    Ok(relayed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_for_path() {
        let (route, rest) = route_for_path("/api/vms").unwrap();
        assert_eq!(route.upstream, Upstream::Vmapi);
        assert_eq!(rest, "");

        let (route, rest) = route_for_path("/api/platforms/20240101T000000Z").unwrap();
        assert_eq!(route.upstream, Upstream::Cnapi);
        assert!(!route.mutable);
        assert_eq!(rest, "20240101T000000Z");

        assert!(route_for_path("/api/unknown").is_none());
        assert!(route_for_path("/other/vms").is_none());
    }

    #[test]
    fn test_build_target_url() {
        let (route, rest) = route_for_path("/api/vms/abc/snapshots").unwrap();
        assert_eq!(
            build_target_url("http://vmapi.local", route, rest, Some("owner_uuid=1")),
            "http://vmapi.local/vms/abc/snapshots?owner_uuid=1"
        );

        let (route, rest) = route_for_path("/api/jobs").unwrap();
        assert_eq!(
            build_target_url("http://wf:8080", route, rest, Some("")),
            "http://wf:8080/jobs"
        );
    }

    #[test]
    fn test_authorization_not_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let out = forwarded_headers(&headers);
        assert!(out.get(header::AUTHORIZATION).is_none());
        assert!(out.get(header::CONTENT_TYPE).is_some());
    }

    #[test]
    fn test_dot_segments_detected() {
        assert!(is_dot_segment(".."));
        assert!(is_dot_segment("."));
        assert!(is_dot_segment("%2e%2e"));
        assert!(is_dot_segment("%2E."));
        assert!(!is_dot_segment("..snapshot"));
        assert!(!is_dot_segment("abc"));
    }

    #[test]
    fn test_every_upstream_has_a_route() {
        for upstream in Upstream::ALL {
            assert!(RESOURCE_ROUTES.iter().any(|r| r.upstream == upstream));
        }
    }
}
