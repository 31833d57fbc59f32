//! The host-side credential-injecting proxy.
//!
//! An axum fallback handler terminates every request arriving on the proxy
//! Unix socket: validate the path against the vendor allowlist, strip any
//! authentication the agent attached, inject the real credential, forward
//! upstream with reqwest, and stream the response body back. Hop-by-hop and
//! content-encoding headers are dropped from the response because reqwest
//! has already decoded the body.

use crate::routes::{match_route, AuthStyle, VendorRoute};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Maximum buffered request body (model calls are small).
const MAX_REQUEST_BODY: usize = 10 * 1024 * 1024;

/// Resolves credential env-var names to secret values.
///
/// The only component allowed to hand out credentials; implemented by the
/// host's secret store.
pub trait SecretResolver: Send + Sync {
    /// Look up a secret by its environment-variable name.
    fn resolve(&self, env_var: &str) -> Option<Zeroizing<String>>;
}

/// Request headers that must never be forwarded upstream: agent-supplied
/// credentials (replaced by the injected one) and connection-scoped
/// headers.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "proxy-authorization",
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

/// Response headers dropped before relaying: hop-by-hop plus encoding
/// headers describing a compression reqwest already undid.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "content-encoding",
    "content-length",
];

/// Whether a request header survives forwarding.
pub fn forwardable_request_header(name: &str) -> bool {
    !STRIPPED_REQUEST_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Whether a response header survives relaying.
pub fn forwardable_response_header(name: &str) -> bool {
    !STRIPPED_RESPONSE_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// The proxy: allowlist, secret resolver, and upstream client.
pub struct CredentialProxy {
    routes: Vec<VendorRoute>,
    secrets: Arc<dyn SecretResolver>,
    client: reqwest::Client,
}

impl CredentialProxy {
    pub fn new(routes: Vec<VendorRoute>, secrets: Arc<dyn SecretResolver>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            routes,
            secrets,
            client,
        }
    }

    /// The axum router terminating the proxy socket.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(handle).with_state(self)
    }

    /// Serve on an already-bound Unix listener until the task is dropped.
    pub async fn serve(self: Arc<Self>, listener: tokio::net::UnixListener) -> std::io::Result<()> {
        axum::serve(listener, self.router()).await
    }
}

/// Terminate one proxied request.
async fn handle(
    State(proxy): State<Arc<CredentialProxy>>,
    req: axum::extract::Request,
) -> Response {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let method = req.method().clone();

    let route = match match_route(&proxy.routes, &path) {
        Some(r) => r.clone(),
        None => {
            warn!(%path, "Proxy rejected unlisted path");
            return (StatusCode::FORBIDDEN, "path not allowlisted").into_response();
        }
    };

    let credential = match proxy.secrets.resolve(&route.env_var) {
        Some(c) => c,
        None => {
            warn!(vendor = %route.vendor, "No credential configured for vendor");
            return (StatusCode::BAD_GATEWAY, "no credential for vendor").into_response();
        }
    };

    let headers = req.headers().clone();
    let body = match axum::body::to_bytes(req.into_body(), MAX_REQUEST_BODY).await {
        Ok(b) => b,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let mut url = format!("{}{}", route.upstream_base, path);
    if let Some(q) = query {
        url.push('?');
        url.push_str(&q);
    }

    let mut upstream = proxy.client.request(method, &url).body(body);
    for (name, value) in headers.iter() {
        if forwardable_request_header(name.as_str()) {
            upstream = upstream.header(name, value);
        }
    }
    upstream = match route.auth_style {
        AuthStyle::Bearer => upstream.header("authorization", format!("Bearer {}", &*credential)),
        AuthStyle::XApiKey => upstream.header("x-api-key", credential.as_str()),
    };

    let response = match upstream.send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(vendor = %route.vendor, error = %e, "Upstream request failed");
            return (StatusCode::BAD_GATEWAY, "upstream unreachable").into_response();
        }
    };

    debug!(
        vendor = %route.vendor,
        status = response.status().as_u16(),
        "Proxied request"
    );

    let status = response.status();
    let mut out_headers = HeaderMap::new();
    for (name, value) in response.headers().iter() {
        if forwardable_response_header(name.as_str()) {
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                out_headers.insert(n, v);
            }
        }
    }

    let stream = response.bytes_stream();
    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        *headers = out_headers;
    }
    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| (StatusCode::BAD_GATEWAY, "relay failure").into_response())
}
