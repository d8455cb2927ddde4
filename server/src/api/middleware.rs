//! HTTP middleware (CORS, request tracing, 404 handler)

use axum::Json;
use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::IntoResponse;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};

use crate::core::constants::{HEADER_USER_ID, HEADER_WORKSPACE_ID};

/// Allowed origins for browser clients on the same machine
#[derive(Debug, Clone)]
pub struct AllowedOrigins {
    origins: Vec<String>,
}

/// True for the wildcard bind addresses
pub fn is_all_interfaces(host: &str) -> bool {
    host == "0.0.0.0" || host == "::"
}

impl AllowedOrigins {
    pub fn new(host: &str, port: u16) -> Self {
        let base_hosts: Vec<&str> =
            if is_all_interfaces(host) || host == "127.0.0.1" || host == "localhost" {
                vec!["localhost", "127.0.0.1"]
            } else {
                vec![host]
            };

        let origins = base_hosts
            .iter()
            .flat_map(|h| [format!("http://{}:{}", h, port), format!("http://{}", h)])
            .collect();
        Self { origins }
    }

    fn as_header_values(&self) -> Vec<HeaderValue> {
        self.origins.iter().filter_map(|o| o.parse().ok()).collect()
    }
}

/// Create CORS layer
pub fn cors(allowed: &AllowedOrigins) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed.as_header_values()))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
            HeaderName::from_static(HEADER_USER_ID),
            HeaderName::from_static(HEADER_WORKSPACE_ID),
        ])
}

/// Request/response spans at debug level, failures at error
pub fn trace() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .on_response(DefaultOnResponse::new().level(tracing::Level::DEBUG))
}

const MAX_404_BODY_LOG: usize = 64 * 1024;

/// Handle 404 Not Found with logging
pub async fn handle_404(req: Request<Body>) -> impl IntoResponse {
    let method = req.method().clone();
    let uri = req.uri().clone();

    if tracing::enabled!(tracing::Level::DEBUG) {
        match to_bytes(req.into_body(), MAX_404_BODY_LOG).await {
            Ok(bytes) => tracing::debug!(
                %method,
                %uri,
                body = %String::from_utf8_lossy(&bytes),
                "[404] No route"
            ),
            Err(_) => tracing::debug!(%method, %uri, "[404] No route (failed to read body)"),
        }
    }

    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "not_found",
            "code": crate::domain::error::CODE_NOT_FOUND,
            "message": format!("no route for {} {}", method, uri.path())
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    impl AllowedOrigins {
        fn is_allowed(&self, origin: &str) -> bool {
            self.origins.iter().any(|o| o == origin)
        }
    }

    #[test]
    fn test_allowed_origins_localhost() {
        let origins = AllowedOrigins::new("0.0.0.0", 5390);
        assert!(origins.is_allowed("http://localhost:5390"));
        assert!(origins.is_allowed("http://127.0.0.1:5390"));
        assert!(!origins.is_allowed("http://evil.example:5390"));
    }

    #[test]
    fn test_allowed_origins_named_host() {
        let origins = AllowedOrigins::new("loupe.internal", 80);
        assert!(origins.is_allowed("http://loupe.internal"));
        assert!(!origins.is_allowed("http://localhost:80"));
    }
}
