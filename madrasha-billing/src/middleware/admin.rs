use crate::config::AdminConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use secrecy::ExposeSecret;
use serde_json::json;
use subtle::ConstantTimeEq;

pub const ADMIN_API_KEY_HEADER: &str = "X-Admin-Api-Key";

/// Constant-time key comparison. An empty configured key matches nothing.
fn key_matches(expected: &str, presented: &str) -> bool {
    let expected = expected.as_bytes();
    let presented = presented.as_bytes();

    if expected.is_empty() || expected.len() != presented.len() {
        return false;
    }

    expected.ct_eq(presented).into()
}

pub async fn admin_auth_middleware<S>(
    State(state): State<S>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response
where
    S: AsRef<AdminConfig> + Clone + Send + Sync + 'static,
{
    let expected = state.as_ref().api_key.expose_secret();
    let api_key = headers
        .get(ADMIN_API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match api_key {
        Some(key) if key_matches(expected, key) => next.run(request).await,
        _ => {
            tracing::warn!(
                path = %request.uri().path(),
                key_present = api_key.is_some(),
                "Failed admin authentication attempt"
            );
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unauthorized" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
    use secrecy::Secret;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct TestState(AdminConfig);

    impl AsRef<AdminConfig> for TestState {
        fn as_ref(&self) -> &AdminConfig {
            &self.0
        }
    }

    fn app(key: &str) -> Router {
        let state = TestState(AdminConfig {
            api_key: Secret::new(key.to_string()),
        });
        Router::new()
            .route("/admin/ping", get(|| async { "pong" }))
            .layer(from_fn_with_state(
                state,
                admin_auth_middleware::<TestState>,
            ))
    }

    fn request(key: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri("/admin/ping");
        if let Some(key) = key {
            builder = builder.header(ADMIN_API_KEY_HEADER, key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn correct_key_passes() {
        let response = app("s3cret").oneshot(request(Some("s3cret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_wrong_key_is_rejected() {
        let response = app("s3cret").oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app("s3cret").oneshot(request(Some("guess"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn key_comparison_needs_exact_match() {
        assert!(key_matches("s3cret", "s3cret"));
        assert!(!key_matches("s3cret", "s3crex"));
        assert!(!key_matches("s3cret", "s3cre"));
        assert!(!key_matches("s3cret", "s3cret "));
        assert!(!key_matches("", ""));
    }

    #[tokio::test]
    async fn same_length_wrong_key_is_rejected() {
        let response = app("s3cret").oneshot(request(Some("S3CRET"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn empty_configured_key_rejects_everything() {
        let response = app("").oneshot(request(Some(""))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejection_body_is_generic() {
        let response = app("s3cret").oneshot(request(Some("guess"))).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "Unauthorized" }));
    }
}
