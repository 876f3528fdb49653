use crate::handlers::{audit, ws};
use crate::state::AppState;
use anyhow::Context;
use axum::{Router, http::HeaderValue, routing::get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState, frontend_origin: Option<&str>) -> anyhow::Result<Router> {
    let cors = match frontend_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("invalid frontend origin: {origin}"))?,
            )
            .allow_headers(Any)
            .allow_methods(Any),
        None => CorsLayer::permissive(),
    };

    Ok(Router::new()
        .route("/auditlog", get(audit::get_audit_log))
        .route("/ws/orderbook", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_audit_log_route() {
        let state = AppState::new(&RelayConfig::default());
        state.broadcaster.publish(r#"{"event":"data"}"#);
        let app = create_router(state, None).unwrap();

        let response = app
            .oneshot(Request::get("/auditlog").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let entries: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(entries.as_array().unwrap().len(), 1);
        assert_eq!(entries[0]["snapshot"], r#"{"event":"data"}"#);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let state = AppState::new(&RelayConfig::default());
        let app = create_router(state, Some("http://localhost:3000")).unwrap();

        let response = app
            .oneshot(Request::get("/ws/orderbook").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let state = AppState::new(&RelayConfig::default());
        assert!(create_router(state, Some("bad\norigin")).is_err());
    }
}
