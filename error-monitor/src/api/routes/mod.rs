//! API route modules.

pub mod admin;
pub mod health;
pub mod reports;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/reports", reports::router())
        .nest("/api/admin", admin::router(state.clone()))
        .nest("/health", health::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::config::MonitorConfig;
    use crate::monitor::ExceptionMonitor;
    use crate::transport::testing::{Behavior, RecordingTransport};

    fn app_with(
        transport: RecordingTransport,
        enable_batching: bool,
        admin_token: Option<&str>,
    ) -> (Router, AppState, Arc<RecordingTransport>) {
        let mut config = MonitorConfig::default();
        config.rate_limit_batching.enable_batching = enable_batching;
        config.server.admin_token = admin_token.map(str::to_string);

        let transport = Arc::new(transport);
        let mut monitor = ExceptionMonitor::new(config);
        monitor.initialize_with_transport(transport.clone());
        let state = AppState::new(Arc::new(monitor));
        (create_router(state.clone()), state, transport)
    }

    fn app(admin_token: Option<&str>) -> (Router, Arc<RecordingTransport>) {
        let (router, _, transport) =
            app_with(RecordingTransport::new(Behavior::Deliver), false, admin_token);
        (router, transport)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn report_body() -> String {
        json!({
            "platform": "discord",
            "sender_name": "carol",
            "sender_id": "42",
            "group_id": "guild-1",
            "message": "<b>ValueError</b>",
            "keyword": "ValueError"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app(Some("s3cret"));
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["monitor_initialized"], true);
    }

    #[tokio::test]
    async fn test_report_is_accepted_and_delivered() {
        let (app, state, transport) =
            app_with(RecordingTransport::new(Behavior::Deliver), false, None);
        let response = app
            .oneshot(post_json("/api/reports", &report_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        state.drain_reports().await;
        assert!(state.report_tasks.is_empty());
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("&lt;b&gt;ValueError"));
        assert!(sent[0].body.contains("carol"));
    }

    #[tokio::test]
    async fn test_in_flight_report_finishes_before_terminate() {
        let slow = RecordingTransport::new(Behavior::Deliver).with_delay(Duration::from_millis(50));
        let (app, state, transport) = app_with(slow, false, None);

        let response = app
            .oneshot(post_json("/api/reports", &report_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(transport.sent_count(), 0);

        state.drain_reports().await;
        state.monitor.terminate().await;
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_report_is_buffered_before_reply() {
        let (app, state, transport) =
            app_with(RecordingTransport::new(Behavior::Deliver), true, None);
        let response = app
            .oneshot(post_json("/api/reports", &report_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let status = state.monitor.aggregator().unwrap().status();
        assert_eq!(status.buffered, 1);
        assert!(status.batch_scheduled);
        assert!(state.report_tasks.is_empty());

        state.monitor.terminate().await;
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_report_rejects_bad_payloads() {
        let (app, transport) = app(None);

        let response = app
            .clone()
            .oneshot(post_json("/api/reports", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "BAD_REQUEST");

        let response = app
            .oneshot(post_json("/api/reports", r#"{"platform": "qq"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_admin_routes_open_without_token() {
        let (app, _) = app(None);
        let response = app.oneshot(get("/api/admin/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let message = body["message"].as_str().unwrap();
        assert!(message.starts_with("Error monitor status:"));
        assert!(message.contains("Emails sent this window: 0/10"));
    }

    #[tokio::test]
    async fn test_admin_routes_require_token() {
        let (app, _) = app(Some("s3cret"));

        let response = app
            .clone()
            .oneshot(get("/api/admin/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let wrong = Request::builder()
            .uri("/api/admin/status")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(wrong).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let right = Request::builder()
            .uri("/api/admin/status")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(right).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reports_do_not_require_admin_token() {
        let (app, _) = app(Some("s3cret"));
        let response = app
            .oneshot(post_json("/api/reports", &report_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_clear_cache_route() {
        let (app, _) = app(None);
        let request = Request::builder()
            .method("POST")
            .uri("/api/admin/cache/clear")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await["message"],
            "Cleared 0 cached exception record(s)."
        );
    }

    #[tokio::test]
    async fn test_test_email_route() {
        let (app, transport) = app(None);
        let request = Request::builder()
            .method("POST")
            .uri("/api/admin/test-email")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert!(body["message"].as_str().unwrap().starts_with("Test email sent"));
        assert_eq!(transport.sent_count(), 1);
        assert!(transport.sent()[0].subject.contains("Test Email"));
    }
}
