//! Error report ingress.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::monitor::MessageEvent;

/// Create the reports router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(submit_report))
}

/// An error report pushed by a producer.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub platform: String,
    pub sender_name: String,
    pub sender_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    pub message: String,
    pub keyword: String,
}

impl MessageEvent for ReportRequest {
    fn platform_name(&self) -> &str {
        &self.platform
    }

    fn sender_name(&self) -> &str {
        &self.sender_name
    }

    fn sender_id(&self) -> &str {
        &self.sender_id
    }

    fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    fn message_str(&self) -> &str {
        &self.message
    }
}

/// Accept a report.
///
/// In batching mode the report is buffered inline, which never waits on the
/// relay and keeps arrival order. In immediate mode the send runs in a
/// tracked task so the 202 does not wait on SMTP. Producers get no feedback
/// beyond the 202; delivery outcomes are only logged.
async fn submit_report(
    State(state): State<AppState>,
    payload: Result<Json<ReportRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(report) = payload?;

    let batching = state
        .monitor
        .aggregator()
        .is_some_and(|aggregator| aggregator.settings().enable_batching);
    if batching {
        state.monitor.report_error(&report, &report.keyword).await;
        return Ok(StatusCode::ACCEPTED);
    }

    let monitor = state.monitor.clone();
    state.report_tasks.spawn(async move {
        monitor.report_error(&report, &report.keyword).await;
    });

    Ok(StatusCode::ACCEPTED)
}
