use crate::state::AppState;
use axum::{Json, extract::State};
use market_data::AuditEntry;

/// Most recent upstream messages, oldest first.
pub async fn get_audit_log(State(state): State<AppState>) -> Json<Vec<AuditEntry>> {
    Json(state.audit_log().get_all())
}
