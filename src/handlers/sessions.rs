use axum::{Json, extract::Path, extract::State, response::IntoResponse};

use crate::AppState;

/// Clear a session's conversation context entirely.
pub async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let existed = state.orchestrator.reset(&session_id);
    Json(serde_json::json!({ "reset": existed, "session_id": session_id }))
}
