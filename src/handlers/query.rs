use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;

use crate::AppState;
use crate::orchestrator::Pin;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub session_id: String,
    pub query: String,
    #[serde(default)]
    pub pin: Option<Pin>,
}

/// Run one conversational turn through the pipeline.
pub async fn translate_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.session_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "session_id must not be empty".to_string()));
    }

    let response = state
        .orchestrator
        .translate_query(&req.session_id, &req.query, req.pin)
        .await;
    Ok(Json(response))
}
