use std::sync::Arc;

use serde_json::Value;
use shuttle_axum::axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::ingest::{InboundRequest, IngestionPipeline};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestionPipeline>,
    /// Expected token audience, normally the full push endpoint URL.
    pub audience: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/push", post(push))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn push(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let req = InboundRequest {
        authorization: header_str(&headers, header::AUTHORIZATION.as_str()),
        audience: state.audience.clone(),
        body: body.to_vec(),
    };
    let resp = state.pipeline.handle(req).await;
    (resp.status, Json(resp.body))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
