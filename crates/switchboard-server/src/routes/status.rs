use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    agents: Vec<String>,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        agents: state.catalog.ids().into_iter().map(str::to_string).collect(),
    })
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use switchboard::collaborators::NoopConversationLogger;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_status_lists_agents() {
        let app = routes(test_state("ws://127.0.0.1:9", Arc::new(NoopConversationLogger)));

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["agents"][0], "root");
        assert_eq!(value["agents"].as_array().unwrap().len(), 5);
    }
}
