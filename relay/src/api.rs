//! REST surface: the health endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::RelayState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agent: bool,
    pub clients: usize,
}

/// `GET /health`: liveness plus peer counts.
pub async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        agent: state.agent_connected().await,
        clients: state.client_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_serializes_expected_shape() {
        let body = HealthResponse {
            status: "ok",
            agent: true,
            clients: 3,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["agent"], true);
        assert_eq!(json["clients"], 3);
    }
}
