use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness along with the room counter and connected streams.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let play_id = state.snapshot().await.play_id;
    HealthResponse::ok(play_id, state.stream().subscriber_count())
}
