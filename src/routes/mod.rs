use axum::Router;

use crate::state::SharedState;

pub mod game;
pub mod health;
pub mod sse;

/// Compose all route trees and wire in the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(sse::router())
        .merge(game::router())
        .with_state(state)
}
