use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        requests::{
            Ack, BackgroundMusicRequest, CallRequest, EmptyRequest, LookupQuery, LookupResponse,
            PauseRequest, SpecialRequest,
        },
        snapshot::{AudioSettings, GameSnapshot},
    },
    error::AppError,
    services::game_service,
    state::SharedState,
};

/// Mutation and query endpoints of the game room.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/game/call", post(call))
        .route("/api/game/done", post(done))
        .route("/api/game/special", post(special))
        .route("/api/game/pause", post(pause))
        .route("/api/game/volume", post(volume))
        .route("/api/game/bg_music", post(background_music))
        .route("/api/game/reset", post(reset))
        .route("/api/game/state", get(current_state))
        .route("/api/call_number", get(lookup))
}

/// Start announcing a number.
pub async fn call(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CallRequest>>,
) -> Result<Json<Ack>, AppError> {
    Ok(Json(game_service::call(&state, payload).await?))
}

/// Report that the current announcement finished.
pub async fn done(
    State(state): State<SharedState>,
    Json(_payload): Json<EmptyRequest>,
) -> Result<Json<Ack>, AppError> {
    Ok(Json(game_service::done(&state).await?))
}

/// Start a special announcement.
pub async fn special(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SpecialRequest>>,
) -> Result<Json<Ack>, AppError> {
    Ok(Json(game_service::special(&state, payload).await?))
}

/// Set the global pause flag.
pub async fn pause(
    State(state): State<SharedState>,
    Json(payload): Json<PauseRequest>,
) -> Result<Json<Ack>, AppError> {
    Ok(Json(game_service::pause(&state, payload.paused).await?))
}

/// Replace the shared audio settings.
pub async fn volume(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<AudioSettings>>,
) -> Result<Json<Ack>, AppError> {
    Ok(Json(game_service::volume(&state, payload).await?))
}

/// Switch background music.
pub async fn background_music(
    State(state): State<SharedState>,
    Json(payload): Json<BackgroundMusicRequest>,
) -> Result<Json<Ack>, AppError> {
    Ok(Json(game_service::background_music(&state, payload.enabled).await?))
}

/// Start a new game.
pub async fn reset(
    State(state): State<SharedState>,
    Json(_payload): Json<EmptyRequest>,
) -> Result<Json<Ack>, AppError> {
    Ok(Json(game_service::reset(&state).await?))
}

/// Return the current snapshot without subscribing.
pub async fn current_state(State(state): State<SharedState>) -> Json<GameSnapshot> {
    Json(game_service::current_state(&state).await)
}

/// Find a clip announcing a number.
pub async fn lookup(
    State(state): State<SharedState>,
    Valid(Query(query)): Valid<Query<LookupQuery>>,
) -> Result<Json<LookupResponse>, AppError> {
    Ok(Json(game_service::lookup(&state, query.number)?))
}
