use tracing::info;

use crate::{
    dto::{
        requests::{Ack, CallRequest, LookupResponse, SpecialRequest},
        snapshot::{AudioSettings, GameSnapshot, Number},
    },
    error::ServiceError,
    services::catalog_service,
    state::SharedState,
};

/// Start announcing a number.
pub async fn call(state: &SharedState, request: CallRequest) -> Result<Ack, ServiceError> {
    let number = Number::new(request.number).map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let text = catalog_service::label(state.config(), number, &request.audio_url);
    let play_id = state
        .mutate(|game, now| {
            game.call(number, request.audio_url, text, request.playback_rate, now);
            Ok(game.play_id())
        })
        .await?;
    info!(%number, play_id, "number called");
    Ok(Ack::ok())
}

/// The current announcement finished playing on the caller.
pub async fn done(state: &SharedState) -> Result<Ack, ServiceError> {
    state
        .mutate(|game, now| {
            game.done(now);
            Ok(())
        })
        .await?;
    Ok(Ack::ok())
}

/// Start a special announcement.
pub async fn special(state: &SharedState, request: SpecialRequest) -> Result<Ack, ServiceError> {
    let play_id = state
        .mutate(|game, now| {
            game.special(request.audio_url, request.playback_rate, now);
            Ok(game.play_id())
        })
        .await?;
    info!(play_id, "special announcement started");
    Ok(Ack::ok())
}

/// Set the global pause flag.
pub async fn pause(state: &SharedState, paused: bool) -> Result<Ack, ServiceError> {
    state
        .mutate(|game, _| {
            game.set_paused(paused);
            Ok(())
        })
        .await?;
    info!(paused, "pause changed");
    Ok(Ack::ok())
}

/// Replace the shared audio settings.
pub async fn volume(state: &SharedState, settings: AudioSettings) -> Result<Ack, ServiceError> {
    state
        .mutate(|game, _| {
            game.set_settings(settings);
            Ok(())
        })
        .await?;
    Ok(Ack::ok())
}

/// Switch background music.
pub async fn background_music(state: &SharedState, enabled: bool) -> Result<Ack, ServiceError> {
    state
        .mutate(|game, now| {
            game.set_background_music(enabled, now);
            Ok(())
        })
        .await?;
    info!(enabled, "background music changed");
    Ok(Ack::ok())
}

/// Start a new game.
pub async fn reset(state: &SharedState) -> Result<Ack, ServiceError> {
    state
        .mutate(|game, _| {
            game.reset();
            Ok(())
        })
        .await?;
    info!("game reset");
    Ok(Ack::ok())
}

/// Find a clip announcing `number`.
pub fn lookup(state: &SharedState, number: i64) -> Result<LookupResponse, ServiceError> {
    let number = Number::new(number).map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    Ok(catalog_service::lookup(state.config(), number))
}

/// Current snapshot.
pub async fn current_state(state: &SharedState) -> GameSnapshot {
    state.snapshot().await
}
