pub mod game;
mod sse;

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::{config::ServerConfig, dto::snapshot::GameSnapshot, error::ServiceError};

pub use self::game::{GameState, server_time};
pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;

const STREAM_CAPACITY: usize = 20;

/// Central application state: the single game room and its push hub.
pub struct AppState {
    config: ServerConfig,
    game: RwLock<GameState>,
    stream: SseHub,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: ServerConfig) -> SharedState {
        Arc::new(Self {
            config,
            game: RwLock::new(GameState::new()),
            stream: SseHub::new(STREAM_CAPACITY),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Broadcast hub used for the push stream.
    pub fn stream(&self) -> &SseHub {
        &self.stream
    }

    /// Current snapshot stamped with the server clock.
    pub async fn snapshot(&self) -> GameSnapshot {
        self.game.read().await.snapshot(server_time())
    }

    /// Apply `change` and push the resulting snapshot to every stream.
    ///
    /// The write lock is held until the snapshot is broadcast, so streams see
    /// mutations in the order they were applied.
    pub async fn mutate<F, T>(&self, change: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&mut GameState, f64) -> Result<T, ServiceError>,
    {
        let mut game = self.game.write().await;
        let now = server_time();
        let value = change(&mut game, now)?;

        let snapshot = game.snapshot(now);
        match serde_json::to_string(&snapshot) {
            Ok(payload) => self.stream.broadcast(Arc::from(payload)),
            Err(err) => warn!(error = %err, "failed to serialize snapshot"),
        }
        Ok(value)
    }
}
