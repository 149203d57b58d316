//! Reconciliation of server snapshots with local playback.

pub mod board;
pub mod context;
pub mod engine;
pub mod handle;

pub use self::board::BoardView;
pub use self::context::{ClientRole, PriorityAudioState, SyncContext};
pub use self::engine::{EngineConfig, EngineSetup, EngineStatus, Notice, VolumeChange};
pub use self::handle::{EngineHandle, spawn_engine};
