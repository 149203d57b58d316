//! Per-device playback control.

pub mod controller;
pub mod state_machine;

pub use self::controller::{
    ControllerOutcome, ControllerSettings, FinishReason, Finalized, PlaybackController, Slot,
    SlotEvent, SlotEventKind, StartAt, Track, TrackRequest,
};
pub use self::state_machine::{InvalidTransition, PlaybackEvent, PlaybackPhase};
