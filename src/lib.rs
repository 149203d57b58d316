//! Client-side synchronization engine for a loto game, plus a reference server.
//!
//! The engine follows an authoritative state stream and keeps two local audio
//! devices (background music and announcements) consistent with it.

pub mod audio;
pub mod client;
pub mod config;
pub mod dto;
pub mod error;
pub mod playback;
pub mod queue;
#[cfg(feature = "server")]
pub mod routes;
#[cfg(feature = "server")]
pub mod services;
#[cfg(feature = "server")]
pub mod state;
pub mod sync;
pub mod timer;
