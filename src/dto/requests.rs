//! Request and response bodies of the mutation endpoints.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::dto::snapshot::Number;

/// Start announcing a number.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CallRequest {
    /// Number being called.
    #[validate(range(min = 0, max = 99))]
    pub number: i64,
    /// Clip announcing the number.
    #[validate(custom(function = "crate::dto::validation::validate_clip_path"))]
    pub audio_url: String,
    /// Playback speed of the clip.
    #[validate(range(exclusive_min = 0.0, max = 4.0))]
    #[serde(default = "default_rate")]
    pub playback_rate: f64,
}

impl CallRequest {
    /// Build a call for a validated number.
    pub fn new(number: Number, audio_url: impl Into<String>, playback_rate: f64) -> Self {
        Self {
            number: number.into(),
            audio_url: audio_url.into(),
            playback_rate,
        }
    }
}

/// Start a non-number announcement.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SpecialRequest {
    /// Clip to play.
    #[validate(custom(function = "crate::dto::validation::validate_clip_path"))]
    pub audio_url: String,
    /// Playback speed of the clip.
    #[validate(range(exclusive_min = 0.0, max = 4.0))]
    #[serde(default = "default_rate")]
    pub playback_rate: f64,
}

/// Set the global pause flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PauseRequest {
    /// Requested pause state.
    pub paused: bool,
}

/// Switch background music on or off.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackgroundMusicRequest {
    /// Requested background state.
    pub enabled: bool,
}

/// Body for endpoints that take no parameters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmptyRequest {}

/// Query of the announcement lookup endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct LookupQuery {
    /// Number to look up.
    #[validate(range(min = 0, max = 99))]
    pub number: i64,
}

/// Result of an announcement lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResponse {
    /// Number that was looked up.
    pub number: Number,
    /// Whether a clip exists for the number.
    pub found: bool,
    /// Chosen clip, when found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Label of the chosen clip.
    #[serde(default)]
    pub text: String,
    /// Human readable reason when nothing was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Acknowledgement returned by every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Always `ok` on success.
    pub status: String,
}

impl Ack {
    /// Successful acknowledgement.
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
        }
    }
}

fn default_rate() -> f64 {
    1.0
}
