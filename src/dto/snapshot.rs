//! Wire representation of the authoritative game state pushed on every change.

use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnNull, NoneAsEmptyString, serde_as};
use validator::Validate;

use crate::error::ValidationError;

/// Highest number that can be called.
pub const MAX_NUMBER: u8 = 99;
/// Size of the number domain.
pub const NUMBER_COUNT: usize = MAX_NUMBER as usize + 1;

/// A callable number in `0..=99`, displayed zero-padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Number(u8);

impl Number {
    /// Validate a raw integer into a [`Number`].
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if (0..=i64::from(MAX_NUMBER)).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ValidationError::OutOfRange { value })
        }
    }

    /// Parse user input such as `"07"` or `" 42 "`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let value = trimmed
            .parse::<i64>()
            .map_err(|_| ValidationError::NotANumber(trimmed.to_string()))?;
        Self::new(value)
    }

    /// Raw integer value.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Every number of the domain in ascending order.
    pub fn all() -> impl Iterator<Item = Number> {
        (0..=MAX_NUMBER).map(Number)
    }
}

impl TryFrom<i64> for Number {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Number> for u8 {
    fn from(value: Number) -> Self {
        value.0
    }
}

impl From<Number> for i64 {
    fn from(value: Number) -> Self {
        i64::from(value.0)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Server-side status of the current announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    /// Nothing is being announced.
    #[default]
    Idle,
    /// An announcement is playing.
    Playing,
    /// The last called number is on display.
    Showing,
}

/// One entry of the called-numbers history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalledNumber {
    /// The number that was called.
    pub number: Number,
    /// Spoken label attached to the clip, when known.
    #[serde(default)]
    pub text: String,
    /// Server time of the call, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_at: Option<f64>,
}

/// Shared loudness and speed settings carried by every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct AudioSettings {
    /// Background music volume.
    #[validate(range(min = 0.0, max = 1.0))]
    pub bg_volume: f64,
    /// Announcement volume.
    #[validate(range(min = 0.0, max = 1.0))]
    pub call_volume: f64,
    /// Fraction of the background volume kept while an announcement plays.
    #[validate(range(min = 0.0, max = 1.0))]
    pub duck_level: f64,
    /// Announcement playback speed.
    #[validate(range(exclusive_min = 0.0, max = 4.0))]
    pub playback_rate: f64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            bg_volume: 0.8,
            call_volume: 1.0,
            duck_level: 0.15,
            playback_rate: 1.0,
        }
    }
}

impl AudioSettings {
    /// Copy with every volume clamped to `[0,1]` and a usable rate.
    pub fn sanitized(self) -> Self {
        Self {
            bg_volume: self.bg_volume.clamp(0.0, 1.0),
            call_volume: self.call_volume.clamp(0.0, 1.0),
            duck_level: self.duck_level.clamp(0.0, 1.0),
            playback_rate: if self.playback_rate.is_finite() && self.playback_rate > 0.0 {
                self.playback_rate
            } else {
                1.0
            },
        }
    }
}

/// Full authoritative game state; replaced wholesale on every push.
///
/// Timestamps are seconds on the server clock. Elapsed time must always be
/// derived from `server_time - started_at`, never from the local clock.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSnapshot {
    /// Announcement status.
    pub status: GameStatus,
    /// Number currently announced or displayed.
    pub current_number: Option<Number>,
    /// Label of the current clip.
    pub current_text: String,
    /// Called history in call order.
    pub called_numbers: Vec<CalledNumber>,
    /// Clip to play for the current announcement; empty means none.
    #[serde_as(as = "DefaultOnNull<NoneAsEmptyString>")]
    pub audio_url: Option<String>,
    /// Incremented exactly once per new announcement.
    pub play_id: u64,
    /// Server time at which the current announcement started.
    pub started_at: Option<f64>,
    /// Server time at which this snapshot was produced.
    pub server_time: f64,
    /// Whether playback is globally paused.
    pub is_paused: bool,
    /// Whether background music is enabled.
    pub bg_music: bool,
    /// Server time at which background music was switched on.
    pub bg_started_at: Option<f64>,
    /// Background music volume.
    pub bg_volume: f64,
    /// Announcement volume.
    pub call_volume: f64,
    /// Ducking factor applied to the background during announcements.
    pub duck_level: f64,
    /// Announcement playback speed.
    pub playback_rate: f64,
}

impl Default for GameSnapshot {
    fn default() -> Self {
        let settings = AudioSettings::default();
        Self {
            status: GameStatus::Idle,
            current_number: None,
            current_text: String::new(),
            called_numbers: Vec::new(),
            audio_url: None,
            play_id: 0,
            started_at: None,
            server_time: 0.0,
            is_paused: false,
            bg_music: false,
            bg_started_at: None,
            bg_volume: settings.bg_volume,
            call_volume: settings.call_volume,
            duck_level: settings.duck_level,
            playback_rate: settings.playback_rate,
        }
    }
}

impl GameSnapshot {
    /// Seconds elapsed on the server clock since the current announcement started.
    pub fn call_elapsed(&self) -> Option<f64> {
        elapsed_since(self.started_at, self.server_time)
    }

    /// Seconds elapsed on the server clock since background music was switched on.
    pub fn background_elapsed(&self) -> Option<f64> {
        elapsed_since(self.bg_started_at, self.server_time)
    }

    /// Volume and rate settings, clamped into their valid ranges.
    pub fn settings(&self) -> AudioSettings {
        AudioSettings {
            bg_volume: self.bg_volume,
            call_volume: self.call_volume,
            duck_level: self.duck_level,
            playback_rate: self.playback_rate,
        }
        .sanitized()
    }

    /// Set of numbers already called.
    pub fn called_set(&self) -> HashSet<Number> {
        self.called_numbers.iter().map(|entry| entry.number).collect()
    }

    /// Whether `number` appears in the called history.
    pub fn is_called(&self, number: Number) -> bool {
        self.called_numbers.iter().any(|entry| entry.number == number)
    }

    /// Most recently called number.
    pub fn latest_called(&self) -> Option<Number> {
        self.called_numbers.last().map(|entry| entry.number)
    }
}

/// A zero or missing timestamp means "never started".
fn elapsed_since(start: Option<f64>, now: f64) -> Option<f64> {
    start
        .filter(|value| value.is_finite() && *value > 0.0)
        .map(|start| now - start)
}
