//! Position targets derived from server-clock elapsed time.
//!
//! All inputs are media seconds. Callers convert wall-clock elapsed time into
//! media time (multiplying by the playback rate) before asking for a target.

/// Distance above which a running background track is resynchronised.
pub const DEFAULT_DRIFT_THRESHOLD: f64 = 2.0;

/// Where a track should be after `elapsed` seconds.
///
/// Looping tracks wrap around, guarding against negative elapsed time caused by
/// clock skew. One-shot tracks are clamped into `[0, duration]`.
pub fn target_position(elapsed: f64, duration: f64, looping: bool) -> f64 {
    if !(duration.is_finite() && duration > 0.0) {
        return elapsed.max(0.0);
    }
    if looping {
        ((elapsed % duration) + duration) % duration
    } else {
        elapsed.clamp(0.0, duration)
    }
}

/// Distance between two positions, wrapping around `period` when it is known.
pub fn circular_distance(a: f64, b: f64, period: Option<f64>) -> f64 {
    let direct = (a - b).abs();
    match period {
        Some(period) if period.is_finite() && period > 0.0 => {
            let wrapped = direct % period;
            wrapped.min(period - wrapped)
        }
        _ => direct,
    }
}

/// Initial position of a freshly loaded track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StartPosition {
    /// Seek here, then play.
    Seek(f64),
    /// A one-shot track whose time is already over; never replay it.
    Finished,
}

/// Where a newly loaded track should start after `elapsed` seconds.
pub fn start_position(elapsed: f64, duration: f64, looping: bool) -> StartPosition {
    if !looping && duration.is_finite() && duration > 0.0 && elapsed >= duration {
        return StartPosition::Finished;
    }
    StartPosition::Seek(target_position(elapsed, duration, looping))
}

/// Decides when a running track has drifted far enough to be re-seeked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftCorrector {
    threshold: f64,
}

impl Default for DriftCorrector {
    fn default() -> Self {
        Self::new(DEFAULT_DRIFT_THRESHOLD)
    }
}

impl DriftCorrector {
    /// Create a corrector tolerating up to `threshold` seconds of drift.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.max(0.0),
        }
    }

    /// Tolerated drift in seconds.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Seek target when `current` is too far from where the track should be.
    pub fn correction(
        &self,
        current: f64,
        elapsed: f64,
        duration: f64,
        looping: bool,
    ) -> Option<f64> {
        let target = target_position(elapsed, duration, looping);
        let period = looping.then_some(duration);
        (circular_distance(current, target, period) > self.threshold).then_some(target)
    }
}
