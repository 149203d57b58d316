//! Clock-driven audio device used by the headless client and in tests.
//!
//! The device never decodes anything: it tracks a virtual play head against
//! the Tokio clock, reports metadata after a short delay and raises `Ended`
//! when the head reaches the end of a one-shot source.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::{
    audio::device::{AudioDevice, DeviceEvent, DeviceId, MediaSource, Subscription},
    error::MediaError,
};

/// Duration reported for sources without an explicit entry.
pub const DEFAULT_SIMULATED_DURATION: f64 = 3.0;

struct SimState {
    source: Option<MediaSource>,
    subscription: Option<Subscription>,
    duration: Option<f64>,
    anchor: f64,
    playing_since: Option<Instant>,
    volume: f64,
    rate: f64,
    muted: bool,
    load_generation: u64,
    end_generation: u64,
    metadata_delay: Duration,
    default_duration: f64,
    durations: HashMap<String, f64>,
    failing: HashSet<String>,
    autoplay_blocked: bool,
    stalled: bool,
    loads: Vec<String>,
    play_calls: usize,
    seeks: Vec<f64>,
}

impl SimState {
    fn new() -> Self {
        Self {
            source: None,
            subscription: None,
            duration: None,
            anchor: 0.0,
            playing_since: None,
            volume: 1.0,
            rate: 1.0,
            muted: false,
            load_generation: 0,
            end_generation: 0,
            metadata_delay: Duration::from_millis(20),
            default_duration: DEFAULT_SIMULATED_DURATION,
            durations: HashMap::new(),
            failing: HashSet::new(),
            autoplay_blocked: false,
            stalled: false,
            loads: Vec::new(),
            play_calls: 0,
            seeks: Vec::new(),
        }
    }

    fn looping(&self) -> bool {
        self.source.as_ref().is_some_and(|source| source.looping)
    }

    fn position(&self) -> f64 {
        let played = self
            .playing_since
            .map(|since| since.elapsed().as_secs_f64() * self.rate)
            .unwrap_or(0.0);
        let raw = self.anchor + played;
        match self.duration {
            Some(duration) if self.looping() && duration > 0.0 => raw % duration,
            Some(duration) => raw.min(duration),
            None => raw,
        }
    }

    fn freeze(&mut self) {
        self.anchor = self.position();
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }
}

fn lock(shared: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated output device.
pub struct SimulatedDevice {
    id: DeviceId,
    shared: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    /// Create a device with a fresh identity.
    pub fn new() -> Self {
        Self {
            id: DeviceId::next(),
            shared: Arc::new(Mutex::new(SimState::new())),
        }
    }

    /// Inspection and fault-injection handle sharing this device's state.
    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            id: self.id,
            shared: self.shared.clone(),
        }
    }

    fn schedule_end(&self, state: &mut SimState) {
        state.end_generation = state.end_generation.wrapping_add(1);
        if state.playing_since.is_none() || state.looping() || state.stalled {
            return;
        }
        let Some(duration) = state.duration else {
            return;
        };

        let remaining = ((duration - state.position()).max(0.0) / state.rate).max(0.0);
        // Streams of unknown length never end on their own.
        let Ok(remaining) = Duration::try_from_secs_f64(remaining) else {
            return;
        };
        let generation = state.end_generation;
        let shared = self.shared.clone();
        tokio::spawn(async move {
            sleep(remaining).await;
            let subscription = {
                let mut state = lock(&shared);
                if state.end_generation != generation || state.playing_since.is_none() {
                    return;
                }
                state.anchor = duration;
                state.playing_since = None;
                state.subscription.clone()
            };
            if let Some(subscription) = subscription {
                subscription.emit(DeviceEvent::Ended);
            }
        });
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for SimulatedDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn load(&mut self, source: &MediaSource, subscription: Subscription) {
        let (generation, delay) = {
            let mut state = lock(&self.shared);
            state.source = Some(source.clone());
            state.subscription = Some(subscription);
            state.duration = None;
            state.anchor = 0.0;
            state.playing_since = None;
            state.load_generation = state.load_generation.wrapping_add(1);
            state.end_generation = state.end_generation.wrapping_add(1);
            state.loads.push(source.url.clone());
            (state.load_generation, state.metadata_delay)
        };
        debug!(device = %self.id, url = %source.url, looping = source.looping, "loading source");

        let shared = self.shared.clone();
        let url = source.url.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let (subscription, event) = {
                let mut state = lock(&shared);
                if state.load_generation != generation {
                    return;
                }
                let event = if state.failing.contains(&url) {
                    DeviceEvent::Error {
                        message: format!("cannot decode `{url}`"),
                    }
                } else {
                    let duration = state
                        .durations
                        .get(&url)
                        .copied()
                        .unwrap_or(state.default_duration);
                    state.duration = Some(duration);
                    DeviceEvent::MetadataReady { duration }
                };
                (state.subscription.clone(), event)
            };
            if let Some(subscription) = subscription {
                subscription.emit(event);
            }
        });
    }

    fn detach(&mut self) {
        let mut state = lock(&self.shared);
        state.subscription = None;
        state.end_generation = state.end_generation.wrapping_add(1);
    }

    fn play(&mut self) -> Result<(), MediaError> {
        let mut state = lock(&self.shared);
        if state.source.is_none() {
            return Err(MediaError::NoSource);
        }
        if state.autoplay_blocked {
            return Err(MediaError::AutoplayBlocked);
        }
        state.play_calls += 1;
        if state.playing_since.is_none() {
            state.playing_since = Some(Instant::now());
        }
        self.schedule_end(&mut state);
        Ok(())
    }

    fn pause(&mut self) {
        let mut state = lock(&self.shared);
        state.anchor = state.position();
        state.playing_since = None;
        state.end_generation = state.end_generation.wrapping_add(1);
    }

    fn is_paused(&self) -> bool {
        lock(&self.shared).playing_since.is_none()
    }

    fn seek(&mut self, position: f64) {
        let mut state = lock(&self.shared);
        let mut position = position.max(0.0);
        if let Some(duration) = state.duration {
            position = position.min(duration);
        }
        state.anchor = position;
        if state.playing_since.is_some() {
            state.playing_since = Some(Instant::now());
        }
        state.seeks.push(position);
        self.schedule_end(&mut state);
    }

    fn position(&self) -> f64 {
        lock(&self.shared).position()
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.shared).duration
    }

    fn set_volume(&mut self, volume: f64) {
        lock(&self.shared).volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f64 {
        lock(&self.shared).volume
    }

    fn set_rate(&mut self, rate: f64) {
        let mut state = lock(&self.shared);
        if !(rate.is_finite() && rate > 0.0) || state.rate == rate {
            return;
        }
        state.freeze();
        state.rate = rate;
        self.schedule_end(&mut state);
    }

    fn rate(&self) -> f64 {
        lock(&self.shared).rate
    }

    fn set_muted(&mut self, muted: bool) {
        lock(&self.shared).muted = muted;
    }
}

/// Shared view over a [`SimulatedDevice`] for inspection and fault injection.
#[derive(Clone)]
pub struct SimulatedHandle {
    id: DeviceId,
    shared: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    /// Identity of the underlying device.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Report `duration` seconds for `url`.
    pub fn set_duration(&self, url: impl Into<String>, duration: f64) {
        lock(&self.shared).durations.insert(url.into(), duration);
    }

    /// Report `duration` seconds for sources without an explicit entry.
    pub fn set_default_duration(&self, duration: f64) {
        lock(&self.shared).default_duration = duration;
    }

    /// Delay between load and metadata.
    pub fn set_metadata_delay(&self, delay: Duration) {
        lock(&self.shared).metadata_delay = delay;
    }

    /// Make every later load of `url` fail.
    pub fn fail_url(&self, url: impl Into<String>) {
        lock(&self.shared).failing.insert(url.into());
    }

    /// Refuse `play` with [`MediaError::AutoplayBlocked`] while set.
    pub fn block_autoplay(&self, blocked: bool) {
        lock(&self.shared).autoplay_blocked = blocked;
    }

    /// Never raise `Ended` while set, as a hung decoder would.
    pub fn stall(&self, stalled: bool) {
        lock(&self.shared).stalled = stalled;
    }

    /// Whether the device is paused.
    pub fn is_paused(&self) -> bool {
        lock(&self.shared).playing_since.is_none()
    }

    /// Current play head.
    pub fn position(&self) -> f64 {
        lock(&self.shared).position()
    }

    /// Current volume.
    pub fn volume(&self) -> f64 {
        lock(&self.shared).volume
    }

    /// Current playback speed.
    pub fn rate(&self) -> f64 {
        lock(&self.shared).rate
    }

    /// Whether the device is muted.
    pub fn is_muted(&self) -> bool {
        lock(&self.shared).muted
    }

    /// Source currently loaded.
    pub fn current_url(&self) -> Option<String> {
        lock(&self.shared)
            .source
            .as_ref()
            .map(|source| source.url.clone())
    }

    /// Every url loaded so far, in order.
    pub fn loads(&self) -> Vec<String> {
        lock(&self.shared).loads.clone()
    }

    /// Number of successful `play` calls.
    pub fn play_calls(&self) -> usize {
        lock(&self.shared).play_calls
    }

    /// Every seek target so far, in order.
    pub fn seeks(&self) -> Vec<f64> {
        lock(&self.shared).seeks.clone()
    }

    /// Whether a subscription is attached.
    pub fn is_subscribed(&self) -> bool {
        lock(&self.shared).subscription.is_some()
    }

    /// Raise `Ended` right now, as if the clip had finished.
    pub fn finish(&self) {
        let subscription = {
            let mut state = lock(&self.shared);
            if let Some(duration) = state.duration {
                state.anchor = duration;
            }
            state.playing_since = None;
            state.end_generation = state.end_generation.wrapping_add(1);
            state.subscription.clone()
        };
        if let Some(subscription) = subscription {
            subscription.emit(DeviceEvent::Ended);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::audio::device::TrackToken;

    fn subscription(tx: mpsc::UnboundedSender<(TrackToken, DeviceEvent)>, token: u64) -> Subscription {
        Subscription::new(
            TrackToken(token),
            Arc::new(move |token, event| {
                let _ = tx.send((token, event));
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn reports_metadata_then_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut device = SimulatedDevice::new();
        let handle = device.handle();
        handle.set_duration("/a.mp3", 2.0);

        device.load(&MediaSource::one_shot("/a.mp3"), subscription(tx, 1));
        let (token, event) = rx.recv().await.unwrap();
        assert_eq!(token, TrackToken(1));
        assert_eq!(event, DeviceEvent::MetadataReady { duration: 2.0 });

        device.play().unwrap();
        let (_, event) = rx.recv().await.unwrap();
        assert_eq!(event, DeviceEvent::Ended);
        assert!(handle.is_paused());
        assert_eq!(handle.position(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_device_stays_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut device = SimulatedDevice::new();
        device.load(&MediaSource::one_shot("/a.mp3"), subscription(tx.clone(), 1));
        device.play().unwrap();
        device.detach();

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(outcome.is_err(), "no event after detach, got {outcome:?}");
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_block_refuses_play() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut device = SimulatedDevice::new();
        device.handle().block_autoplay(true);
        device.load(&MediaSource::one_shot("/a.mp3"), subscription(tx, 1));
        assert_eq!(device.play(), Err(MediaError::AutoplayBlocked));
        assert!(device.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn looping_position_wraps() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut device = SimulatedDevice::new();
        device.handle().set_duration("/bg.mp3", 10.0);
        device.load(&MediaSource::looping("/bg.mp3"), subscription(tx, 1));
        rx.recv().await.unwrap();

        device.seek(8.0);
        device.play().unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        let position = device.position();
        assert!((position - 2.0).abs() < 1e-6, "position was {position}");
    }
}
