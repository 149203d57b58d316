//! Audio device abstraction driven by the playback controllers.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::error::MediaError;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a physical output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        Self(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device-{}", self.0)
    }
}

/// Identity of one loaded track; events carrying an older token are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackToken(pub(crate) u64);

/// Notifications raised by a device for the currently loaded source.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Duration is known and the source can be positioned.
    MetadataReady {
        /// Length of the source in media seconds.
        duration: f64,
    },
    /// Playback reached the end of a one-shot source.
    Ended,
    /// The source failed to load or decode.
    Error {
        /// Device-specific description.
        message: String,
    },
}

/// What to play and whether it loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    /// Location of the clip.
    pub url: String,
    /// Whether the device restarts the clip when it ends.
    pub looping: bool,
}

impl MediaSource {
    /// A clip played once.
    pub fn one_shot(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            looping: false,
        }
    }

    /// A clip repeated forever.
    pub fn looping(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            looping: true,
        }
    }
}

/// Callback receiving device events tagged with the track they belong to.
pub type EventSink = Arc<dyn Fn(TrackToken, DeviceEvent) + Send + Sync>;

/// Per-track event subscription handed to a device on load.
///
/// Devices drop the subscription on [`AudioDevice::detach`] or on the next
/// load, so a track can never fire into its successor.
#[derive(Clone)]
pub struct Subscription {
    token: TrackToken,
    sink: EventSink,
}

impl Subscription {
    /// Bind `sink` to the track identified by `token`.
    pub fn new(token: TrackToken, sink: EventSink) -> Self {
        Self { token, sink }
    }

    /// Track this subscription belongs to.
    pub fn token(&self) -> TrackToken {
        self.token
    }

    /// Deliver an event for the subscribed track.
    pub fn emit(&self, event: DeviceEvent) {
        (self.sink)(self.token, event);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// A local output capable of playing one source at a time.
///
/// Positions and durations are media seconds. Volumes are linear in `[0,1]`.
pub trait AudioDevice: Send {
    /// Stable identity of the device.
    fn id(&self) -> DeviceId;
    /// Replace the current source; events for it go to `subscription`.
    fn load(&mut self, source: &MediaSource, subscription: Subscription);
    /// Revoke the current subscription without unloading.
    fn detach(&mut self);
    /// Start or resume playback.
    fn play(&mut self) -> Result<(), MediaError>;
    /// Pause playback, keeping the position.
    fn pause(&mut self);
    /// Whether the device is paused.
    fn is_paused(&self) -> bool;
    /// Jump to `position`.
    fn seek(&mut self, position: f64);
    /// Current playback position.
    fn position(&self) -> f64;
    /// Source length, once metadata is available.
    fn duration(&self) -> Option<f64>;
    /// Set the output volume.
    fn set_volume(&mut self, volume: f64);
    /// Current output volume.
    fn volume(&self) -> f64;
    /// Set the playback speed.
    fn set_rate(&mut self, rate: f64);
    /// Current playback speed.
    fn rate(&self) -> f64;
    /// Silence the device without touching its volume.
    fn set_muted(&mut self, muted: bool);
}
