//! Local audio output: device abstraction, drift math and volume fades.

pub mod device;
pub mod drift;
pub mod fader;
pub mod simulated;

pub use self::device::{AudioDevice, DeviceEvent, DeviceId, MediaSource, Subscription, TrackToken};
pub use self::drift::DriftCorrector;
pub use self::fader::{Fadeable, FadeTick, VolumeFader};
pub use self::simulated::{SimulatedDevice, SimulatedHandle};
