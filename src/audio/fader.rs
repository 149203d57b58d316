//! Stepped volume ramps, at most one per device.
//!
//! A fade is a spawned ticker that posts [`FadeTick`]s to the owning actor;
//! the actor applies each step through [`VolumeFader::on_tick`]. Starting a new
//! fade on the same device aborts the ticker and drops the old completion.

use std::{collections::HashMap, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle, time::sleep};

use crate::audio::device::DeviceId;

/// Number of volume steps in every fade.
pub const FADE_STEPS: u32 = 20;
/// Differences smaller than this snap straight to the target.
pub const SNAP_EPSILON: f64 = 0.01;

/// Something whose volume can be ramped.
pub trait Fadeable {
    /// Identity used to key the active fade.
    fn device_id(&self) -> DeviceId;
    /// Current volume.
    fn volume(&self) -> f64;
    /// Apply a volume.
    fn set_volume(&mut self, volume: f64);
    /// Resume output before fading up, if nothing holds it paused.
    fn ensure_playing(&mut self);
}

/// One step of an active fade, posted by its ticker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeTick {
    device: DeviceId,
    fade: u64,
}

struct ActiveFade<C> {
    id: u64,
    from: f64,
    to: f64,
    step: u32,
    completion: Option<C>,
    ticker: JoinHandle<()>,
}

impl<C> Drop for ActiveFade<C> {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

/// Drives volume fades and hands back each fade's completion value `C` once.
pub struct VolumeFader<C> {
    ticks: mpsc::UnboundedSender<FadeTick>,
    fades: HashMap<DeviceId, ActiveFade<C>>,
    next_id: u64,
}

impl<C> VolumeFader<C> {
    /// Create a fader whose tickers post to `ticks`.
    pub fn new(ticks: mpsc::UnboundedSender<FadeTick>) -> Self {
        Self {
            ticks,
            fades: HashMap::new(),
            next_id: 0,
        }
    }

    /// Ramp `target` to `volume` over `duration`.
    ///
    /// Returns the completion immediately when the change is below
    /// [`SNAP_EPSILON`] or `duration` is zero; otherwise it is returned by the
    /// final [`VolumeFader::on_tick`]. Any fade already running on the device
    /// is superseded and its completion is dropped.
    pub fn fade<T>(&mut self, target: &mut T, volume: f64, duration: Duration, completion: C) -> Option<C>
    where
        T: Fadeable + ?Sized,
    {
        let device = target.device_id();
        let to = volume.clamp(0.0, 1.0);
        self.cancel(device);

        if to > 0.0 {
            target.ensure_playing();
        }

        let from = target.volume();
        if (to - from).abs() < SNAP_EPSILON || duration.is_zero() {
            target.set_volume(to);
            return Some(completion);
        }

        self.next_id = self.next_id.wrapping_add(1);
        let tick = FadeTick {
            device,
            fade: self.next_id,
        };
        let interval = duration / FADE_STEPS;
        let ticks = self.ticks.clone();
        let ticker = tokio::spawn(async move {
            for _ in 0..FADE_STEPS {
                sleep(interval).await;
                if ticks.send(tick).is_err() {
                    break;
                }
            }
        });

        self.fades.insert(
            device,
            ActiveFade {
                id: tick.fade,
                from,
                to,
                step: 0,
                completion: Some(completion),
                ticker,
            },
        );
        None
    }

    /// Apply one step. Returns the completion on the final step of the live fade.
    pub fn on_tick<T>(&mut self, tick: FadeTick, target: &mut T) -> Option<C>
    where
        T: Fadeable + ?Sized,
    {
        if target.device_id() != tick.device {
            return None;
        }
        let fade = self.fades.get_mut(&tick.device)?;
        if fade.id != tick.fade {
            return None;
        }

        fade.step += 1;
        if fade.step < FADE_STEPS {
            let progress = f64::from(fade.step) / f64::from(FADE_STEPS);
            let volume = fade.from + (fade.to - fade.from) * progress;
            target.set_volume(volume.clamp(0.0, 1.0));
            return None;
        }

        let mut finished = self.fades.remove(&tick.device)?;
        target.set_volume(finished.to);
        finished.completion.take()
    }

    /// Whether a fade is running on `device`.
    pub fn is_fading(&self, device: DeviceId) -> bool {
        self.fades.contains_key(&device)
    }

    /// Volume the running fade on `device` is heading to.
    pub fn target(&self, device: DeviceId) -> Option<f64> {
        self.fades.get(&device).map(|fade| fade.to)
    }

    /// Stop the fade on `device` where it is, dropping its completion.
    pub fn cancel(&mut self, device: DeviceId) {
        self.fades.remove(&device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Knob {
        id: DeviceId,
        volume: f64,
        resumed: usize,
    }

    impl Knob {
        fn at(volume: f64) -> Self {
            Self {
                id: DeviceId::next(),
                volume,
                resumed: 0,
            }
        }
    }

    impl Fadeable for Knob {
        fn device_id(&self) -> DeviceId {
            self.id
        }

        fn volume(&self) -> f64 {
            self.volume
        }

        fn set_volume(&mut self, volume: f64) {
            self.volume = volume;
        }

        fn ensure_playing(&mut self) {
            self.resumed += 1;
        }
    }

    async fn drain(
        fader: &mut VolumeFader<&'static str>,
        rx: &mut mpsc::UnboundedReceiver<FadeTick>,
        knob: &mut Knob,
        window: Duration,
    ) -> Vec<&'static str> {
        let mut completions = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(tick)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            if let Some(done) = fader.on_tick(tick, knob) {
                completions.push(done);
            }
        }
        completions
    }

    #[tokio::test(start_paused = true)]
    async fn fade_reaches_target_and_completes_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut fader = VolumeFader::new(tx);
        let mut knob = Knob::at(0.0);

        assert_eq!(fader.fade(&mut knob, 0.8, Duration::from_millis(1000), "in"), None);
        assert!(fader.is_fading(knob.id));
        assert_eq!(fader.target(knob.id), Some(0.8));
        assert_eq!(knob.resumed, 1);

        let completions = drain(&mut fader, &mut rx, &mut knob, Duration::from_secs(3)).await;
        assert_eq!(completions, vec!["in"]);
        assert_eq!(knob.volume, 0.8);
        assert!(!fader.is_fading(knob.id));
    }

    #[tokio::test(start_paused = true)]
    async fn second_fade_supersedes_first() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut fader = VolumeFader::new(tx);
        let mut knob = Knob::at(0.0);

        fader.fade(&mut knob, 0.8, Duration::from_millis(1000), "first");
        let _ = drain(&mut fader, &mut rx, &mut knob, Duration::from_millis(420)).await;
        assert!(knob.volume > 0.0 && knob.volume < 0.8);

        fader.fade(&mut knob, 0.2, Duration::from_millis(500), "second");
        let completions = drain(&mut fader, &mut rx, &mut knob, Duration::from_secs(3)).await;
        assert_eq!(completions, vec!["second"]);
        assert!((knob.volume - 0.2).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_change_snaps_immediately() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut fader = VolumeFader::new(tx);
        let mut knob = Knob::at(0.505);

        assert_eq!(fader.fade(&mut knob, 0.5, Duration::from_secs(1), "snap"), Some("snap"));
        assert_eq!(knob.volume, 0.5);
        assert!(!fader.is_fading(knob.id));
    }

    #[tokio::test(start_paused = true)]
    async fn targets_are_clamped_and_fading_down_does_not_resume() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut fader = VolumeFader::new(tx);
        let mut knob = Knob::at(0.6);

        fader.fade(&mut knob, -0.4, Duration::from_millis(200), "out");
        assert_eq!(knob.resumed, 0);
        let completions = drain(&mut fader, &mut rx, &mut knob, Duration::from_secs(1)).await;
        assert_eq!(completions, vec!["out"]);
        assert_eq!(knob.volume, 0.0);
    }
}
