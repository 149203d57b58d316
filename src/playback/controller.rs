//! One playback slot: a device, its state machine and its timers.
//!
//! The controller never decides *what* to play. The sync engine loads tracks,
//! forwards device events and timer firings through [`PlaybackController::handle`],
//! and reacts to the returned [`ControllerOutcome`].

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        device::{AudioDevice, DeviceEvent, DeviceId, MediaSource, Subscription, TrackToken},
        drift::{StartPosition, start_position},
        fader::Fadeable,
    },
    dto::snapshot::Number,
    error::MediaError,
    playback::state_machine::{InvalidTransition, PlaybackEvent, PlaybackPhase, PlaybackStateMachine},
    timer::{Timer, TimerTicket},
};

/// Which physical output a controller owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Looping background music.
    Background,
    /// Number and special announcements.
    Call,
}

/// Message routed back to the owning controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotEventKind {
    /// Event raised by the device for a given track.
    Device {
        /// Track the event belongs to.
        token: TrackToken,
        /// What happened.
        event: DeviceEvent,
    },
    /// The safety deadline of a one-shot track elapsed.
    SafetyTimeout(TimerTicket),
    /// A failed background track may be reloaded.
    Recovery(TimerTicket),
}

/// A [`SlotEventKind`] tagged with its slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotEvent {
    /// Destination slot.
    pub slot: Slot,
    /// Payload.
    pub kind: SlotEventKind,
}

/// Where a new track should begin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StartAt {
    /// From zero.
    Beginning,
    /// As if it had been playing for this many media seconds.
    Elapsed(f64),
}

/// Request to load a track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    /// Announcement the track belongs to.
    pub play_id: u64,
    /// Number being announced, if any.
    pub number: Option<Number>,
    /// What to play.
    pub source: MediaSource,
    /// Initial position.
    pub start_at: StartAt,
}

/// A loaded track.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Subscription identity.
    pub token: TrackToken,
    /// Announcement the track belongs to.
    pub play_id: u64,
    /// Number being announced, if any.
    pub number: Option<Number>,
    /// What is playing.
    pub source: MediaSource,
    /// Requested initial position.
    pub start_at: StartAt,
}

/// Why a track left its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Played to the end, or its time was already over on arrival.
    Ended,
    /// The device failed to load or play it.
    Errored,
    /// Neither end nor error arrived before the safety deadline.
    TimedOut,
    /// The user skipped it.
    Skipped,
    /// The server moved on while it still had a long way to go.
    ForcedStop,
    /// A newer announcement replaced it.
    Superseded,
}

/// Result of finalizing a track; produced exactly once per track.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    /// The track that left the slot.
    pub track: Track,
    /// Why it left.
    pub reason: FinishReason,
}

/// What the engine has to react to after feeding the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerOutcome {
    /// Nothing changed that the engine must know about.
    Nothing,
    /// Audio started or resumed.
    Started,
    /// Metadata arrived while held; the track waits paused.
    Held,
    /// Playback needs a user gesture; call [`PlaybackController::confirm_gesture`].
    ResumeRequired,
    /// The track finished.
    Finalized(Finalized),
    /// The failed background source may be reloaded now.
    RecoveryDue(MediaSource),
}

/// Timing knobs of a controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    /// Extra time granted past the expected end before a track is forced out.
    pub safety_buffer: Duration,
    /// Delay before a failed looping source is offered for reload; `None` disables recovery.
    pub recovery_delay: Option<Duration>,
}

/// Owns one device and everything scheduled for it.
pub struct PlaybackController {
    slot: Slot,
    device: Box<dyn AudioDevice>,
    machine: PlaybackStateMachine,
    track: Option<Track>,
    next_token: u64,
    held: bool,
    settings: ControllerSettings,
    safety: Timer,
    recovery: Timer,
    recovery_source: Option<MediaSource>,
    events: mpsc::UnboundedSender<SlotEvent>,
}

impl PlaybackController {
    /// Take ownership of `device` for `slot`; events are posted to `events`.
    pub fn new(
        slot: Slot,
        device: Box<dyn AudioDevice>,
        settings: ControllerSettings,
        events: mpsc::UnboundedSender<SlotEvent>,
    ) -> Self {
        Self {
            slot,
            device,
            machine: PlaybackStateMachine::new(),
            track: None,
            next_token: 0,
            held: false,
            settings,
            safety: Timer::new(),
            recovery: Timer::new(),
            recovery_source: None,
            events,
        }
    }

    /// Slot this controller owns.
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Current phase.
    pub fn phase(&self) -> PlaybackPhase {
        self.machine.phase()
    }

    /// Loaded track, if any.
    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    /// Whether a track occupies the slot.
    pub fn is_busy(&self) -> bool {
        self.track.is_some()
    }

    /// Whether the authoritative pause is holding this slot.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Load a new track, finalizing the previous one as superseded.
    pub fn load(&mut self, request: TrackRequest) -> Result<Option<Finalized>, InvalidTransition> {
        let superseded = self.finalize(FinishReason::Superseded);
        self.recovery.cancel();
        self.recovery_source = None;

        self.next_token = self.next_token.wrapping_add(1);
        let token = TrackToken(self.next_token);
        let events = self.events.clone();
        let slot = self.slot;
        let subscription = Subscription::new(
            token,
            Arc::new(move |token, event| {
                let _ = events.send(SlotEvent {
                    slot,
                    kind: SlotEventKind::Device { token, event },
                });
            }),
        );

        self.machine.apply(PlaybackEvent::Load)?;
        self.device.load(&request.source, subscription);
        debug!(slot = ?self.slot, play_id = request.play_id, url = %request.source.url, "track loading");
        self.track = Some(Track {
            token,
            play_id: request.play_id,
            number: request.number,
            source: request.source,
            start_at: request.start_at,
        });

        Ok(superseded)
    }

    /// Feed a device event or timer firing.
    pub fn handle(&mut self, kind: SlotEventKind) -> Result<ControllerOutcome, InvalidTransition> {
        match kind {
            SlotEventKind::Device { token, event } => {
                if self.track.as_ref().map(|track| track.token) != Some(token) {
                    debug!(slot = ?self.slot, ?token, "dropping event of a released track");
                    return Ok(ControllerOutcome::Nothing);
                }
                match event {
                    DeviceEvent::MetadataReady { duration } => self.on_metadata(duration),
                    DeviceEvent::Ended => {
                        if self.track.as_ref().is_some_and(|track| track.source.looping) {
                            return Ok(ControllerOutcome::Nothing);
                        }
                        Ok(self.finalized(FinishReason::Ended))
                    }
                    DeviceEvent::Error { message } => {
                        warn!(slot = ?self.slot, error = %message, "device reported an error");
                        self.device.pause();
                        Ok(self.finalized(FinishReason::Errored))
                    }
                }
            }
            SlotEventKind::SafetyTimeout(ticket) => {
                if !self.safety.accept(ticket) {
                    return Ok(ControllerOutcome::Nothing);
                }
                warn!(slot = ?self.slot, "track overran its safety deadline; forcing it out");
                self.device.pause();
                Ok(self.finalized(FinishReason::TimedOut))
            }
            SlotEventKind::Recovery(ticket) => {
                if !self.recovery.accept(ticket) {
                    return Ok(ControllerOutcome::Nothing);
                }
                Ok(self
                    .recovery_source
                    .take()
                    .map(ControllerOutcome::RecoveryDue)
                    .unwrap_or(ControllerOutcome::Nothing))
            }
        }
    }

    /// Apply the authoritative pause flag, resuming a held track when released.
    pub fn set_hold(&mut self, held: bool) -> Result<ControllerOutcome, InvalidTransition> {
        self.held = held;
        if held {
            match self.machine.phase() {
                PlaybackPhase::Playing | PlaybackPhase::AwaitingGesture => {
                    self.device.pause();
                    self.safety.cancel();
                    self.machine.apply(PlaybackEvent::Pause)?;
                }
                _ => {}
            }
            return Ok(ControllerOutcome::Nothing);
        }

        if self.machine.phase() == PlaybackPhase::Paused {
            return self.start(PlaybackEvent::Resume);
        }
        Ok(ControllerOutcome::Nothing)
    }

    /// Whether a failed looping source is waiting to be offered again.
    pub fn is_recovering(&self) -> bool {
        self.recovery_source.is_some()
    }

    /// Give up on reloading a failed looping source.
    pub fn cancel_recovery(&mut self) {
        self.recovery.cancel();
        self.recovery_source = None;
    }

    /// Forget the pause flag without resuming the current track.
    pub fn clear_hold(&mut self) {
        self.held = false;
    }

    /// Retry a start refused for lack of a user gesture.
    pub fn confirm_gesture(&mut self) -> Result<ControllerOutcome, InvalidTransition> {
        if self.machine.phase() != PlaybackPhase::AwaitingGesture || self.held {
            return Ok(ControllerOutcome::Nothing);
        }
        self.start(PlaybackEvent::Start)
    }

    /// Stop the current track on user request.
    pub fn skip(&mut self) -> Option<Finalized> {
        self.stop(FinishReason::Skipped)
    }

    /// Stop the current track for `reason`.
    pub fn stop(&mut self, reason: FinishReason) -> Option<Finalized> {
        if self.track.is_some() {
            self.device.pause();
        }
        self.finalize(reason)
    }

    /// Jump to `position` in media seconds.
    pub fn seek(&mut self, position: f64) {
        self.device.seek(position);
    }

    /// Current position in media seconds.
    pub fn position(&self) -> f64 {
        self.device.position()
    }

    /// Duration of the loaded source, once known.
    pub fn duration(&self) -> Option<f64> {
        self.track.as_ref().and(self.device.duration())
    }

    /// Wall-clock seconds left before the loaded one-shot track ends.
    pub fn remaining(&self) -> Option<f64> {
        let duration = self.duration()?;
        Some((duration - self.position()).max(0.0) / self.device.rate())
    }

    /// Set the output volume directly.
    pub fn set_volume(&mut self, volume: f64) {
        self.device.set_volume(volume.clamp(0.0, 1.0));
    }

    /// Current output volume.
    pub fn volume(&self) -> f64 {
        self.device.volume()
    }

    /// Change the playback speed, moving the safety deadline with it.
    pub fn set_rate(&mut self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) || self.device.rate() == rate {
            return;
        }
        self.device.set_rate(rate);
        if self.machine.phase() == PlaybackPhase::Playing {
            self.arm_safety();
        }
    }

    /// Mute or unmute the device locally.
    pub fn set_muted(&mut self, muted: bool) {
        self.device.set_muted(muted);
    }

    fn on_metadata(&mut self, duration: f64) -> Result<ControllerOutcome, InvalidTransition> {
        if self.machine.phase() != PlaybackPhase::Loading {
            return Ok(ControllerOutcome::Nothing);
        }
        let Some(track) = self.track.as_ref() else {
            return Ok(ControllerOutcome::Nothing);
        };

        let looping = track.source.looping;
        let position = match track.start_at {
            StartAt::Beginning => 0.0,
            StartAt::Elapsed(elapsed) => match start_position(elapsed, duration, looping) {
                StartPosition::Seek(position) => position,
                StartPosition::Finished => {
                    info!(slot = ?self.slot, elapsed, duration, "track already over on arrival; not replaying");
                    self.device.seek(duration);
                    return Ok(self.finalized(FinishReason::Ended));
                }
            },
        };
        self.device.seek(position);

        if self.held {
            self.machine.apply(PlaybackEvent::Pause)?;
            return Ok(ControllerOutcome::Held);
        }
        self.start(PlaybackEvent::Start)
    }

    fn start(&mut self, event: PlaybackEvent) -> Result<ControllerOutcome, InvalidTransition> {
        match self.device.play() {
            Ok(()) => {
                self.machine.apply(event)?;
                self.arm_safety();
                Ok(ControllerOutcome::Started)
            }
            // A retry refused again after the gesture falls through to the failure arm.
            Err(MediaError::AutoplayBlocked) if self.machine.phase() != PlaybackPhase::AwaitingGesture => {
                self.machine.apply(PlaybackEvent::Blocked)?;
                info!(slot = ?self.slot, "playback blocked; waiting for a user gesture");
                Ok(ControllerOutcome::ResumeRequired)
            }
            Err(err) => {
                warn!(slot = ?self.slot, error = %err, "failed to start playback");
                self.device.pause();
                Ok(self.finalized(FinishReason::Errored))
            }
        }
    }

    fn arm_safety(&mut self) {
        let Some(track) = self.track.as_ref() else {
            return;
        };
        if track.source.looping {
            return;
        }
        let Some(remaining) = self.remaining() else {
            return;
        };
        let Ok(remaining) = Duration::try_from_secs_f64(remaining) else {
            warn!(slot = ?self.slot, remaining, "track length unknown; no safety deadline");
            self.safety.cancel();
            return;
        };
        let delay = remaining + self.settings.safety_buffer;
        let slot = self.slot;
        self.safety.arm(delay, &self.events, move |ticket| SlotEvent {
            slot,
            kind: SlotEventKind::SafetyTimeout(ticket),
        });
    }

    fn finalized(&mut self, reason: FinishReason) -> ControllerOutcome {
        self.finalize(reason)
            .map(ControllerOutcome::Finalized)
            .unwrap_or(ControllerOutcome::Nothing)
    }

    /// Tear the track down. Idempotent: only the first call yields a result.
    fn finalize(&mut self, reason: FinishReason) -> Option<Finalized> {
        let track = self.track.take()?;
        self.safety.cancel();
        self.device.detach();

        let event = if reason == FinishReason::Errored {
            PlaybackEvent::Fail
        } else {
            PlaybackEvent::End
        };
        if let Err(err) = self
            .machine
            .apply(event)
            .and_then(|_| self.machine.apply(PlaybackEvent::Release))
        {
            warn!(slot = ?self.slot, error = %err, "playback state out of sync; resetting");
            self.machine.reset();
        }

        if reason == FinishReason::Errored && track.source.looping {
            if let Some(delay) = self.settings.recovery_delay {
                let slot = self.slot;
                self.recovery_source = Some(track.source.clone());
                self.recovery.arm(delay, &self.events, move |ticket| SlotEvent {
                    slot,
                    kind: SlotEventKind::Recovery(ticket),
                });
            }
        }

        debug!(slot = ?self.slot, play_id = track.play_id, ?reason, "track finalized");
        Some(Finalized { track, reason })
    }
}

impl Fadeable for PlaybackController {
    fn device_id(&self) -> DeviceId {
        self.device.id()
    }

    fn volume(&self) -> f64 {
        self.device.volume()
    }

    fn set_volume(&mut self, volume: f64) {
        self.device.set_volume(volume.clamp(0.0, 1.0));
    }

    fn ensure_playing(&mut self) {
        if self.held || self.machine.phase() != PlaybackPhase::Paused {
            return;
        }
        match self.device.play() {
            Ok(()) => {
                if let Err(err) = self.machine.apply(PlaybackEvent::Resume) {
                    warn!(slot = ?self.slot, error = %err, "resume before fade rejected");
                }
                self.arm_safety();
            }
            Err(err) => debug!(slot = ?self.slot, error = %err, "could not resume before fade"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::simulated::{SimulatedDevice, SimulatedHandle};

    const CLIP: &str = "/sounds/numbers/42.mp3";

    fn controller(slot: Slot) -> (PlaybackController, SimulatedHandle, mpsc::UnboundedReceiver<SlotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let device = SimulatedDevice::new();
        let handle = device.handle();
        let settings = ControllerSettings {
            safety_buffer: Duration::from_secs(10),
            recovery_delay: Some(Duration::from_secs(5)),
        };
        (PlaybackController::new(slot, Box::new(device), settings, tx), handle, rx)
    }

    fn call_request(start_at: StartAt) -> TrackRequest {
        TrackRequest {
            play_id: 1,
            number: Number::new(42).ok(),
            source: MediaSource::one_shot(CLIP),
            start_at,
        }
    }

    async fn next(
        controller: &mut PlaybackController,
        rx: &mut mpsc::UnboundedReceiver<SlotEvent>,
    ) -> ControllerOutcome {
        let event = rx.recv().await.unwrap();
        controller.handle(event.kind).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn plays_to_the_end_and_finalizes_once() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        handle.set_duration(CLIP, 5.0);

        assert_eq!(controller.load(call_request(StartAt::Beginning)).unwrap(), None);
        assert_eq!(controller.phase(), PlaybackPhase::Loading);
        assert_eq!(next(&mut controller, &mut rx).await, ControllerOutcome::Started);
        assert_eq!(controller.phase(), PlaybackPhase::Playing);

        match next(&mut controller, &mut rx).await {
            ControllerOutcome::Finalized(finalized) => {
                assert_eq!(finalized.reason, FinishReason::Ended);
                assert_eq!(finalized.track.play_id, 1);
            }
            other => panic!("expected finalize, got {other:?}"),
        }
        assert_eq!(controller.phase(), PlaybackPhase::Idle);
        assert_eq!(controller.stop(FinishReason::ForcedStop), None);
        assert!(!handle.is_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn late_join_seeks_to_elapsed_media_time() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        handle.set_duration(CLIP, 60.0);

        controller.load(call_request(StartAt::Elapsed(12.0))).unwrap();
        assert_eq!(next(&mut controller, &mut rx).await, ControllerOutcome::Started);
        assert_eq!(handle.seeks(), vec![12.0]);
        assert!((controller.remaining().unwrap() - 48.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_one_shot_is_not_replayed() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        handle.set_duration(CLIP, 3.0);

        controller.load(call_request(StartAt::Elapsed(7.0))).unwrap();
        match next(&mut controller, &mut rx).await {
            ControllerOutcome::Finalized(finalized) => assert_eq!(finalized.reason, FinishReason::Ended),
            other => panic!("expected finalize, got {other:?}"),
        }
        assert_eq!(handle.play_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn safety_timeout_forces_a_stalled_track_out() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        handle.set_duration(CLIP, 2.0);
        handle.stall(true);

        controller.load(call_request(StartAt::Beginning)).unwrap();
        assert_eq!(next(&mut controller, &mut rx).await, ControllerOutcome::Started);

        let started = tokio::time::Instant::now();
        match next(&mut controller, &mut rx).await {
            ControllerOutcome::Finalized(finalized) => assert_eq!(finalized.reason, FinishReason::TimedOut),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(12));
        assert!(handle.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn skip_finalizes_and_ignores_late_end() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        handle.set_duration(CLIP, 60.0);
        controller.load(call_request(StartAt::Beginning)).unwrap();
        next(&mut controller, &mut rx).await;

        let skipped = controller.skip().unwrap();
        assert_eq!(skipped.reason, FinishReason::Skipped);
        assert_eq!(skipped.track.number, Number::new(42).ok());
        assert!(handle.is_paused());

        handle.finish();
        let late = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(late.is_err(), "detached device must stay silent");
        assert_eq!(controller.skip(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_block_waits_for_gesture() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        handle.set_duration(CLIP, 5.0);
        handle.block_autoplay(true);

        controller.load(call_request(StartAt::Beginning)).unwrap();
        assert_eq!(next(&mut controller, &mut rx).await, ControllerOutcome::ResumeRequired);
        assert_eq!(controller.phase(), PlaybackPhase::AwaitingGesture);
        assert!(controller.is_busy());

        handle.block_autoplay(false);
        assert_eq!(controller.confirm_gesture().unwrap(), ControllerOutcome::Started);
        assert_eq!(controller.phase(), PlaybackPhase::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_retry_after_gesture_finalizes_as_error() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        handle.set_duration(CLIP, 5.0);
        handle.block_autoplay(true);

        controller.load(call_request(StartAt::Beginning)).unwrap();
        assert_eq!(next(&mut controller, &mut rx).await, ControllerOutcome::ResumeRequired);

        match controller.confirm_gesture().unwrap() {
            ControllerOutcome::Finalized(finalized) => {
                assert_eq!(finalized.reason, FinishReason::Errored);
                assert_eq!(finalized.track.number, Number::new(42).ok());
            }
            other => panic!("expected finalize, got {other:?}"),
        }
        assert_eq!(controller.phase(), PlaybackPhase::Idle);
        assert!(!controller.is_busy());
        assert_eq!(controller.confirm_gesture().unwrap(), ControllerOutcome::Nothing);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_track_plays_without_safety_deadline() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        handle.set_duration(CLIP, f64::INFINITY);

        controller.load(call_request(StartAt::Beginning)).unwrap();
        assert_eq!(next(&mut controller, &mut rx).await, ControllerOutcome::Started);
        assert_eq!(controller.phase(), PlaybackPhase::Playing);

        let quiet = tokio::time::timeout(Duration::from_secs(600), rx.recv()).await;
        assert!(quiet.is_err(), "no timeout or end expected, got {quiet:?}");
        assert!(controller.is_busy());

        controller.set_rate(1.5);
        assert_eq!(controller.skip().map(|finalized| finalized.reason), Some(FinishReason::Skipped));
    }

    #[tokio::test(start_paused = true)]
    async fn hold_pauses_and_release_resumes() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        handle.set_duration(CLIP, 30.0);
        controller.load(call_request(StartAt::Beginning)).unwrap();
        next(&mut controller, &mut rx).await;

        controller.set_hold(true).unwrap();
        assert_eq!(controller.phase(), PlaybackPhase::Paused);
        assert!(handle.is_paused());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(controller.is_busy(), "safety deadline must not run while held");

        assert_eq!(controller.set_hold(false).unwrap(), ControllerOutcome::Started);
        assert!(!handle.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_while_held_stays_paused() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        controller.set_hold(true).unwrap();
        controller.load(call_request(StartAt::Beginning)).unwrap();

        assert_eq!(next(&mut controller, &mut rx).await, ControllerOutcome::Held);
        assert_eq!(controller.phase(), PlaybackPhase::Paused);
        assert_eq!(handle.play_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loading_supersedes_the_previous_track() {
        let (mut controller, handle, mut rx) = controller(Slot::Call);
        handle.set_duration(CLIP, 30.0);
        controller.load(call_request(StartAt::Beginning)).unwrap();
        next(&mut controller, &mut rx).await;

        let mut second = call_request(StartAt::Beginning);
        second.play_id = 2;
        let superseded = controller.load(second).unwrap().unwrap();
        assert_eq!(superseded.reason, FinishReason::Superseded);
        assert_eq!(superseded.track.play_id, 1);
        assert_eq!(controller.track().map(|track| track.play_id), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_background_is_offered_for_recovery() {
        let (mut controller, handle, mut rx) = controller(Slot::Background);
        handle.fail_url("/sounds/bg.mp3");

        controller
            .load(TrackRequest {
                play_id: 0,
                number: None,
                source: MediaSource::looping("/sounds/bg.mp3"),
                start_at: StartAt::Beginning,
            })
            .unwrap();

        match next(&mut controller, &mut rx).await {
            ControllerOutcome::Finalized(finalized) => assert_eq!(finalized.reason, FinishReason::Errored),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(
            next(&mut controller, &mut rx).await,
            ControllerOutcome::RecoveryDue(MediaSource::looping("/sounds/bg.mp3"))
        );
    }
}
