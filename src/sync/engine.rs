//! The reconciliation actor.
//!
//! One task owns both playback slots, the fader, the queue and every timer.
//! Snapshots are applied one at a time in a fixed step order; device events,
//! fade ticks, alarms and request replies arrive as messages on the same loop.

use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    audio::{AudioDevice, DriftCorrector, Fadeable, FadeTick, MediaSource, VolumeFader, drift::DEFAULT_DRIFT_THRESHOLD},
    client::GameApi,
    dto::{
        requests::{Ack, CallRequest, SpecialRequest},
        snapshot::{AudioSettings, GameSnapshot, GameStatus, Number},
    },
    error::{SyncError, TransportError, ValidationError},
    playback::{
        ControllerOutcome, ControllerSettings, FinishReason, Finalized, PlaybackController,
        PlaybackPhase, Slot, SlotEvent, StartAt, TrackRequest,
    },
    queue::{DEFAULT_CONTINUATION_DELAY, LocalStorage, MemoryStorage, QueueAlarm, QueueManager},
    sync::{
        board::BoardView,
        context::{ClientRole, PriorityAudioState, SyncContext, background_target},
    },
    timer::{Debounced, Timer, TimerTicket},
};

/// Remaining seconds above which a call is cut when the server has moved on.
pub const DEFAULT_MOVED_ON_THRESHOLD: f64 = 1.0;
/// Quiet period before local volume changes are sent to the server.
pub const DEFAULT_VOLUME_DEBOUNCE: Duration = Duration::from_millis(300);
/// How long a sent call may go unconfirmed by the stream.
pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(60);
/// Delay before a failed background source is reloaded.
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_secs(5);

const BACKGROUND_FADE_IN: Duration = Duration::from_millis(1000);
const BACKGROUND_FADE_OUT: Duration = Duration::from_millis(800);
const RETARGET_FADE: Duration = Duration::from_millis(500);
const DUCK_FADE: Duration = Duration::from_millis(300);
const RESTORE_FADE: Duration = Duration::from_millis(600);
const RETARGET_TOLERANCE: f64 = 0.05;
const RESTORE_RATIO: f64 = 0.8;
const SETTINGS_ECHO_GRACE: Duration = Duration::from_secs(2);

/// Tunables of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Looping background source; no background music when absent.
    pub background_url: Option<String>,
    /// See [`DEFAULT_MOVED_ON_THRESHOLD`].
    pub moved_on_threshold: f64,
    /// Background drift tolerated before a corrective seek, in seconds.
    pub drift_threshold: f64,
    /// Grace period past the expected end of a call.
    pub safety_buffer: Duration,
    /// See [`DEFAULT_RECOVERY_DELAY`]; `None` disables background recovery.
    pub recovery_delay: Option<Duration>,
    /// Delay between two queue items.
    pub continuation_delay: Duration,
    /// See [`DEFAULT_VOLUME_DEBOUNCE`].
    pub volume_debounce: Duration,
    /// See [`DEFAULT_AWAIT_TIMEOUT`].
    pub await_timeout: Duration,
}

impl EngineConfig {
    /// Reference settings for `role`; the caller waits longer before forcing a call out.
    pub fn for_role(role: ClientRole) -> Self {
        let safety_buffer = match role {
            ClientRole::Caller => Duration::from_secs(10),
            ClientRole::Display => Duration::from_secs(5),
        };
        Self {
            background_url: None,
            moved_on_threshold: DEFAULT_MOVED_ON_THRESHOLD,
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
            safety_buffer,
            recovery_delay: Some(DEFAULT_RECOVERY_DELAY),
            continuation_delay: DEFAULT_CONTINUATION_DELAY,
            volume_debounce: DEFAULT_VOLUME_DEBOUNCE,
            await_timeout: DEFAULT_AWAIT_TIMEOUT,
        }
    }
}

/// Everything needed to start an engine.
pub struct EngineSetup {
    /// Tunables.
    pub config: EngineConfig,
    /// Part this client plays.
    pub role: ClientRole,
    /// Server API used for mutations and lookups.
    pub api: Arc<dyn GameApi>,
    /// Device playing background music.
    pub background: Box<dyn AudioDevice>,
    /// Device playing announcements.
    pub call: Box<dyn AudioDevice>,
    /// Durable store for the caller's queue; in-memory when absent.
    pub storage: Option<Box<dyn LocalStorage>>,
}

/// One local change to the shared audio settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeChange {
    /// Background music volume.
    Background(f64),
    /// Announcement volume.
    Call(f64),
    /// Ducking factor.
    Duck(f64),
    /// Announcement playback speed.
    Rate(f64),
}

impl VolumeChange {
    fn apply(self, settings: AudioSettings) -> AudioSettings {
        let changed = match self {
            VolumeChange::Background(value) => AudioSettings {
                bg_volume: value,
                ..settings
            },
            VolumeChange::Call(value) => AudioSettings {
                call_volume: value,
                ..settings
            },
            VolumeChange::Duck(value) => AudioSettings {
                duck_level: value,
                ..settings
            },
            VolumeChange::Rate(value) => AudioSettings {
                playback_rate: value,
                ..settings
            },
        };
        changed.sanitized()
    }
}

/// User-facing events published by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Informational status line.
    Status(String),
    /// Something failed without stopping the engine.
    Warning(String),
    /// Audio is blocked until the user confirms.
    ResumeRequired,
    /// A call or special left the call slot.
    CallFinished {
        /// Number announced, `None` for a special.
        number: Option<Number>,
        /// Announcement identity.
        play_id: u64,
        /// Why it ended.
        reason: FinishReason,
    },
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    /// Part this client plays.
    pub role: ClientRole,
    /// Whether at least one snapshot was applied.
    pub synced: bool,
    /// Last announcement seen.
    pub play_id: Option<u64>,
    /// Server status of the last snapshot.
    pub server_status: Option<GameStatus>,
    /// Authoritative pause flag.
    pub is_paused: bool,
    /// Phase of the call slot.
    pub call_phase: PlaybackPhase,
    /// Phase of the background slot.
    pub background_phase: PlaybackPhase,
    /// Number loaded in the call slot.
    pub playing: Option<Number>,
    /// Pending queue, caller only.
    pub queue: Vec<Number>,
    /// Queue item in flight.
    pub processing: Option<Number>,
    /// A sent call or special has not shown up on the stream yet.
    pub awaiting_confirmation: bool,
    /// Current priority state.
    pub priority: PriorityAudioState,
    /// Effective audio settings.
    pub settings: AudioSettings,
    /// Local mute switch.
    pub locally_muted: bool,
}

type Responder<T> = oneshot::Sender<Result<T, ValidationError>>;

pub(crate) enum Command {
    Enqueue { number: i64, reply: Responder<usize> },
    EnqueueRandom { reply: Responder<Number> },
    Remove { index: usize, reply: Responder<Number> },
    ClearQueue { reply: Responder<()> },
    Skip,
    ConfirmResume,
    TogglePause,
    SetBackgroundMusic(bool),
    PlaySpecial {
        audio_url: String,
        mute_background: bool,
        reply: Responder<()>,
    },
    Reset { reply: Responder<()> },
    AdjustVolume {
        change: VolumeChange,
        reply: Responder<AudioSettings>,
    },
    SetLocalMute(bool),
    Status { reply: oneshot::Sender<EngineStatus> },
    Shutdown,
}

#[derive(Debug)]
enum EngineAlarm {
    VolumeFlush(TimerTicket),
    AwaitTimeout(TimerTicket),
}

#[derive(Debug, Error)]
enum CallFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0}")]
    NotFound(String),
}

#[derive(Debug)]
enum Reply {
    CallAttempt {
        number: Number,
        result: Result<(), CallFailure>,
    },
    Special {
        result: Result<(), TransportError>,
    },
    Mutation {
        what: &'static str,
        result: Result<(), TransportError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Call(Number),
    Special,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterFade {
    Nothing,
    ParkBackground,
}

pub(crate) struct Inbox {
    snapshots: mpsc::Receiver<GameSnapshot>,
    slot_events: mpsc::UnboundedReceiver<SlotEvent>,
    fade_ticks: mpsc::UnboundedReceiver<FadeTick>,
    queue_alarms: mpsc::UnboundedReceiver<QueueAlarm>,
    alarms: mpsc::UnboundedReceiver<EngineAlarm>,
    replies: mpsc::UnboundedReceiver<Reply>,
    commands: mpsc::Receiver<Command>,
}

type Step = fn(&mut SyncEngine, &GameSnapshot) -> Result<(), SyncError>;

/// Client-side reconciliation of server snapshots against two local devices.
pub struct SyncEngine {
    config: EngineConfig,
    context: SyncContext,
    api: Arc<dyn GameApi>,
    background: PlaybackController,
    call: PlaybackController,
    fader: VolumeFader<AfterFade>,
    drift: DriftCorrector,
    queue: Option<QueueManager>,
    last_snapshot: Option<GameSnapshot>,
    last_play_id: Option<u64>,
    newest_server_time: f64,
    server_called: HashSet<Number>,
    local_marks: HashSet<Number>,
    awaiting: Option<Awaiting>,
    awaiting_timer: Timer,
    pending_special_mute: Option<bool>,
    volume_sync: Debounced<AudioSettings>,
    sent_settings: Option<(AudioSettings, Instant)>,
    notices: broadcast::Sender<Notice>,
    alarms: mpsc::UnboundedSender<EngineAlarm>,
    replies: mpsc::UnboundedSender<Reply>,
}

impl SyncEngine {
    pub(crate) fn new(
        setup: EngineSetup,
        context: SyncContext,
        notices: broadcast::Sender<Notice>,
        snapshots: mpsc::Receiver<GameSnapshot>,
        commands: mpsc::Receiver<Command>,
    ) -> (Self, Inbox) {
        let EngineSetup {
            config,
            role,
            api,
            background,
            call,
            storage,
        } = setup;

        let (slot_tx, slot_events) = mpsc::unbounded_channel();
        let (fade_tx, fade_ticks) = mpsc::unbounded_channel();
        let (queue_tx, queue_alarms) = mpsc::unbounded_channel();
        let (alarm_tx, alarms) = mpsc::unbounded_channel();
        let (reply_tx, replies) = mpsc::unbounded_channel();

        let background = PlaybackController::new(
            Slot::Background,
            background,
            ControllerSettings {
                safety_buffer: config.safety_buffer,
                recovery_delay: config.recovery_delay,
            },
            slot_tx.clone(),
        );
        let call = PlaybackController::new(
            Slot::Call,
            call,
            ControllerSettings {
                safety_buffer: config.safety_buffer,
                recovery_delay: None,
            },
            slot_tx,
        );

        let queue = role.is_caller().then(|| {
            let storage = storage.unwrap_or_else(|| Box::new(MemoryStorage::new()));
            QueueManager::restore(storage, config.continuation_delay, queue_tx)
        });

        let engine = Self {
            drift: DriftCorrector::new(config.drift_threshold),
            volume_sync: Debounced::new(config.volume_debounce),
            sent_settings: None,
            config,
            context,
            api,
            background,
            call,
            fader: VolumeFader::new(fade_tx),
            queue,
            last_snapshot: None,
            last_play_id: None,
            newest_server_time: f64::NEG_INFINITY,
            server_called: HashSet::new(),
            local_marks: HashSet::new(),
            awaiting: None,
            awaiting_timer: Timer::new(),
            pending_special_mute: None,
            notices,
            alarms: alarm_tx,
            replies: reply_tx,
        };
        let inbox = Inbox {
            snapshots,
            slot_events,
            fade_ticks,
            queue_alarms,
            alarms,
            replies,
            commands,
        };
        (engine, inbox)
    }

    /// Run until shut down or every handle is gone.
    pub(crate) async fn run(mut self, mut inbox: Inbox) {
        info!(role = %self.context.role(), "sync engine started");
        loop {
            tokio::select! {
                biased;
                Some(snapshot) = inbox.snapshots.recv() => self.apply_snapshot(snapshot),
                Some(event) = inbox.slot_events.recv() => self.on_slot_event(event),
                Some(tick) = inbox.fade_ticks.recv() => self.on_fade_tick(tick),
                Some(alarm) = inbox.queue_alarms.recv() => self.on_queue_alarm(alarm),
                Some(alarm) = inbox.alarms.recv() => self.on_alarm(alarm),
                Some(reply) = inbox.replies.recv() => self.on_reply(reply),
                command = inbox.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }

        self.background.stop(FinishReason::ForcedStop);
        self.call.stop(FinishReason::ForcedStop);
        info!("sync engine stopped");
    }

    fn apply_snapshot(&mut self, snapshot: GameSnapshot) {
        debug!(
            play_id = snapshot.play_id,
            status = ?snapshot.status,
            paused = snapshot.is_paused,
            "applying snapshot"
        );

        let settings = self.effective_settings(snapshot.settings());
        self.context.set_settings(settings);
        self.server_called = snapshot.called_set();
        self.local_marks.retain(|number| !self.server_called.contains(number));
        self.last_snapshot = Some(snapshot.clone());

        let steps: [(&str, Step); 5] = [
            ("pause", Self::reconcile_pause),
            ("background", Self::reconcile_background),
            ("new_call", Self::reconcile_new_call),
            ("moved_on", Self::reconcile_moved_on),
            ("board", Self::publish_board),
        ];
        for (step, run) in steps {
            if let Err(err) = run(self, &snapshot) {
                warn!(step, error = %err, "reconciliation step failed");
            }
        }

        self.newest_server_time = self.newest_server_time.max(snapshot.server_time);
        self.try_process_queue();
    }

    /// Local settings win while a change is pending or not yet echoed by the server.
    fn effective_settings(&mut self, incoming: AudioSettings) -> AudioSettings {
        if let Some(pending) = self.volume_sync.pending() {
            return *pending;
        }
        match self.sent_settings {
            Some((sent, at)) if sent != incoming && at.elapsed() < SETTINGS_ECHO_GRACE => sent,
            _ => {
                self.sent_settings = None;
                incoming
            }
        }
    }

    fn reconcile_pause(&mut self, snapshot: &GameSnapshot) -> Result<(), SyncError> {
        if snapshot.is_paused {
            self.background.set_hold(true)?;
            self.call.set_hold(true)?;
            return Ok(());
        }

        let outcome = self.background.set_hold(false)?;
        self.handle_outcome(Slot::Background, outcome);

        let current = self
            .call
            .track()
            .is_none_or(|track| track.play_id == snapshot.play_id);
        if current {
            let outcome = self.call.set_hold(false)?;
            self.handle_outcome(Slot::Call, outcome);
        } else {
            self.call.clear_hold();
        }
        Ok(())
    }

    fn reconcile_background(&mut self, snapshot: &GameSnapshot) -> Result<(), SyncError> {
        let Some(url) = self.config.background_url.clone() else {
            return Ok(());
        };
        let device = self.background.device_id();

        if !snapshot.bg_music {
            self.background.cancel_recovery();
            if self.background.is_busy() && self.fader.target(device) != Some(0.0) {
                debug!("background music switched off; fading out");
                self.fade_background(0.0, BACKGROUND_FADE_OUT);
            }
            return Ok(());
        }

        if !self.background.is_busy() {
            if !self.background.is_recovering() {
                self.start_background(url, snapshot)?;
            }
            return Ok(());
        }

        let target = background_target(true, self.context.priority(), &self.context.settings());
        let heading = self
            .fader
            .target(device)
            .unwrap_or_else(|| self.background.volume());
        if (heading - target).abs() > RETARGET_TOLERANCE {
            self.fade_background(target, RETARGET_FADE);
        }

        if self.fader.is_fading(device)
            || snapshot.is_paused
            || self.background.phase() != PlaybackPhase::Playing
        {
            return Ok(());
        }
        if let (Some(elapsed), Some(duration)) = (snapshot.background_elapsed(), self.background.duration()) {
            let position = self.background.position();
            if let Some(target) = self.drift.correction(position, elapsed, duration, true) {
                info!(position, target, "background drifted; resyncing");
                self.background.seek(target);
            }
        }
        Ok(())
    }

    fn reconcile_new_call(&mut self, snapshot: &GameSnapshot) -> Result<(), SyncError> {
        let play_id = snapshot.play_id;
        match self.last_play_id {
            None => {
                self.last_play_id = Some(play_id);
                self.join_in_progress(snapshot)
            }
            Some(last) if play_id == last => Ok(()),
            Some(last) if play_id < last => {
                if snapshot.server_time < self.newest_server_time {
                    debug!(play_id, last, "ignoring reordered snapshot");
                    return Ok(());
                }
                info!(play_id, previous = last, "announcement counter restarted; re-baselining");
                self.last_play_id = Some(play_id);
                self.local_marks.clear();
                if let Some(finalized) = self.call.stop(FinishReason::ForcedStop) {
                    self.on_call_finished(finalized);
                }
                self.join_in_progress(snapshot)
            }
            Some(_) => {
                self.last_play_id = Some(play_id);
                if let Some(awaiting) = self.awaiting.take() {
                    self.awaiting_timer.cancel();
                    debug!(?awaiting, play_id, "server confirmed announcement");
                }

                if snapshot.status != GameStatus::Playing {
                    debug!(play_id, "announcement already over; recording without playing");
                    self.pending_special_mute = None;
                    if let Some(finalized) = self.call.stop(FinishReason::Superseded) {
                        self.on_call_finished(finalized);
                    }
                    self.release_queue_item();
                    return Ok(());
                }
                self.start_announcement(snapshot)
            }
        }
    }

    fn reconcile_moved_on(&mut self, snapshot: &GameSnapshot) -> Result<(), SyncError> {
        if snapshot.status != GameStatus::Playing
            && self
                .call
                .track()
                .is_some_and(|track| track.play_id == snapshot.play_id)
        {
            let long_way = self.call.phase() != PlaybackPhase::Playing
                || self
                    .call
                    .remaining()
                    .is_none_or(|remaining| remaining > self.config.moved_on_threshold);
            if long_way {
                info!(play_id = snapshot.play_id, "server moved on; stopping call audio");
                if let Some(finalized) = self.call.stop(FinishReason::ForcedStop) {
                    self.on_call_finished(finalized);
                }
            }
        }

        if self.call.is_busy() {
            return Ok(());
        }
        if self.context.priority().active {
            self.context.set_priority(PriorityAudioState::default());
        }
        if snapshot.bg_music && self.background.is_busy() {
            let device = self.background.device_id();
            let heading = self
                .fader
                .target(device)
                .unwrap_or_else(|| self.background.volume());
            let bg_volume = self.context.settings().bg_volume;
            if heading < RESTORE_RATIO * bg_volume {
                debug!(heading, bg_volume, "background still ducked; restoring");
                self.retarget_background(RESTORE_FADE);
            }
        }
        Ok(())
    }

    fn publish_board(&mut self, snapshot: &GameSnapshot) -> Result<(), SyncError> {
        self.context.publish_board(BoardView::from_snapshot(snapshot));
        Ok(())
    }

    fn join_in_progress(&mut self, snapshot: &GameSnapshot) -> Result<(), SyncError> {
        if snapshot.status == GameStatus::Playing && snapshot.play_id > 0 {
            info!(play_id = snapshot.play_id, "joining announcement in progress");
            return self.start_announcement(snapshot);
        }
        Ok(())
    }

    fn start_announcement(&mut self, snapshot: &GameSnapshot) -> Result<(), SyncError> {
        let play_id = snapshot.play_id;
        let mute_background = self.pending_special_mute.take().unwrap_or(false)
            && snapshot.current_number.is_none();

        if let Some(previous) = self.call.stop(FinishReason::Superseded) {
            self.on_call_finished(previous);
        }

        let Some(url) = snapshot.audio_url.clone() else {
            warn!(play_id, "announcement has no clip; nothing to play");
            if self.context.role().is_caller() {
                self.post_done();
            }
            self.release_queue_item();
            return Ok(());
        };

        let settings = self.context.settings();
        self.context.set_priority(PriorityAudioState::announcing(mute_background));
        self.retarget_background(DUCK_FADE);
        self.call.set_volume(settings.call_volume);
        self.call.set_rate(settings.playback_rate);

        let start_at = snapshot
            .call_elapsed()
            .map(|elapsed| StartAt::Elapsed(elapsed.max(0.0) * settings.playback_rate))
            .unwrap_or(StartAt::Beginning);
        self.call.load(TrackRequest {
            play_id,
            number: snapshot.current_number,
            source: MediaSource::one_shot(url),
            start_at,
        })?;

        match snapshot.current_number {
            Some(number) => {
                info!(play_id, %number, "announcing number");
                self.notify(Notice::Status(format!("Number {number}")));
            }
            None => info!(play_id, mute_background, "playing special announcement"),
        }
        Ok(())
    }

    fn start_background(&mut self, url: String, snapshot: &GameSnapshot) -> Result<(), SyncError> {
        self.fader.cancel(self.background.device_id());
        self.background.set_volume(0.0);
        let start_at = snapshot
            .background_elapsed()
            .map(StartAt::Elapsed)
            .unwrap_or(StartAt::Beginning);
        self.background.load(TrackRequest {
            play_id: snapshot.play_id,
            number: None,
            source: MediaSource::looping(url),
            start_at,
        })?;
        info!("background music starting");

        let target = background_target(true, self.context.priority(), &self.context.settings());
        self.fade_background(target, BACKGROUND_FADE_IN);
        Ok(())
    }

    fn on_call_finished(&mut self, finalized: Finalized) {
        let Finalized { track, reason } = finalized;
        info!(play_id = track.play_id, number = ?track.number, ?reason, "announcement finished");

        if reason != FinishReason::Superseded {
            self.context.set_priority(PriorityAudioState::default());
            self.retarget_background(RESTORE_FADE);

            if self.context.role().is_caller() {
                let reports_done = matches!(
                    reason,
                    FinishReason::Ended
                        | FinishReason::Errored
                        | FinishReason::TimedOut
                        | FinishReason::Skipped
                );
                let still_current = self
                    .last_snapshot
                    .as_ref()
                    .is_some_and(|snapshot| snapshot.play_id == track.play_id);
                if reports_done && still_current {
                    self.post_done();
                }
                if let Some(number) = track.number {
                    self.local_marks.insert(number);
                }
                self.release_queue_item();
            }
        }

        self.notify(Notice::CallFinished {
            number: track.number,
            play_id: track.play_id,
            reason,
        });
    }

    fn retarget_background(&mut self, duration: Duration) {
        if !self.background.is_busy() {
            return;
        }
        let bg_music = self.bg_music();
        let target = background_target(bg_music, self.context.priority(), &self.context.settings());
        if self.fader.target(self.background.device_id()) == Some(target) {
            return;
        }
        self.fade_background(target, duration);
    }

    fn fade_background(&mut self, target: f64, duration: Duration) {
        let completion = if self.bg_music() {
            AfterFade::Nothing
        } else {
            AfterFade::ParkBackground
        };
        if let Some(done) = self.fader.fade(&mut self.background, target, duration, completion) {
            self.after_fade(done);
        }
    }

    fn after_fade(&mut self, done: AfterFade) {
        match done {
            AfterFade::Nothing => {}
            AfterFade::ParkBackground => {
                if !self.bg_music() && self.background.stop(FinishReason::ForcedStop).is_some() {
                    debug!("background music parked");
                }
            }
        }
    }

    fn bg_music(&self) -> bool {
        self.last_snapshot
            .as_ref()
            .is_some_and(|snapshot| snapshot.bg_music)
    }

    fn called(&self) -> HashSet<Number> {
        self.server_called
            .union(&self.local_marks)
            .copied()
            .collect()
    }

    fn controller(&mut self, slot: Slot) -> &mut PlaybackController {
        match slot {
            Slot::Background => &mut self.background,
            Slot::Call => &mut self.call,
        }
    }

    fn on_slot_event(&mut self, event: SlotEvent) {
        match self.controller(event.slot).handle(event.kind) {
            Ok(outcome) => self.handle_outcome(event.slot, outcome),
            Err(err) => warn!(slot = ?event.slot, error = %err, "slot event rejected"),
        }
    }

    fn handle_outcome(&mut self, slot: Slot, outcome: ControllerOutcome) {
        match outcome {
            ControllerOutcome::Nothing | ControllerOutcome::Held => {}
            ControllerOutcome::Started => debug!(?slot, "playback started"),
            ControllerOutcome::ResumeRequired => {
                warn!(?slot, "audio blocked; waiting for the user to resume");
                self.notify(Notice::ResumeRequired);
            }
            ControllerOutcome::Finalized(finalized) => match slot {
                Slot::Call => self.on_call_finished(finalized),
                Slot::Background => {
                    self.fader.cancel(self.background.device_id());
                    debug!(reason = ?finalized.reason, "background track released");
                }
            },
            ControllerOutcome::RecoveryDue(source) => self.recover_background(source),
        }
    }

    fn recover_background(&mut self, source: MediaSource) {
        let Some(snapshot) = self.last_snapshot.clone() else {
            return;
        };
        if !snapshot.bg_music || self.background.is_busy() {
            return;
        }
        info!(url = %source.url, "reloading background music");
        if let Err(err) = self.start_background(source.url, &snapshot) {
            warn!(error = %err, "background recovery failed");
        }
    }

    fn on_fade_tick(&mut self, tick: FadeTick) {
        if let Some(done) = self.fader.on_tick(tick, &mut self.background) {
            self.after_fade(done);
        }
    }

    fn on_queue_alarm(&mut self, alarm: QueueAlarm) {
        let live = self
            .queue
            .as_mut()
            .is_some_and(|queue| queue.accept_alarm(alarm));
        if live {
            self.try_process_queue();
        }
    }

    fn on_alarm(&mut self, alarm: EngineAlarm) {
        match alarm {
            EngineAlarm::VolumeFlush(ticket) => {
                if let Some(settings) = self.volume_sync.release(ticket) {
                    debug!(?settings, "sending volume settings");
                    self.sent_settings = Some((settings, Instant::now()));
                    self.spawn_mutation("volume", self.api.volume(settings));
                }
            }
            EngineAlarm::AwaitTimeout(ticket) => {
                if !self.awaiting_timer.accept(ticket) {
                    return;
                }
                if let Some(awaiting) = self.awaiting.take() {
                    warn!(?awaiting, "announcement never showed up on the stream; giving up");
                    self.pending_special_mute = None;
                    self.notify(Notice::Warning("the server did not confirm the announcement".into()));
                    self.release_queue_item();
                }
            }
        }
    }

    fn on_reply(&mut self, reply: Reply) {
        match reply {
            Reply::CallAttempt { number, result } => match result {
                Ok(()) => {
                    if self.awaiting == Some(Awaiting::Call(number)) {
                        self.arm_await_timeout();
                    }
                    self.notify(Notice::Status(format!("Calling {number}")));
                }
                Err(err) => {
                    warn!(%number, error = %err, "failed to call number");
                    if self.awaiting == Some(Awaiting::Call(number)) {
                        self.awaiting = None;
                    }
                    self.notify(Notice::Warning(format!("could not call {number}: {err}")));
                    self.release_queue_item();
                }
            },
            Reply::Special { result } => match result {
                Ok(()) => {
                    if self.awaiting == Some(Awaiting::Special) {
                        self.arm_await_timeout();
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to play special announcement");
                    if self.awaiting == Some(Awaiting::Special) {
                        self.awaiting = None;
                    }
                    self.pending_special_mute = None;
                    self.notify(Notice::Warning(format!("could not play special: {err}")));
                }
            },
            Reply::Mutation { what, result } => match result {
                Ok(()) => debug!(what, "mutation acknowledged"),
                Err(err) => {
                    warn!(what, error = %err, "mutation failed");
                    self.notify(Notice::Warning(format!("{what} request failed: {err}")));
                }
            },
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Enqueue { number, reply } => {
                let called = self.called();
                let result = match self.queue.as_mut() {
                    Some(queue) => queue.enqueue_raw(number, &called),
                    None => Err(ValidationError::QueueUnavailable),
                };
                self.answer(reply, result);
            }
            Command::EnqueueRandom { reply } => {
                let called = self.called();
                let result = match self.queue.as_mut() {
                    Some(queue) => queue
                        .random_pick(&called)
                        .and_then(|number| queue.enqueue(number, &called).map(|_| number)),
                    None => Err(ValidationError::QueueUnavailable),
                };
                self.answer(reply, result);
            }
            Command::Remove { index, reply } => {
                let result = match self.queue.as_mut() {
                    Some(queue) => queue.remove(index),
                    None => Err(ValidationError::QueueUnavailable),
                };
                let _ = reply.send(result);
            }
            Command::ClearQueue { reply } => {
                let result = match self.queue.as_mut() {
                    Some(queue) => {
                        queue.clear();
                        Ok(())
                    }
                    None => Err(ValidationError::QueueUnavailable),
                };
                let _ = reply.send(result);
            }
            Command::Skip => {
                if let Some(finalized) = self.call.skip() {
                    self.on_call_finished(finalized);
                }
            }
            Command::ConfirmResume => {
                for slot in [Slot::Background, Slot::Call] {
                    match self.controller(slot).confirm_gesture() {
                        Ok(outcome) => self.handle_outcome(slot, outcome),
                        Err(err) => warn!(?slot, error = %err, "resume rejected"),
                    }
                }
            }
            Command::TogglePause => {
                let paused = !self
                    .last_snapshot
                    .as_ref()
                    .is_some_and(|snapshot| snapshot.is_paused);
                info!(paused, "requesting pause change");
                self.spawn_mutation("pause", self.api.pause(paused));
            }
            Command::SetBackgroundMusic(enabled) => {
                info!(enabled, "requesting background music change");
                self.spawn_mutation("bg_music", self.api.background_music(enabled));
            }
            Command::PlaySpecial {
                audio_url,
                mute_background,
                reply,
            } => {
                let result = self.play_special(audio_url, mute_background);
                let _ = reply.send(result);
            }
            Command::Reset { reply } => {
                let result = if self.context.role().is_caller() {
                    if let Some(queue) = self.queue.as_mut() {
                        queue.clear();
                    }
                    self.local_marks.clear();
                    info!("requesting game reset");
                    self.spawn_mutation("reset", self.api.reset());
                    Ok(())
                } else {
                    Err(ValidationError::CallerOnly("reset the game"))
                };
                let _ = reply.send(result);
            }
            Command::AdjustVolume { change, reply } => {
                let result = self.adjust_volume(change);
                let _ = reply.send(result);
            }
            Command::SetLocalMute(muted) => {
                info!(muted, "local mute changed");
                self.context.set_local_mute(muted);
                self.background.set_muted(muted);
                self.call.set_muted(muted);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => {}
        }
    }

    fn answer<T>(&mut self, reply: Responder<T>, result: Result<T, ValidationError>) {
        let accepted = result.is_ok();
        if let Err(err) = &result {
            info!(error = %err, "queue request rejected");
        }
        let _ = reply.send(result);
        if accepted {
            self.try_process_queue();
        }
    }

    fn play_special(&mut self, audio_url: String, mute_background: bool) -> Result<(), ValidationError> {
        if !self.context.role().is_caller() {
            return Err(ValidationError::CallerOnly("play a special announcement"));
        }
        let request = SpecialRequest {
            audio_url,
            playback_rate: self.context.settings().playback_rate,
        };
        if request.validate().is_err() {
            return Err(ValidationError::InvalidClip(request.audio_url));
        }

        if let Some(queue) = self.queue.as_mut() {
            queue.clear();
        }
        info!(url = %request.audio_url, mute_background, "requesting special announcement");
        self.awaiting = Some(Awaiting::Special);
        self.pending_special_mute = Some(mute_background);

        let replies = self.replies.clone();
        let special = self.api.special(request);
        tokio::spawn(async move {
            let result = special.await.map(|_| ());
            let _ = replies.send(Reply::Special { result });
        });
        Ok(())
    }

    fn adjust_volume(&mut self, change: VolumeChange) -> Result<AudioSettings, ValidationError> {
        if !self.context.role().is_caller() {
            return Err(ValidationError::CallerOnly("change the shared volume"));
        }
        let settings = change.apply(self.context.settings());
        self.context.set_settings(settings);
        self.call.set_volume(settings.call_volume);
        self.call.set_rate(settings.playback_rate);
        self.retarget_background(RETARGET_FADE);
        self.volume_sync
            .push(settings, &self.alarms, EngineAlarm::VolumeFlush);
        Ok(settings)
    }

    fn try_process_queue(&mut self) {
        let busy = self.call.is_busy()
            || self.awaiting.is_some()
            || self
                .last_snapshot
                .as_ref()
                .is_none_or(|snapshot| snapshot.is_paused);
        let called = self.called();
        let Some(number) = self
            .queue
            .as_mut()
            .and_then(|queue| queue.next_ready(busy, &called))
        else {
            return;
        };

        info!(%number, "calling next queued number");
        self.awaiting = Some(Awaiting::Call(number));
        let api = self.api.clone();
        let replies = self.replies.clone();
        let rate = self.context.settings().playback_rate;
        tokio::spawn(async move {
            let result = call_number(api.as_ref(), number, rate).await;
            let _ = replies.send(Reply::CallAttempt { number, result });
        });
    }

    fn release_queue_item(&mut self) {
        if let Some(queue) = self.queue.as_mut() {
            queue.resolve();
        }
    }

    fn arm_await_timeout(&mut self) {
        self.awaiting_timer
            .arm(self.config.await_timeout, &self.alarms, EngineAlarm::AwaitTimeout);
    }

    fn post_done(&self) {
        self.spawn_mutation("done", self.api.done());
    }

    fn spawn_mutation(&self, what: &'static str, request: BoxFuture<'static, Result<Ack, TransportError>>) {
        let replies = self.replies.clone();
        tokio::spawn(async move {
            let result = request.await.map(|_| ());
            let _ = replies.send(Reply::Mutation { what, result });
        });
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    fn status(&self) -> EngineStatus {
        let snapshot = self.last_snapshot.as_ref();
        EngineStatus {
            role: self.context.role(),
            synced: snapshot.is_some(),
            play_id: self.last_play_id,
            server_status: snapshot.map(|snapshot| snapshot.status),
            is_paused: snapshot.is_some_and(|snapshot| snapshot.is_paused),
            call_phase: self.call.phase(),
            background_phase: self.background.phase(),
            playing: self.call.track().and_then(|track| track.number),
            queue: self
                .queue
                .as_ref()
                .map(QueueManager::items)
                .unwrap_or_default(),
            processing: self.queue.as_ref().and_then(QueueManager::processing),
            awaiting_confirmation: self.awaiting.is_some(),
            priority: self.context.priority(),
            settings: self.context.settings(),
            locally_muted: self.context.is_locally_muted(),
        }
    }
}

async fn call_number(api: &dyn GameApi, number: Number, rate: f64) -> Result<(), CallFailure> {
    let found = api.lookup(number).await?;
    let url = match found.audio_url {
        Some(url) if found.found => url,
        _ => {
            return Err(CallFailure::NotFound(
                found
                    .message
                    .unwrap_or_else(|| format!("no clip for number {number}")),
            ));
        }
    };
    api.call(CallRequest::new(number, url, rate)).await?;
    Ok(())
}
