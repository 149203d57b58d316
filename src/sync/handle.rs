//! Cloneable front door to a running [`SyncEngine`].

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    dto::snapshot::{AudioSettings, GameSnapshot, Number},
    error::{EngineError, ValidationError},
    sync::{
        context::SyncContext,
        engine::{Command, EngineSetup, EngineStatus, Notice, SyncEngine, VolumeChange},
    },
};

const COMMAND_CAPACITY: usize = 32;
const NOTICE_CAPACITY: usize = 64;

/// Start an engine fed by `snapshots`.
///
/// The engine stops once every [`EngineHandle`] is dropped or
/// [`EngineHandle::shutdown`] is called.
pub fn spawn_engine(setup: EngineSetup, snapshots: mpsc::Receiver<GameSnapshot>) -> (EngineHandle, JoinHandle<()>) {
    let context = SyncContext::new(setup.role);
    let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
    let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);

    let (engine, inbox) = SyncEngine::new(setup, context.clone(), notices.clone(), snapshots, commands_rx);
    let task = tokio::spawn(engine.run(inbox));

    let handle = EngineHandle {
        commands,
        notices,
        context,
    };
    (handle, task)
}

/// Sends commands to the engine and exposes its shared state.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    notices: broadcast::Sender<Notice>,
    context: SyncContext,
}

impl EngineHandle {
    /// Read-only shared state.
    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Receive future [`Notice`]s.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Queue a raw number; returns the queue length.
    pub async fn enqueue(&self, number: i64) -> Result<usize, EngineError> {
        self.ask(|reply| Command::Enqueue { number, reply }).await
    }

    /// Queue a random uncalled number and return it.
    pub async fn enqueue_random(&self) -> Result<Number, EngineError> {
        self.ask(|reply| Command::EnqueueRandom { reply }).await
    }

    /// Remove the pending entry at `index`.
    pub async fn remove(&self, index: usize) -> Result<Number, EngineError> {
        self.ask(|reply| Command::Remove { index, reply }).await
    }

    /// Drop every pending entry.
    pub async fn clear_queue(&self) -> Result<(), EngineError> {
        self.ask(|reply| Command::ClearQueue { reply }).await
    }

    /// Stop the current announcement.
    pub async fn skip(&self) -> Result<(), EngineError> {
        self.tell(Command::Skip).await
    }

    /// Retry playback blocked for lack of a user gesture.
    pub async fn confirm_resume(&self) -> Result<(), EngineError> {
        self.tell(Command::ConfirmResume).await
    }

    /// Ask the server to flip the global pause flag.
    pub async fn toggle_pause(&self) -> Result<(), EngineError> {
        self.tell(Command::TogglePause).await
    }

    /// Ask the server to switch background music.
    pub async fn set_background_music(&self, enabled: bool) -> Result<(), EngineError> {
        self.tell(Command::SetBackgroundMusic(enabled)).await
    }

    /// Ask the server to play a special clip, clearing the queue.
    pub async fn play_special(&self, audio_url: String, mute_background: bool) -> Result<(), EngineError> {
        self.ask(|reply| Command::PlaySpecial {
            audio_url,
            mute_background,
            reply,
        })
        .await
    }

    /// Ask the server to start a new game.
    pub async fn reset(&self) -> Result<(), EngineError> {
        self.ask(|reply| Command::Reset { reply }).await
    }

    /// Apply a settings change locally and share it once changes settle.
    pub async fn adjust_volume(&self, change: VolumeChange) -> Result<AudioSettings, EngineError> {
        self.ask(|reply| Command::AdjustVolume { change, reply }).await
    }

    /// Mute this client only.
    pub async fn set_local_mute(&self, muted: bool) -> Result<(), EngineError> {
        self.tell(Command::SetLocalMute(muted)).await
    }

    /// Current engine status.
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tell(Command::Status { reply }).await?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Stop the engine and release both devices.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.tell(Command::Shutdown).await
    }

    async fn tell(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Closed)
    }

    async fn ask<T, F>(&self, make: F) -> Result<T, EngineError>
    where
        F: FnOnce(oneshot::Sender<Result<T, ValidationError>>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.tell(make(reply)).await?;
        let result = rx.await.map_err(|_| EngineError::Closed)?;
        Ok(result?)
    }
}
