//! State shared between the engine and whoever renders or observes it.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{dto::snapshot::AudioSettings, sync::board::BoardView};

/// Which part a client plays in the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// Drives the queue and reports finished announcements.
    Caller,
    /// Follows the stream only.
    #[default]
    Display,
}

impl ClientRole {
    /// Whether this client owns the pending queue.
    pub fn is_caller(self) -> bool {
        self == ClientRole::Caller
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientRole::Caller => f.write_str("caller"),
            ClientRole::Display => f.write_str("display"),
        }
    }
}

impl FromStr for ClientRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "caller" => Ok(ClientRole::Caller),
            "display" => Ok(ClientRole::Display),
            other => Err(format!("unknown client role `{other}`")),
        }
    }
}

/// Whether a foreground announcement currently owns the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriorityAudioState {
    /// A call or special is playing.
    pub active: bool,
    /// Silence the background entirely instead of ducking it.
    pub mute_background: bool,
}

impl PriorityAudioState {
    /// Priority held by an announcement.
    pub fn announcing(mute_background: bool) -> Self {
        Self {
            active: true,
            mute_background,
        }
    }
}

/// Volume the background device should sit at.
pub fn background_target(bg_music: bool, priority: PriorityAudioState, settings: &AudioSettings) -> f64 {
    if !bg_music {
        return 0.0;
    }
    if priority.active {
        if priority.mute_background {
            return 0.0;
        }
        return (settings.duck_level * settings.bg_volume).clamp(0.0, 1.0);
    }
    settings.bg_volume.clamp(0.0, 1.0)
}

struct ContextInner {
    role: ClientRole,
    priority: watch::Sender<PriorityAudioState>,
    settings: watch::Sender<AudioSettings>,
    board: watch::Sender<BoardView>,
    local_mute: watch::Sender<bool>,
}

/// Cheaply clonable view of the engine's shared state.
///
/// Only the engine writes; every other holder reads or subscribes.
#[derive(Clone)]
pub struct SyncContext {
    inner: Arc<ContextInner>,
}

impl SyncContext {
    /// Fresh context for `role` with default settings.
    pub fn new(role: ClientRole) -> Self {
        let (priority, _) = watch::channel(PriorityAudioState::default());
        let (settings, _) = watch::channel(AudioSettings::default());
        let (board, _) = watch::channel(BoardView::default());
        let (local_mute, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                role,
                priority,
                settings,
                board,
                local_mute,
            }),
        }
    }

    /// Role of this client.
    pub fn role(&self) -> ClientRole {
        self.inner.role
    }

    /// Current priority state.
    pub fn priority(&self) -> PriorityAudioState {
        *self.inner.priority.borrow()
    }

    /// Subscribe to priority changes.
    pub fn watch_priority(&self) -> watch::Receiver<PriorityAudioState> {
        self.inner.priority.subscribe()
    }

    /// Effective audio settings.
    pub fn settings(&self) -> AudioSettings {
        *self.inner.settings.borrow()
    }

    /// Subscribe to settings changes.
    pub fn watch_settings(&self) -> watch::Receiver<AudioSettings> {
        self.inner.settings.subscribe()
    }

    /// Latest board view.
    pub fn board(&self) -> BoardView {
        self.inner.board.borrow().clone()
    }

    /// Subscribe to board updates.
    pub fn watch_board(&self) -> watch::Receiver<BoardView> {
        self.inner.board.subscribe()
    }

    /// Whether this client muted itself.
    pub fn is_locally_muted(&self) -> bool {
        *self.inner.local_mute.borrow()
    }

    /// Subscribe to local mute changes.
    pub fn watch_local_mute(&self) -> watch::Receiver<bool> {
        self.inner.local_mute.subscribe()
    }

    pub(crate) fn set_priority(&self, priority: PriorityAudioState) {
        self.inner.priority.send_if_modified(|current| {
            let changed = *current != priority;
            *current = priority;
            changed
        });
    }

    pub(crate) fn set_settings(&self, settings: AudioSettings) {
        self.inner.settings.send_if_modified(|current| {
            let changed = *current != settings;
            *current = settings;
            changed
        });
    }

    pub(crate) fn publish_board(&self, board: BoardView) {
        self.inner.board.send_if_modified(|current| {
            let changed = *current != board;
            *current = board;
            changed
        });
    }

    pub(crate) fn set_local_mute(&self, muted: bool) {
        self.inner.local_mute.send_replace(muted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: AudioSettings = AudioSettings {
        bg_volume: 0.8,
        call_volume: 1.0,
        duck_level: 0.25,
        playback_rate: 1.0,
    };

    #[test]
    fn background_target_follows_priority() {
        let idle = PriorityAudioState::default();
        assert_eq!(background_target(false, idle, &SETTINGS), 0.0);
        assert_eq!(background_target(true, idle, &SETTINGS), 0.8);
        assert!((background_target(true, PriorityAudioState::announcing(false), &SETTINGS) - 0.2).abs() < 1e-9);
        assert_eq!(background_target(true, PriorityAudioState::announcing(true), &SETTINGS), 0.0);
        assert_eq!(background_target(false, PriorityAudioState::announcing(false), &SETTINGS), 0.0);
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Caller".parse::<ClientRole>(), Ok(ClientRole::Caller));
        assert_eq!(" display ".parse::<ClientRole>(), Ok(ClientRole::Display));
        assert!("admin".parse::<ClientRole>().is_err());
    }

    #[tokio::test]
    async fn watchers_only_wake_on_change() {
        let context = SyncContext::new(ClientRole::Caller);
        let mut priority = context.watch_priority();
        priority.borrow_and_update();

        context.set_priority(PriorityAudioState::default());
        assert!(!priority.has_changed().unwrap());

        context.set_priority(PriorityAudioState::announcing(false));
        assert!(priority.has_changed().unwrap());
        assert!(context.priority().active);
    }
}
