use thiserror::Error;

/// Phases a playback slot goes through for one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    /// Nothing loaded.
    Idle,
    /// Source requested, waiting for metadata.
    Loading,
    /// Audio is running.
    Playing,
    /// Held by the authoritative pause flag.
    Paused,
    /// Start was refused until the user interacts.
    AwaitingGesture,
    /// Track finished; released right after.
    Ended,
    /// Track failed; released right after.
    Errored,
}

impl PlaybackPhase {
    /// Whether a track occupies the slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlaybackPhase::Loading
                | PlaybackPhase::Playing
                | PlaybackPhase::Paused
                | PlaybackPhase::AwaitingGesture
        )
    }
}

/// Events that can be applied to the playback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A new source was handed to the device.
    Load,
    /// The device started playing.
    Start,
    /// Playback was held.
    Pause,
    /// A held track resumed.
    Resume,
    /// The platform refused to start playback.
    Blocked,
    /// The track finished, timed out, was skipped or was stopped.
    End,
    /// The track failed.
    Fail,
    /// The finished track was released.
    Release,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: PlaybackPhase,
    /// The event that cannot be applied from this phase.
    pub event: PlaybackEvent,
}

/// Per-slot playback state machine.
#[derive(Debug, Clone)]
pub struct PlaybackStateMachine {
    phase: PlaybackPhase,
    version: usize,
}

impl Default for PlaybackStateMachine {
    fn default() -> Self {
        Self {
            phase: PlaybackPhase::Idle,
            version: 0,
        }
    }
}

impl PlaybackStateMachine {
    /// Create a new state machine initialised in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Apply `event`, returning the new phase.
    pub fn apply(&mut self, event: PlaybackEvent) -> Result<PlaybackPhase, InvalidTransition> {
        self.phase = self.compute_transition(event)?;
        self.version += 1;
        Ok(self.phase)
    }

    /// Force the machine back to idle after an inconsistency.
    pub fn reset(&mut self) {
        self.phase = PlaybackPhase::Idle;
        self.version += 1;
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: PlaybackEvent) -> Result<PlaybackPhase, InvalidTransition> {
        use PlaybackEvent as E;
        use PlaybackPhase as P;

        let next = match (self.phase, event) {
            (P::Idle, E::Load) => P::Loading,
            (P::Loading | P::AwaitingGesture, E::Start) => P::Playing,
            (P::Loading | P::Playing | P::AwaitingGesture, E::Pause) => P::Paused,
            (P::Paused, E::Resume) => P::Playing,
            (P::Loading | P::Playing | P::Paused, E::Blocked) => P::AwaitingGesture,
            (from, E::End) if from.is_active() => P::Ended,
            (from, E::Fail) if from.is_active() => P::Errored,
            (P::Ended | P::Errored, E::Release) => P::Idle,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut PlaybackStateMachine, event: PlaybackEvent) -> PlaybackPhase {
        sm.apply(event).unwrap()
    }

    #[test]
    fn initial_state_is_idle() {
        let sm = PlaybackStateMachine::new();
        assert_eq!(sm.phase(), PlaybackPhase::Idle);
        assert_eq!(sm.version(), 0);
    }

    #[test]
    fn full_happy_path_through_track() {
        let mut sm = PlaybackStateMachine::new();

        assert_eq!(apply(&mut sm, PlaybackEvent::Load), PlaybackPhase::Loading);
        assert_eq!(apply(&mut sm, PlaybackEvent::Start), PlaybackPhase::Playing);
        assert_eq!(apply(&mut sm, PlaybackEvent::Pause), PlaybackPhase::Paused);
        assert_eq!(apply(&mut sm, PlaybackEvent::Resume), PlaybackPhase::Playing);
        assert_eq!(apply(&mut sm, PlaybackEvent::End), PlaybackPhase::Ended);
        assert_eq!(apply(&mut sm, PlaybackEvent::Release), PlaybackPhase::Idle);
        assert_eq!(sm.version(), 6);
    }

    #[test]
    fn blocked_start_waits_for_gesture() {
        let mut sm = PlaybackStateMachine::new();
        apply(&mut sm, PlaybackEvent::Load);

        assert_eq!(
            apply(&mut sm, PlaybackEvent::Blocked),
            PlaybackPhase::AwaitingGesture
        );
        assert_eq!(apply(&mut sm, PlaybackEvent::Start), PlaybackPhase::Playing);
    }

    #[test]
    fn metadata_while_held_lands_paused() {
        let mut sm = PlaybackStateMachine::new();
        apply(&mut sm, PlaybackEvent::Load);
        assert_eq!(apply(&mut sm, PlaybackEvent::Pause), PlaybackPhase::Paused);
        assert_eq!(
            apply(&mut sm, PlaybackEvent::Blocked),
            PlaybackPhase::AwaitingGesture
        );
    }

    #[test]
    fn failure_is_accepted_from_every_active_phase() {
        for events in [
            vec![PlaybackEvent::Load],
            vec![PlaybackEvent::Load, PlaybackEvent::Start],
            vec![PlaybackEvent::Load, PlaybackEvent::Pause],
            vec![PlaybackEvent::Load, PlaybackEvent::Blocked],
        ] {
            let mut sm = PlaybackStateMachine::new();
            for event in events {
                apply(&mut sm, event);
            }
            assert_eq!(apply(&mut sm, PlaybackEvent::Fail), PlaybackPhase::Errored);
        }
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut sm = PlaybackStateMachine::new();
        let err = sm.apply(PlaybackEvent::Resume).unwrap_err();
        assert_eq!(err.from, PlaybackPhase::Idle);
        assert_eq!(err.event, PlaybackEvent::Resume);

        let err = sm.apply(PlaybackEvent::End).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid transition: End cannot be applied while in Idle"
        );
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut sm = PlaybackStateMachine::new();
        apply(&mut sm, PlaybackEvent::Load);
        sm.reset();
        assert_eq!(sm.phase(), PlaybackPhase::Idle);
    }
}
