use time::OffsetDateTime;

use crate::dto::snapshot::{AudioSettings, CalledNumber, GameSnapshot, GameStatus, Number};

/// Seconds since the Unix epoch on the server clock.
pub fn server_time() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

/// Authoritative state of the single game room.
#[derive(Debug, Clone, PartialEq)]
pub struct GameState {
    status: GameStatus,
    current_number: Option<Number>,
    current_text: String,
    called: Vec<CalledNumber>,
    audio_url: Option<String>,
    play_id: u64,
    started_at: Option<f64>,
    is_paused: bool,
    bg_music: bool,
    bg_started_at: Option<f64>,
    settings: AudioSettings,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            status: GameStatus::Idle,
            current_number: None,
            current_text: String::new(),
            called: Vec::new(),
            audio_url: None,
            play_id: 0,
            started_at: None,
            is_paused: false,
            bg_music: false,
            bg_started_at: None,
            settings: AudioSettings::default(),
        }
    }
}

impl GameState {
    /// Fresh idle room.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current announcement identity.
    pub fn play_id(&self) -> u64 {
        self.play_id
    }

    /// Start announcing `number`. Unpauses the room.
    pub fn call(&mut self, number: Number, audio_url: String, text: String, rate: f64, now: f64) {
        self.current_number = Some(number);
        self.current_text = text;
        self.start_announcement(audio_url, rate, now);
    }

    /// Start a non-number announcement. Unpauses the room.
    pub fn special(&mut self, audio_url: String, rate: f64, now: f64) {
        self.current_number = None;
        self.current_text.clear();
        self.start_announcement(audio_url, rate, now);
    }

    fn start_announcement(&mut self, audio_url: String, rate: f64, now: f64) {
        self.status = GameStatus::Playing;
        self.audio_url = Some(audio_url).filter(|url| !url.is_empty());
        self.settings.playback_rate = rate;
        self.started_at = Some(now);
        self.play_id += 1;
        self.is_paused = false;
    }

    /// The current announcement finished: show its number, or go idle after a special.
    ///
    /// Repeated reports for the same announcement change nothing.
    pub fn done(&mut self, now: f64) {
        if self.status != GameStatus::Playing {
            return;
        }
        match self.current_number {
            Some(number) => {
                if !self.called.iter().any(|entry| entry.number == number) {
                    self.called.push(CalledNumber {
                        number,
                        text: self.current_text.clone(),
                        called_at: Some(now),
                    });
                }
                self.status = GameStatus::Showing;
            }
            None => self.status = GameStatus::Idle,
        }
    }

    /// Set the global pause flag.
    pub fn set_paused(&mut self, paused: bool) {
        self.is_paused = paused;
    }

    /// Replace the shared audio settings.
    pub fn set_settings(&mut self, settings: AudioSettings) {
        self.settings = settings;
    }

    /// Switch background music, stamping its start when it turns on.
    pub fn set_background_music(&mut self, enabled: bool, now: f64) {
        if enabled && !self.bg_music {
            self.bg_started_at = Some(now);
        }
        self.bg_music = enabled;
    }

    /// Start a new game. The announcement counter keeps increasing.
    pub fn reset(&mut self) {
        self.called.clear();
        self.current_number = None;
        self.current_text.clear();
        self.status = GameStatus::Idle;
        self.audio_url = None;
        self.started_at = None;
        self.is_paused = false;
    }

    /// Whether `number` was already called.
    pub fn is_called(&self, number: Number) -> bool {
        self.called.iter().any(|entry| entry.number == number)
    }

    /// Wire snapshot stamped with `now`.
    pub fn snapshot(&self, now: f64) -> GameSnapshot {
        GameSnapshot {
            status: self.status,
            current_number: self.current_number,
            current_text: self.current_text.clone(),
            called_numbers: self.called.clone(),
            audio_url: self.audio_url.clone(),
            play_id: self.play_id,
            started_at: self.started_at,
            server_time: now,
            is_paused: self.is_paused,
            bg_music: self.bg_music,
            bg_started_at: self.bg_started_at,
            bg_volume: self.settings.bg_volume,
            call_volume: self.settings.call_volume,
            duck_level: self.settings.duck_level,
            playback_rate: self.settings.playback_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(value: i64) -> Number {
        Number::new(value).unwrap()
    }

    #[test]
    fn call_then_done_shows_the_number_once() {
        let mut game = GameState::new();
        game.set_paused(true);
        game.call(n(42), "/sounds/numbers/42.mp3".into(), "forty two".into(), 1.25, 10.0);

        let playing = game.snapshot(11.0);
        assert_eq!(playing.status, GameStatus::Playing);
        assert_eq!(playing.play_id, 1);
        assert!(!playing.is_paused);
        assert_eq!(playing.call_elapsed(), Some(1.0));
        assert_eq!(playing.playback_rate, 1.25);

        game.done(12.0);
        game.done(13.0);
        let shown = game.snapshot(14.0);
        assert_eq!(shown.status, GameStatus::Showing);
        assert_eq!(shown.called_numbers.len(), 1);
        assert_eq!(shown.called_numbers[0].called_at, Some(12.0));
    }

    #[test]
    fn special_returns_to_idle_when_done() {
        let mut game = GameState::new();
        game.special("/sounds/special/start.mp3".into(), 1.0, 1.0);
        assert_eq!(game.snapshot(1.0).current_number, None);

        game.done(2.0);
        let snapshot = game.snapshot(2.0);
        assert_eq!(snapshot.status, GameStatus::Idle);
        assert!(snapshot.called_numbers.is_empty());
    }

    #[test]
    fn reset_keeps_counter_monotonic() {
        let mut game = GameState::new();
        game.call(n(1), "/a.mp3".into(), String::new(), 1.0, 1.0);
        game.done(2.0);
        game.reset();

        let snapshot = game.snapshot(3.0);
        assert_eq!(snapshot.status, GameStatus::Idle);
        assert!(snapshot.called_numbers.is_empty());
        assert_eq!(snapshot.play_id, 1);

        game.call(n(2), "/b.mp3".into(), String::new(), 1.0, 4.0);
        assert_eq!(game.play_id(), 2);
    }

    #[test]
    fn background_start_is_stamped_only_when_switching_on() {
        let mut game = GameState::new();
        game.set_background_music(true, 5.0);
        game.set_background_music(true, 9.0);
        assert_eq!(game.snapshot(10.0).background_elapsed(), Some(5.0));

        game.set_background_music(false, 11.0);
        game.set_background_music(true, 20.0);
        assert_eq!(game.snapshot(21.0).background_elapsed(), Some(1.0));
    }
}
