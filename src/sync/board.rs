//! Derived view handed to whatever renders the board.

use crate::dto::snapshot::{GameSnapshot, GameStatus, NUMBER_COUNT, Number};

/// What a board renderer needs from a snapshot, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoardView {
    /// Called numbers in call order.
    pub called: Vec<Number>,
    /// Most recent call.
    pub latest: Option<Number>,
    /// Number currently announced or shown.
    pub current: Option<Number>,
    /// Server status.
    pub status: GameStatus,
    /// Global pause flag.
    pub is_paused: bool,
    /// Background music switch.
    pub bg_music: bool,
}

impl BoardView {
    /// Project a snapshot.
    pub fn from_snapshot(snapshot: &GameSnapshot) -> Self {
        Self {
            called: snapshot.called_numbers.iter().map(|entry| entry.number).collect(),
            latest: snapshot.latest_called(),
            current: snapshot.current_number,
            status: snapshot.status,
            is_paused: snapshot.is_paused,
            bg_music: snapshot.bg_music,
        }
    }

    /// How many numbers were called.
    pub fn called_count(&self) -> usize {
        self.called.len()
    }

    /// Whether `number` is marked on the board.
    pub fn is_marked(&self, number: Number) -> bool {
        self.called.contains(&number)
    }

    /// Counter shown next to the board, e.g. `12/100`.
    pub fn counter_label(&self) -> String {
        format!("{}/{}", self.called_count(), NUMBER_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::snapshot::CalledNumber;

    #[test]
    fn view_reflects_snapshot() {
        let called = [3, 17, 42]
            .into_iter()
            .map(|value| CalledNumber {
                number: Number::new(value).unwrap(),
                text: String::new(),
                called_at: None,
            })
            .collect();
        let snapshot = GameSnapshot {
            status: GameStatus::Showing,
            current_number: Number::new(42).ok(),
            called_numbers: called,
            ..GameSnapshot::default()
        };

        let view = BoardView::from_snapshot(&snapshot);
        assert_eq!(view.called_count(), 3);
        assert_eq!(view.latest, Number::new(42).ok());
        assert!(view.is_marked(Number::new(17).unwrap()));
        assert!(!view.is_marked(Number::new(18).unwrap()));
        assert_eq!(view.counter_label(), "3/100");
    }
}
