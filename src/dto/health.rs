use serde::{Deserialize, Serialize};

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` while the server answers.
    pub status: String,
    /// Announcement counter of the room.
    pub play_id: u64,
    /// Connected push streams.
    pub streams: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(play_id: u64, streams: usize) -> Self {
        Self {
            status: "ok".to_string(),
            play_id,
            streams,
        }
    }
}
