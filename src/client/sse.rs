//! Push-stream consumption: event-stream decoding and the reconnect loop.

use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, info, warn};

use crate::{client::StateChannel, dto::snapshot::GameSnapshot, error::TransportError};

/// Path of the push stream.
pub const STREAM_PATH: &str = "/api/game/stream";

/// One dispatched event-stream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// Event name, when the server set one.
    pub event: Option<String>,
    /// Data lines joined with `\n`.
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes are buffered until a full line is available so multi-byte characters
/// split across network chunks are decoded correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every message completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line = self.buffer.drain(..=newline).collect::<Vec<_>>();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    messages.push(SseMessage {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
                self.event = None;
                continue;
            }

            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (&*line, ""),
            };
            match field {
                "data" => self.data.push(value.to_string()),
                "event" => self.event = Some(value.to_string()),
                _ => {}
            }
        }

        messages
    }
}

/// Keep a subscription alive until `snapshots` is closed.
pub(crate) async fn run_subscription(channel: StateChannel, snapshots: mpsc::Sender<GameSnapshot>) {
    loop {
        match stream_once(&channel, &snapshots).await {
            Ok(()) => {}
            Err(err) => warn!(error = %err, "state stream dropped"),
        }
        if snapshots.is_closed() {
            info!("snapshot consumer gone; stopping state stream");
            break;
        }

        let delay = channel.reconnect_delay();
        info!(delay_ms = delay.as_millis() as u64, "reconnecting to state stream");
        sleep(delay).await;
    }
}

/// Consume one connection. `Ok` means the consumer went away.
async fn stream_once(
    channel: &StateChannel,
    snapshots: &mpsc::Sender<GameSnapshot>,
) -> Result<(), TransportError> {
    let response = channel
        .get(STREAM_PATH)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await
        .map_err(|source| TransportError::RequestSend {
            path: STREAM_PATH.to_string(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(TransportError::RequestStatus {
            path: STREAM_PATH.to_string(),
            status: response.status(),
        });
    }
    info!(url = %channel.base_url(), "state stream connected");

    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| TransportError::Stream { source })?;
        for message in decoder.push(&chunk) {
            match serde_json::from_str::<GameSnapshot>(&message.data) {
                Ok(snapshot) => {
                    debug!(play_id = snapshot.play_id, status = ?snapshot.status, "snapshot received");
                    if snapshots.send(snapshot).await.is_err() {
                        return Ok(());
                    }
                }
                Err(source) => {
                    let err = TransportError::MalformedSnapshot { source };
                    warn!(error = %err, "skipping message");
                }
            }
        }
    }

    Err(TransportError::StreamClosed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_messages_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"play_id\"").is_empty());
        let messages = decoder.push(b": 3}\n\n");
        assert_eq!(
            messages,
            vec![SseMessage {
                event: None,
                data: "{\"play_id\": 3}".into()
            }]
        );
    }

    #[test]
    fn ignores_comments_and_joins_multiline_data() {
        let mut decoder = SseDecoder::new();
        let messages = decoder.push(b": keep-alive\n\nevent: state\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(
            messages,
            vec![SseMessage {
                event: Some("state".into()),
                data: "a\nb".into()
            }]
        );
    }

    #[test]
    fn keeps_multibyte_characters_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let payload = "data: bốn\n\n".as_bytes();
        let (head, tail) = payload.split_at(8);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail)[0].data, "bốn");
    }

    #[test]
    fn blank_line_without_data_dispatches_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: ping\n\n").is_empty());
        assert!(decoder.push(b"\n\n").is_empty());
    }
}
