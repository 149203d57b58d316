use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::SharedState;

/// Subscribe to snapshot pushes and capture the current snapshot as the first message.
///
/// Subscribing before reading the state means no mutation can fall between the two.
pub async fn subscribe(state: &SharedState) -> (Option<Arc<str>>, broadcast::Receiver<Arc<str>>) {
    let receiver = state.stream().subscribe();
    let initial = match serde_json::to_string(&state.snapshot().await) {
        Ok(payload) => Some(Arc::from(payload)),
        Err(err) => {
            warn!(error = %err, "failed to serialize initial snapshot");
            None
        }
    };
    (initial, receiver)
}

/// Convert a broadcast receiver into an SSE response, forwarding snapshots and
/// logging once the client disconnects.
pub fn to_sse_stream(
    initial: Option<Arc<str>>,
    mut receiver: broadcast::Receiver<Arc<str>>,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connection = Uuid::new_v4();
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        info!(%connection, "state stream connected");
        if let Some(payload) = initial {
            if tx.send(Ok(Event::default().data(&*payload))).await.is_err() {
                return;
            }
        }
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(Event::default().data(&*payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Every snapshot is complete; the next one supersedes the skipped ones.
                            warn!(%connection, skipped, "state stream lagging");
                            continue;
                        }
                    }
                }
            }
        }
        info!(%connection, "state stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive).text("keep-alive"))
}
