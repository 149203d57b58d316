//! Connection to the authoritative server: push subscription and mutations.

pub mod sse;

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, RequestBuilder};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::{
    dto::{
        requests::{
            Ack, BackgroundMusicRequest, CallRequest, EmptyRequest, LookupResponse, PauseRequest,
            SpecialRequest,
        },
        snapshot::{AudioSettings, GameSnapshot, Number},
    },
    error::TransportError,
};

/// Fixed delay between a dropped push stream and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Mutations and queries the engine issues against the server.
///
/// None of these wait for the resulting snapshot; the push stream delivers it.
pub trait GameApi: Send + Sync {
    /// Start announcing a number.
    fn call(&self, request: CallRequest) -> BoxFuture<'static, Result<Ack, TransportError>>;
    /// Report the current announcement as finished.
    fn done(&self) -> BoxFuture<'static, Result<Ack, TransportError>>;
    /// Start a special announcement.
    fn special(&self, request: SpecialRequest) -> BoxFuture<'static, Result<Ack, TransportError>>;
    /// Set the global pause flag.
    fn pause(&self, paused: bool) -> BoxFuture<'static, Result<Ack, TransportError>>;
    /// Share audio settings with every client.
    fn volume(&self, settings: AudioSettings) -> BoxFuture<'static, Result<Ack, TransportError>>;
    /// Switch background music.
    fn background_music(&self, enabled: bool) -> BoxFuture<'static, Result<Ack, TransportError>>;
    /// Start a new game.
    fn reset(&self) -> BoxFuture<'static, Result<Ack, TransportError>>;
    /// Find a clip announcing `number`.
    fn lookup(&self, number: Number) -> BoxFuture<'static, Result<LookupResponse, TransportError>>;
}

/// HTTP client for one server: owns the push subscription and the request channel.
#[derive(Clone)]
pub struct StateChannel {
    client: Client,
    base_url: Arc<str>,
    reconnect_delay: Duration,
}

impl StateChannel {
    /// Build a channel for the server at `base_url`.
    pub fn new(base_url: &str, reconnect_delay: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|source| TransportError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            reconnect_delay,
        })
    }

    /// Server root.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Delay applied before every reconnection attempt.
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// Stream snapshots into `snapshots` until it is closed, reconnecting on failure.
    pub fn subscribe(&self, snapshots: mpsc::Sender<GameSnapshot>) -> SubscriptionHandle {
        let task = tokio::spawn(sse::run_subscription(self.clone(), snapshots));
        SubscriptionHandle { task }
    }

    /// POST `payload` to `path` and decode the acknowledgement.
    pub async fn request<T, R>(&self, path: &str, payload: &T) -> Result<R, TransportError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(path, "sending mutation");
        let response = self
            .client
            .post(self.url(path))
            .json(payload)
            .send()
            .await
            .map_err(|source| TransportError::RequestSend {
                path: path.to_string(),
                source,
            })?;
        decode(path, response).await
    }

    /// GET `path` with `query` parameters and decode the body.
    pub async fn query<Q, R>(&self, path: &str, query: &Q) -> Result<R, TransportError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .get(path)
            .query(query)
            .send()
            .await
            .map_err(|source| TransportError::RequestSend {
                path: path.to_string(),
                source,
            })?;
        decode(path, response).await
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post_boxed<T>(&self, path: &'static str, payload: T) -> BoxFuture<'static, Result<Ack, TransportError>>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let channel = self.clone();
        Box::pin(async move { channel.request(path, &payload).await })
    }
}

async fn decode<R>(path: &str, response: reqwest::Response) -> Result<R, TransportError>
where
    R: DeserializeOwned,
{
    if !response.status().is_success() {
        return Err(TransportError::RequestStatus {
            path: path.to_string(),
            status: response.status(),
        });
    }
    response
        .json::<R>()
        .await
        .map_err(|source| TransportError::DecodeResponse {
            path: path.to_string(),
            source,
        })
}

impl GameApi for StateChannel {
    fn call(&self, request: CallRequest) -> BoxFuture<'static, Result<Ack, TransportError>> {
        self.post_boxed("/api/game/call", request)
    }

    fn done(&self) -> BoxFuture<'static, Result<Ack, TransportError>> {
        self.post_boxed("/api/game/done", EmptyRequest {})
    }

    fn special(&self, request: SpecialRequest) -> BoxFuture<'static, Result<Ack, TransportError>> {
        self.post_boxed("/api/game/special", request)
    }

    fn pause(&self, paused: bool) -> BoxFuture<'static, Result<Ack, TransportError>> {
        self.post_boxed("/api/game/pause", PauseRequest { paused })
    }

    fn volume(&self, settings: AudioSettings) -> BoxFuture<'static, Result<Ack, TransportError>> {
        self.post_boxed("/api/game/volume", settings)
    }

    fn background_music(&self, enabled: bool) -> BoxFuture<'static, Result<Ack, TransportError>> {
        self.post_boxed("/api/game/bg_music", BackgroundMusicRequest { enabled })
    }

    fn reset(&self) -> BoxFuture<'static, Result<Ack, TransportError>> {
        self.post_boxed("/api/game/reset", EmptyRequest {})
    }

    fn lookup(&self, number: Number) -> BoxFuture<'static, Result<LookupResponse, TransportError>> {
        let channel = self.clone();
        Box::pin(async move {
            channel
                .query("/api/call_number", &[("number", number.value())])
                .await
        })
    }
}

/// Running push subscription; aborted on drop.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stop the subscription now.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Whether the reconnect loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(all(test, feature = "server"))]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::{config::ServerConfig, dto::snapshot::GameStatus, routes, state::AppState};

    async fn serve(listener: TcpListener) -> JoinHandle<()> {
        let state = AppState::new(ServerConfig::default());
        let app = routes::router(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        })
    }

    async fn next_snapshot(rx: &mut mpsc::Receiver<GameSnapshot>) -> GameSnapshot {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("snapshot in time")
            .expect("subscription alive")
    }

    #[tokio::test]
    async fn subscription_receives_initial_and_mutated_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve(listener).await;

        let channel = StateChannel::new(&format!("http://{addr}"), Duration::from_millis(50)).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let _subscription = channel.subscribe(tx);

        let initial = next_snapshot(&mut rx).await;
        assert_eq!(initial.play_id, 0);
        assert_eq!(initial.status, GameStatus::Idle);

        let number = Number::new(42).unwrap();
        let lookup = channel.lookup(number).await.unwrap();
        assert!(lookup.found);
        let url = lookup.audio_url.unwrap();
        channel.call(CallRequest::new(number, url.clone(), 1.0)).await.unwrap();

        let playing = next_snapshot(&mut rx).await;
        assert_eq!(playing.play_id, 1);
        assert_eq!(playing.status, GameStatus::Playing);
        assert_eq!(playing.current_number, Some(number));
        assert_eq!(playing.audio_url.as_deref(), Some(url.as_str()));

        channel.done().await.unwrap();
        let shown = next_snapshot(&mut rx).await;
        assert_eq!(shown.status, GameStatus::Showing);
        assert!(shown.is_called(number));
        server.abort();
    }

    #[tokio::test]
    async fn invalid_mutation_is_reported_as_status_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve(listener).await;
        let channel = StateChannel::new(&format!("http://{addr}"), Duration::from_millis(50)).unwrap();

        let result = channel
            .special(SpecialRequest {
                audio_url: String::new(),
                playback_rate: 1.0,
            })
            .await;
        assert!(matches!(
            result,
            Err(TransportError::RequestStatus { status, .. }) if status == reqwest::StatusCode::BAD_REQUEST
        ));
        server.abort();
    }

    #[tokio::test]
    async fn mutations_run_on_spawned_tasks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve(listener).await;
        let channel = StateChannel::new(&format!("http://{addr}"), Duration::from_millis(50)).unwrap();

        let number = Number::new(7).unwrap();
        let call = tokio::spawn(channel.call(CallRequest::new(number, "/sounds/numbers/07.mp3", 1.0)));
        assert_eq!(call.await.unwrap().unwrap(), Ack::ok());
        let settings = tokio::spawn(channel.volume(AudioSettings::default()));
        assert_eq!(settings.await.unwrap().unwrap(), Ack::ok());
        server.abort();
    }

    #[tokio::test]
    async fn subscription_reconnects_after_server_comes_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = StateChannel::new(&format!("http://{addr}"), Duration::from_millis(50)).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let _subscription = channel.subscribe(tx);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        let server = serve(listener).await;

        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot.play_id, 0);
        server.abort();
    }
}
