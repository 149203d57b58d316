//! Runtime configuration of the client and the reference server.
//!
//! Both read an optional JSON file whose path can be overridden from the
//! environment. A missing or unreadable file falls back to built-in defaults.

use std::{
    collections::{BTreeMap, HashMap},
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, de::DeserializeOwned};
use tracing::{info, warn};

use crate::{
    audio::{drift::DEFAULT_DRIFT_THRESHOLD, simulated::DEFAULT_SIMULATED_DURATION},
    client::DEFAULT_RECONNECT_DELAY,
    dto::snapshot::Number,
    sync::{ClientRole, EngineConfig},
};

/// Default location of the client configuration.
const DEFAULT_CLIENT_CONFIG_PATH: &str = "config/client.json";
/// Environment variable that overrides [`DEFAULT_CLIENT_CONFIG_PATH`].
const CLIENT_CONFIG_PATH_ENV: &str = "LOTO_SYNC_CONFIG_PATH";
/// Default location of the server configuration.
const DEFAULT_SERVER_CONFIG_PATH: &str = "config/server.json";
/// Environment variable that overrides [`DEFAULT_SERVER_CONFIG_PATH`].
const SERVER_CONFIG_PATH_ENV: &str = "LOTO_SERVER_CONFIG_PATH";

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Settings of a headless client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Root URL of the game server.
    pub server_url: String,
    /// Part this client plays.
    pub role: ClientRole,
    /// Delay between push stream reconnection attempts.
    pub reconnect_delay: Duration,
    /// Looping background clip; no background music when absent.
    pub background_url: Option<String>,
    /// JSON key/value file holding the caller's pending queue.
    pub storage_path: PathBuf,
    /// Duration the simulated devices report for every clip.
    pub simulated_duration: f64,
    /// Background drift tolerated before a corrective seek, in seconds.
    pub drift_threshold: f64,
    /// Overrides the role's safety buffer.
    pub safety_buffer: Option<Duration>,
}

impl ClientConfig {
    /// Load the client configuration, then apply `SERVER_URL` and `LOTO_ROLE` overrides.
    pub fn load() -> Self {
        let path = resolve_config_path(CLIENT_CONFIG_PATH_ENV, DEFAULT_CLIENT_CONFIG_PATH);
        let mut config = read_config::<RawClientConfig>(&path)
            .map(Self::from)
            .unwrap_or_default();

        if let Some(url) = env::var("SERVER_URL").ok().filter(|url| !url.is_empty()) {
            config.server_url = url;
        }
        if let Ok(raw) = env::var("LOTO_ROLE") {
            match raw.parse() {
                Ok(role) => config.role = role,
                Err(err) => warn!(error = %err, "ignoring LOTO_ROLE"),
            }
        }
        config
    }

    /// Engine tunables for this client.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::for_role(self.role);
        engine.background_url = self.background_url.clone();
        engine.drift_threshold = self.drift_threshold;
        if let Some(buffer) = self.safety_buffer {
            engine.safety_buffer = buffer;
        }
        engine
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            role: ClientRole::default(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            background_url: Some("/sounds/background.mp3".into()),
            storage_path: PathBuf::from("data/client.json"),
            simulated_duration: DEFAULT_SIMULATED_DURATION,
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
            safety_buffer: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the client configuration file.
struct RawClientConfig {
    server_url: Option<String>,
    role: Option<ClientRole>,
    reconnect_delay_ms: Option<u64>,
    background_url: Option<String>,
    storage_path: Option<PathBuf>,
    simulated_duration: Option<f64>,
    drift_threshold: Option<f64>,
    safety_buffer_ms: Option<u64>,
}

impl From<RawClientConfig> for ClientConfig {
    fn from(value: RawClientConfig) -> Self {
        let defaults = Self::default();
        Self {
            server_url: value.server_url.unwrap_or(defaults.server_url),
            role: value.role.unwrap_or(defaults.role),
            reconnect_delay: value
                .reconnect_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            // An empty string switches background music off.
            background_url: match value.background_url {
                Some(url) if url.is_empty() => None,
                Some(url) => Some(url),
                None => defaults.background_url,
            },
            storage_path: value.storage_path.unwrap_or(defaults.storage_path),
            simulated_duration: value
                .simulated_duration
                .filter(|duration| *duration > 0.0)
                .unwrap_or(defaults.simulated_duration),
            drift_threshold: value.drift_threshold.unwrap_or(defaults.drift_threshold),
            safety_buffer: value.safety_buffer_ms.map(Duration::from_millis),
        }
    }
}

/// One clip of the announcement catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogClip {
    /// Where the clip is served from.
    pub url: String,
    /// Spoken label.
    #[serde(default)]
    pub text: String,
}

/// Settings of the reference server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
    /// Interval between keep-alive comments on the push stream.
    pub keep_alive: Duration,
    /// Clips available for each number; lookup picks one at random.
    pub catalog: BTreeMap<Number, Vec<CatalogClip>>,
}

impl ServerConfig {
    /// Load the server configuration, then apply the `PORT` override.
    pub fn load() -> Self {
        let path = resolve_config_path(SERVER_CONFIG_PATH_ENV, DEFAULT_SERVER_CONFIG_PATH);
        let mut config = read_config::<RawServerConfig>(&path)
            .map(Self::from)
            .unwrap_or_default();

        if let Some(port) = env::var("PORT").ok().and_then(|value| value.parse::<u16>().ok()) {
            config.port = port;
        }
        config
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            keep_alive: DEFAULT_KEEP_ALIVE,
            catalog: default_catalog(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the server configuration file.
struct RawServerConfig {
    port: Option<u16>,
    keep_alive_secs: Option<u64>,
    catalog: Option<HashMap<String, Vec<CatalogClip>>>,
}

impl From<RawServerConfig> for ServerConfig {
    fn from(value: RawServerConfig) -> Self {
        let catalog = match value.catalog {
            Some(raw) => raw
                .into_iter()
                .filter_map(|(key, clips)| match Number::parse(&key) {
                    Ok(number) => Some((number, clips)),
                    Err(err) => {
                        warn!(key, error = %err, "skipping catalog entry");
                        None
                    }
                })
                .collect(),
            None => default_catalog(),
        };
        Self {
            port: value.port.unwrap_or(DEFAULT_PORT),
            keep_alive: value
                .keep_alive_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_KEEP_ALIVE),
            catalog,
        }
    }
}

/// One clip per number under `/sounds/numbers/`.
fn default_catalog() -> BTreeMap<Number, Vec<CatalogClip>> {
    Number::all()
        .map(|number| {
            let clip = CatalogClip {
                url: format!("/sounds/numbers/{number}.mp3"),
                text: format!("Number {number}"),
            };
            (number, vec![clip])
        })
        .collect()
}

/// Read and parse `path`, logging why defaults are used when that fails.
fn read_config<R: DeserializeOwned>(path: &Path) -> Option<R> {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<R>(&contents) {
            Ok(raw) => {
                info!(path = %path.display(), "loaded config");
                Some(raw)
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to parse config; falling back to defaults"
                );
                None
            }
        },
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(
                path = %path.display(),
                "config file not found; using built-in defaults"
            );
            None
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "failed to read config; falling back to defaults"
            );
            None
        }
    }
}

/// Resolve a configuration path taking the environment override into account.
fn resolve_config_path(variable: &str, default: &str) -> PathBuf {
    env::var_os(variable)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_client_config_fills_gaps_with_defaults() {
        let raw: RawClientConfig =
            serde_json::from_str(r#"{"role": "caller", "background_url": "", "reconnect_delay_ms": 500}"#).unwrap();
        let config = ClientConfig::from(raw);

        assert_eq!(config.role, ClientRole::Caller);
        assert_eq!(config.background_url, None);
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);

        let engine = config.engine_config();
        assert_eq!(engine.safety_buffer, Duration::from_secs(10));
        assert_eq!(engine.background_url, None);
    }

    #[test]
    fn raw_server_catalog_skips_invalid_keys() {
        let raw: RawServerConfig = serde_json::from_str(
            r#"{"port": 9000, "catalog": {"07": [{"url": "/sounds/a.mp3", "text": "seven"}], "abc": []}}"#,
        )
        .unwrap();
        let config = ServerConfig::from(raw);

        assert_eq!(config.port, 9000);
        assert_eq!(config.keep_alive, DEFAULT_KEEP_ALIVE);
        assert_eq!(config.catalog.len(), 1);
        let seven = &config.catalog[&Number::new(7).unwrap()];
        assert_eq!(seven[0].url, "/sounds/a.mp3");
    }

    #[test]
    fn default_catalog_covers_every_number() {
        let config = ServerConfig::default();
        assert_eq!(config.catalog.len(), 100);
        assert_eq!(
            config.catalog[&Number::new(7).unwrap()][0].url,
            "/sounds/numbers/07.mp3"
        );
    }
}
