use std::env;
use std::time::Duration;

use log::info;
use url::Url;

pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 8080;
/// SockJS exposes the raw WebSocket transport under `<endpoint>/websocket`.
pub const DEFAULT_WS_PATH: &str = "/ws/websocket";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub ws_url: Url,
    pub unread_poll_interval: Duration,
    pub http_timeout: Duration,
    pub ws_max_retry_attempts: u32,
    /// Keep the bearer token in the OS keyring between runs.
    pub persist_session: bool,
}

impl ClientConfig {
    /// Config for an explicit backend, with the default timings and no session persistence.
    pub fn new(api_url: Url, ws_url: Url) -> Self {
        Self {
            api_url,
            ws_url,
            unread_poll_interval: Duration::from_secs(30),
            http_timeout: Duration::from_secs(30),
            ws_max_retry_attempts: 5,
            persist_session: false,
        }
    }

    pub fn from_env() -> Result<Self, url::ParseError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, url::ParseError> {
        let raw_api = get("NEXT_PUBLIC_API_URL")
            .or_else(|| get("API_URL"))
            .unwrap_or_else(|| {
                let host = get("API_HOST").unwrap_or_else(|| DEFAULT_API_HOST.to_string());
                let port = get("API_PORT").and_then(|p| p.parse().ok()).unwrap_or(DEFAULT_API_PORT);
                format!("http://{}:{}", host, port)
            });
        let api_url = Url::parse(&raw_api)?;
        let ws_url = match get("WS_URL") {
            Some(raw) => Url::parse(&raw)?,
            None => {
                let path = get("WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.to_string());
                derive_ws_url(&api_url, &path)?
            }
        };

        let config = Self {
            api_url,
            ws_url,
            unread_poll_interval: positive_secs(&get, "UNREAD_POLL_SECS", 30),
            http_timeout: positive_secs(&get, "HTTP_TIMEOUT_SECS", 30),
            ws_max_retry_attempts: get("WS_MAX_RETRY").and_then(|v| v.parse().ok()).unwrap_or(5),
            persist_session: get("PERSIST_SESSION").map(|v| v == "true" || v == "1").unwrap_or(true),
        };
        info!("[CONFIG] API at {}, WebSocket at {}", config.api_url, config.ws_url);
        Ok(config)
    }
}

// Zero or unparseable values fall back to the default.
fn positive_secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Duration {
    let secs = get(key).and_then(|v| v.parse::<u64>().ok()).filter(|s| *s > 0);
    Duration::from_secs(secs.unwrap_or(default))
}

/// Same origin as the API, with the scheme switched to ws/wss.
pub fn derive_ws_url(api_url: &Url, path: &str) -> Result<Url, url::ParseError> {
    let scheme = if api_url.scheme() == "https" { "wss" } else { "ws" };
    let host = api_url.host_str().ok_or(url::ParseError::EmptyHost)?;
    let origin = match api_url.port() {
        Some(port) => format!("{}://{}:{}", scheme, host, port),
        None => format!("{}://{}", scheme, host),
    };
    Url::parse(&origin)?.join(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_local_backend() {
        let cfg = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.api_url.as_str(), "http://127.0.0.1:8080/");
        assert_eq!(cfg.ws_url.as_str(), "ws://127.0.0.1:8080/ws/websocket");
        assert_eq!(cfg.unread_poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn public_api_url_wins_and_tls_maps_to_wss() {
        let cfg = ClientConfig::from_lookup(lookup(&[
            ("NEXT_PUBLIC_API_URL", "https://api.artisans.example"),
            ("API_URL", "http://ignored:1"),
        ]))
        .unwrap();
        assert_eq!(cfg.api_url.host_str(), Some("api.artisans.example"));
        assert_eq!(cfg.ws_url.as_str(), "wss://api.artisans.example/ws/websocket");
    }

    #[test]
    fn host_derived_origin() {
        let cfg = ClientConfig::from_lookup(lookup(&[
            ("API_HOST", "10.0.0.5"),
            ("API_PORT", "9000"),
            ("WS_PATH", "/ws"),
        ]))
        .unwrap();
        assert_eq!(cfg.api_url.as_str(), "http://10.0.0.5:9000/");
        assert_eq!(cfg.ws_url.as_str(), "ws://10.0.0.5:9000/ws");
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let cfg = ClientConfig::from_lookup(lookup(&[
            ("UNREAD_POLL_SECS", "0"),
            ("HTTP_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.unread_poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.http_timeout, Duration::from_secs(30));

        let cfg = ClientConfig::from_lookup(lookup(&[("UNREAD_POLL_SECS", "5")])).unwrap();
        assert_eq!(cfg.unread_poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn bad_url_is_an_error() {
        assert!(ClientConfig::from_lookup(lookup(&[("API_URL", "not a url")])).is_err());
    }
}
