use std::{env, fmt, str::FromStr, time::Duration};

use secrecy::{ExposeSecret, SecretString};
use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::PeerId;

pub const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },

    #[error("invalid signaling url")]
    Url(#[from] url::ParseError),
}

/// Where the signaling backend lives and how to talk to it.
#[derive(Clone, serde::Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub key: SecretString,
    pub ping_interval_secs: u64,
    pub ice_servers: Vec<String>,
}

impl fmt::Debug for SignalingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("ping_interval_secs", &self.ping_interval_secs)
            .field("ice_servers", &self.ice_servers)
            .finish()
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            secure: false,
            key: SecretString::new("peerjs".to_string()),
            ping_interval_secs: 15,
            ice_servers: vec![DEFAULT_STUN.to_string()],
        }
    }
}

fn var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var: name, value }),
        Err(_) => Ok(None),
    }
}

impl SignalingConfig {
    /// Reads `SIGNALING_*` variables, loading a `.env` file first if there
    /// is one. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let mut builder = SignalingConfigBuilder::new();
        if let Some(host) = var::<String>("SIGNALING_HOST")? {
            builder = builder.host(host);
        }
        if let Some(port) = var("SIGNALING_PORT")? {
            builder = builder.port(port);
        }
        if let Some(secure) = var("SIGNALING_SECURE")? {
            builder = builder.secure(secure);
        }
        if let Some(key) = var::<String>("SIGNALING_KEY")? {
            builder = builder.key(key);
        }
        if let Some(secs) = var("SIGNALING_PING_SECS")? {
            builder = builder.ping_interval_secs(secs);
        }
        Ok(builder.build())
    }

    /// Websocket url that registers `id` with the backend.
    pub fn socket_url(&self, id: &PeerId) -> Result<Url, ConfigError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}/peerjs", self.host, self.port))?;
        url.query_pairs_mut()
            .append_pair("key", self.key.expose_secret())
            .append_pair("id", id.as_str());
        Ok(url)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Host candidates only when no servers are configured.
    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        if self.ice_servers.is_empty() {
            return vec![];
        }
        vec![RTCIceServer {
            urls: self.ice_servers.clone(),
            ..Default::default()
        }]
    }
}

#[derive(Debug, Default)]
pub struct SignalingConfigBuilder {
    config: SignalingConfig,
}

impl SignalingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> SignalingConfig {
        self.config
    }

    pub fn host<S: AsRef<str>>(mut self, host: S) -> Self {
        self.config.host = host.as_ref().to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.config.secure = secure;
        self
    }

    pub fn key<S: AsRef<str>>(mut self, key: S) -> Self {
        self.config.key = SecretString::new(key.as_ref().to_string());
        self
    }

    pub fn ping_interval_secs(mut self, secs: u64) -> Self {
        self.config.ping_interval_secs = secs;
        self
    }

    pub fn ice_servers(mut self, ice_servers: Vec<String>) -> Self {
        self.config.ice_servers = ice_servers;
        self
    }
}
