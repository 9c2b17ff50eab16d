use std::time::Duration;

use awc::{ws, BoxedSocket};
use futures_util::StreamExt as _;
use once_cell::sync::Lazy;
use peer_session::{SignalingConfig, SignalingConfigBuilder};
use secrecy::SecretString;
use serde_json::Value;

use signaling::{
    application,
    settings::{ApplicationSettings, Settings},
};

pub const KEY: &str = "test-key";

static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "debug")
    }
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
});

pub fn enable_tracing() {
    Lazy::force(&TRACING);
}

pub type Socket = actix_codec::Framed<BoxedSocket, ws::Codec>;

pub struct TestApp {
    pub address: String,
    pub port: u16,
}

pub async fn spawn_app() -> TestApp {
    enable_tracing();
    let settings = Settings {
        application: ApplicationSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        key: SecretString::new(KEY.to_string()),
    };
    let app = application::Application::build(settings)
        .await
        .expect("Failed to build application");
    let port = app.port();
    let _ = tokio::spawn(app.run_until_stopped());
    TestApp {
        address: "127.0.0.1".to_string(),
        port,
    }
}

impl TestApp {
    pub fn base_address(&self) -> String {
        format!("http://{}:{}", &self.address, self.port)
    }

    pub fn path(&self, path: &str) -> String {
        format!("{}/{}", &self.base_address(), path)
    }

    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfigBuilder::new()
            .host(&self.address)
            .port(self.port)
            .key(KEY)
            .ice_servers(vec![])
            .build()
    }

    /// Opens a raw signaling websocket for `id`.
    pub async fn connect(&self, id: &str) -> Socket {
        let url = format!(
            "ws://{}:{}/peerjs?id={id}&key={KEY}",
            &self.address, self.port
        );
        let (_res, ws) = awc::Client::new()
            .ws(url)
            .connect()
            .await
            .expect("Failed to open websocket");
        ws
    }
}

/// Next text frame as json, skipping control frames.
pub async fn next_signal(ws: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Websocket closed")
            .expect("Websocket error");
        match frame {
            ws::Frame::Text(text) => return serde_json::from_slice(&text).unwrap(),
            ws::Frame::Close(reason) => panic!("Websocket closed: {reason:?}"),
            _ => continue,
        }
    }
}
