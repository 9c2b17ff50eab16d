use clap::Parser;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use signaling::settings::{ApplicationSettings, Settings};

/// Signaling backend for collaborative peer sessions.
#[derive(Parser, Debug)]
#[command(name = "signaling")]
struct Args {
    #[arg(long, env = "SIGNALING_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "SIGNALING_PORT", default_value_t = 9000)]
    port: u16,

    /// Application key clients have to present
    #[arg(long, env = "SIGNALING_KEY", default_value = "peerjs", hide_env_values = true)]
    key: String,
}

fn setup() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "debug")
    }
    tracing_subscriber::fmt::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    setup();
    let args = Args::parse();
    let settings = Settings {
        application: ApplicationSettings {
            host: args.host,
            port: args.port,
        },
        key: SecretString::new(args.key),
    };
    signaling::application::Application::build(settings)
        .await?
        .run_until_stopped()
        .await?;
    Ok(())
}
