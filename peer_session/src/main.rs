use anyhow::Context;
use clap::Parser;
use peer_session::{
    link::{invite_url, parse_join_target},
    CollabConfig, Collaboration, PeerSession, RelayMode, SharedDocument, SignalingConfig,
    WebRtcTransport,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Edit a story template together with other peers.
#[derive(Parser, Debug)]
#[command(name = "collab")]
struct Args {
    /// Invite link or peer id of the session to join
    #[arg(long)]
    join: Option<String>,

    /// Signaling host, overrides SIGNALING_HOST
    #[arg(long)]
    host: Option<String>,

    /// Signaling port, overrides SIGNALING_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Base url invite links are built on
    #[arg(long, env = "COLLAB_APP_URL", default_value = "http://localhost:8080/")]
    app_url: Url,

    /// Every peer relays changes, not just the session owner
    #[arg(long)]
    relay_always: bool,
}

fn setup() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "debug")
    }
    tracing_subscriber::fmt::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

const HELP: &str = "commands: template <text> | set <field> <value> | show | story | peers | quit";

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    setup();
    let args = Args::parse();

    let mut config = SignalingConfig::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    info!(?config, "starting");

    let session = PeerSession::new(WebRtcTransport::new(config));
    let relay = if args.relay_always {
        RelayMode::Always
    } else {
        RelayMode::RootOnly
    };
    let collab = Collaboration::attach(&session, SharedDocument::default(), CollabConfig { relay });

    let parent = match args.join.as_deref() {
        Some(target) => Some(parse_join_target(target).context("no session id in join target")?),
        None => None,
    };
    let id = collab.start(parent).await?;
    println!("invite: {}", invite_url(&args.app_url, &id));
    println!("{HELP}");

    let mut updates = collab.document().subscribe();
    actix_rt::spawn(async move {
        while updates.changed().await.is_ok() {
            let document = updates.borrow().clone();
            info!(template = %document.template(), inputs = ?document.inputs(), "document updated");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match run_command(&collab, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => warn!(error = %format!("{e:#}"), "command failed"),
        }
    }

    collab.leave().await;
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn run_command(collab: &Collaboration, line: &str) -> anyhow::Result<bool> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "template" => collab.set_template(rest).await.map_err(report)?,
        "set" => {
            let (name, value) = rest.split_once(' ').unwrap_or((rest, ""));
            collab.set_input(name, value).await.map_err(report)?;
        }
        "show" => {
            let document = collab.document().snapshot();
            println!("template: {}", document.template());
            for (name, value) in document.inputs() {
                println!("  {name} = {value}");
            }
        }
        "story" => {
            let document = collab.document().snapshot();
            if document.is_complete() {
                println!("{}", document.story());
            } else {
                println!("fill in first: {}", document.missing_fields().join(", "));
            }
        }
        "peers" => {
            for connection in collab.session().connections().await {
                println!(
                    "{} ({:?}, up {}s)",
                    connection.remote(),
                    connection.direction(),
                    connection.opened_at().elapsed().as_secs()
                );
            }
            if let Some(parent) = collab.parent() {
                println!("joined through {parent}");
            }
            println!("collaborators: {}", collab.collaborators().len());
        }
        "quit" => return Ok(false),
        _ => println!("{HELP}"),
    }
    Ok(true)
}

fn report(e: peer_session::SendError) -> anyhow::Error {
    let failed: Vec<String> = e.failed_peers().iter().map(|p| p.to_string()).collect();
    anyhow::anyhow!("{e} (peers: {})", failed.join(", "))
}
