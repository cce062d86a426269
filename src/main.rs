use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use collabmap::access::{AccessError, Role, release_grant, request_grant};
use collabmap::beacon::HttpBeacon;
use collabmap::channel::ChannelError;
use collabmap::channel::ws::WsTransport;
use collabmap::cli::{Command as Line, CommandError, describe_action, describe_presence, parse_command};
use collabmap::config::{ConfigError, RelayConfig, SeedChat, SessionConfig};
use collabmap::envelope::DEFAULT_USER_NAME;
use collabmap::relay::{self, RelayError};
use collabmap::session::{ConnectionState, SessionController};

const BEACON_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Parser, Debug)]
#[command(name = "collabmap", about = "Realtime collaboration relay and client for shared mind maps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server.
    Serve(ServeArgs),
    /// Join a chat's collaboration session from the terminal.
    Join(JoinArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Overrides `PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides `DATABASE_URL`. Without either, access records live in memory.
    #[arg(long)]
    database_url: Option<String>,

    /// Seed the in-memory store with `CHAT:OWNER[:collaborative|:private]`.
    /// Repeatable; adds to `COLLAB_SEED_CHATS`.
    #[arg(long = "chat", value_name = "CHAT:OWNER[:FLAG]", value_parser = SeedChat::parse)]
    chats: Vec<SeedChat>,
}

#[derive(Args, Debug)]
struct JoinArgs {
    /// Overrides `COLLAB_RELAY_URL`.
    #[arg(long)]
    relay_url: Option<String>,

    #[arg(long)]
    chat: String,

    #[arg(long)]
    user: String,

    #[arg(long, default_value = DEFAULT_USER_NAME)]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Serve(args) => run_serve(args).await,
        Command::Join(args) => run_join(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<(), AppError> {
    let mut config = RelayConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.database_url.is_some() {
        config.database_url = args.database_url;
    }
    config.seed_chats.extend(args.chats);
    relay::serve(config).await?;
    Ok(())
}

async fn run_join(args: JoinArgs) -> Result<(), AppError> {
    let mut config = SessionConfig::from_env()?;
    if let Some(url) = &args.relay_url {
        config = config.with_relay_url(url)?;
    }

    let http = reqwest::Client::new();
    let grant = request_grant(&http, &config.relay_url, &args.chat, &args.user).await?;
    info!(chat_id = %args.chat, role = grant.role().as_str(), "access granted");

    let transport = Arc::new(WsTransport::new(&config.relay_url, config.event_buffer, config.subscribe_timeout)?);
    let beacon = Arc::new(HttpBeacon::new(http.clone(), &config.relay_url));
    let relay_url = config.relay_url.clone();

    let mut controller = SessionController::new(transport, beacon.clone(), config);
    controller.on_action(|env| println!("{}", describe_action(env)));
    controller.on_presence_change(|participants| println!("{}", describe_presence(participants)));

    let handle = controller.join(&grant, &args.name).await;
    let mut state_rx = handle.watch_state();
    let mut lines = stdin_lines();

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match parse_command(&line) {
                    Ok(Line::Send(draft)) => handle.broadcast(draft),
                    Ok(Line::Who) => println!("{}", describe_presence(&handle.participants())),
                    Ok(Line::Quit) => break,
                    Err(CommandError::Empty) => {}
                    Err(e) => eprintln!("{e}"),
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow();
                info!(?state, "session state");
                if matches!(state, ConnectionState::Errored | ConnectionState::TimedOut | ConnectionState::Closed) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.leave().await;
    beacon.drain(BEACON_DRAIN_TIMEOUT).await;
    if grant.role() == Role::Owner
        && let Err(e) = release_grant(&http, &relay_url, &args.chat, &args.user).await
    {
        warn!(chat_id = %args.chat, error = %e, "failed to end session");
    }
    Ok(())
}

/// Read stdin on a plain thread so a pending read never holds up runtime
/// shutdown.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}
