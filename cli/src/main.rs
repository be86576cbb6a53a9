use std::time::Duration;

use clap::{Parser, Subcommand};
use client::{Config, Event, RelayClient};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("connect failed: {0}")]
    Connect(#[from] client::ConnectError),
    #[error("send failed: {0}")]
    Send(#[from] client::SendError),
    #[error("could not render event: {0}")]
    Render(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "relay-cli", about = "Signal relay peer client CLI")]
struct Cli {
    /// Relay signal URL to register with.
    #[arg(long, env = "RELAY_SIG_URL", default_value = "ws://127.0.0.1:9000")]
    sig_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print relay events as JSON until interrupted.
    ///
    /// Lines of the form `send <peer-url> <text>` on stdin are delivered
    /// through the relay without interrupting the poll loop.
    Watch {
        /// Poll interval for draining queued events.
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },
    /// Connect, deliver one message to a peer, and exit.
    Send {
        /// Destination peer address, as printed by `watch` on the other side.
        peer_url: String,
        /// Message payload.
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let client = RelayClient::with_config(Config::from_env());
    let peer_url = client.connect(&cli.sig_url).await?;
    eprintln!("registered as {peer_url}");

    match cli.command {
        Command::Watch { poll_ms } => run_watch(&client, poll_ms).await,
        Command::Send { peer_url, text } => run_send(&client, &peer_url, &text).await,
    }
}

async fn run_watch(client: &RelayClient, poll_ms: u64) -> Result<(), CliError> {
    let mut ticker = tokio::time::interval(Duration::from_millis(poll_ms.max(1)));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in client.get_events() {
                    print_event(&event)?;
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => handle_line(client, &line).await,
                    Ok(None) | Err(_) => stdin_open = false,
                }
            }
        }
    }
}

/// Dispatch one stdin command; failures are reported, never fatal.
async fn handle_line(client: &RelayClient, line: &str) {
    let mut parts = line.trim().splitn(3, ' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(""), None, None) => {}
        (Some("send"), Some(peer_url), Some(text)) => match client.send(peer_url, text).await {
            Ok(()) => eprintln!("delivered to {peer_url}"),
            Err(error) => eprintln!("send failed: {error}"),
        },
        _ => eprintln!("usage: send <peer-url> <text>"),
    }
}

async fn run_send(client: &RelayClient, peer_url: &str, text: &str) -> Result<(), CliError> {
    client.send(peer_url, text).await?;
    eprintln!("delivered to {peer_url}");
    client.disconnect().await;
    Ok(())
}

fn print_event(event: &Event) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(event)?;
    println!("{rendered}");
    Ok(())
}
