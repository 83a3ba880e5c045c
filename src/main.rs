use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roster_chat::config::DEFAULT_PORT;
use roster_chat::ui::ConsoleUi;
use roster_chat::{ChatError, Client, ClientConfig, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "roster-chat", version, about = "TCP chat with a live roster")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the chat server
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0")]
        addr: String,

        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Drop clients that stay silent this many seconds (off by default)
        #[arg(long)]
        idle_timeout: Option<u64>,
    },
    /// Chat from the terminal
    Connect {
        /// Server address
        #[arg(default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roster_chat=info")),
        )
        .init();

    match cli.command {
        Command::Serve {
            addr,
            port,
            idle_timeout,
        } => serve(addr, port, idle_timeout).await,
        Command::Connect { server } => connect(server).await,
    }
}

async fn serve(addr: String, port: u16, idle_timeout: Option<u64>) -> Result<(), ChatError> {
    let mut builder = ServerConfig::builder().addr(addr).port(port);
    if let Some(secs) = idle_timeout {
        builder = builder.idle_timeout(Duration::from_secs(secs));
    }

    let server = Server::bind(builder.build()).await?;

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

async fn connect(server: String) -> Result<(), ChatError> {
    let client = Client::connect(&ClientConfig::new(server), Arc::new(ConsoleUi)).await?;

    // std's stdin is shared with the name prompt, so keep reading it on a
    // plain thread rather than mixing in tokio's stdin. The thread is left
    // detached: a pending stdin read must not hold up process exit.
    let (line_tx, mut lines) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) if line.trim() == "/quit" => break,
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match client.send_text(&line).await {
                    Err(ChatError::FrameTooLong(limit)) => {
                        eprintln!("* message not sent: longer than {limit} bytes");
                    }
                    sent => sent?,
                },
                None => break,
            },
            _ = client.disconnected() => return Ok(()),
        }
    }

    client.close().await
}
