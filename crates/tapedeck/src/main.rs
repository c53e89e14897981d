//! Tapedeck CLI
//!
//! Starts a recording session on one tape and keeps the proxy up until
//! Ctrl-C, then saves the tape.
//!
//! # Usage
//!
//! ```bash
//! # Record or replay tapes/github.yaml on an ephemeral port
//! tapedeck --tape github
//!
//! # Replay only, on a fixed port, with settings from a file
//! tapedeck --config tapedeck.yaml --tape github --mode read_only --port 8080
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tapedeck::config::Config;
use tapedeck::session::{Recorder, TapeOptions};
use tapedeck::tape::TapeMode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tapedeck")]
#[command(author, version, about = "Record HTTP(S) traffic to tapes and replay it")]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, env = "TAPEDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Name of the tape to insert
    #[arg(short, long)]
    tape: String,

    /// Tape mode for this session, e.g. read_only or read_write
    #[arg(short, long)]
    mode: Option<TapeMode>,

    /// Listen port; 0 picks a free one
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding tape files
    #[arg(long)]
    tape_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tapedeck=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if let Some(root) = args.tape_root {
        config.tape.root = root;
    }
    config.validate()?;

    let create_on_startup = config.proxy.create_on_startup;
    let recorder = Recorder::new(config).context("failed to set up recorder")?;
    if !create_on_startup {
        recorder.start_server().await?;
    }

    let options = TapeOptions {
        mode: args.mode,
        match_rule: None,
    };
    let tape = recorder
        .start(&args.tape, options)
        .await
        .with_context(|| format!("failed to start session on tape '{}'", args.tape))?;

    if let Some(addr) = recorder.proxy_addr() {
        println!("Proxy listening on http://{addr}");
    }
    println!("Tape '{}' inserted in {} mode", tape.name(), tape.mode());
    if let Some(pem) = recorder.ca_cert_pem() {
        info!("Clients must trust this CA for HTTPS interception:\n{}", pem);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    let saved = recorder.stop().await?;
    if recorder.is_running() {
        recorder.stop_server().await?;
    }
    if saved {
        println!("Saved tape '{}'", tape.name());
    }
    Ok(())
}
