//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p horde_server -- [--config server.json] [--addr 127.0.0.1:40000] [--tick-hz 20] [--seed 42]
//!
//! Console commands:
//!   status [json]     - Show session and connection summary
//!   kick <connection> - Drop a connection (e.g. `kick c3`)
//!   reset             - Force a session reset
//!   <cvar> [value]    - Read or set a cvar (`cvarlist` shows all)
//!   quit              - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::Context;
use horde_server::GameServer;
use horde_shared::config::EngineConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            EngineConfig::load(Path::new(path))?
        }
        None => EngineConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => i += 2,
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("parse --tick-hz")?;
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                cfg.seed = args[i + 1].parse().context("parse --seed")?;
                i += 2;
            }
            other => {
                warn!(arg = other, "ignoring unknown argument");
                i += 1;
            }
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, seed = cfg.seed, "Starting server");

    let mut server = GameServer::bind(cfg).await.context("bind server")?;
    info!(local = %server.local_addr(), "Server listening");

    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'cvarlist' for settings, 'quit' to exit.");
    println!();

    server.run().await
}
