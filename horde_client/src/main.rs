//! Standalone bot client.
//!
//! Usage:
//!   cargo run -p horde_client -- [--addr 127.0.0.1:40000] [--seed 7] [--ticks 0]
//!
//! The bot connects, asks for a player, then every tick:
//! - wanders and fires at the nearest enemy it knows about,
//! - picks the first buff of any offer,
//! - asks to respawn while dead.
//!
//! `--ticks 0` runs until the server goes away.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use horde_client::client::{ClientState, GameClient};
use horde_client::input::Wander;
use horde_shared::net::ClientRpc;
use rand::{rngs::StdRng, SeedableRng};
use tokio::time::Instant;
use tracing::{info, warn};

/// Ready is re-sent when no snapshot arrived for this long (e.g. after a
/// session reset detached our dead player).
const REJOIN_AFTER: Duration = Duration::from_secs(3);

struct Args {
    addr: SocketAddr,
    seed: u64,
    ticks: u64,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut addr = "127.0.0.1:40000".to_string();
    let mut seed = 7;
    let mut ticks = 0;
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                addr = args[i + 1].clone();
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                seed = args[i + 1].parse().context("parse --seed")?;
                i += 2;
            }
            "--ticks" if i + 1 < args.len() => {
                ticks = args[i + 1].parse().context("parse --ticks")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(Args {
        addr: addr.parse().context("parse --addr")?,
        seed,
        ticks,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    let mut client = GameClient::connect(args.addr)
        .await
        .context("connect to server")?;
    client.send_ready().await?;

    let tick = Duration::from_secs_f64(1.0 / f64::from(client.tick_hz.max(1)));
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut brain = Wander::new(client.tick_hz * 2);
    let mut next = Instant::now();
    let mut last_view_tick = 0;
    let mut last_progress = Instant::now();
    let mut last_respawn_ask: Option<Instant> = None;
    let mut n: u64 = 0;

    while args.ticks == 0 || n < args.ticks {
        next += tick;
        n += 1;

        if let Err(e) = client.drain().await {
            warn!(error = %e, "connection lost");
            break;
        }
        if client.state == ClientState::Disconnected {
            break;
        }

        if client.view.last_tick() != last_view_tick {
            last_view_tick = client.view.last_tick();
            last_progress = Instant::now();
        } else if last_progress.elapsed() > REJOIN_AFTER {
            info!("no snapshots lately, asking to rejoin");
            client.view.clear();
            last_view_tick = 0;
            client.send_ready().await?;
            last_progress = Instant::now();
        }

        if let Some(choice) = client.pending_offer().map(|offer| offer[0]) {
            info!(buff = %choice.buff, level = choice.current_level, "picking buff");
            client.select_buff(choice.buff).await?;
        }

        if client.is_dead() {
            let due = last_respawn_ask.map_or(true, |at| at.elapsed() >= Duration::from_secs(1));
            if due {
                client.send_rpc(ClientRpc::RequestRespawn).await?;
                last_respawn_ask = Some(Instant::now());
            }
        } else if let Some(me) = client.me().map(|s| s.position) {
            let target = client.nearest_enemy().map(|e| e.position);
            let input = brain.next(&mut rng, me, target);
            client.send_input(input).await?;
        }

        tokio::time::sleep_until(next).await;
    }

    info!(
        ticks = n,
        kills = client.kills(),
        collected = client.pickups.collected_value(),
        inputs = client.inputs_sent(),
        "bot finished"
    );
    if client.state != ClientState::Disconnected {
        client.disconnect("bot finished").await?;
    }
    Ok(())
}
