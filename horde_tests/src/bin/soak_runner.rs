//! Headless soak run of the simulation with scripted players.
//!
//! Usage:
//!   cargo run -p horde_tests --bin soak_runner -- [--players 4] [--ticks 6000] [--seed 42]
//!
//! Halfway through, every player leaves so the session goes through a
//! reset, then a fresh group joins. Prints a JSON summary to stdout.

use std::env;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use horde_client::input::{build_input, Wander};
use horde_server::SessionPhase;
use horde_shared::{
    components::{Enemy, Player, Position},
    config::EngineConfig,
    net::{ClientRpc, ConnectionId},
};
use horde_tests::harness::SimHarness;
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tracing::info;

struct Args {
    players: usize,
    ticks: u64,
    seed: u64,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut out = Args {
        players: 4,
        ticks: 6000,
        seed: 42,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i + 1 < args.len() {
        match args[i].as_str() {
            "--players" => out.players = args[i + 1].parse().context("parse --players")?,
            "--ticks" => out.ticks = args[i + 1].parse().context("parse --ticks")?,
            "--seed" => out.seed = args[i + 1].parse().context("parse --seed")?,
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    Ok(out)
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    started_at: String,
    finished_at: String,
    seed: u64,
    players: usize,
    ticks: u64,
    wall_ms: u128,
    kills: usize,
    enemies_spawned: usize,
    pickups_dropped: usize,
    pickups_claimed: usize,
    points_claimed: u64,
    offers_opened: usize,
    selections: usize,
    deaths: usize,
    respawns: usize,
    resets: u32,
    paused_ticks: u64,
    dropped_rpcs: usize,
    final_phase: String,
    final_enemies: usize,
}

struct Bot {
    conn: ConnectionId,
    brain: Wander,
}

fn join_all(h: &mut SimHarness, n: usize) -> Vec<Bot> {
    (0..n)
        .map(|_| Bot {
            conn: h.join(),
            brain: Wander::new(40),
        })
        .collect()
}

fn drive(h: &mut SimHarness, bots: &mut [Bot], rng: &mut StdRng) {
    let enemies: Vec<_> = h
        .sim()
        .world()
        .query::<Enemy>()
        .filter_map(|(id, _)| h.position_of(id))
        .collect();

    for bot in bots.iter_mut() {
        let Some(player) = h.player(bot.conn) else {
            continue;
        };
        if let Some(offer) = h.offer(bot.conn) {
            h.rpc(
                bot.conn,
                ClientRpc::SelectBuff {
                    buff_type_id: offer.choices[0].id(),
                },
            );
            continue;
        }
        let alive = h
            .sim()
            .world()
            .get::<Player>(player)
            .is_some_and(Player::is_alive);
        if !alive {
            h.rpc(bot.conn, ClientRpc::RequestRespawn);
            continue;
        }
        let Some(me) = h.sim().world().get::<Position>(player).map(|p| p.0) else {
            continue;
        };
        let target = enemies
            .iter()
            .copied()
            .min_by(|a, b| a.distance_sq(me).total_cmp(&b.distance_sq(me)));
        let input = bot.brain.next(rng, me, target);
        h.input(bot.conn, build_input(input));
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let cfg = EngineConfig {
        seed: args.seed,
        ..Default::default()
    };
    let mut h = SimHarness::with_config(cfg);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut summary = Summary {
        started_at: Utc::now().to_rfc3339(),
        seed: args.seed,
        players: args.players,
        ticks: args.ticks,
        ..Default::default()
    };
    let wall = Instant::now();

    let leave_at = args.ticks / 2;
    let rejoin_at = leave_at + 10;
    let mut bots = join_all(&mut h, args.players);

    for tick in 1..=args.ticks {
        if tick == leave_at {
            for bot in bots.drain(..) {
                h.leave(bot.conn);
            }
            info!(tick, "all players left");
        }
        if tick == rejoin_at {
            bots = join_all(&mut h, args.players);
            info!(tick, "new group joined");
        }
        drive(&mut h, &mut bots, &mut rng);

        let report = h.step();
        summary.kills += report.kills.len();
        summary.enemies_spawned += report.enemies_spawned;
        summary.pickups_dropped += report.pickups_dropped.len();
        summary.pickups_claimed += report.pickups_claimed.len();
        summary.points_claimed += u64::from(report.points_claimed());
        summary.offers_opened += report.offers_opened.len();
        summary.selections += report.selections.len();
        summary.deaths += report.deaths.len();
        summary.respawns += report.respawns.len();
        summary.dropped_rpcs += report.dropped_rpcs.len();
        if report.paused {
            summary.paused_ticks += 1;
        }
        h.flush();
    }

    let sim = h.sim();
    summary.resets = sim.session().resets;
    summary.final_phase = sim.session().phase.to_string();
    summary.final_enemies = sim.world().count::<Enemy>();
    summary.wall_ms = wall.elapsed().as_millis();
    summary.finished_at = Utc::now().to_rfc3339();
    if sim.session().phase == SessionPhase::Resetting {
        info!("finished mid-reset");
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
