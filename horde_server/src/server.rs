//! Network front-end around the authoritative [`Simulation`].
//!
//! Tasks:
//! - one accept task that performs the versioned handshake
//! - one reader and one writer task per connection
//! - the simulation, driven by the owner of [`GameServer`]
//!
//! Network tasks reach the simulation only through a bounded queue of
//! [`NetEvent`]s, drained at the start of every tick. After the outbound
//! flush, RPCs and importance-filtered snapshots go back out through each
//! connection's writer queue. A slow or dead peer never blocks a tick.
//!
//! Determinism notes:
//! - Gameplay runs in a fixed timestep with a seeded RNG.
//! - Wall-clock time only decides *when* a tick runs, never what it does.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use horde_shared::{
    components::{Enemy, Pickup, Player, Projectile},
    config::EngineConfig,
    console::{parse_command_line, Console, CvarFlags, CvarValue},
    net::{ConnectionId, NetMsg, ReliableConn, ReliableListener, PROTOCOL_VERSION},
};
use serde::Serialize;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    channel::InboundKind,
    report::TickReport,
    scheduler::TickScheduler,
    sim::Simulation,
};

/// How long a fresh socket may take to say hello.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection writer queue depth.
const PEER_QUEUE: usize = 256;

/// What the network tasks report to the simulation.
#[derive(Debug)]
pub enum NetEvent {
    Connected {
        id: ConnectionId,
        addr: SocketAddr,
        outbound: mpsc::Sender<NetMsg>,
    },
    Message {
        id: ConnectionId,
        msg: NetMsg,
    },
    Closed {
        id: ConnectionId,
    },
}

struct Peer {
    addr: SocketAddr,
    outbound: mpsc::Sender<NetMsg>,
}

/// Console/tooling view of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub connection: u32,
    pub addr: String,
    pub player: Option<u64>,
}

/// Console/tooling view of the server (`status json`).
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub tick: u64,
    pub phase: String,
    pub resets: u32,
    pub selecting: u32,
    pub players_alive: usize,
    pub enemies: usize,
    pub projectiles: usize,
    pub pickups: usize,
    pub peers: Vec<PeerStatus>,
}

/// Game server.
pub struct GameServer {
    pub cfg: EngineConfig,
    pub console: Console,
    sim: Simulation,
    local_addr: SocketAddr,
    net_rx: mpsc::Receiver<NetEvent>,
    peers: HashMap<ConnectionId, Peer>,
    console_rx: Option<mpsc::Receiver<String>>,
    accept_task: JoinHandle<()>,
    quit: bool,
}

impl GameServer {
    /// Binds the listener and starts accepting connections.
    pub async fn bind(cfg: EngineConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = ReliableListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (net_tx, net_rx) = mpsc::channel(cfg.input_channel_capacity.max(1));
        let accept_task = tokio::spawn(accept_loop(listener, net_tx, cfg.tick_hz));

        let mut console = Console::new();
        Self::register_cvars(&mut console, &cfg);

        Ok(Self {
            sim: Simulation::new(cfg.clone()),
            cfg,
            console,
            local_addr,
            net_rx,
            peers: HashMap::new(),
            console_rx: None,
            accept_task,
            quit: false,
        })
    }

    fn register_cvars(console: &mut Console, cfg: &EngineConfig) {
        console.register_cvar(
            "sv_tickrate",
            CvarValue::Int(i64::from(cfg.tick_hz)),
            "Server tick rate (restart to change)",
            CvarFlags::READ_ONLY,
        );
        console.register_cvar(
            "sv_cheats",
            CvarValue::Bool(cfg.debug_commands),
            "Accept debug RPCs",
            CvarFlags::CHEAT,
        );
        console.register_cvar(
            "sv_max_enemies",
            CvarValue::Int(i64::from(cfg.gameplay.max_enemies)),
            "Enemy population cap",
            CvarFlags::GAMEPLAY,
        );
        console.register_cvar(
            "sv_spawn_interval",
            CvarValue::Float(f64::from(cfg.gameplay.spawn_interval_secs)),
            "Seconds between interval spawns",
            CvarFlags::GAMEPLAY,
        );
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    /// True once `quit` was entered on the console.
    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Runs at the fixed rate until `quit`.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let interval = self.cfg.tick_interval();
        let mut scheduler = TickScheduler::new(
            interval,
            self.cfg.max_catch_up_ticks,
            self.cfg.max_backlog_ticks,
            Instant::now(),
        );
        info!(addr = %self.local_addr, tick_hz = self.cfg.tick_hz, "server running");

        while !self.quit {
            tokio::time::sleep_until(scheduler.next_deadline()).await;
            let started = Instant::now();
            let plan = scheduler.plan(started);
            if plan.steps > 1 {
                debug!(steps = plan.steps, "catching up");
            }
            for _ in 0..plan.steps {
                self.step();
            }
            if plan.steps > 0 {
                self.flush();
            }
            let elapsed = started.elapsed();
            if elapsed > interval {
                warn!(
                    tick = self.sim.tick(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = interval.as_millis() as u64,
                    "tick overran its budget"
                );
            }
        }
        info!("server shutting down");
        Ok(())
    }

    /// Runs the server for a number of ticks, flushing after each one.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<Vec<TickReport>> {
        let dt = self.cfg.tick_interval();
        let mut next = Instant::now();
        let mut reports = Vec::with_capacity(ticks as usize);

        for _ in 0..ticks {
            next += dt;
            reports.push(self.step());
            self.flush();
            tokio::time::sleep_until(next).await;
        }
        Ok(reports)
    }

    /// Tick-start sync point plus stages 1-9.
    pub fn step(&mut self) -> TickReport {
        self.process_console_commands();
        self.sync_cvars();
        self.drain_network();
        self.sim.step()
    }

    /// Stage 10 plus snapshot send.
    pub fn flush(&mut self) {
        for delivery in self.sim.flush_outbound() {
            self.send(delivery.to, NetMsg::Server(delivery.rpc), true);
        }
        for id in self.sim.connections().in_session() {
            if let Some(snapshot) = self.sim.snapshot_for(id) {
                self.send(id, NetMsg::Snapshot(snapshot), false);
            }
        }
    }

    fn send(&mut self, to: ConnectionId, msg: NetMsg, reliable: bool) {
        let Some(peer) = self.peers.get(&to) else {
            return;
        };
        match peer.outbound.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) if reliable => {
                warn!(connection = %to, "peer queue full, dropping rpc");
            }
            Err(TrySendError::Full(_)) => {
                debug!(connection = %to, "peer queue full, skipping snapshot");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection = %to, "peer writer gone");
            }
        }
    }

    fn drain_network(&mut self) {
        for _ in 0..self.cfg.input_channel_capacity.max(1) {
            let Ok(event) = self.net_rx.try_recv() else {
                break;
            };
            match event {
                NetEvent::Connected { id, addr, outbound } => {
                    info!(connection = %id, %addr, "client connected");
                    self.peers.insert(id, Peer { addr, outbound });
                    self.sim.push_inbound(id, InboundKind::Connected);
                }
                NetEvent::Message { id, msg } => self.on_message(id, msg),
                NetEvent::Closed { id } => {
                    if self.peers.remove(&id).is_some() {
                        info!(connection = %id, "client connection closed");
                        self.sim.push_inbound(id, InboundKind::Disconnected);
                    }
                }
            }
        }
    }

    fn on_message(&mut self, id: ConnectionId, msg: NetMsg) {
        if !self.peers.contains_key(&id) {
            debug!(connection = %id, "message from removed peer ignored");
            return;
        }
        let kind = match msg {
            NetMsg::ClientReady => InboundKind::Ready,
            NetMsg::Input(input) => InboundKind::Input(input),
            NetMsg::Rpc(rpc) => InboundKind::Rpc(rpc),
            NetMsg::Disconnect { reason } => {
                info!(connection = %id, reason = %reason, "client disconnected");
                self.peers.remove(&id);
                InboundKind::Disconnected
            }
            other => {
                warn!(connection = %id, ?other, "unexpected message from client dropped");
                return;
            }
        };
        self.sim.push_inbound(id, kind);
    }

    fn process_console_commands(&mut self) {
        let mut lines = Vec::new();
        if let Some(rx) = self.console_rx.as_mut() {
            while let Ok(line) = rx.try_recv() {
                lines.push(line);
            }
        }
        for line in lines {
            match self.exec_console(&line) {
                Ok(out) => {
                    for l in out {
                        println!("{l}");
                    }
                }
                Err(e) => println!("error: {e}"),
            }
        }
    }

    /// Pushes edited cvars into the live config.
    fn sync_cvars(&mut self) {
        for (name, value, _flags) in self.console.take_changed() {
            match name.as_str() {
                "sv_cheats" => self.cfg.debug_commands = value.as_bool(),
                "sv_max_enemies" => match value.as_int().and_then(|v| u32::try_from(v).ok()) {
                    Some(cap) => self.cfg.gameplay.max_enemies = cap,
                    None => warn!(%value, "sv_max_enemies must be a non-negative integer"),
                },
                "sv_spawn_interval" => match value.as_float().filter(|v| *v > 0.0) {
                    Some(secs) => self.cfg.gameplay.spawn_interval_secs = secs as f32,
                    None => warn!(%value, "sv_spawn_interval must be positive"),
                },
                _ => continue,
            }
            info!(cvar = %name, %value, "cvar applied");
            let live = self.sim.config_mut();
            live.debug_commands = self.cfg.debug_commands;
            live.gameplay.max_enemies = self.cfg.gameplay.max_enemies;
            live.gameplay.spawn_interval_secs = self.cfg.gameplay.spawn_interval_secs;
        }
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens = parse_command_line(line);
        let Some(cmd) = tokens.first() else {
            return Ok(Vec::new());
        };

        match cmd.as_str() {
            "status" => self.status_lines(tokens.get(1).is_some_and(|a| a == "json")),
            "kick" => {
                let Some(arg) = tokens.get(1) else {
                    return Ok(vec!["Usage: kick <connection>".to_string()]);
                };
                let Some(id) = arg.trim_start_matches('c').parse().ok().map(ConnectionId) else {
                    return Ok(vec![format!("Bad connection id: {arg}")]);
                };
                Ok(vec![self.kick(id, "kicked by operator")])
            }
            "reset" => {
                self.sim.request_reset();
                Ok(vec!["Session reset requested".to_string()])
            }
            "quit" | "exit" => {
                self.quit = true;
                Ok(vec!["Shutting down".to_string()])
            }
            _ => self.console.exec(line),
        }
    }

    fn kick(&mut self, id: ConnectionId, reason: &str) -> String {
        let Some(peer) = self.peers.remove(&id) else {
            return format!("No such connection: {id}");
        };
        // Dropping the sender ends the writer after this last message.
        let _ = peer.outbound.try_send(NetMsg::Disconnect {
            reason: reason.to_string(),
        });
        self.sim.push_inbound(id, InboundKind::Disconnected);
        info!(connection = %id, addr = %peer.addr, reason, "connection kicked");
        format!("Kicked {id}")
    }

    /// Point-in-time summary for the console and tooling.
    pub fn status(&self) -> ServerStatus {
        let world = self.sim.world();
        let session = self.sim.session();
        let mut peers: Vec<PeerStatus> = self
            .peers
            .iter()
            .map(|(id, peer)| PeerStatus {
                connection: id.0,
                addr: peer.addr.to_string(),
                player: self.sim.connections().player_of(*id).map(|p| p.0),
            })
            .collect();
        peers.sort_by_key(|p| p.connection);
        ServerStatus {
            tick: self.sim.tick(),
            phase: session.phase.to_string(),
            resets: session.resets,
            selecting: session.selecting_count,
            players_alive: world.query::<Player>().filter(|(_, p)| p.is_alive()).count(),
            enemies: world.count::<Enemy>(),
            projectiles: world.count::<Projectile>(),
            pickups: world.count::<Pickup>(),
            peers,
        }
    }

    fn status_lines(&self, json: bool) -> anyhow::Result<Vec<String>> {
        let status = self.status();
        if json {
            return Ok(vec![serde_json::to_string(&status)?]);
        }
        let mut out = vec![
            format!("Tick: {}", status.tick),
            format!("Session: {} (resets: {})", status.phase, status.resets),
            format!(
                "Players alive: {}, selecting: {}",
                status.players_alive, status.selecting
            ),
            format!(
                "Enemies: {}, projectiles: {}, pickups: {}",
                status.enemies, status.projectiles, status.pickups
            ),
            format!("Connections: {}", status.peers.len()),
        ];
        for peer in &status.peers {
            out.push(format!(
                "  c{}: addr={} player={:?}",
                peer.connection, peer.addr, peer.player
            ));
        }
        Ok(out)
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: ReliableListener, net_tx: mpsc::Sender<NetEvent>, tick_hz: u32) {
    let next_id = Arc::new(AtomicU32::new(1));
    loop {
        match listener.accept().await {
            Ok((conn, addr)) => {
                let net_tx = net_tx.clone();
                let next_id = Arc::clone(&next_id);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(conn, addr, net_tx, next_id, tick_hz).await {
                        debug!(%addr, error = %e, "connection ended");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                if net_tx.is_closed() {
                    break;
                }
            }
        }
    }
}

async fn serve_connection(
    mut conn: ReliableConn,
    addr: SocketAddr,
    net_tx: mpsc::Sender<NetEvent>,
    next_id: Arc<AtomicU32>,
    tick_hz: u32,
) -> anyhow::Result<()> {
    match conn.recv_timeout(HANDSHAKE_TIMEOUT).await? {
        Some(NetMsg::Hello { protocol }) if protocol == PROTOCOL_VERSION => {}
        Some(NetMsg::Hello { protocol }) => {
            warn!(%addr, protocol, expected = PROTOCOL_VERSION, "protocol mismatch");
            conn.send(&NetMsg::Disconnect {
                reason: format!("protocol {protocol} unsupported, expected {PROTOCOL_VERSION}"),
            })
            .await?;
            return Ok(());
        }
        Some(other) => anyhow::bail!("unexpected handshake msg: {other:?}"),
        None => anyhow::bail!("handshake timed out"),
    }

    let id = ConnectionId(next_id.fetch_add(1, Ordering::Relaxed));
    conn.send(&NetMsg::Welcome {
        connection_id: id,
        tick_hz,
    })
    .await?;

    let (mut reader, mut writer) = conn.into_split();
    let (outbound, mut outbound_rx) = mpsc::channel::<NetMsg>(PEER_QUEUE);
    net_tx
        .send(NetEvent::Connected { id, addr, outbound })
        .await
        .context("simulation gone")?;

    tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = writer.send(&msg).await {
                debug!(connection = %id, error = %e, "write failed");
                break;
            }
        }
    });

    loop {
        match reader.recv().await {
            Ok(msg) => {
                let leaving = matches!(msg, NetMsg::Disconnect { .. });
                if net_tx.send(NetEvent::Message { id, msg }).await.is_err() || leaving {
                    break;
                }
            }
            Err(e) => {
                debug!(connection = %id, error = %e, "read ended");
                break;
            }
        }
    }
    let _ = net_tx.send(NetEvent::Closed { id }).await;
    Ok(())
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(GameServer, EngineConfig)> {
    let cfg = EngineConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };
    let server = GameServer::bind(cfg).await?;
    let mut cfg = server.cfg.clone();
    cfg.server_addr = server.local_addr().to_string();
    Ok((server, cfg))
}
