//! Client implementation.
//!
//! The client maintains:
//! - One framed TCP stream (handshake, input, RPCs, snapshots)
//! - A reader task feeding a local queue, so polling with a timeout never
//!   cuts a frame in half
//! - A merged view of importance-filtered snapshots
//! - A mirror of server pickups
//! - Offer/pause state for a buff-selection UI

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use horde_shared::{
    buffs::{BuffChoice, BuffType, OFFER_SIZE},
    components::EntityKind,
    ecs::EntityId,
    net::{
        ClientRpc, ConnectionId, EntityState, NetMsg, PlayerInput, ReliableConn, ServerRpc,
        Snapshot, FrameWriter, PROTOCOL_VERSION,
    },
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    input::{build_input, InputState},
    mirror::{EntityView, PickupMirror},
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Unseen entities are dropped after this many server ticks.
const STALE_AFTER_TICKS: u64 = 12;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Handshake done, no player yet.
    Connected,
    /// The server spawned a player for us.
    InSession,
    /// The server closed the connection or it failed.
    Disconnected,
}

/// High-level game client.
pub struct GameClient {
    pub connection_id: ConnectionId,
    pub tick_hz: u32,
    pub state: ClientState,
    pub pickups: PickupMirror,
    pub view: EntityView,

    writer: FrameWriter,
    inbox: mpsc::Receiver<anyhow::Result<NetMsg>>,
    reader_task: JoinHandle<()>,

    player: Option<EntityId>,
    last_snapshot: Option<Snapshot>,
    pending_offer: Option<[BuffChoice; OFFER_SIZE]>,
    paused: bool,
    kills: u64,
    inputs_sent: u64,
}

impl GameClient {
    /// Connects to a server and performs the handshake.
    pub async fn connect(server_addr: SocketAddr) -> anyhow::Result<Self> {
        info!(server = %server_addr, "Connecting to server");
        let mut conn = ReliableConn::connect(server_addr).await?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
        })
        .await?;

        let (connection_id, tick_hz) = match conn
            .recv_timeout(HANDSHAKE_TIMEOUT)
            .await
            .context("handshake")?
        {
            Some(NetMsg::Welcome {
                connection_id,
                tick_hz,
            }) => (connection_id, tick_hz),
            Some(NetMsg::Disconnect { reason }) => anyhow::bail!("server refused: {reason}"),
            Some(other) => anyhow::bail!("expected Welcome, got {other:?}"),
            None => anyhow::bail!("handshake timed out"),
        };
        info!(connection = %connection_id, tick_hz, "Connected to server");

        let (mut reader, writer) = conn.into_split();
        let (tx, inbox) = mpsc::channel(256);
        let reader_task = tokio::spawn(async move {
            loop {
                let frame = reader.recv().await;
                let failed = frame.is_err();
                if tx.send(frame).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Self {
            connection_id,
            tick_hz,
            state: ClientState::Connected,
            pickups: PickupMirror::new(),
            view: EntityView::new(STALE_AFTER_TICKS),
            writer,
            inbox,
            reader_task,
            player: None,
            last_snapshot: None,
            pending_offer: None,
            paused: false,
            kills: 0,
            inputs_sent: 0,
        })
    }

    /// Asks the server to spawn our player.
    pub async fn send_ready(&mut self) -> anyhow::Result<()> {
        self.writer.send(&NetMsg::ClientReady).await?;
        info!(connection = %self.connection_id, "Sent ready signal to server");
        Ok(())
    }

    /// Sends one tick of input.
    pub async fn send_input(&mut self, input: InputState) -> anyhow::Result<PlayerInput> {
        let msg = build_input(input);
        self.writer.send(&NetMsg::Input(msg)).await?;
        self.inputs_sent += 1;
        Ok(msg)
    }

    pub async fn send_rpc(&mut self, rpc: ClientRpc) -> anyhow::Result<()> {
        debug!(rpc = rpc.name(), "sending rpc");
        self.writer.send(&NetMsg::Rpc(rpc)).await
    }

    /// Answers the open offer. The server validates the choice; the local
    /// offer is dropped so it is answered once.
    pub async fn select_buff(&mut self, buff: BuffType) -> anyhow::Result<()> {
        self.send_rpc(ClientRpc::SelectBuff {
            buff_type_id: buff.id(),
        })
        .await?;
        self.pending_offer = None;
        Ok(())
    }

    /// Receives at most one message, waiting up to `timeout`.
    pub async fn poll(&mut self, timeout: Duration) -> anyhow::Result<Option<NetMsg>> {
        let frame = match tokio::time::timeout(timeout, self.inbox.recv()).await {
            Err(_) => return Ok(None),
            Ok(None) => {
                self.state = ClientState::Disconnected;
                anyhow::bail!("connection closed");
            }
            Ok(Some(frame)) => frame,
        };
        match frame {
            Ok(msg) => {
                self.handle(&msg);
                Ok(Some(msg))
            }
            Err(e) => {
                warn!(error = %e, "Connection error");
                self.state = ClientState::Disconnected;
                Err(e)
            }
        }
    }

    /// Polls until `pred` matches a message or `timeout` passes.
    pub async fn wait_for<F>(&mut self, timeout: Duration, mut pred: F) -> anyhow::Result<Option<NetMsg>>
    where
        F: FnMut(&NetMsg) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return Ok(None);
            }
            if let Some(msg) = self.poll(left).await? {
                if pred(&msg) {
                    return Ok(Some(msg));
                }
            }
        }
    }

    /// Drains everything already queued without waiting.
    pub async fn drain(&mut self) -> anyhow::Result<usize> {
        let mut n = 0;
        while self.poll(Duration::ZERO).await?.is_some() {
            n += 1;
        }
        Ok(n)
    }

    fn handle(&mut self, msg: &NetMsg) {
        match msg {
            NetMsg::Server(rpc) => {
                self.pickups.apply(rpc);
                self.handle_rpc(rpc);
            }
            NetMsg::Snapshot(snap) => {
                self.view.merge(snap);
                self.last_snapshot = Some(snap.clone());
            }
            NetMsg::Disconnect { reason } => {
                info!(reason = %reason, "Disconnected from server");
                self.state = ClientState::Disconnected;
            }
            other => debug!(?other, "Unhandled message"),
        }
    }

    fn handle_rpc(&mut self, rpc: &ServerRpc) {
        match *rpc {
            ServerRpc::PlayerAssigned { player } => {
                info!(%player, "Player assigned");
                self.player = Some(player);
                self.state = ClientState::InSession;
                self.pending_offer = None;
            }
            ServerRpc::ShowBuffOffer { choices } => {
                debug!(?choices, "Buff offer");
                self.pending_offer = Some(choices);
            }
            ServerRpc::BuffApplied {
                buff,
                new_level,
                player,
            } => {
                if Some(player) == self.player {
                    info!(%buff, new_level, "Buff applied");
                    self.pending_offer = None;
                }
            }
            ServerRpc::GamePause { .. } => self.paused = true,
            ServerRpc::GameResume { .. } => self.paused = false,
            ServerRpc::KillCountDelta { amount } => self.kills += u64::from(amount),
            _ => {}
        }
    }

    pub fn player(&self) -> Option<EntityId> {
        self.player
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn pending_offer(&self) -> Option<&[BuffChoice; OFFER_SIZE]> {
        self.pending_offer.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Kills announced to everyone since connecting.
    pub fn kills(&self) -> u64 {
        self.kills
    }

    pub fn inputs_sent(&self) -> u64 {
        self.inputs_sent
    }

    /// Our player's last known state.
    pub fn me(&self) -> Option<&EntityState> {
        self.view.get(self.player?)
    }

    /// Dead players stay replicated with zero health until they respawn.
    pub fn is_dead(&self) -> bool {
        self.me()
            .and_then(|s| s.health)
            .is_some_and(|h| h <= 0.0)
    }

    /// Position of the nearest known enemy.
    pub fn nearest_enemy(&self) -> Option<EntityState> {
        let me = self.me()?.position;
        self.view.nearest(EntityKind::Enemy, me).cloned()
    }

    /// Says goodbye and closes the stream.
    pub async fn disconnect(mut self, reason: &str) -> anyhow::Result<()> {
        self.writer
            .send(&NetMsg::Disconnect {
                reason: reason.to_string(),
            })
            .await?;
        self.state = ClientState::Disconnected;
        Ok(())
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
