//! Networking primitives.
//!
//! Goals:
//! - One reliable, ordered stream (TCP) per peer carrying length-prefixed
//!   JSON frames.
//! - Typed request/notification catalogue for session-changing events.
//! - Snapshot types consumed by the replication front-end.
//!
//! Encryption and compression are left to the transport below this layer.

use std::{fmt, net::SocketAddr};

use anyhow::{bail, Context};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    time,
};

use crate::{
    buffs::{BuffChoice, BuffType, OFFER_SIZE},
    components::{EntityKind, PickupId},
    ecs::EntityId,
    math::Vec2,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames larger than this are rejected before allocating.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Stable per-peer id, assigned at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Client movement/aim intent for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Desired movement; clamped to unit length by the server.
    pub movement: Vec2,
    /// Aim direction; need not be normalised.
    pub aim: Vec2,
    pub fire: bool,
}

/// Client -> server requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientRpc {
    /// Resolve the open offer. The id is validated server-side.
    SelectBuff { buff_type_id: u8 },
    RequestRespawn,
    RequestMassSpawn { count: u32 },
    DebugAddPoints { amount: u32 },
    DebugKillSelf,
}

impl ClientRpc {
    pub fn name(&self) -> &'static str {
        match self {
            ClientRpc::SelectBuff { .. } => "select_buff",
            ClientRpc::RequestRespawn => "request_respawn",
            ClientRpc::RequestMassSpawn { .. } => "request_mass_spawn",
            ClientRpc::DebugAddPoints { .. } => "debug_add_points",
            ClientRpc::DebugKillSelf => "debug_kill_self",
        }
    }
}

/// Server -> client notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerRpc {
    /// Private: the player entity spawned for the receiving connection.
    PlayerAssigned { player: EntityId },
    /// Private to the player that crossed a threshold.
    ShowBuffOffer { choices: [BuffChoice; OFFER_SIZE] },
    BuffApplied {
        buff: BuffType,
        new_level: u8,
        player: EntityId,
    },
    GamePause { selecting_player: EntityId },
    GameResume { selecting_player: EntityId },
    HitEffect { position: Vec2, damage: f32 },
    PickupSpawned {
        pickup_id: PickupId,
        position: Vec2,
        value: u32,
    },
    PickupCollected {
        pickup_id: PickupId,
        position: Vec2,
        value: u32,
        collector: EntityId,
    },
    PickupDestroyed {
        pickup_id: PickupId,
        position: Vec2,
        value: u32,
    },
    KillCountDelta { amount: u32 },
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
    },
    Welcome {
        connection_id: ConnectionId,
        tick_hz: u32,
    },
    /// Client is ready to enter the session; the server spawns its player.
    ClientReady,

    // ─── Gameplay ───
    Input(PlayerInput),
    Rpc(ClientRpc),
    Server(ServerRpc),
    /// Importance-filtered world state for one tick.
    Snapshot(Snapshot),

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Replicated state of one entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityState {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec2,
    pub health: Option<f32>,
}

/// World snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub tick: u64,
    pub entities: Vec<EntityState>,
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &NetMsg) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    if payload.len() > MAX_FRAME_LEN {
        bail!("frame too large: {} bytes", payload.len());
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    writer.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<NetMsg> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("frame too large: {len} bytes");
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(msg)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    /// Receives a frame within the given timeout.
    pub async fn recv_timeout(
        &mut self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<NetMsg>> {
        match time::timeout(timeout, read_frame(&mut self.stream)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned read and write halves so a reader
    /// task and a writer task can run concurrently.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (FrameReader { read }, FrameWriter { write })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameReader {
    read: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.read).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameWriter {
    write: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.write, msg).await
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_message_survives_codec() {
        let msg = NetMsg::Server(ServerRpc::ShowBuffOffer {
            choices: [
                BuffChoice {
                    buff: BuffType::Damage,
                    current_level: 2,
                },
                BuffChoice {
                    buff: BuffType::Homing,
                    current_level: 0,
                },
                BuffChoice {
                    buff: BuffType::MagnetRange,
                    current_level: 4,
                },
            ],
        });
        let bytes = encode_to_bytes(&msg).unwrap();
        assert_eq!(decode_from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(decode_from_bytes(b"{\"Rpc\":{\"Nope\":1}}").is_err());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut data: Vec<u8> = Vec::new();
        data.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        let mut reader = data.as_slice();
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("frame too large"));
    }

    #[tokio::test]
    async fn frames_roundtrip_over_a_buffer() {
        let mut buf: Vec<u8> = Vec::new();
        let msg = NetMsg::Rpc(ClientRpc::RequestMassSpawn { count: 12 });
        write_frame(&mut buf, &msg).await.unwrap();
        let mut reader = buf.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap(), msg);
    }
}
