//! Full socket-based integration tests for client ↔ server communication.

use std::net::SocketAddr;
use std::time::Duration;

use horde_client::{input::InputState, ClientState, GameClient};
use horde_server::server::bind_ephemeral;
use horde_shared::{
    math::Vec2,
    net::{
        decode_from_bytes, encode_to_bytes, ClientRpc, ConnectionId, NetMsg, ReliableConn,
        ServerRpc, PROTOCOL_VERSION,
    },
};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Unit-style test: protocol messages roundtrip correctly.
#[test]
fn protocol_messages_roundtrip() -> anyhow::Result<()> {
    let hello = NetMsg::Hello {
        protocol: PROTOCOL_VERSION,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&hello)?)?, hello);

    let welcome = NetMsg::Welcome {
        connection_id: ConnectionId(1),
        tick_hz: 20,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&welcome)?)?, welcome);

    let rpc = NetMsg::Rpc(ClientRpc::SelectBuff { buff_type_id: 3 });
    assert_eq!(decode_from_bytes(&encode_to_bytes(&rpc)?)?, rpc);
    Ok(())
}

/// Full integration: handshake, spawn, snapshots, and a buff offer answered
/// over the wire while the server ticks.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_server_full_roundtrip() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, cfg) = bind_ephemeral(50).await?;
    let addr: SocketAddr = cfg.server_addr.parse()?;

    let client_side = async {
        let mut client = GameClient::connect(addr).await?;
        assert_eq!(client.tick_hz, 50);
        client.send_ready().await?;

        let assigned = client
            .wait_for(WAIT, |m| matches!(m, NetMsg::Server(ServerRpc::PlayerAssigned { .. })))
            .await?;
        assert!(assigned.is_some(), "no player assigned");
        let me = client.player().expect("player id");
        assert_eq!(client.state, ClientState::InSession);

        let own = client
            .wait_for(WAIT, |m| {
                matches!(m, NetMsg::Snapshot(s) if s.entities.iter().any(|e| e.id == me))
            })
            .await?;
        assert!(own.is_some(), "own player missing from snapshots");

        client
            .send_input(InputState {
                movement: Vec2::new(1.0, 0.0),
                aim: Vec2::new(1.0, 0.0),
                fire: false,
            })
            .await?;

        client.send_rpc(ClientRpc::DebugAddPoints { amount: 10 }).await?;
        client
            .wait_for(WAIT, |m| matches!(m, NetMsg::Server(ServerRpc::ShowBuffOffer { .. })))
            .await?;
        let choice = client.pending_offer().expect("offer")[0];
        assert!(client.is_paused(), "pause arrives with the offer");

        client.select_buff(choice.buff).await?;
        let applied = client
            .wait_for(WAIT, |m| matches!(m, NetMsg::Server(ServerRpc::BuffApplied { .. })))
            .await?;
        match applied {
            Some(NetMsg::Server(ServerRpc::BuffApplied {
                buff,
                new_level,
                player,
            })) => {
                assert_eq!(buff, choice.buff);
                assert_eq!(new_level, choice.current_level + 1);
                assert_eq!(player, me);
            }
            other => anyhow::bail!("expected BuffApplied, got {other:?}"),
        }
        client
            .wait_for(WAIT, |m| matches!(m, NetMsg::Server(ServerRpc::GameResume { .. })))
            .await?;
        assert!(!client.is_paused());
        Ok::<_, anyhow::Error>(client)
    };

    let (server_res, client_res) = tokio::join!(server.run_for_ticks(150), client_side);
    server_res?;
    let client = client_res?;
    assert!(client.last_snapshot().is_some());
    assert!(client.inputs_sent() >= 1);
    Ok(())
}

#[tokio::test]
async fn protocol_mismatch_is_refused() -> anyhow::Result<()> {
    init_tracing();
    let (_server, cfg) = bind_ephemeral(50).await?;
    let mut conn = ReliableConn::connect(cfg.server_addr.parse()?).await?;
    conn.send(&NetMsg::Hello {
        protocol: PROTOCOL_VERSION + 1,
    })
    .await?;
    match conn.recv_timeout(WAIT).await? {
        Some(NetMsg::Disconnect { reason }) => assert!(reason.contains("unsupported")),
        other => anyhow::bail!("expected Disconnect, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn kicked_client_is_told_and_removed() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, cfg) = bind_ephemeral(50).await?;
    let mut client = GameClient::connect(cfg.server_addr.parse()?).await?;
    client.send_ready().await?;

    // The reader task may need a moment to hand the connection over.
    let mut spawned = false;
    for _ in 0..50 {
        server.run_for_ticks(1).await?;
        if server.simulation().connections().player_of(client.connection_id).is_some() {
            spawned = true;
            break;
        }
    }
    assert!(spawned, "player never spawned");

    let out = server.exec_console(&format!("kick {}", client.connection_id))?;
    assert_eq!(out, vec![format!("Kicked {}", client.connection_id)]);
    server.run_for_ticks(2).await?;
    assert!(!server.simulation().connections().contains(client.connection_id));

    let bye = client
        .wait_for(WAIT, |m| matches!(m, NetMsg::Disconnect { .. }))
        .await?;
    assert!(bye.is_some());
    assert_eq!(client.state, ClientState::Disconnected);
    Ok(())
}
