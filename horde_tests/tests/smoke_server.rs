use horde_server::{server::bind_ephemeral, SessionPhase};

/// Smoke test: server can run a few ticks without panicking.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(50).await?;
    let reports = server.run_for_ticks(3).await?;
    assert_eq!(reports.len(), 3);
    assert_eq!(server.simulation().tick(), 3);
    assert_eq!(server.simulation().session().phase, SessionPhase::WaitingForPlayers);
    Ok(())
}

#[tokio::test]
async fn console_cvars_reach_the_live_config() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();

    let (mut server, _cfg) = bind_ephemeral(50).await?;
    let out = server.exec_console("sv_max_enemies 7")?;
    assert_eq!(out, vec!["sv_max_enemies = 7".to_string()]);
    server.exec_console("set sv_cheats 0")?;
    assert!(server.exec_console("sv_tickrate 10").is_err(), "read-only");

    server.run_for_ticks(1).await?;
    let live = server.simulation().config();
    assert_eq!(live.gameplay.max_enemies, 7);
    assert!(!live.debug_commands);
    assert_eq!(live.tick_hz, 50);

    let status = server.exec_console("status")?;
    assert!(status.iter().any(|l| l.starts_with("Tick: 1")), "{status:?}");
    let json = server.exec_console("status json")?;
    let parsed: serde_json::Value = serde_json::from_str(&json[0])?;
    assert_eq!(parsed["tick"], 1);
    assert_eq!(parsed["phase"], "waiting_for_players");

    server.exec_console("reset")?;
    server.run_for_ticks(2).await?;
    assert_eq!(server.simulation().session().resets, 1);

    server.exec_console("quit")?;
    assert!(server.should_quit());
    Ok(())
}
