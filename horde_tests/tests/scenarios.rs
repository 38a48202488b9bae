//! Whole-simulation scenarios driven through the inbound queue, the same
//! path the network front-end uses.

use horde_server::{importance::ImportanceTier, rpc::ErrorClass, SessionPhase};
use horde_shared::{
    buffs::{buff_threshold, BuffType, MAX_BUFF_LEVEL},
    components::{Enemy, Health, Pickup, Projectile},
    config::EngineConfig,
    ecs::EntityId,
    math::Vec2,
    net::{ClientRpc, ServerRpc},
};
use horde_tests::harness::{delivered_to, SimHarness};

#[test]
fn waiting_session_activates_when_a_player_appears() {
    let mut h = SimHarness::new();
    h.step_n(3);
    assert_eq!(h.sim().session().phase, SessionPhase::WaitingForPlayers);

    h.join();
    let report = h.step();
    assert_eq!(h.sim().session().phase, SessionPhase::Active);
    assert_eq!(report.players_spawned.len(), 1);
}

#[test]
fn empty_active_session_resets_then_waits() {
    let mut h = SimHarness::new();
    let conn = h.join();
    h.step();
    h.rpc(conn, ClientRpc::RequestMassSpawn { count: 3 });
    h.step();
    h.leave(conn);

    let resetting = h.step();
    assert!(resetting.reset_happened());
    assert_eq!(h.sim().session().phase, SessionPhase::Resetting);

    h.step();
    assert_eq!(h.sim().session().phase, SessionPhase::WaitingForPlayers);
    assert_eq!(h.sim().world().count::<Enemy>(), 0);
    assert!(h.sim().world().is_empty());

    let later = h.step_n(10);
    assert!(later.iter().all(|r| r.transitions.is_empty()));
    assert_eq!(h.sim().session().resets, 1);
}

#[test]
fn threshold_sequence_matches_the_table() {
    let expected = [10, 15, 20, 30, 40, 55];
    for (count, want) in expected.iter().enumerate() {
        assert_eq!(buff_threshold(count as u32), *want);
    }
    for count in 6..20 {
        assert_eq!(buff_threshold(count) - buff_threshold(count - 1), 15);
    }
}

#[test]
fn buff_levels_never_exceed_the_cap() {
    let mut h = SimHarness::new();
    let conn = h.join();
    h.step();
    h.rpc(conn, ClientRpc::DebugAddPoints { amount: 20_000 });

    let mut selections = 0;
    for _ in 0..200 {
        h.step();
        if let Some(offer) = h.offer(conn) {
            let pick = if offer.contains(BuffType::Damage) {
                BuffType::Damage
            } else {
                offer.choices[0]
            };
            h.rpc(conn, ClientRpc::SelectBuff { buff_type_id: pick.id() });
            selections += 1;
        }
        let levels = h.levels(conn).unwrap();
        assert!(BuffType::ALL.iter().all(|b| levels.level(*b) <= MAX_BUFF_LEVEL));
    }

    let levels = h.levels(conn).unwrap();
    assert_eq!(selections, 40, "every category maxed exactly once");
    assert!(BuffType::ALL.iter().all(|b| levels.is_maxed(*b)));
    assert!(h.offer(conn).is_none(), "nothing left to offer");
    assert!(h.points(conn) > 0, "points kept once everything is maxed");
}

#[test]
fn two_collectors_award_one_pickup_once() {
    let mut h = SimHarness::new();
    let a = h.join();
    let b = h.join();
    h.step();
    let (pa, pb) = (h.player(a).unwrap(), h.player(b).unwrap());
    h.place(pa, Vec2::new(-0.2, 0.0));
    h.place(pb, Vec2::new(0.2, 0.0));
    h.spawn_pickup_at(Vec2::ZERO, 5);

    let report = h.step();
    assert_eq!(report.pickups_claimed.len(), 1);
    assert_eq!(h.points(a) + h.points(b), 5);
    assert_eq!(h.sim().world().count::<Pickup>(), 0);

    let collected = delivered_to(&h.flush(), a, |r| matches!(r, ServerRpc::PickupCollected { .. }));
    assert_eq!(collected.len(), 1);
}

#[test]
fn importance_tiers_follow_distance() {
    let mut h = SimHarness::new();
    let conn = h.join();
    h.step();
    let me = h.player(conn).unwrap();
    h.place(me, Vec2::ZERO);
    let full = h.spawn_enemy_at(Vec2::new(49.0, 0.0), 30.0);
    let half = h.spawn_enemy_at(Vec2::new(50.0, 0.0), 30.0);
    let quarter = h.spawn_enemy_at(Vec2::new(150.0, 0.0), 30.0);

    let mut seen = [0; 3];
    for _ in 0..4 {
        h.step();
        let snap = h.sim().snapshot_for(conn).unwrap();
        assert!(snap.entities.iter().any(|e| e.id == me), "own player always sent");
        for (i, id) in [full, half, quarter].into_iter().enumerate() {
            if snap.entities.iter().any(|e| e.id == id) {
                seen[i] += 1;
            }
        }
    }

    let table = &h.sim().context().importance;
    assert_eq!(table.tier(full), ImportanceTier::Full);
    assert_eq!(table.tier(half), ImportanceTier::Half);
    assert_eq!(table.tier(quarter), ImportanceTier::Quarter);
    assert_eq!(seen, [4, 2, 1]);
}

#[test]
fn collecting_fifteen_points_opens_one_offer() {
    let mut h = SimHarness::new();
    let conn = h.join();
    h.step();
    let at = h.position_of(h.player(conn).unwrap()).unwrap();
    h.spawn_pickup_at(at, 15);

    let report = h.step();
    assert_eq!(h.points(conn), 5);
    assert_eq!(report.offers_opened.len(), 1);
    assert_eq!(h.sim().session().selecting_count, 1);

    let offer = h.offer(conn).unwrap();
    let [x, y, z] = offer.choices;
    assert!(x != y && y != z && x != z, "distinct: {:?}", offer.choices);
    let levels = h.levels(conn).unwrap();
    assert!(offer.choices.iter().all(|b| !levels.is_maxed(*b)));

    let shown = delivered_to(&h.flush(), conn, |r| matches!(r, ServerRpc::ShowBuffOffer { .. }));
    assert_eq!(shown.len(), 1);
}

#[test]
fn game_resumes_once_after_the_last_selection() {
    let mut h = SimHarness::new();
    let a = h.join();
    let b = h.join();
    h.step();
    h.rpc(a, ClientRpc::DebugAddPoints { amount: 10 });
    h.rpc(b, ClientRpc::DebugAddPoints { amount: 10 });
    h.step();
    assert_eq!(h.sim().session().selecting_count, 2);
    h.flush();

    let first = h.offer(a).unwrap().choices[0];
    h.rpc(a, ClientRpc::SelectBuff { buff_type_id: first.id() });
    let report = h.step();
    assert_eq!(report.selections.len(), 1);
    assert_eq!(h.sim().session().selecting_count, 1);
    assert!(report.paused);
    let out = h.flush();
    assert!(delivered_to(&out, a, |r| matches!(r, ServerRpc::GameResume { .. })).is_empty());

    let second = h.offer(b).unwrap().choices[0];
    h.rpc(b, ClientRpc::SelectBuff { buff_type_id: second.id() });
    h.step();
    assert_eq!(h.sim().session().selecting_count, 0);
    let out = h.flush();
    for conn in [a, b] {
        let resumes = delivered_to(&out, conn, |r| matches!(r, ServerRpc::GameResume { .. }));
        assert_eq!(resumes.len(), 1, "{conn}");
    }

    h.step();
    assert!(delivered_to(&h.flush(), a, |r| matches!(r, ServerRpc::GameResume { .. })).is_empty());
}

#[test]
fn second_hit_finishes_a_ten_health_enemy() {
    let mut h = SimHarness::new();
    let conn = h.join();
    h.step();
    let shooter = h.player(conn).unwrap();
    let at = Vec2::new(100.0, 100.0);
    let enemy = h.spawn_enemy_at(at, 10.0);
    h.spawn_projectile_at(at, 6.0, shooter);
    h.spawn_projectile_at(at, 6.0, shooter);

    let report = h.step();
    assert_eq!(report.kills.len(), 1);
    assert_eq!(report.kills[0].by, shooter);
    assert_eq!(report.pickups_dropped.len(), 1);
    assert!(!h.sim().world().contains(enemy));
    assert_eq!(h.sim().world().count::<Projectile>(), 0);
}

#[test]
fn hits_after_a_lethal_one_are_not_spent() {
    let mut h = SimHarness::new();
    let conn = h.join();
    h.step();
    let shooter = h.player(conn).unwrap();
    let at = Vec2::new(100.0, 100.0);
    h.spawn_enemy_at(at, 6.0);
    h.spawn_projectile_at(at, 6.0, shooter);
    h.spawn_projectile_at(at, 6.0, shooter);

    let report = h.step();
    assert_eq!(report.kills.len(), 1);
    assert_eq!(report.pickups_dropped.len(), 1, "one drop per kill");
    assert_eq!(h.sim().world().count::<Projectile>(), 1);
}

#[test]
fn open_offers_freeze_gameplay() {
    let mut h = SimHarness::new();
    let conn = h.join();
    h.step();
    h.rpc(conn, ClientRpc::RequestMassSpawn { count: 4 });
    h.rpc(conn, ClientRpc::DebugAddPoints { amount: 10 });
    h.step();
    assert_eq!(h.sim().session().selecting_count, 1);

    let enemies: Vec<(EntityId, Vec2)> = h
        .sim()
        .world()
        .query::<Enemy>()
        .map(|(id, _)| (id, h.position_of(id).unwrap()))
        .collect();
    assert_eq!(enemies.len(), 4);
    let report = h.step();
    assert!(report.paused);
    assert!(enemies.iter().all(|(id, at)| h.position_of(*id) == Some(*at)));

    let pick = h.offer(conn).unwrap().choices[0];
    h.rpc(conn, ClientRpc::SelectBuff { buff_type_id: pick.id() });
    h.step();
    let report = h.step();
    assert!(!report.paused);
    assert!(enemies.iter().any(|(id, at)| h.position_of(*id) != Some(*at)));
}

#[test]
fn self_kill_then_respawn_keeps_the_same_entity() {
    let mut h = SimHarness::new();
    let conn = h.join();
    h.step();
    let me = h.player(conn).unwrap();

    h.rpc(conn, ClientRpc::DebugKillSelf);
    let report = h.step();
    assert_eq!(report.deaths.len(), 1);
    assert!(!h.player_record(conn).unwrap().is_alive());
    assert!(!h.sim().world().is_enabled(me));
    assert_eq!(h.sim().session().phase, SessionPhase::Active, "still connected");

    h.rpc(conn, ClientRpc::RequestRespawn);
    let report = h.step();
    assert_eq!(report.respawns.len(), 1);
    assert_eq!(h.player(conn), Some(me));
    assert!(h.sim().world().is_enabled(me));
    let health = h.sim().world().get::<Health>(me).unwrap();
    assert_eq!(health.current, health.max);

    h.rpc(conn, ClientRpc::RequestRespawn);
    let report = h.step();
    assert_eq!(report.dropped_rpcs.len(), 1);
    assert_eq!(report.dropped_rpcs[0].class, ErrorClass::InvariantViolation);
}

#[test]
fn bad_requests_are_dropped_with_their_class() {
    let cfg = EngineConfig {
        debug_commands: false,
        ..Default::default()
    };
    let mut h = SimHarness::with_config(cfg);
    let conn = h.join();
    h.step();

    h.rpc(conn, ClientRpc::DebugAddPoints { amount: 50 });
    h.rpc(conn, ClientRpc::SelectBuff { buff_type_id: 200 });
    h.rpc(conn, ClientRpc::SelectBuff { buff_type_id: BuffType::Damage.id() });
    let report = h.step();

    let classes: Vec<ErrorClass> = report.dropped_rpcs.iter().map(|d| d.class).collect();
    assert_eq!(
        classes,
        vec![ErrorClass::Protocol, ErrorClass::Protocol, ErrorClass::InvariantViolation]
    );
    assert_eq!(h.points(conn), 0);

    let stranger = horde_shared::net::ConnectionId(99);
    h.rpc(stranger, ClientRpc::RequestRespawn);
    let report = h.step();
    assert_eq!(report.dropped_rpcs[0].class, ErrorClass::LifecycleRace);
}

#[test]
fn mass_spawn_is_capped() {
    let mut cfg = EngineConfig::default();
    cfg.gameplay.max_enemies = 6;
    let mut h = SimHarness::with_config(cfg);
    let conn = h.join();
    h.step();

    h.rpc(conn, ClientRpc::RequestMassSpawn { count: 50 });
    h.step();
    assert_eq!(h.sim().world().count::<Enemy>(), 6);

    h.rpc(conn, ClientRpc::RequestMassSpawn { count: 1 });
    let report = h.step();
    assert_eq!(report.dropped_rpcs[0].class, ErrorClass::ResourceCap);
    assert_eq!(h.sim().world().count::<Enemy>(), 6);
}

#[test]
fn offers_opened_across_a_console_reset_resume_only_after_the_last() {
    let mut h = SimHarness::new();
    let a = h.join();
    let b = h.join();
    h.step();

    h.sim_mut().request_reset();
    h.step();
    h.rpc(a, ClientRpc::DebugAddPoints { amount: 10 });
    h.step();
    assert_eq!(h.sim().session().phase, SessionPhase::WaitingForPlayers);
    assert!(h.offer(a).is_some());
    assert_eq!(h.sim().session().selecting_count, 1);

    h.rpc(b, ClientRpc::DebugAddPoints { amount: 10 });
    h.step();
    assert!(h.offer(b).is_some());
    assert_eq!(h.sim().session().selecting_count, 2);
    h.flush();

    let pick = h.offer(a).unwrap().choices[0];
    h.rpc(a, ClientRpc::SelectBuff { buff_type_id: pick.id() });
    h.step();
    assert_eq!(h.sim().session().selecting_count, 1);
    assert!(delivered_to(&h.flush(), b, |r| matches!(r, ServerRpc::GameResume { .. })).is_empty());

    let pick = h.offer(b).unwrap().choices[0];
    h.rpc(b, ClientRpc::SelectBuff { buff_type_id: pick.id() });
    h.step();
    assert_eq!(h.sim().session().selecting_count, 0);
    let resumes = delivered_to(&h.flush(), b, |r| matches!(r, ServerRpc::GameResume { .. }));
    assert_eq!(resumes.len(), 1);
}
