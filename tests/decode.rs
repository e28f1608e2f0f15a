mod common;

use common::*;
use demo_query::errors::ErrorKind;
use demo_query::types::entities::GrenadeType;
use demo_query::types::Vector;
use demo_query::{Diagnostic, EventQuery, PropValue, TickQuery};

#[test]
fn header_fields() {
    let header = demo_query::parse_header(&standard_demo().bytes).unwrap();
    assert_eq!(header.demo_type, "HL2DEMO");
    assert_eq!(header.network_protocol, NETWORK_PROTOCOL);
    assert_eq!(header.map, "cp_process_final");
    assert_eq!(header.game_dir, "tf");
    assert_eq!(header.ticks, STOP_TICK);
}

#[test]
fn other_formats_are_rejected() {
    let mut bytes = standard_demo().bytes.clone();
    bytes[..8].copy_from_slice(b"PBDEMS2\0");
    let err = demo_query::parse_header(&bytes).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidHeader("PBDEMS2".into()));
    assert!(demo_query::parse_ticks(&bytes, &TickQuery::new(["health"]), None).is_err());
}

#[test]
fn lists_every_described_event() {
    let listing = demo_query::list_game_events(&standard_demo().bytes).unwrap();
    let summary: Vec<(u16, &str, usize)> = listing
        .iter()
        .map(|event| (event.id, event.name.as_str(), event.occurrences))
        .collect();
    assert_eq!(
        summary,
        vec![(EVENT_ROUND_END, "round_end", 1), (EVENT_PLAYER_HURT, "player_hurt", 1)]
    );
}

#[test]
fn round_end_event() {
    let output = demo_query::parse_event(&standard_demo().bytes, "round_end", &EventQuery::default()).unwrap();
    assert_eq!(output.events.len(), 1);
    let event = &output.events[0];
    assert_eq!(event.tick, ROUND_END_TICK);
    assert_eq!(event.get("winner_team"), Some(&PropValue::Integer(2)));
    assert_eq!(event.get("reason"), Some(&PropValue::Integer(1)));
    assert!(event.augmented.is_empty());
    assert!(output.diagnostics.is_empty());
}

#[test]
fn events_are_augmented_with_player_props() {
    let query = EventQuery {
        player_props: vec!["health".into(), "team_num".into()],
        other_props: Vec::new(),
    };
    let output = demo_query::parse_event(&standard_demo().bytes, "player_hurt", &query).unwrap();
    assert_eq!(output.events.len(), 1);
    let event = &output.events[0];
    assert_eq!(event.tick, HURT_TICK);
    assert_eq!(event.get("userid"), Some(&PropValue::Integer(7)));
    assert_eq!(event.get("user_name"), Some(&PropValue::from("alice")));
    assert_eq!(event.get("user_steamid"), Some(&PropValue::Integer(ALICE_STEAMID as i64)));
    assert_eq!(event.get("user_health"), Some(&PropValue::Integer(alice_health(HURT_TICK))));
    assert_eq!(event.get("user_team_num"), Some(&PropValue::Integer(2)));
}

#[test]
fn all_events_in_stream_order() {
    let output = demo_query::parse_events::<&str>(&standard_demo().bytes, &[], &EventQuery::default()).unwrap();
    let names: Vec<(&str, u32)> = output.events.iter().map(|e| (e.name.as_str(), e.tick)).collect();
    assert_eq!(names, vec![("player_hurt", HURT_TICK), ("round_end", ROUND_END_TICK)]);
}

fn demo_with_chat_and_cvars() -> Demo {
    build_demo(|builder, tick| {
        if tick == HURT_TICK {
            let mut messages = Bits::new();
            set_con_var(&mut messages, &[("mp_tournament", "1"), ("tf_gamemode_cp", "1")]);
            say_text2(&mut messages, ALICE as u8, "TF_Chat_All", "alice", "gg");
            builder.messages(CMD_PACKET, tick, &messages);
        }
    })
}

#[test]
fn chat_lines_become_events() {
    let query = EventQuery {
        player_props: vec!["team_num".into()],
        other_props: Vec::new(),
    };
    let output = demo_query::parse_event(&demo_with_chat_and_cvars().bytes, "chat_message", &query).unwrap();
    assert_eq!(output.events.len(), 1);
    let chat = &output.events[0];
    assert_eq!(chat.tick, HURT_TICK);
    assert_eq!(chat.get("chat_message"), Some(&PropValue::from("gg")));
    assert_eq!(chat.get("chat_type"), Some(&PropValue::from("TF_Chat_All")));
    assert_eq!(chat.get("entity_name"), Some(&PropValue::from("alice")));
    assert_eq!(chat.get("entity_team_num"), Some(&PropValue::Integer(2)));
}

#[test]
fn synthetic_events_are_listed_and_decoded() {
    let demo = demo_with_chat_and_cvars();
    let listing = demo_query::list_game_events(&demo.bytes).unwrap();
    let counts: Vec<(&str, usize)> = listing.iter().map(|e| (e.name.as_str(), e.occurrences)).collect();
    assert_eq!(
        counts,
        vec![("round_end", 1), ("player_hurt", 1), ("server_cvar", 2), ("chat_message", 1)]
    );

    let cvars = demo_query::parse_event(&demo.bytes, "server_cvar", &EventQuery::default()).unwrap();
    let vars: Vec<(Option<&PropValue>, Option<&PropValue>)> =
        cvars.events.iter().map(|e| (e.get("name"), e.get("value"))).collect();
    assert_eq!(vars.len(), 2);
    assert_eq!(vars[0], (Some(&PropValue::from("mp_tournament")), Some(&PropValue::from("1"))));
}

#[test]
fn unknown_event_props_are_reported() {
    let query = EventQuery {
        player_props: vec!["m_flNothing".into()],
        other_props: Vec::new(),
    };
    let output = demo_query::parse_event(&standard_demo().bytes, "player_hurt", &query).unwrap();
    assert!(output
        .diagnostics
        .contains(&Diagnostic::UnresolvedProperty { name: "m_flNothing".into() }));
    assert_eq!(output.events[0].get("user_m_flNothing"), Some(&PropValue::Absent));
}

#[test]
fn players_from_userinfo() {
    let players = demo_query::parse_player_info(&standard_demo().bytes).unwrap();
    let summary: Vec<(u32, u16, &str, Option<u64>, bool)> = players
        .iter()
        .map(|p| (p.entity_id, p.user_id, p.name.as_str(), p.steamid, p.fake_player))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ALICE, 7, "alice", Some(ALICE_STEAMID), false),
            (BOB, 8, "bob", Some(BOB_STEAMID), false),
            (BOT, 9, "botty", None, true),
        ]
    );
    assert_eq!(players[0].guid, "[U:1:39734272]");
}

#[test]
fn rocket_trajectory() {
    let grenades = demo_query::parse_grenades(&standard_demo().bytes).unwrap();
    assert_eq!(grenades.len(), 1);
    let rocket = &grenades[0];
    assert_eq!(rocket.entity_id, ROCKET);
    assert_eq!(rocket.grenade_type, GrenadeType::Rocket);
    assert_eq!(rocket.class_name, "CTFProjectile_Rocket");
    assert_eq!(rocket.spawn_tick, ROCKET_SPAWN);
    assert_eq!(rocket.despawn_tick, Some(ROCKET_DELETED));
    assert_eq!(rocket.thrower_entity, Some(ALICE));
    assert_eq!(rocket.thrower_steamid, Some(ALICE_STEAMID));
    assert_eq!(rocket.thrower_name.as_deref(), Some("alice"));

    let expected: Vec<(u32, Vector)> = (ROCKET_SPAWN..=ROCKET_LAST_MOVE)
        .step_by(TICK_STEP)
        .map(|tick| {
            let [x, y, z] = rocket_origin(tick);
            (tick, Vector::new(x, y, z))
        })
        .collect();
    let actual: Vec<(u32, Vector)> = rocket.trajectory.iter().map(|s| (s.tick, s.position)).collect();
    assert_eq!(actual, expected);
    assert_eq!(rocket.distance_travelled(), 600.0);
}

#[test]
fn unknown_commands_are_skipped_with_a_diagnostic() {
    let demo = build_demo(|builder, tick| {
        if tick == 10 {
            builder.sized(42, 10, &[1, 2, 3, 4, 5]);
        }
    });
    let offset = demo.offset_of(42, 10);
    let query = TickQuery::new(["health"]);

    let table = demo_query::parse_ticks(&demo.bytes, &query, None).unwrap();
    assert_eq!(
        table.diagnostics,
        vec![Diagnostic::UnknownCommand {
            kind: 42,
            tick: 10,
            offset
        }]
    );

    let clean = demo_query::parse_ticks(&standard_demo().bytes, &query, None).unwrap();
    assert_eq!(table.data, clean.data);
}

#[test]
fn truncation_reports_where_it_happened() {
    let demo = standard_demo();
    let offset = demo.offset_of(CMD_PACKET, 100);
    let bytes = &demo.bytes[..offset + 40];

    let err = demo_query::parse_ticks(bytes, &TickQuery::new(["health"]), None).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TruncatedStream { .. }));
    assert_eq!(err.tick, 100);
    assert_eq!(err.offset, offset);
}

#[test]
fn cut_off_stop_ends_cleanly() {
    let demo = standard_demo();
    // stop type byte with only half of its tick left
    let end = demo.offset_of(CMD_STOP, STOP_TICK) + 3;
    let table = demo_query::parse_ticks(&demo.bytes[..end], &TickQuery::new(["health"]), None).unwrap();
    let full = demo_query::parse_ticks(&demo.bytes, &TickQuery::new(["health"]), None).unwrap();
    assert_eq!(table, full);
}
