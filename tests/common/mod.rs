//! Builds small synthetic demos for the integration tests.
//!
//! The standard demo has three players (two humans and a bot), a player
//! resource with pings, one rocket and two kinds of game events. Packets
//! arrive every third tick from [`FIRST_TICK`] to [`LAST_TICK`].
#![allow(dead_code)]

use std::sync::OnceLock;

use bitbuffer::{BitWriteStream, LittleEndian};

use demo_query::types::entities::STEAMID64_INDIVIDUAL_BASE;
use demo_query::types::{DemoTick, EntityId};

pub const HEADER_SIZE: usize = 1072;
pub const NETWORK_PROTOCOL: u32 = 24;

pub const FIRST_TICK: DemoTick = 1;
pub const LAST_TICK: DemoTick = 1099;
pub const TICK_STEP: usize = 3;
pub const STOP_TICK: DemoTick = 1100;

pub const ALICE: EntityId = 1;
pub const BOB: EntityId = 2;
pub const BOT: EntityId = 3;
pub const RESOURCE: EntityId = 40;
pub const ROCKET: EntityId = 200;

pub const ALICE_STEAMID: u64 = 76561198000000000;
pub const BOB_STEAMID: u64 = STEAMID64_INDIVIDUAL_BASE + 100;
pub const ALICE_SERIAL: u32 = 5;

pub const BOB_HEALTH: i64 = 175;
pub const BOT_HEALTH: i64 = 125;
pub const PINGS: [u32; 4] = [0, 45, 60, 15];

/// Bob's entity is deleted in this tick's packet.
pub const BOB_DELETED: DemoTick = 601;
pub const ROCKET_SPAWN: DemoTick = 400;
pub const ROCKET_LAST_MOVE: DemoTick = 460;
pub const ROCKET_DELETED: DemoTick = 463;

pub const HURT_TICK: DemoTick = 100;
pub const ROUND_END_TICK: DemoTick = 1024;

pub const EVENT_ROUND_END: u16 = 1;
pub const EVENT_PLAYER_HURT: u16 = 2;

// flattened prop indices
const PROP_ORIGIN: usize = 0;
const PROP_TEAM: usize = 1;
const PROP_OWNER: usize = 2;
pub const PROP_HEALTH: usize = 3;
const PROP_THROWER: usize = 3;
const PROP_PING: usize = 0;

const CLASS_PLAYER: u32 = 1;
const CLASS_ROCKET: u32 = 2;
const CLASS_RESOURCE: u32 = 3;
const CLASS_COUNT: u32 = 4;

const FLAG_UNSIGNED: u16 = 1 << 0;
const FLAG_NOSCALE: u16 = 1 << 2;
const FLAG_INSIDEARRAY: u16 = 1 << 8;

pub fn packet_ticks() -> impl Iterator<Item = DemoTick> {
    (FIRST_TICK..=LAST_TICK).step_by(TICK_STEP)
}

pub fn alice_health(tick: DemoTick) -> i64 {
    300 - (tick as i64 % 200)
}

pub fn alice_origin(tick: DemoTick) -> [f32; 3] {
    [tick as f32, -64.0, 128.5]
}

pub fn rocket_origin(tick: DemoTick) -> [f32; 3] {
    [100.0 + (tick - ROCKET_SPAWN) as f32 * 10.0, 50.0, 10.0]
}

/// A bit string, kept as a list of writes until it is turned into bytes.
#[derive(Debug, Clone, Default)]
pub struct Bits {
    ops: Vec<(u32, usize)>,
}

impl Bits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int(&mut self, value: u32, bits: usize) -> &mut Self {
        assert!(bits <= 32);
        if bits > 0 {
            let mask = if bits == 32 { u32::MAX } else { (1 << bits) - 1 };
            self.ops.push((value & mask, bits));
        }
        self
    }

    pub fn signed(&mut self, value: i32, bits: usize) -> &mut Self {
        self.int(value as u32, bits)
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.int(u32::from(value), 1)
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.int(u32::from(value), 8)
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.int(u32::from(value), 16)
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.int(value, 32)
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.int(value.to_bits(), 32)
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        for byte in bytes {
            self.u8(*byte);
        }
        self
    }

    pub fn cstring(&mut self, text: &str) -> &mut Self {
        self.bytes(text.as_bytes()).u8(0)
    }

    pub fn varint(&mut self, mut value: u32) -> &mut Self {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                return self.u8(byte);
            }
            self.u8(byte | 0x80);
        }
    }

    /// The engine's index delta: 2 bit width selector, then the value.
    pub fn ubitvar(&mut self, value: u32) -> &mut Self {
        match value {
            0..=15 => self.int(0, 2).int(value, 4),
            16..=255 => self.int(1, 2).int(value, 8),
            256..=4095 => self.int(2, 2).int(value, 12),
            _ => self.int(3, 2).int(value, 32),
        }
    }

    pub fn append(&mut self, other: &Bits) -> &mut Self {
        self.ops.extend_from_slice(&other.ops);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.iter().map(|(_, bits)| bits).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero padded to whole bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        {
            let mut stream = BitWriteStream::new(&mut data, LittleEndian);
            for &(value, bits) in &self.ops {
                stream.write_int(value, bits).unwrap();
            }
        }
        data
    }
}

/// Where a command landed in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMark {
    pub kind: u8,
    pub tick: DemoTick,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct Demo {
    pub bytes: Vec<u8>,
    pub commands: Vec<CommandMark>,
}

impl Demo {
    /// Byte offset of the first command of `kind` at `tick`.
    pub fn offset_of(&self, kind: u8, tick: DemoTick) -> usize {
        self.commands
            .iter()
            .find(|mark| mark.kind == kind && mark.tick == tick)
            .map(|mark| mark.offset)
            .unwrap()
    }
}

pub const CMD_SIGNON: u8 = 1;
pub const CMD_PACKET: u8 = 2;
pub const CMD_SYNCTICK: u8 = 3;
pub const CMD_DATATABLES: u8 = 6;
pub const CMD_STOP: u8 = 7;

#[derive(Debug, Default)]
pub struct DemoBuilder {
    body: Vec<u8>,
    commands: Vec<CommandMark>,
}

impl DemoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A command header followed by whatever payload its type expects.
    pub fn command(&mut self, kind: u8, tick: DemoTick, payload: &[u8]) -> &mut Self {
        self.commands.push(CommandMark {
            kind,
            tick,
            offset: HEADER_SIZE + self.body.len(),
        });
        self.body.push(kind);
        self.body.extend_from_slice(&tick.to_le_bytes());
        self.body.extend_from_slice(payload);
        self
    }

    /// Length prefixed payload, the framing of data tables, string tables,
    /// console commands and unknown command types.
    pub fn sized(&mut self, kind: u8, tick: DemoTick, data: &[u8]) -> &mut Self {
        let mut payload = (data.len() as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(data);
        self.command(kind, tick, &payload)
    }

    pub fn messages(&mut self, kind: u8, tick: DemoTick, messages: &Bits) -> &mut Self {
        let data = messages.to_bytes();
        let mut payload = vec![0u8; 76];
        payload.extend_from_slice(&tick.to_le_bytes());
        payload.extend_from_slice(&tick.to_le_bytes());
        payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
        payload.extend_from_slice(&data);
        self.command(kind, tick, &payload)
    }

    pub fn finish(&self, ticks: u32) -> Demo {
        let mut bytes = header(ticks);
        bytes.extend_from_slice(&self.body);
        Demo {
            bytes,
            commands: self.commands.clone(),
        }
    }
}

fn fixed(text: &str, size: usize) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(size, 0);
    bytes
}

pub fn header(ticks: u32) -> Vec<u8> {
    let mut bytes = fixed("HL2DEMO", 8);
    bytes.extend_from_slice(&3u32.to_le_bytes());
    bytes.extend_from_slice(&NETWORK_PROTOCOL.to_le_bytes());
    bytes.extend(fixed("127.0.0.1:27015", 260));
    bytes.extend(fixed("SourceTV Demo", 260));
    bytes.extend(fixed("cp_process_final", 260));
    bytes.extend(fixed("tf", 260));
    bytes.extend_from_slice(&(ticks as f32 * 0.015).to_le_bytes());
    bytes.extend_from_slice(&ticks.to_le_bytes());
    bytes.extend_from_slice(&(ticks / 2).to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    assert_eq!(bytes.len(), HEADER_SIZE);
    bytes
}

///////////////////////////////////////////////////
/// DATA TABLES
/// ///////////////////////////////////////////////

fn table_prop(bits: &mut Bits, name: &str, table: &str) {
    bits.int(6, 5).cstring(name).u16(0).cstring(table);
}

fn int_prop(bits: &mut Bits, name: &str, flags: u16, bit_count: u32) {
    bits.int(0, 5)
        .cstring(name)
        .u16(flags)
        .f32(0.0)
        .f32(0.0)
        .int(bit_count, 7);
}

fn vector_prop(bits: &mut Bits, name: &str) {
    bits.int(2, 5)
        .cstring(name)
        .u16(FLAG_NOSCALE)
        .f32(0.0)
        .f32(0.0)
        .int(0, 7);
}

fn array_prop(bits: &mut Bits, name: &str, elements: u32) {
    bits.int(5, 5).cstring(name).u16(0).int(elements, 10);
}

fn send_table(bits: &mut Bits, name: &str, prop_count: u32, props: impl FnOnce(&mut Bits)) {
    bits.bool(true).bool(false).cstring(name).int(prop_count, 10);
    props(bits);
}

pub fn data_tables() -> Bits {
    let mut bits = Bits::new();
    send_table(&mut bits, "DT_BaseEntity", 3, |b| {
        vector_prop(b, "m_vecOrigin");
        int_prop(b, "m_iTeamNum", FLAG_UNSIGNED, 6);
        int_prop(b, "m_hOwnerEntity", FLAG_UNSIGNED, 21);
    });
    send_table(&mut bits, "DT_TFPlayer", 2, |b| {
        table_prop(b, "baseclass", "DT_BaseEntity");
        int_prop(b, "m_iHealth", FLAG_UNSIGNED, 10);
    });
    send_table(&mut bits, "DT_TFProjectile_Rocket", 2, |b| {
        table_prop(b, "baseclass", "DT_BaseEntity");
        int_prop(b, "m_hThrower", FLAG_UNSIGNED, 21);
    });
    send_table(&mut bits, "DT_TFPlayerResource", 2, |b| {
        int_prop(b, "000", FLAG_UNSIGNED | FLAG_INSIDEARRAY, 10);
        array_prop(b, "m_iPing", 33);
    });
    bits.bool(false);

    let classes = [
        (0u16, "CBaseEntity", "DT_BaseEntity"),
        (1, "CTFPlayer", "DT_TFPlayer"),
        (2, "CTFProjectile_Rocket", "DT_TFProjectile_Rocket"),
        (3, "CTFPlayerResource", "DT_TFPlayerResource"),
    ];
    bits.u16(classes.len() as u16);
    for (id, name, table) in classes {
        bits.u16(id).cstring(name).cstring(table);
    }
    bits
}

///////////////////////////////////////////////////
/// MESSAGES
/// ///////////////////////////////////////////////

fn message(bits: &mut Bits, kind: u32) -> &mut Bits {
    bits.int(kind, 6)
}

pub fn net_tick(bits: &mut Bits, tick: DemoTick) {
    message(bits, 3).u32(tick).u16(15).u16(1);
}

pub fn set_con_var(bits: &mut Bits, vars: &[(&str, &str)]) {
    message(bits, 5).u8(vars.len() as u8);
    for (name, value) in vars {
        bits.cstring(name).cstring(value);
    }
}

/// A `SayText2` user message from `client` with the usual four params.
pub fn say_text2(bits: &mut Bits, client: u8, kind: &str, from: &str, text: &str) {
    let mut body = Bits::new();
    body.u8(client).u8(1).cstring(kind).cstring(from).cstring(text).cstring("").cstring("");
    message(bits, 23).u8(4).int(body.len() as u32, 11).append(&body);
}

pub fn game_event_list(bits: &mut Bits) {
    let mut body = Bits::new();
    // round_end: winner_team byte, reason short
    body.int(u32::from(EVENT_ROUND_END), 9).cstring("round_end");
    body.int(5, 3).cstring("winner_team");
    body.int(4, 3).cstring("reason");
    body.int(0, 3);
    // player_hurt: userid short, health short
    body.int(u32::from(EVENT_PLAYER_HURT), 9).cstring("player_hurt");
    body.int(4, 3).cstring("userid");
    body.int(4, 3).cstring("health");
    body.int(0, 3);

    message(bits, 30).int(2, 9).int(body.len() as u32, 20).append(&body);
}

pub fn game_event(bits: &mut Bits, body: &Bits) {
    message(bits, 25).int(body.len() as u32, 11).append(body);
}

pub fn round_end(winner: u8, reason: i16) -> Bits {
    let mut body = Bits::new();
    body.int(u32::from(EVENT_ROUND_END), 9)
        .u8(winner)
        .signed(i32::from(reason), 16);
    body
}

pub fn player_hurt(user_id: u16, health: i16) -> Bits {
    let mut body = Bits::new();
    body.int(u32::from(EVENT_PLAYER_HURT), 9)
        .u16(user_id)
        .signed(i32::from(health), 16);
    body
}

/// The `userinfo` entry payload.
pub fn player_info(name: &str, user_id: u32, guid: &str, fake_player: bool) -> Vec<u8> {
    let mut bytes = fixed(name, 32);
    bytes.extend_from_slice(&user_id.to_le_bytes());
    bytes.extend(fixed(guid, 33));
    bytes.extend(fixed("", 3 + 4 + 32));
    bytes.push(u8::from(fake_player));
    bytes.push(0);
    bytes
}

pub fn userinfo_table(bits: &mut Bits, entries: &[Vec<u8>]) {
    const MAX_ENTRIES: u16 = 32;
    let mut data = Bits::new();
    for (index, user_data) in entries.iter().enumerate() {
        // consecutive index, new string, no history
        data.bool(true).bool(true).bool(false).cstring(&index.to_string());
        data.bool(true).int(user_data.len() as u32, 14).bytes(user_data);
    }
    message(bits, 12)
        .cstring("userinfo")
        .u16(MAX_ENTRIES)
        .int(entries.len() as u32, 6)
        .varint(data.len() as u32)
        .bool(false)
        .bool(false)
        .append(&data);
}

pub enum Update {
    Enter { class: u32, serial: u32 },
    Preserve,
    Delete,
}

/// One entity record of a packet entities message. Props are written in
/// the order given, which has to be ascending.
pub struct EntityUpdate {
    pub index: EntityId,
    pub update: Update,
    pub props: Vec<(usize, Bits)>,
}

impl EntityUpdate {
    pub fn enter(index: EntityId, class: u32, serial: u32) -> Self {
        EntityUpdate {
            index,
            update: Update::Enter { class, serial },
            props: Vec::new(),
        }
    }

    pub fn preserve(index: EntityId) -> Self {
        EntityUpdate {
            index,
            update: Update::Preserve,
            props: Vec::new(),
        }
    }

    pub fn delete(index: EntityId) -> Self {
        EntityUpdate {
            index,
            update: Update::Delete,
            props: Vec::new(),
        }
    }

    pub fn int(mut self, prop: usize, value: u32, bits: usize) -> Self {
        let mut value_bits = Bits::new();
        value_bits.int(value, bits);
        self.props.push((prop, value_bits));
        self
    }

    pub fn vector(mut self, prop: usize, value: [f32; 3]) -> Self {
        let mut value_bits = Bits::new();
        value_bits.f32(value[0]).f32(value[1]).f32(value[2]);
        self.props.push((prop, value_bits));
        self
    }

    pub fn int_array(mut self, prop: usize, values: &[u32], count_bits: usize, element_bits: usize) -> Self {
        let mut value_bits = Bits::new();
        value_bits.int(values.len() as u32, count_bits);
        for value in values {
            value_bits.int(*value, element_bits);
        }
        self.props.push((prop, value_bits));
        self
    }
}

fn class_bits() -> usize {
    (u32::BITS - CLASS_COUNT.leading_zeros()) as usize
}

/// A delta packet entities message; `deleted` goes in the trailing
/// explicit delete list.
pub fn packet_entities(bits: &mut Bits, delta_from: DemoTick, updates: &[EntityUpdate], deleted: &[EntityId]) {
    let mut data = Bits::new();
    let mut last_index: i64 = -1;
    for update in updates {
        data.ubitvar((i64::from(update.index) - last_index - 1) as u32);
        last_index = i64::from(update.index);
        match update.update {
            Update::Enter { class, serial } => {
                data.bool(false).bool(true).int(class, class_bits()).int(serial, 10);
            }
            Update::Preserve => {
                data.bool(false).bool(false);
            }
            Update::Delete => {
                data.bool(true).bool(true);
                continue;
            }
        }
        let mut last_prop: i64 = -1;
        for (prop, value) in &update.props {
            data.bool(true).ubitvar((*prop as i64 - last_prop - 1) as u32).append(value);
            last_prop = *prop as i64;
        }
        data.bool(false);
    }
    for index in deleted {
        data.bool(true).int(*index, 11);
    }
    data.bool(false);

    message(bits, 26)
        .int(1024, 11)
        .bool(true)
        .signed(delta_from as i32, 32)
        .int(0, 1)
        .int(updates.len() as u32, 11)
        .int(data.len() as u32, 20)
        .bool(false)
        .append(&data);
}

///////////////////////////////////////////////////
/// THE STANDARD DEMO
/// ///////////////////////////////////////////////

fn entity_updates(tick: DemoTick) -> (Vec<EntityUpdate>, Vec<EntityId>) {
    let mut updates = Vec::new();
    let mut deleted = Vec::new();

    let alice = if tick == FIRST_TICK {
        EntityUpdate::enter(ALICE, CLASS_PLAYER, ALICE_SERIAL)
    } else {
        EntityUpdate::preserve(ALICE)
    };
    let alice = alice.vector(PROP_ORIGIN, alice_origin(tick));
    let alice = if tick == FIRST_TICK {
        alice.int(PROP_TEAM, 2, 6)
    } else {
        alice
    };
    updates.push(alice.int(PROP_HEALTH, alice_health(tick) as u32, 10));

    if tick == FIRST_TICK {
        updates.push(
            EntityUpdate::enter(BOB, CLASS_PLAYER, 9)
                .vector(PROP_ORIGIN, [0.0, 0.0, 0.0])
                .int(PROP_TEAM, 3, 6)
                .int(PROP_HEALTH, BOB_HEALTH as u32, 10),
        );
        updates.push(
            EntityUpdate::enter(BOT, CLASS_PLAYER, 2)
                .int(PROP_TEAM, 2, 6)
                .int(PROP_HEALTH, BOT_HEALTH as u32, 10),
        );
        updates.push(EntityUpdate::enter(RESOURCE, CLASS_RESOURCE, 1).int_array(PROP_PING, &PINGS, 6, 10));
    } else if tick == BOB_DELETED {
        updates.push(EntityUpdate::delete(BOB));
    }

    let alice_handle = (ALICE_SERIAL << 11) | ALICE;
    if tick == ROCKET_SPAWN {
        updates.push(
            EntityUpdate::enter(ROCKET, CLASS_ROCKET, 31)
                .vector(PROP_ORIGIN, rocket_origin(tick))
                .int(PROP_TEAM, 2, 6)
                .int(PROP_OWNER, alice_handle, 21)
                .int(PROP_THROWER, alice_handle, 21),
        );
    } else if tick > ROCKET_SPAWN && tick <= ROCKET_LAST_MOVE {
        updates.push(EntityUpdate::preserve(ROCKET).vector(PROP_ORIGIN, rocket_origin(tick)));
    } else if tick == ROCKET_DELETED {
        deleted.push(ROCKET);
    }

    // packet entity records are index ordered
    updates.sort_by_key(|update| update.index);
    (updates, deleted)
}

/// The standard demo, with `extra` called after every packet to append
/// more commands.
pub fn build_demo(mut extra: impl FnMut(&mut DemoBuilder, DemoTick)) -> Demo {
    let mut builder = DemoBuilder::new();
    builder.sized(CMD_DATATABLES, 0, &data_tables().to_bytes());

    let mut signon = Bits::new();
    game_event_list(&mut signon);
    userinfo_table(
        &mut signon,
        &[
            player_info("alice", 7, "[U:1:39734272]", false),
            player_info("bob", 8, "[U:1:100]", false),
            player_info("botty", 9, "BOT", true),
        ],
    );
    builder.messages(CMD_SIGNON, 0, &signon);
    builder.command(CMD_SYNCTICK, 0, &[]);

    let mut previous = 0;
    for tick in packet_ticks() {
        let mut messages = Bits::new();
        net_tick(&mut messages, tick);
        if tick == HURT_TICK {
            game_event(&mut messages, &player_hurt(7, alice_health(tick) as i16));
        }
        if tick == ROUND_END_TICK {
            game_event(&mut messages, &round_end(2, 1));
        }
        let (updates, deleted) = entity_updates(tick);
        packet_entities(&mut messages, previous, &updates, &deleted);
        builder.messages(CMD_PACKET, tick, &messages);
        previous = tick;
        extra(&mut builder, tick);
    }

    builder.command(CMD_STOP, STOP_TICK, &[]);
    builder.finish(STOP_TICK)
}

pub fn standard_demo() -> &'static Demo {
    static DEMO: OnceLock<Demo> = OnceLock::new();
    DEMO.get_or_init(|| build_demo(|_, _| {}))
}
