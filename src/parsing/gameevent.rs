//! Game event descriptors, event decoding and augmentation with entity
//! properties.

use std::collections::{BTreeMap, HashMap};

use super::cursor::Cursor;
use super::datatable::Schema;
use super::state::ParserState;
use crate::errors::{Diagnostic, ErrorKind, ReadResult};
use crate::query::resolve::ResolvedProp;
use crate::types::events::{EventDescriptor, EventField, EventFieldDescriptor, EventFieldKind, EventInstance};
use crate::types::{DemoTick, EntityId, PropValue, UserId};

pub const EVENT_ID_BITS: usize = 9;

/// Name of the synthetic event produced for server cvar changes.
pub const SERVER_CVAR_EVENT: &str = "server_cvar";
pub const SERVER_CVAR_EVENT_ID: u16 = u16::MAX;

/// Name of the synthetic event produced for player chat.
pub const CHAT_MESSAGE_EVENT: &str = "chat_message";
pub const CHAT_MESSAGE_EVENT_ID: u16 = u16::MAX - 1;

/// TF2 user message id of `SayText2`.
pub const USER_MESSAGE_SAY_TEXT2: u8 = 4;

/// Reads `count` descriptors from a game event list body.
pub fn read_descriptors(cursor: &mut Cursor, count: usize) -> ReadResult<Vec<EventDescriptor>> {
    let mut descriptors = Vec::with_capacity(count);
    for _ in 0..count {
        let id = cursor.read_bits(EVENT_ID_BITS)? as u16;
        let name = cursor.read_cstring()?;
        let mut fields = Vec::new();
        loop {
            let raw_kind = cursor.read_bits(3)? as u8;
            // 3 bits always fit the enum
            let kind = EventFieldKind::try_from(raw_kind)
                .map_err(|_| ErrorKind::MalformedMessage(format!("event field kind {raw_kind}")))?;
            if kind == EventFieldKind::Local {
                break;
            }
            fields.push(EventFieldDescriptor {
                name: cursor.read_cstring()?,
                kind,
            });
        }
        descriptors.push(EventDescriptor { id, name, fields });
    }
    Ok(descriptors)
}

#[derive(Debug, Clone, Default)]
pub struct EventDecoder {
    descriptors: BTreeMap<u16, EventDescriptor>,
    by_name: HashMap<String, u16>,
}

impl EventDecoder {
    pub fn register_descriptor(&mut self, descriptor: EventDescriptor) {
        self.by_name.insert(descriptor.name.clone(), descriptor.id);
        self.descriptors.insert(descriptor.id, descriptor);
    }

    pub fn descriptor(&self, id: u16) -> Option<&EventDescriptor> {
        self.descriptors.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&EventDescriptor> {
        self.by_name.get(name).and_then(|id| self.descriptors.get(id))
    }

    /// All descriptors, by id.
    pub fn descriptors(&self) -> impl Iterator<Item = &EventDescriptor> {
        self.descriptors.values()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Reads the event id without consuming the body, so unwanted events
    /// can be skipped without decoding their fields.
    pub fn peek_id(raw: &Cursor) -> ReadResult<u16> {
        Ok(raw.clone().read_bits(EVENT_ID_BITS)? as u16)
    }

    pub fn decode(&self, raw: &Cursor, tick: DemoTick) -> ReadResult<EventInstance> {
        let id = Self::peek_id(raw)?;
        let descriptor = self
            .descriptor(id)
            .ok_or_else(|| ErrorKind::MalformedMessage(format!("game event {id} has no descriptor")))?;
        Self::decode_instance(raw, descriptor, tick)
    }

    pub fn decode_instance(raw: &Cursor, descriptor: &EventDescriptor, tick: DemoTick) -> ReadResult<EventInstance> {
        let mut cursor = raw.clone();
        let id = cursor.read_bits(EVENT_ID_BITS)? as u16;
        if id != descriptor.id {
            return Err(ErrorKind::MalformedMessage(format!(
                "event id {id} decoded with descriptor {} ({})",
                descriptor.id, descriptor.name
            )));
        }

        let mut fields = Vec::with_capacity(descriptor.fields.len());
        for field in &descriptor.fields {
            let value = match field.kind {
                EventFieldKind::Local => continue,
                EventFieldKind::String => PropValue::String(cursor.read_cstring()?),
                EventFieldKind::Float => PropValue::Float(cursor.read_f32()?),
                EventFieldKind::Long => PropValue::Integer(i64::from(cursor.read_signed(32)?)),
                EventFieldKind::Short => PropValue::Integer(i64::from(cursor.read_signed(16)?)),
                EventFieldKind::Byte => PropValue::Integer(i64::from(cursor.read_bits(8)?)),
                EventFieldKind::Bool => PropValue::Bool(cursor.read_bool()?),
                EventFieldKind::UInt64 => PropValue::Integer(cursor.read_u64()? as i64),
            };
            fields.push(EventField {
                name: field.name.clone(),
                value,
            });
        }

        Ok(EventInstance {
            id: descriptor.id,
            name: descriptor.name.clone(),
            tick,
            fields,
            augmented: Vec::new(),
        })
    }
}

/// Builds the synthetic events for a `SetConVar` message.
pub fn server_cvar_events(vars: &[(String, String)], tick: DemoTick) -> Vec<EventInstance> {
    vars.iter()
        .map(|(name, value)| EventInstance {
            id: SERVER_CVAR_EVENT_ID,
            name: SERVER_CVAR_EVENT.to_string(),
            tick,
            fields: vec![EventField::new("name", name.as_str()), EventField::new("value", value.as_str())],
            augmented: Vec::new(),
        })
        .collect()
}

/// One chat line from a `SayText2` user message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Entity index of the speaker, 0 for the server.
    pub client: EntityId,
    /// Localisation key like `TF_Chat_All`, empty for preformatted lines.
    pub kind: String,
    pub from: String,
    pub text: String,
}

impl ChatMessage {
    pub fn read(data: &Cursor) -> ReadResult<Self> {
        let mut cursor = data.clone();
        let client = EntityId::from(cursor.read_u8()?);
        let _wants_to_chat = cursor.read_u8()?;

        // preformatted lines start with a colour control byte
        let mut peek = cursor.clone();
        if peek.read_u8()? == 1 {
            return Ok(ChatMessage {
                client,
                kind: String::new(),
                from: String::new(),
                text: strip_colour_codes(&cursor.read_cstring()?),
            });
        }

        Ok(ChatMessage {
            client,
            kind: cursor.read_cstring()?,
            from: cursor.read_cstring()?,
            text: cursor.read_cstring()?,
        })
    }

    pub fn into_event(self, tick: DemoTick) -> EventInstance {
        EventInstance {
            id: CHAT_MESSAGE_EVENT_ID,
            name: CHAT_MESSAGE_EVENT.to_string(),
            tick,
            fields: vec![
                EventField::new("entindex", PropValue::Integer(i64::from(self.client))),
                EventField::new("chat_type", self.kind.as_str()),
                EventField::new("from", self.from.as_str()),
                EventField::new("chat_message", self.text.as_str()),
            ],
            augmented: Vec::new(),
        }
    }
}

/// Drops `\x07RRGGBB` and `\x08RRGGBBAA` colours and other control bytes.
fn strip_colour_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\x07' => {
                chars.by_ref().take(6).for_each(drop);
            }
            '\x08' => {
                chars.by_ref().take(8).for_each(drop);
            }
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
enum Reference {
    UserId,
    EntityIndex,
}

/// Event fields that point at an entity, and the prefix their augmented
/// fields get.
const REFERENCE_FIELDS: &[(&str, &str, Reference)] = &[
    ("userid", "user", Reference::UserId),
    ("attacker", "attacker", Reference::UserId),
    ("assister", "assister", Reference::UserId),
    ("victim_entindex", "victim", Reference::EntityIndex),
    ("inflictor_entindex", "inflictor", Reference::EntityIndex),
    ("entindex", "entity", Reference::EntityIndex),
];

const TEAM_RED: i64 = 2;
const TEAM_BLU: i64 = 3;

/// Appends player and world properties to decoded events.
#[derive(Debug, Clone, Default)]
pub struct EventAugmenter {
    player_props: Vec<ResolvedProp>,
    other_props: Vec<ResolvedProp>,
}

impl EventAugmenter {
    pub fn new(schema: &Schema, player_props: &[String], other_props: &[String]) -> Self {
        EventAugmenter {
            player_props: player_props.iter().map(|name| ResolvedProp::resolve(schema, name)).collect(),
            other_props: other_props.iter().map(|name| ResolvedProp::resolve(schema, name)).collect(),
        }
    }

    /// Names that resolved against no class at all.
    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.player_props
            .iter()
            .chain(self.other_props.iter())
            .filter(|prop| !prop.is_resolved())
            .map(|prop| prop.name.as_str())
    }

    pub fn augment(&self, event: &mut EventInstance, state: &ParserState, diagnostics: &mut Vec<Diagnostic>) {
        for (field, prefix, reference) in REFERENCE_FIELDS {
            let Some(raw) = event
                .fields
                .iter()
                .find(|f| f.name == *field)
                .and_then(|f| f.value.as_i64())
            else {
                continue;
            };

            let entity_id: Option<EntityId> = match reference {
                Reference::UserId => state
                    .player_by_user_id(raw as UserId)
                    .map(|player| player.entity_id),
                Reference::EntityIndex => Some(raw as EntityId),
            };
            let entity = entity_id.and_then(|id| state.entities.get(id));
            let info = entity_id.and_then(|id| state.player_info(id));

            // 0 is the world, which is a valid "nobody"
            if entity.is_none() && raw != 0 {
                let context = match entity_id {
                    Some(_) => format!("{}.{}", event.name, field),
                    None => format!("{}.{}: unknown user id {}", event.name, field, raw),
                };
                diagnostics.push(Diagnostic::InvalidEntityReference {
                    entity: entity_id.unwrap_or_default(),
                    tick: event.tick,
                    context,
                });
            }
            if let (Reference::UserId, Some(id), Some(player)) = (reference, entity_id, info) {
                if player.steamid.is_none() {
                    diagnostics.push(Diagnostic::UnresolvedPlayer {
                        entity: id,
                        tick: event.tick,
                    });
                }
            }

            event
                .augmented
                .push(EventField::new(format!("{prefix}_name"), info.map(|p| p.name.clone())));
            event.augmented.push(EventField::new(
                format!("{prefix}_steamid"),
                info.and_then(|p| p.steamid).map(|id| id as i64),
            ));
            for prop in &self.player_props {
                let value = entity.map(|e| prop.read(state, e)).unwrap_or_default();
                event.augmented.push(EventField::new(format!("{prefix}_{}", prop.name), value));
            }
        }

        if self.other_props.is_empty() {
            return;
        }

        let rules = state.entities_of_class(|class| class.name.ends_with("GameRulesProxy"));
        let teams = state.entities_of_class(|class| class.name.ends_with("Team") || class.derives_from("DT_Team"));
        let team_num = ResolvedProp::resolve_on(state, "team_num");

        for prop in &self.other_props {
            let value = rules.first().map(|e| prop.read(state, e)).unwrap_or_default();
            event.augmented.push(EventField::new(prop.name.clone(), value));

            for team in &teams {
                let prefix = match team_num.as_ref().map(|t| t.read(state, team)).and_then(|v| v.as_i64()) {
                    Some(TEAM_RED) => "red",
                    Some(TEAM_BLU) => "blu",
                    _ => continue,
                };
                event
                    .augmented
                    .push(EventField::new(format!("{prefix}_{}", prop.name), prop.read(state, team)));
            }
        }
    }
}
