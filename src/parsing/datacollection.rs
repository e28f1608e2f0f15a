//////////////////////////////
//! Handlers that collect discrete things out of a demo: game events and
//! projectile lifetimes.
//!
//! Usage:
//!  - Create an [`EventCollector`] or [`GrenadeCollector`] and hand it to a
//!    [`DemoParser`](super::DemoParser).
//!
//! Structure:
//!  -  [`EventCollector`] decodes the wanted game events and augments them
//!     with entity props once their tick is complete.
//!  -  [`GrenadeCollector`] follows every projectile entity from enter to
//!     delete, using a [`HandleMap`] to find who threw it.
//////////////////////////////

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use super::datatable::Schema;
use super::entities::{EntityChange, EntityTracker, UpdateType, INVALID_NETWORK_HANDLE, MAX_EDICTS};
use super::gameevent::{
    server_cvar_events, ChatMessage, EventAugmenter, EventDecoder, CHAT_MESSAGE_EVENT, SERVER_CVAR_EVENT,
    USER_MESSAGE_SAY_TEXT2,
};
use super::message::{Message, MessageType};
use super::state::ParserState;
use super::{BorrowMessageHandler, MessageHandler};
use crate::errors::{Diagnostic, ErrorKind, ReadResult};
use crate::query::resolve::ResolvedProp;
use crate::types::entities::{GrenadeRecord, GrenadeType, TrajectorySample};
use crate::types::events::EventInstance;
use crate::types::{DemoTick, EntityId, PropValue};

///////////////////////////////////////////////////
/// EVENTS
/// ///////////////////////////////////////////////

/// Props to attach to decoded events.
#[derive(Default, Debug, Clone)]
pub struct EventQuery {
    /// Read off every player an event references, as `<prefix>_<prop>`.
    pub player_props: Vec<String>,
    /// Read off the game rules and team entities.
    pub other_props: Vec<String>,
}

#[derive(Serialize, Default, Debug, Clone, PartialEq)]
pub struct EventOutput {
    pub events: Vec<EventInstance>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct EventCollector {
    /// Empty means every event.
    wanted: HashSet<String>,
    query: EventQuery,
    augmenter: Option<EventAugmenter>,
    /// Events of the open tick, augmented when it ends.
    pending: Vec<EventInstance>,
    output: EventOutput,
}

impl EventCollector {
    pub fn new<S: AsRef<str>>(names: &[S], query: EventQuery) -> Self {
        EventCollector {
            wanted: names.iter().map(|name| name.as_ref().to_string()).collect(),
            query,
            augmenter: None,
            pending: Vec::new(),
            output: EventOutput::default(),
        }
    }

    fn wants(&self, name: &str) -> bool {
        self.wanted.is_empty() || self.wanted.contains(name)
    }

    fn handle_event(&mut self, raw: &super::cursor::Cursor, tick: DemoTick, state: &ParserState) -> ReadResult<()> {
        let id = EventDecoder::peek_id(raw)?;
        let descriptor = state
            .events
            .descriptor(id)
            .ok_or_else(|| ErrorKind::MalformedMessage(format!("game event {id} before its descriptor")))?;
        if !self.wants(&descriptor.name) {
            return Ok(());
        }
        let event = EventDecoder::decode_instance(raw, descriptor, tick)?;
        self.pending.push(event);
        Ok(())
    }

    fn flush(&mut self, state: &ParserState) {
        for mut event in self.pending.drain(..) {
            if let Some(augmenter) = &self.augmenter {
                augmenter.augment(&mut event, state, &mut self.output.diagnostics);
            }
            self.output.events.push(event);
        }
    }
}

impl MessageHandler for EventCollector {
    type Output = EventOutput;

    fn does_handle(message_type: MessageType) -> bool {
        matches!(
            message_type,
            MessageType::GameEvent | MessageType::SetConVar | MessageType::UserMessage
        )
    }

    fn handle_data_tables(&mut self, schema: &Schema, _state: &ParserState) {
        let augmenter = EventAugmenter::new(schema, &self.query.player_props, &self.query.other_props);
        for name in augmenter.unresolved() {
            self.output
                .diagnostics
                .push(Diagnostic::UnresolvedProperty { name: name.to_string() });
        }
        self.augmenter = Some(augmenter);
    }

    fn handle_message(&mut self, message: &Message, tick: DemoTick, state: &ParserState) -> ReadResult<()> {
        match message {
            Message::GameEvent(raw) => self.handle_event(raw, tick, state)?,
            Message::SetConVar(vars) if self.wants(SERVER_CVAR_EVENT) => {
                self.pending.extend(server_cvar_events(vars, tick));
            }
            Message::UserMessage { kind, data }
                if *kind == USER_MESSAGE_SAY_TEXT2 && self.wants(CHAT_MESSAGE_EVENT) =>
            {
                self.pending.push(ChatMessage::read(data)?.into_event(tick));
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_tick_end(&mut self, _tick: DemoTick, _next_tick: Option<DemoTick>, state: &ParserState) -> ReadResult<()> {
        self.flush(state);
        Ok(())
    }

    fn handle_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.output.diagnostics.push(diagnostic);
    }

    fn into_output(mut self, state: &ParserState) -> Self::Output {
        self.flush(state);
        self.output
    }
}

impl BorrowMessageHandler for EventCollector {
    fn borrow_output(&self, _state: &ParserState) -> &Self::Output {
        &self.output
    }
}

///////////////////////////////////////////////////
/// GRENADES
/// ///////////////////////////////////////////////

const PROP_ORIGIN: &str = "m_vecOrigin";
const PROP_THROWER: &str = "m_hThrower";
const PROP_OWNER: &str = "m_hOwnerEntity";

/// Tracks who owns which entity by networked handle.
#[derive(Default, Debug, Clone)]
pub struct HandleMap {
    // entity id -> owner handle, as networked
    entity_owners: HashMap<EntityId, i64>,
}

impl HandleMap {
    pub fn register_entity_owner(&mut self, entity_id: EntityId, owner_handle: i64) {
        self.entity_owners.insert(entity_id, owner_handle);
    }

    pub fn forget(&mut self, entity_id: EntityId) {
        self.entity_owners.remove(&entity_id);
    }

    /// The owner's entity id. Falls back to the index bits of the handle
    /// when the owner is no longer live.
    pub fn get_entity_owner_id(&self, entity_id: EntityId, entities: &EntityTracker) -> Option<EntityId> {
        let handle = *self.entity_owners.get(&entity_id)?;
        match entities.resolve_network_handle(handle) {
            Some(owner) => Some(owner.index),
            None => Self::handle_index(handle),
        }
    }

    fn handle_index(handle: i64) -> Option<EntityId> {
        if handle < 0 || handle == INVALID_NETWORK_HANDLE {
            return None;
        }
        Some((handle & (MAX_EDICTS as i64 - 1)) as EntityId)
    }
}

#[derive(Debug, Default)]
struct GrenadeProps {
    origin: ResolvedProp,
    thrower: ResolvedProp,
    owner: ResolvedProp,
}

#[derive(Debug, Default)]
pub struct GrenadeCollector {
    props: Option<GrenadeProps>,
    handle_map: HandleMap,
    live: BTreeMap<EntityId, GrenadeRecord>,
    serials: HashMap<EntityId, u32>,
    finished: Vec<GrenadeRecord>,
}

impl GrenadeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish(&mut self, entity_id: EntityId, tick: DemoTick) {
        if let Some(mut record) = self.live.remove(&entity_id) {
            record.despawn_tick = Some(tick);
            self.finished.push(record);
        }
        self.serials.remove(&entity_id);
        self.handle_map.forget(entity_id);
    }

    fn start(&mut self, change: &EntityChange, tick: DemoTick, state: &ParserState) -> ReadResult<()> {
        let class = state.schema()?.class(change.class_id)?;
        let Some(grenade_type) = GrenadeType::from_class_name(&class.name) else {
            return Ok(());
        };
        log::trace!("{} entered as entity {} at tick {}", class.name, change.index, tick);
        if let Some(entity) = state.entities.get(change.index) {
            self.serials.insert(change.index, entity.serial);
        }
        self.live.insert(
            change.index,
            GrenadeRecord {
                entity_id: change.index,
                grenade_type,
                class_name: class.name.clone(),
                spawn_tick: tick,
                despawn_tick: None,
                thrower_entity: None,
                thrower_steamid: None,
                thrower_name: None,
                trajectory: Vec::new(),
            },
        );
        Ok(())
    }

    fn update(&mut self, entity_id: EntityId, tick: DemoTick, state: &ParserState) {
        let (Some(props), Some(entity)) = (&self.props, state.entities.get(entity_id)) else {
            return;
        };
        let Some(record) = self.live.get_mut(&entity_id) else {
            return;
        };

        let owner = match props.thrower.read(state, entity) {
            PropValue::Absent => props.owner.read(state, entity),
            thrower => thrower,
        };
        if let Some(handle) = owner.as_i64() {
            self.handle_map.register_entity_owner(entity_id, handle);
        }
        if let Some(thrower) = self.handle_map.get_entity_owner_id(entity_id, &state.entities) {
            record.thrower_entity = Some(thrower);
            if let Some(player) = state.player_info(thrower) {
                record.thrower_steamid = player.steamid;
                record.thrower_name = Some(player.name.clone());
            }
        }

        if let Some(position) = props.origin.read(state, entity).as_vector() {
            let moved = record.trajectory.last().map_or(true, |last| last.position != position);
            if moved {
                record.trajectory.push(TrajectorySample { tick, position });
            }
        }
    }
}

impl MessageHandler for GrenadeCollector {
    type Output = Vec<GrenadeRecord>;

    fn does_handle(_message_type: MessageType) -> bool {
        false
    }

    fn handle_data_tables(&mut self, schema: &Schema, _state: &ParserState) {
        self.props = Some(GrenadeProps {
            origin: ResolvedProp::resolve(schema, PROP_ORIGIN),
            thrower: ResolvedProp::resolve(schema, PROP_THROWER),
            owner: ResolvedProp::resolve(schema, PROP_OWNER),
        });
    }

    fn handle_entities(&mut self, changes: &[EntityChange], tick: DemoTick, state: &ParserState) -> ReadResult<()> {
        for change in changes {
            match change.update {
                UpdateType::Enter => {
                    // same serial is the same projectile coming back into the pvs
                    let serial = state.entities.get(change.index).map(|entity| entity.serial);
                    let known = self.live.contains_key(&change.index) && self.serials.get(&change.index).copied() == serial;
                    if !known {
                        self.finish(change.index, tick);
                        self.start(change, tick, state)?;
                    }
                    self.update(change.index, tick, state);
                }
                UpdateType::Preserve => self.update(change.index, tick, state),
                UpdateType::Delete => self.finish(change.index, tick),
                UpdateType::Leave => {}
            }
        }
        Ok(())
    }

    fn into_output(self, _state: &ParserState) -> Self::Output {
        let mut out = self.finished;
        out.extend(self.live.into_values());
        out.sort_by_key(|record| (record.spawn_tick, record.entity_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_resolves_through_live_handles() {
        let mut entities = EntityTracker::default();
        entities.apply_baseline(3, 1, 17, vec![]).unwrap();
        let mut map = HandleMap::default();
        map.register_entity_owner(100, (17 << 11) | 3);
        assert_eq!(map.get_entity_owner_id(100, &entities), Some(3));

        // owner gone: index bits still name the slot
        entities.remove(3);
        assert_eq!(map.get_entity_owner_id(100, &entities), Some(3));

        map.register_entity_owner(101, INVALID_NETWORK_HANDLE);
        assert_eq!(map.get_entity_owner_id(101, &entities), None);
        map.forget(100);
        assert_eq!(map.get_entity_owner_id(100, &entities), None);
    }

    #[test]
    fn wanted_event_names() {
        let all = EventCollector::new::<&str>(&[], EventQuery::default());
        assert!(all.wants("player_death"));
        let some = EventCollector::new(&["round_end"], EventQuery::default());
        assert!(some.wants("round_end"));
        assert!(!some.wants("player_death"));
    }
}
