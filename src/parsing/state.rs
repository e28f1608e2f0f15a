//! The authoritative decoder state.
//!
//! Everything here is a fold over the command stream: a clone of a
//! `ParserState` plus the cursor position is enough to resume decoding.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::datatable::{ClassDescriptor, Schema};
use super::entities::{
    decode_baseline, read_delta, read_update_type, Entity, EntityChange, EntityTracker, PacketEntitiesMessage,
    UpdateType, ENTITY_SERIAL_BITS, MAX_EDICT_BITS,
};
use super::gameevent::EventDecoder;
use super::message::Message;
use super::stringtable::{
    parse_player_info, StringTable, StringTableEntry, StringTableSnapshot, TABLE_INSTANCE_BASELINE, TABLE_USERINFO,
};
use crate::errors::{ErrorKind, ReadResult, SchemaViolation};
use crate::types::demo::ServerInfo;
use crate::types::entities::PlayerInfo;
use crate::types::{ClassId, DemoTick, EntityId, PropValue, UserId};

/// What a message changed, for handlers to react to.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    /// (table index, entry index) pairs.
    pub string_entries: Vec<(usize, usize)>,
    pub entities: Vec<EntityChange>,
}

type DynamicBaseline = HashMap<EntityId, (ClassId, Vec<PropValue>)>;

#[derive(Debug, Clone, Default)]
pub struct ParserState {
    pub tick: DemoTick,
    pub network_protocol: u32,
    pub server_info: Option<ServerInfo>,
    schema: Option<Arc<Schema>>,
    pub string_tables: Vec<StringTable>,
    pub entities: EntityTracker,
    pub events: EventDecoder,
    players: BTreeMap<EntityId, PlayerInfo>,
    baseline_cache: HashMap<ClassId, Vec<PropValue>>,
    dynamic_baselines: [DynamicBaseline; 2],
}

impl ParserState {
    pub fn new(network_protocol: u32) -> Self {
        ParserState {
            network_protocol,
            ..Default::default()
        }
    }

    pub fn schema(&self) -> ReadResult<&Schema> {
        self.schema
            .as_deref()
            .ok_or(ErrorKind::SchemaViolation(SchemaViolation::SchemaNotReady))
    }

    pub fn has_schema(&self) -> bool {
        self.schema.is_some()
    }

    pub fn set_schema(&mut self, schema: Schema) {
        self.schema = Some(Arc::new(schema));
        self.baseline_cache.clear();
    }

    pub fn class_of(&self, entity: &Entity) -> ReadResult<&ClassDescriptor> {
        self.schema()?.class(entity.class_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerInfo> {
        self.players.values()
    }

    pub fn player_info(&self, entity: EntityId) -> Option<&PlayerInfo> {
        self.players.get(&entity)
    }

    pub fn player_by_user_id(&self, user_id: UserId) -> Option<&PlayerInfo> {
        self.players.values().find(|player| player.user_id == user_id)
    }

    /// Live entities whose class matches `predicate`, in index order.
    pub fn entities_of_class<F>(&self, predicate: F) -> Vec<&Entity>
    where
        F: Fn(&ClassDescriptor) -> bool,
    {
        let Ok(schema) = self.schema() else {
            return Vec::new();
        };
        self.entities
            .iter()
            .filter(|entity| schema.class(entity.class_id).map(&predicate).unwrap_or(false))
            .collect()
    }

    pub fn string_table(&self, name: &str) -> Option<&StringTable> {
        self.string_tables.iter().find(|table| table.name == name)
    }

    /// Applies the state changing messages; everything else is a no-op.
    pub fn handle_message(&mut self, message: &Message) -> ReadResult<StateUpdate> {
        let mut update = StateUpdate::default();
        match message {
            Message::ServerInfo(info) => {
                self.server_info = Some(info.as_ref().clone());
            }
            Message::CreateStringTable(create) => {
                let mut table = StringTable::new(create.name.clone(), create.max_entries, create.fixed_user_data);
                let mut data = create.entry_data()?;
                let touched = table.parse_entries(&mut data, create.entry_count)?;
                log::debug!("created string table {} with {} entries", table.name, touched.len());
                let table_index = self.string_tables.len();
                self.string_tables.push(table);
                self.after_entries(table_index, &touched, &mut update);
            }
            Message::UpdateStringTable(table_update) => {
                let table_index = usize::from(table_update.table_id);
                let table = self.string_tables.get_mut(table_index).ok_or_else(|| {
                    ErrorKind::MalformedMessage(format!("update for unknown string table {}", table_update.table_id))
                })?;
                let mut data = table_update.data.clone();
                let touched = table.parse_entries(&mut data, table_update.entry_count)?;
                self.after_entries(table_index, &touched, &mut update);
            }
            Message::GameEventList(descriptors) => {
                log::debug!("registering {} game event descriptors", descriptors.len());
                for descriptor in descriptors {
                    self.events.register_descriptor(descriptor.clone());
                }
            }
            Message::PacketEntities(entities) => {
                update.entities = self.apply_packet_entities(entities)?;
            }
            _ => {}
        }
        Ok(update)
    }

    /// Applies a full string tables command.
    pub fn apply_snapshot(&mut self, snapshot: Vec<StringTableSnapshot>) -> StateUpdate {
        let mut update = StateUpdate::default();
        for table_snapshot in snapshot {
            let table_index = match self.string_tables.iter().position(|t| t.name == table_snapshot.name) {
                Some(index) => index,
                None => {
                    let max_entries = (table_snapshot.entries.len().max(1).next_power_of_two()).min(u16::MAX as usize);
                    self.string_tables
                        .push(StringTable::new(table_snapshot.name.clone(), max_entries as u16, None));
                    self.string_tables.len() - 1
                }
            };
            let table = &mut self.string_tables[table_index];
            let touched: Vec<usize> = (0..table_snapshot.entries.len()).collect();
            if table.entries.len() < table_snapshot.entries.len() {
                table
                    .entries
                    .resize_with(table_snapshot.entries.len(), StringTableEntry::default);
            }
            for (index, entry) in table_snapshot.entries.into_iter().enumerate() {
                table.entries[index] = entry;
            }
            self.after_entries(table_index, &touched, &mut update);
        }
        update
    }

    fn after_entries(&mut self, table_index: usize, touched: &[usize], update: &mut StateUpdate) {
        let Some(table) = self.string_tables.get(table_index) else {
            return;
        };
        match table.name.as_str() {
            TABLE_USERINFO => {
                for &index in touched {
                    let Some(data) = table.get(index).and_then(|entry| entry.user_data.as_deref()) else {
                        continue;
                    };
                    if data.is_empty() {
                        continue;
                    }
                    match parse_player_info(index, data) {
                        Ok(info) => {
                            self.players.insert(info.entity_id, info);
                        }
                        Err(err) => log::warn!("skipping malformed userinfo entry {}: {}", index, err),
                    }
                }
            }
            TABLE_INSTANCE_BASELINE => {
                for &index in touched {
                    if let Some(class_id) = table.get(index).and_then(|entry| entry.text().parse::<ClassId>().ok()) {
                        self.baseline_cache.remove(&class_id);
                    }
                }
            }
            _ => {}
        }
        update
            .string_entries
            .extend(touched.iter().map(|&entry| (table_index, entry)));
    }

    /// The instance baseline of a class, decoded on first use.
    fn instance_baseline(&mut self, class_id: ClassId) -> ReadResult<Vec<PropValue>> {
        if let Some(cached) = self.baseline_cache.get(&class_id) {
            return Ok(cached.clone());
        }
        let schema = self.schema.clone().ok_or(SchemaViolation::SchemaNotReady)?;
        let class = schema.class(class_id)?;
        let key = class_id.to_string();
        let data = self
            .string_table(TABLE_INSTANCE_BASELINE)
            .and_then(|table| table.entries.iter().find(|entry| entry.text() == key))
            .and_then(|entry| entry.user_data.clone());
        let props = match data {
            Some(data) => decode_baseline(class, &data)?,
            None => vec![PropValue::Absent; class.props.len()],
        };
        self.baseline_cache.insert(class_id, props.clone());
        Ok(props)
    }

    pub fn apply_packet_entities(&mut self, message: &PacketEntitiesMessage) -> ReadResult<Vec<EntityChange>> {
        let schema = self.schema.clone().ok_or(SchemaViolation::SchemaNotReady)?;
        let class_bits = schema.class_bits();
        let baseline_slot = usize::from(message.baseline & 1);
        let other_slot = 1 - baseline_slot;

        if message.update_baseline {
            self.dynamic_baselines[other_slot] = self.dynamic_baselines[baseline_slot].clone();
        }

        let mut data = message.data.clone();
        let mut changes = Vec::with_capacity(usize::from(message.updated_entries));
        let mut index: i64 = -1;

        for _ in 0..message.updated_entries {
            index += i64::from(data.read_ubitvar()?) + 1;
            if index >= (1 << MAX_EDICT_BITS) {
                return Err(ErrorKind::InvalidEntityReference { entity: index as EntityId });
            }
            let entity_index = index as EntityId;
            let update = read_update_type(&mut data)?;

            let class_id = match update {
                UpdateType::Enter => {
                    let class_id = data.read_bits(class_bits)? as ClassId;
                    let serial = data.read_bits(ENTITY_SERIAL_BITS)?;
                    let class = schema.class(class_id)?;

                    let dynamic = self.dynamic_baselines[baseline_slot]
                        .get(&entity_index)
                        .filter(|(baseline_class, _)| *baseline_class == class_id)
                        .map(|(_, props)| props.clone());
                    let mut props = match dynamic {
                        Some(props) => props,
                        None => self.instance_baseline(class_id)?,
                    };
                    for (prop_index, value) in read_delta(&mut data, class)? {
                        props[prop_index] = value;
                    }
                    if message.update_baseline {
                        self.dynamic_baselines[other_slot].insert(entity_index, (class_id, props.clone()));
                    }
                    self.entities.apply_baseline(entity_index, class_id, serial, props)?;
                    class_id
                }
                UpdateType::Preserve => {
                    let class_id = self.entities.require(entity_index)?.class_id;
                    let delta = read_delta(&mut data, schema.class(class_id)?)?;
                    self.entities.apply_delta(entity_index, delta)?;
                    class_id
                }
                UpdateType::Leave => {
                    let class_id = self.entities.get(entity_index).map(|e| e.class_id).unwrap_or_default();
                    self.entities.leave_pvs(entity_index);
                    class_id
                }
                UpdateType::Delete => {
                    let removed = self.entities.remove(entity_index);
                    removed.map(|e| e.class_id).unwrap_or_default()
                }
            };

            changes.push(EntityChange {
                index: entity_index,
                class_id,
                update,
            });
        }

        if message.is_delta() {
            while data.read_bool()? {
                let entity_index = data.read_bits(MAX_EDICT_BITS)?;
                if let Some(removed) = self.entities.remove(entity_index) {
                    changes.push(EntityChange {
                        index: entity_index,
                        class_id: removed.class_id,
                        update: UpdateType::Delete,
                    });
                }
            }
        } else {
            // a full update lists every entity that still exists
            let stale: Vec<EntityId> = self
                .entities
                .iter()
                .map(|entity| entity.index)
                .filter(|existing| !changes.iter().any(|change| change.index == *existing))
                .collect();
            for entity_index in stale {
                if let Some(removed) = self.entities.remove(entity_index) {
                    changes.push(EntityChange {
                        index: entity_index,
                        class_id: removed.class_id,
                        update: UpdateType::Delete,
                    });
                }
            }
        }

        Ok(changes)
    }
}
