//! Entity state: the slot arena and the packet entities wire format.

use std::collections::BTreeMap;

use serde::Serialize;

use super::cursor::Cursor;
use super::datatable::{ClassDescriptor, Schema};
use crate::errors::{ErrorKind, ReadResult, SchemaViolation};
use crate::types::{ClassId, EntityId, PropValue};

pub const MAX_EDICT_BITS: usize = 11;
pub const MAX_EDICTS: usize = 1 << MAX_EDICT_BITS;
pub const ENTITY_SERIAL_BITS: usize = 10;
/// The networked "no entity" handle.
pub const INVALID_NETWORK_HANDLE: i64 = (1 << (MAX_EDICT_BITS + ENTITY_SERIAL_BITS)) - 1;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateType {
    Preserve,
    Leave,
    Enter,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub index: EntityId,
    pub serial: u32,
    pub class_id: ClassId,
    pub in_pvs: bool,
    /// Indexed by flattened property index.
    pub props: Vec<PropValue>,
}

static ABSENT: PropValue = PropValue::Absent;

impl Entity {
    pub fn prop(&self, index: usize) -> &PropValue {
        self.props.get(index).unwrap_or(&ABSENT)
    }

    /// The handle value the game networks for this entity.
    pub fn network_handle(&self) -> i64 {
        (i64::from(self.serial) << MAX_EDICT_BITS) | i64::from(self.index)
    }
}

/// Generation checked reference to an entity slot.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    pub index: EntityId,
    pub generation: u32,
}

#[derive(Debug, Clone, Default)]
struct EntitySlot {
    generation: u32,
    entity: Option<Entity>,
}

/// Arena of entity slots.
///
/// Removing an entity bumps its slot generation, so handles taken before the
/// removal stop resolving even when the index gets reused.
#[derive(Debug, Clone, Default)]
pub struct EntityTracker {
    slots: Vec<EntitySlot>,
}

impl EntityTracker {
    fn slot_mut(&mut self, index: EntityId) -> ReadResult<&mut EntitySlot> {
        let slot = index as usize;
        if slot >= MAX_EDICTS {
            return Err(ErrorKind::InvalidEntityReference { entity: index });
        }
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, EntitySlot::default);
        }
        Ok(&mut self.slots[slot])
    }

    /// Creates or fully replaces the entity at `index`.
    pub fn apply_baseline(
        &mut self,
        index: EntityId,
        class_id: ClassId,
        serial: u32,
        props: Vec<PropValue>,
    ) -> ReadResult<()> {
        let slot = self.slot_mut(index)?;
        if let Some(previous) = &slot.entity {
            if previous.serial != serial || previous.class_id != class_id {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        slot.entity = Some(Entity {
            index,
            serial,
            class_id,
            in_pvs: true,
            props,
        });
        Ok(())
    }

    /// Overwrites only the named property indices.
    pub fn apply_delta(&mut self, index: EntityId, changes: Vec<(usize, PropValue)>) -> ReadResult<()> {
        let entity = self.get_mut(index)?;
        for (prop_index, value) in changes {
            let count = entity.props.len();
            let target = entity.props.get_mut(prop_index).ok_or(SchemaViolation::PropertyIndexOutOfRange {
                class: entity.class_id,
                index: prop_index,
                count,
            })?;
            *target = value;
        }
        entity.in_pvs = true;
        Ok(())
    }

    pub fn remove(&mut self, index: EntityId) -> Option<Entity> {
        let slot = self.slots.get_mut(index as usize)?;
        let removed = slot.entity.take();
        if removed.is_some() {
            slot.generation = slot.generation.wrapping_add(1);
        }
        removed
    }

    /// The entity stays known but dormant.
    pub fn leave_pvs(&mut self, index: EntityId) {
        if let Ok(entity) = self.get_mut(index) {
            entity.in_pvs = false;
        }
    }

    pub fn get(&self, index: EntityId) -> Option<&Entity> {
        self.slots.get(index as usize).and_then(|slot| slot.entity.as_ref())
    }

    pub fn get_mut(&mut self, index: EntityId) -> ReadResult<&mut Entity> {
        self.slots
            .get_mut(index as usize)
            .and_then(|slot| slot.entity.as_mut())
            .ok_or(ErrorKind::InvalidEntityReference { entity: index })
    }

    pub fn require(&self, index: EntityId) -> ReadResult<&Entity> {
        self.get(index).ok_or(ErrorKind::InvalidEntityReference { entity: index })
    }

    pub fn handle(&self, index: EntityId) -> Option<EntityHandle> {
        let slot = self.slots.get(index as usize)?;
        slot.entity.as_ref().map(|_| EntityHandle {
            index,
            generation: slot.generation,
        })
    }

    pub fn resolve(&self, handle: EntityHandle) -> Option<&Entity> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation == handle.generation {
            slot.entity.as_ref()
        } else {
            None
        }
    }

    /// Resolves a handle as networked in props like `m_hOwnerEntity`.
    pub fn resolve_network_handle(&self, raw: i64) -> Option<&Entity> {
        if raw < 0 || raw == INVALID_NETWORK_HANDLE {
            return None;
        }
        let index = (raw & (MAX_EDICTS as i64 - 1)) as EntityId;
        let serial = (raw >> MAX_EDICT_BITS) as u32;
        self.get(index).filter(|entity| entity.serial == serial)
    }

    /// Live entities in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.slots.iter().filter_map(|slot| slot.entity.as_ref())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Property values of one entity keyed by dotted path.
    pub fn snapshot(&self, index: EntityId, schema: &Schema) -> ReadResult<Vec<(String, PropValue)>> {
        let entity = self.require(index)?;
        let class = schema.class(entity.class_id)?;
        Ok(class
            .props
            .iter()
            .zip(entity.props.iter())
            .map(|(descriptor, value)| (descriptor.path.clone(), value.clone()))
            .collect())
    }

    pub fn snapshot_all<F>(&self, schema: &Schema, filter: F) -> ReadResult<BTreeMap<EntityId, Vec<(String, PropValue)>>>
    where
        F: Fn(&Entity) -> bool,
    {
        self.iter()
            .filter(|entity| filter(entity))
            .map(|entity| Ok((entity.index, self.snapshot(entity.index, schema)?)))
            .collect()
    }
}

/// One entity touched by a packet entities message.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityChange {
    pub index: EntityId,
    pub class_id: ClassId,
    pub update: UpdateType,
}

#[derive(Debug, Clone)]
pub struct PacketEntitiesMessage<'a> {
    pub max_entries: u16,
    pub delta_from: Option<i32>,
    pub baseline: u8,
    pub updated_entries: u16,
    pub update_baseline: bool,
    pub data: Cursor<'a>,
}

impl<'a> PacketEntitiesMessage<'a> {
    pub fn read(cursor: &mut Cursor<'a>) -> ReadResult<Self> {
        let max_entries = cursor.read_bits(MAX_EDICT_BITS)? as u16;
        let delta_from = if cursor.read_bool()? {
            Some(cursor.read_i32()?)
        } else {
            None
        };
        let baseline = cursor.read_bits(1)? as u8;
        let updated_entries = cursor.read_bits(MAX_EDICT_BITS)? as u16;
        let length = cursor.read_bits(20)? as usize;
        let update_baseline = cursor.read_bool()?;
        Ok(PacketEntitiesMessage {
            max_entries,
            delta_from,
            baseline,
            updated_entries,
            update_baseline,
            data: cursor.read_blob(length)?,
        })
    }

    pub fn is_delta(&self) -> bool {
        self.delta_from.is_some()
    }
}

pub fn read_update_type(cursor: &mut Cursor) -> ReadResult<UpdateType> {
    let leave = cursor.read_bool()?;
    let second = cursor.read_bool()?;
    Ok(match (leave, second) {
        (false, false) => UpdateType::Preserve,
        (false, true) => UpdateType::Enter,
        (true, false) => UpdateType::Leave,
        (true, true) => UpdateType::Delete,
    })
}

/// Reads a property delta: `while bit { index += ubitvar + 1; value }`.
pub fn read_delta(cursor: &mut Cursor, class: &ClassDescriptor) -> ReadResult<Vec<(usize, PropValue)>> {
    let mut changes = Vec::new();
    let mut index: i64 = -1;
    while cursor.read_bool()? {
        index += i64::from(cursor.read_ubitvar()?) + 1;
        let prop_index = index as usize;
        let descriptor = class.prop(prop_index)?;
        changes.push((prop_index, descriptor.decode(cursor)?));
    }
    Ok(changes)
}

/// Props of a fresh entity of `class` with a delta applied over all absent
/// values.
pub fn decode_baseline(class: &ClassDescriptor, data: &[u8]) -> ReadResult<Vec<PropValue>> {
    let mut props = vec![PropValue::Absent; class.props.len()];
    for (index, value) in read_delta(&mut Cursor::new(data), class)? {
        props[index] = value;
    }
    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_props(values: &[i64]) -> Vec<PropValue> {
        values.iter().map(|v| PropValue::Integer(*v)).collect()
    }

    #[test]
    fn baseline_then_delta() {
        let mut tracker = EntityTracker::default();
        tracker.apply_baseline(5, 1, 100, entity_props(&[1, 2, 3])).unwrap();
        tracker
            .apply_delta(5, vec![(1, PropValue::Integer(20))])
            .unwrap();
        assert_eq!(tracker.get(5).unwrap().props, entity_props(&[1, 20, 3]));

        // a baseline fully replaces
        tracker.apply_baseline(5, 1, 100, vec![PropValue::Absent; 3]).unwrap();
        assert!(tracker.get(5).unwrap().props.iter().all(PropValue::is_absent));
    }

    #[test]
    fn deltas_need_a_live_entity() {
        let mut tracker = EntityTracker::default();
        assert_eq!(
            tracker.apply_delta(3, vec![]),
            Err(ErrorKind::InvalidEntityReference { entity: 3 })
        );
        tracker.apply_baseline(3, 0, 1, entity_props(&[0])).unwrap();
        assert!(matches!(
            tracker.apply_delta(3, vec![(4, PropValue::Integer(1))]),
            Err(ErrorKind::SchemaViolation(SchemaViolation::PropertyIndexOutOfRange { .. }))
        ));
        assert!(tracker.apply_baseline(MAX_EDICTS as EntityId, 0, 1, vec![]).is_err());
    }

    #[test]
    fn removal_invalidates_handles() {
        let mut tracker = EntityTracker::default();
        tracker.apply_baseline(7, 2, 9, entity_props(&[1])).unwrap();
        let handle = tracker.handle(7).unwrap();
        assert!(tracker.resolve(handle).is_some());

        assert!(tracker.remove(7).is_some());
        assert!(tracker.resolve(handle).is_none());
        tracker.apply_baseline(7, 2, 10, entity_props(&[1])).unwrap();
        assert!(tracker.resolve(handle).is_none());
        assert!(tracker.resolve(tracker.handle(7).unwrap()).is_some());
    }

    #[test]
    fn pvs_and_network_handles() {
        let mut tracker = EntityTracker::default();
        tracker.apply_baseline(12, 3, 44, entity_props(&[1])).unwrap();
        tracker.leave_pvs(12);
        let entity = tracker.get(12).unwrap();
        assert!(!entity.in_pvs);
        let raw = entity.network_handle();
        assert_eq!(raw, (44 << 11) | 12);
        assert_eq!(tracker.resolve_network_handle(raw).map(|e| e.index), Some(12));
        assert!(tracker.resolve_network_handle((45 << 11) | 12).is_none());
        assert!(tracker.resolve_network_handle(INVALID_NETWORK_HANDLE).is_none());
    }

    #[test]
    fn iteration_is_index_ordered() {
        let mut tracker = EntityTracker::default();
        for index in [9, 2, 5] {
            tracker.apply_baseline(index, 0, 0, vec![]).unwrap();
        }
        let order: Vec<EntityId> = tracker.iter().map(|e| e.index).collect();
        assert_eq!(order, vec![2, 5, 9]);
        assert_eq!(tracker.len(), 3);
    }

    fn nibble_class(prop_count: usize) -> ClassDescriptor {
        use super::super::datatable::ServerClassDef;
        use super::super::sendprop::{PropertyDescriptor, SendPropFlags, SendPropType};

        let props = (0..prop_count)
            .map(|i| PropertyDescriptor {
                table: "DT_Test".into(),
                name: format!("m_n{i}"),
                path: format!("DT_Test.m_n{i}"),
                kind: SendPropType::Int,
                flags: SendPropFlags(SendPropFlags::UNSIGNED),
                bit_count: 4,
                low_value: 0.0,
                high_value: 0.0,
                element_count: 0,
                element: None,
            })
            .collect();
        let def = ServerClassDef {
            id: 0,
            name: "CTest".into(),
            table: "DT_Test".into(),
        };
        ClassDescriptor::new(&def, Vec::new(), props)
    }

    #[test]
    fn delta_index_steps() {
        use bitbuffer::{BitWriteStream, LittleEndian};

        let mut data = Vec::new();
        {
            let mut s = BitWriteStream::new(&mut data, LittleEndian);
            // prop 2: skip 2, short form
            s.write_bool(true).unwrap();
            s.write_int(0u8, 2).unwrap();
            s.write_int(2u8, 4).unwrap();
            s.write_int(9u8, 4).unwrap();
            // prop 19: skip 16, byte form
            s.write_bool(true).unwrap();
            s.write_int(1u8, 2).unwrap();
            s.write_int(16u8, 8).unwrap();
            s.write_int(5u8, 4).unwrap();
            s.write_bool(false).unwrap();
        }
        let changes = read_delta(&mut Cursor::new(&data), &nibble_class(20)).unwrap();
        assert_eq!(
            changes,
            vec![(2, PropValue::Integer(9)), (19, PropValue::Integer(5))]
        );
    }

    #[test]
    fn update_types() {
        // bits are read lsb first: 0b10 is (false, true)
        assert_eq!(read_update_type(&mut Cursor::new(&[0b00])), Ok(UpdateType::Preserve));
        assert_eq!(read_update_type(&mut Cursor::new(&[0b10])), Ok(UpdateType::Enter));
        assert_eq!(read_update_type(&mut Cursor::new(&[0b01])), Ok(UpdateType::Leave));
        assert_eq!(read_update_type(&mut Cursor::new(&[0b11])), Ok(UpdateType::Delete));
    }
}
