use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use super::{DemoTick, PropValue};

/// Wire type of a game event field, 3 bits on the wire.
/// `Local` fields are never networked and also terminate descriptor lists.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum EventFieldKind {
    Local = 0,
    String = 1,
    Float = 2,
    Long = 3,
    Short = 4,
    Byte = 5,
    Bool = 6,
    UInt64 = 7,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EventFieldDescriptor {
    pub name: String,
    pub kind: EventFieldKind,
}

/// One entry from the game event list message.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EventDescriptor {
    pub id: u16,
    pub name: String,
    pub fields: Vec<EventFieldDescriptor>,
}

impl EventDescriptor {
    pub fn field(&self, name: &str) -> Option<&EventFieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EventField {
    pub name: String,
    pub value: PropValue,
}

impl EventField {
    pub fn new<S: Into<String>, V: Into<PropValue>>(name: S, value: V) -> Self {
        EventField {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A decoded game event.
///
/// `fields` are exactly the networked fields, in descriptor order.
/// `augmented` holds the player/other property snapshot taken at the tick
/// the event was decoded, only when it was requested.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EventInstance {
    pub id: u16,
    pub name: String,
    pub tick: DemoTick,
    pub fields: Vec<EventField>,
    pub augmented: Vec<EventField>,
}

impl EventInstance {
    /// Looks up a field by name, networked fields first.
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.fields
            .iter()
            .chain(self.augmented.iter())
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }
}

/// An event descriptor with how often it occurred in the demo.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EventListing {
    pub id: u16,
    pub name: String,
    pub occurrences: usize,
}
