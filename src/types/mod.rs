//! A collection of the data types handed to callers.
//! Everything in here is plain data; decoding lives in [`crate::parsing`].

pub mod demo;
pub mod entities;
pub mod events;
pub mod math;
pub mod value;

/// Tick number as stored in command headers.
pub type DemoTick = u32;

/// Index of an entity slot (0..2048).
pub type EntityId = u32;

/// Server assigned user id, as referenced by game events.
pub type UserId = u16;

/// Server class id, index into the schema's class list.
pub type ClassId = u16;

pub use math::{Vector, VectorXY};
pub use value::PropValue;
