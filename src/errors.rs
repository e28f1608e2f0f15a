//! Error and diagnostic types.
//!
//! Fatal problems are [`ErrorKind`]s, carried out of the library wrapped in a
//! [`DecodeError`] that adds where in the stream they happened. Everything
//! that lets decoding continue is a [`Diagnostic`] collected on the result.

use serde::Serialize;
use thiserror::Error;

use crate::types::{DemoTick, EntityId};

pub type ReadResult<T> = std::result::Result<T, ErrorKind>;
pub type Result<T> = std::result::Result<T, DecodeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("stream truncated: wanted {requested} bits with {bits_left} bits left")]
    TruncatedStream { requested: usize, bits_left: usize },

    #[error("not a demo file, found header tag {0:?}")]
    InvalidHeader(String),

    #[error(transparent)]
    SchemaViolation(#[from] SchemaViolation),

    #[error("unknown net message type {0}")]
    UnknownMessageType(u8),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("entity {entity} is not live")]
    InvalidEntityReference { entity: EntityId },

    #[error("decompression failed: {0}")]
    Decompression(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    #[error("packet data before the data tables were received")]
    SchemaNotReady,

    #[error("unknown server class {0}")]
    UnknownClass(u16),

    #[error("property index {index} out of range for class {class} ({count} props)")]
    PropertyIndexOutOfRange { class: u16, index: usize, count: usize },

    #[error("send table {0} referenced but never defined")]
    UnknownSendTable(String),

    #[error("array property {0} has no element template")]
    ArrayWithoutElement(String),

    #[error("unknown send prop type {0}")]
    UnknownPropType(u8),
}

/// A fatal decode failure with its position in the input.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} (tick {tick}, byte {offset})")]
pub struct DecodeError {
    pub kind: ErrorKind,
    /// Tick of the command being decoded when the error occurred.
    pub tick: DemoTick,
    /// Byte offset of the command header in the file.
    pub offset: usize,
}

impl DecodeError {
    pub fn new(kind: ErrorKind, tick: DemoTick, offset: usize) -> Self {
        DecodeError { kind, tick, offset }
    }
}

impl From<ErrorKind> for DecodeError {
    fn from(kind: ErrorKind) -> Self {
        DecodeError { kind, tick: 0, offset: 0 }
    }
}

impl From<SchemaViolation> for DecodeError {
    fn from(violation: SchemaViolation) -> Self {
        ErrorKind::from(violation).into()
    }
}

impl From<bitbuffer::BitError> for ErrorKind {
    fn from(err: bitbuffer::BitError) -> Self {
        match err {
            bitbuffer::BitError::NotEnoughData {
                requested,
                bits_left,
            } => ErrorKind::TruncatedStream {
                requested,
                bits_left,
            },
            bitbuffer::BitError::IndexOutOfBounds { pos, size } => ErrorKind::TruncatedStream {
                requested: pos,
                bits_left: size.saturating_sub(pos),
            },
            err => ErrorKind::MalformedMessage(err.to_string()),
        }
    }
}

/// Something odd that did not stop decoding.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "diagnostic", rename_all = "snake_case")]
pub enum Diagnostic {
    UnresolvedProperty { name: String },
    UnknownCommand { kind: u8, tick: DemoTick, offset: usize },
    InvalidEntityReference { entity: EntityId, tick: DemoTick, context: String },
    UnresolvedPlayer { entity: EntityId, tick: DemoTick },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::UnresolvedProperty { name } => {
                write!(f, "property {name:?} does not exist on any class")
            }
            Diagnostic::UnknownCommand { kind, tick, offset } => {
                write!(f, "skipped unknown command {kind} at tick {tick} (byte {offset})")
            }
            Diagnostic::InvalidEntityReference { entity, tick, context } => {
                write!(f, "{context}: entity {entity} not live at tick {tick}")
            }
            Diagnostic::UnresolvedPlayer { entity, tick } => {
                write!(f, "entity {entity} has no player info at tick {tick}")
            }
        }
    }
}
