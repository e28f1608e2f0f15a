//! Send prop definitions and the decoders for their values.

use std::fmt::{Debug, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use super::cursor::Cursor;
use crate::errors::{ReadResult, SchemaViolation};
use crate::types::{PropValue, Vector, VectorXY};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SendPropType {
    Int = 0,
    Float = 1,
    Vector = 2,
    VectorXY = 3,
    String = 4,
    Array = 5,
    DataTable = 6,
}

/// The 16 bit flag word attached to every send prop.
#[derive(Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SendPropFlags(pub u16);

impl SendPropFlags {
    pub const UNSIGNED: u16 = 1 << 0;
    pub const COORD: u16 = 1 << 1;
    pub const NOSCALE: u16 = 1 << 2;
    pub const ROUNDDOWN: u16 = 1 << 3;
    pub const ROUNDUP: u16 = 1 << 4;
    pub const NORMAL: u16 = 1 << 5;
    pub const EXCLUDE: u16 = 1 << 6;
    pub const XYZE: u16 = 1 << 7;
    pub const INSIDEARRAY: u16 = 1 << 8;
    pub const PROXY_ALWAYS_YES: u16 = 1 << 9;
    pub const CHANGES_OFTEN: u16 = 1 << 10;
    pub const IS_A_VECTOR_ELEM: u16 = 1 << 11;
    pub const COLLAPSIBLE: u16 = 1 << 12;
    pub const COORD_MP: u16 = 1 << 13;
    pub const COORD_MP_LOWPRECISION: u16 = 1 << 14;
    pub const COORD_MP_INTEGRAL: u16 = 1 << 15;

    pub fn contains(&self, flag: u16) -> bool {
        self.0 & flag == flag
    }
}

impl Debug for SendPropFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        const NAMES: [&str; 16] = [
            "UNSIGNED",
            "COORD",
            "NOSCALE",
            "ROUNDDOWN",
            "ROUNDUP",
            "NORMAL",
            "EXCLUDE",
            "XYZE",
            "INSIDEARRAY",
            "PROXY_ALWAYS_YES",
            "CHANGES_OFTEN",
            "IS_A_VECTOR_ELEM",
            "COLLAPSIBLE",
            "COORD_MP",
            "COORD_MP_LOWPRECISION",
            "COORD_MP_INTEGRAL",
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "SendPropFlags({})", set.join(" | "))
    }
}

/// A prop exactly as listed in its send table, before flattening.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSendProp {
    pub kind: SendPropType,
    pub name: String,
    pub flags: SendPropFlags,
    /// For data table props the table they point at, for excludes the table
    /// the excluded prop lives in.
    pub table_name: Option<String>,
    pub element_count: u16,
    pub low_value: f32,
    pub high_value: f32,
    pub bit_count: u8,
}

impl RawSendProp {
    pub fn read(cursor: &mut Cursor) -> ReadResult<Self> {
        let raw_kind = cursor.read_bits(5)? as u8;
        let kind = SendPropType::try_from(raw_kind).map_err(|_| SchemaViolation::UnknownPropType(raw_kind))?;
        let name = cursor.read_cstring()?;
        let flags = SendPropFlags(cursor.read_bits(16)? as u16);

        let mut prop = RawSendProp {
            kind,
            name,
            flags,
            table_name: None,
            element_count: 0,
            low_value: 0.0,
            high_value: 0.0,
            bit_count: 0,
        };

        if kind == SendPropType::DataTable || flags.contains(SendPropFlags::EXCLUDE) {
            prop.table_name = Some(cursor.read_cstring()?);
        } else if kind == SendPropType::Array {
            prop.element_count = cursor.read_bits(10)? as u16;
        } else {
            prop.low_value = cursor.read_f32()?;
            prop.high_value = cursor.read_f32()?;
            prop.bit_count = cursor.read_bits(7)? as u8;
        }

        Ok(prop)
    }

    pub fn is_excluded(&self) -> bool {
        self.flags.contains(SendPropFlags::EXCLUDE)
    }

    pub fn is_inside_array(&self) -> bool {
        self.flags.contains(SendPropFlags::INSIDEARRAY)
    }
}

/// A prop after flattening, ready to decode values.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    /// The send table that declared this prop.
    pub table: String,
    pub name: String,
    /// `"<table>.<name>"`, unique within a class.
    pub path: String,
    pub kind: SendPropType,
    pub flags: SendPropFlags,
    pub bit_count: u8,
    pub low_value: f32,
    pub high_value: f32,
    pub element_count: u16,
    pub element: Option<Box<PropertyDescriptor>>,
}

impl PropertyDescriptor {
    pub fn from_raw(table: &str, raw: &RawSendProp) -> Self {
        PropertyDescriptor {
            table: table.to_string(),
            name: raw.name.clone(),
            path: format!("{}.{}", table, raw.name),
            kind: raw.kind,
            flags: raw.flags,
            bit_count: raw.bit_count,
            low_value: raw.low_value,
            high_value: raw.high_value,
            element_count: raw.element_count,
            element: None,
        }
    }

    pub fn decode(&self, cursor: &mut Cursor) -> ReadResult<PropValue> {
        Ok(match self.kind {
            SendPropType::Int => PropValue::Integer(self.decode_int(cursor)?),
            SendPropType::Float => PropValue::Float(self.decode_float(cursor)?),
            SendPropType::Vector => PropValue::Vector(self.decode_vector(cursor)?),
            SendPropType::VectorXY => PropValue::VectorXY(VectorXY {
                x: self.decode_float(cursor)?,
                y: self.decode_float(cursor)?,
            }),
            SendPropType::String => {
                let length = cursor.read_bits(9)? as usize;
                let bytes = cursor.read_bytes(length)?;
                PropValue::String(String::from_utf8_lossy(&bytes).into_owned())
            }
            SendPropType::Array => {
                let element = self
                    .element
                    .as_deref()
                    .ok_or_else(|| SchemaViolation::ArrayWithoutElement(self.path.clone()))?;
                let count = cursor.read_bits(array_count_bits(self.element_count))? as usize;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(element.decode(cursor)?);
                }
                PropValue::Array(values)
            }
            SendPropType::DataTable => {
                // flattening never yields data table props
                return Err(SchemaViolation::UnknownPropType(SendPropType::DataTable.into()).into());
            }
        })
    }

    fn decode_int(&self, cursor: &mut Cursor) -> ReadResult<i64> {
        let bits = usize::from(self.bit_count);
        if self.flags.contains(SendPropFlags::UNSIGNED) {
            Ok(i64::from(cursor.read_bits(bits)?))
        } else {
            Ok(i64::from(cursor.read_signed(bits)?))
        }
    }

    fn decode_float(&self, cursor: &mut Cursor) -> ReadResult<f32> {
        let flags = self.flags;
        if flags.contains(SendPropFlags::COORD) {
            cursor.read_coord()
        } else if flags.contains(SendPropFlags::COORD_MP) {
            cursor.read_coord_mp(false, false)
        } else if flags.contains(SendPropFlags::COORD_MP_LOWPRECISION) {
            cursor.read_coord_mp(false, true)
        } else if flags.contains(SendPropFlags::COORD_MP_INTEGRAL) {
            cursor.read_coord_mp(true, false)
        } else if flags.contains(SendPropFlags::NOSCALE) {
            cursor.read_f32()
        } else if flags.contains(SendPropFlags::NORMAL) {
            cursor.read_normal()
        } else {
            let bits = usize::from(self.bit_count);
            let raw = cursor.read_bits(bits)?;
            let max = ((1u64 << bits) - 1) as f32;
            let fraction = if max > 0.0 { raw as f32 / max } else { 0.0 };
            Ok(self.low_value + (self.high_value - self.low_value) * fraction)
        }
    }

    fn decode_vector(&self, cursor: &mut Cursor) -> ReadResult<Vector> {
        let x = self.decode_float(cursor)?;
        let y = self.decode_float(cursor)?;
        let z = if self.flags.contains(SendPropFlags::NORMAL) {
            let negative = cursor.read_bool()?;
            let sum = x * x + y * y;
            let z = if sum < 1.0 { (1.0 - sum).sqrt() } else { 0.0 };
            if negative {
                -z
            } else {
                z
            }
        } else {
            self.decode_float(cursor)?
        };
        Ok(Vector { x, y, z })
    }
}

/// Bits used for the element count of an array with `max` elements.
pub fn array_count_bits(max: u16) -> usize {
    if max == 0 {
        1
    } else {
        (u16::BITS - max.leading_zeros()) as usize
    }
}
