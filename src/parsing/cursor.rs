//! Bit level reader used by every decoder in the crate.
//!
//! This is a thin layer over `bitbuffer::BitReadStream` that adds the
//! engine specific encodings (bit vars, coords, normals, varints) and maps
//! every overrun onto [`ErrorKind::TruncatedStream`].

use std::borrow::Cow;
use std::fmt::{Debug, Formatter};

use bitbuffer::{BitReadBuffer, BitReadStream, LittleEndian};

use crate::errors::{ErrorKind, ReadResult};

pub const COORD_INTEGER_BITS: usize = 14;
pub const COORD_FRACTIONAL_BITS: usize = 5;
pub const COORD_MP_INTEGER_BITS: usize = 11;
pub const COORD_MP_FRACTIONAL_BITS_LOWPRECISION: usize = 3;
pub const NORMAL_FRACTIONAL_BITS: usize = 11;

const COORD_RESOLUTION: f32 = 1.0 / (1 << COORD_FRACTIONAL_BITS) as f32;
const COORD_RESOLUTION_LOWPRECISION: f32 = 1.0 / (1 << COORD_MP_FRACTIONAL_BITS_LOWPRECISION) as f32;
const NORMAL_RESOLUTION: f32 = 1.0 / ((1 << NORMAL_FRACTIONAL_BITS) - 1) as f32;

#[derive(Clone)]
pub struct Cursor<'a> {
    stream: BitReadStream<'a, LittleEndian>,
}

impl Debug for Cursor<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("position", &self.position())
            .field("len", &self.len())
            .finish()
    }
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Cursor {
            stream: BitReadStream::new(BitReadBuffer::new(bytes, LittleEndian)),
        }
    }

    /// A cursor that owns its data, used for decompressed payloads.
    pub fn from_owned(bytes: Vec<u8>) -> Cursor<'static> {
        Cursor {
            stream: BitReadStream::new(BitReadBuffer::new_owned(bytes, LittleEndian)),
        }
    }

    /// Current position in bits from the start of this cursor.
    pub fn position(&self) -> usize {
        self.stream.pos()
    }

    /// Length of this cursor in bits.
    pub fn len(&self) -> usize {
        self.stream.bit_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> usize {
        self.stream.bits_left()
    }

    /// Moves to an absolute bit position. Only used to re-enter the stream at
    /// a recorded command boundary.
    pub fn seek(&mut self, position: usize) -> ReadResult<()> {
        if position > self.len() {
            return Err(ErrorKind::TruncatedStream {
                requested: position,
                bits_left: self.len(),
            });
        }
        self.stream.set_pos(position)?;
        Ok(())
    }

    pub fn skip_bits(&mut self, count: usize) -> ReadResult<()> {
        self.check(count)?;
        self.stream.skip_bits(count)?;
        Ok(())
    }

    fn check(&self, count: usize) -> ReadResult<()> {
        if count > self.remaining() {
            Err(ErrorKind::TruncatedStream {
                requested: count,
                bits_left: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    /// Reads up to 32 bits as an unsigned number. Zero bits read as 0.
    pub fn read_bits(&mut self, count: usize) -> ReadResult<u32> {
        match count {
            0 => Ok(0),
            1..=32 => Ok(self.stream.read_int::<u32>(count)?),
            _ => Err(ErrorKind::MalformedMessage(format!(
                "cannot read {count} bits into a 32 bit integer"
            ))),
        }
    }

    /// Reads `count` bits and sign extends from the top bit.
    pub fn read_signed(&mut self, count: usize) -> ReadResult<i32> {
        let raw = self.read_bits(count)?;
        if count == 0 || count >= 32 {
            return Ok(raw as i32);
        }
        let sign = 1u32 << (count - 1);
        if raw & sign != 0 {
            Ok((raw as i64 - (1i64 << count)) as i32)
        } else {
            Ok(raw as i32)
        }
    }

    pub fn read_bool(&mut self) -> ReadResult<bool> {
        Ok(self.stream.read_bool()?)
    }

    pub fn read_u8(&mut self) -> ReadResult<u8> {
        Ok(self.stream.read_int::<u8>(8)?)
    }

    pub fn read_u16(&mut self) -> ReadResult<u16> {
        Ok(self.stream.read_int::<u16>(16)?)
    }

    pub fn read_u32(&mut self) -> ReadResult<u32> {
        Ok(self.stream.read_int::<u32>(32)?)
    }

    pub fn read_i32(&mut self) -> ReadResult<i32> {
        Ok(self.stream.read_int::<i32>(32)?)
    }

    pub fn read_u64(&mut self) -> ReadResult<u64> {
        Ok(self.stream.read_int::<u64>(64)?)
    }

    pub fn read_f32(&mut self) -> ReadResult<f32> {
        Ok(self.stream.read_float::<f32>()?)
    }

    /// Protobuf style varint, at most 5 bytes.
    pub fn read_varint(&mut self) -> ReadResult<u32> {
        let mut result = 0u32;
        for byte_index in 0..5 {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u32) << (7 * byte_index);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(ErrorKind::MalformedMessage("varint longer than 5 bytes".into()))
    }

    /// The engine's variable length index delta: a 2 bit selector, then 4, 8,
    /// 12 or 32 bits of value.
    pub fn read_ubitvar(&mut self) -> ReadResult<u32> {
        let width = match self.read_bits(2)? {
            0 => 4,
            1 => 8,
            2 => 12,
            _ => 32,
        };
        self.read_bits(width)
    }

    /// Splits off the next `bit_count` bits as their own cursor and advances
    /// past them.
    pub fn read_blob(&mut self, bit_count: usize) -> ReadResult<Cursor<'a>> {
        self.check(bit_count)?;
        Ok(Cursor {
            stream: self.stream.read_bits(bit_count)?,
        })
    }

    pub fn read_bytes(&mut self, byte_count: usize) -> ReadResult<Vec<u8>> {
        self.check(byte_count * 8)?;
        let bytes: Cow<[u8]> = self.stream.read_bytes(byte_count)?;
        Ok(bytes.into_owned())
    }

    /// NUL terminated string. Invalid utf8 is replaced rather than rejected,
    /// player names are not always valid.
    pub fn read_cstring(&mut self) -> ReadResult<String> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.read_u8()?;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// A fixed width, NUL padded string field.
    pub fn read_fixed_string(&mut self, byte_count: usize) -> ReadResult<String> {
        let bytes = self.read_bytes(byte_count)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn read_coord(&mut self) -> ReadResult<f32> {
        let has_int = self.read_bool()?;
        let has_fract = self.read_bool()?;
        if !has_int && !has_fract {
            return Ok(0.0);
        }
        let negative = self.read_bool()?;
        let int = if has_int {
            self.read_bits(COORD_INTEGER_BITS)? + 1
        } else {
            0
        };
        let fract = if has_fract {
            self.read_bits(COORD_FRACTIONAL_BITS)?
        } else {
            0
        };
        let value = int as f32 + fract as f32 * COORD_RESOLUTION;
        Ok(if negative { -value } else { value })
    }

    pub fn read_coord_mp(&mut self, integral: bool, low_precision: bool) -> ReadResult<f32> {
        let in_bounds = self.read_bool()?;
        let int_bits = if in_bounds {
            COORD_MP_INTEGER_BITS
        } else {
            COORD_INTEGER_BITS
        };

        if integral {
            if !self.read_bool()? {
                return Ok(0.0);
            }
            let negative = self.read_bool()?;
            let value = (self.read_bits(int_bits)? + 1) as f32;
            return Ok(if negative { -value } else { value });
        }

        let has_int = self.read_bool()?;
        let negative = self.read_bool()?;
        let int = if has_int {
            self.read_bits(int_bits)? + 1
        } else {
            0
        };
        let value = if low_precision {
            int as f32 + self.read_bits(COORD_MP_FRACTIONAL_BITS_LOWPRECISION)? as f32 * COORD_RESOLUTION_LOWPRECISION
        } else {
            int as f32 + self.read_bits(COORD_FRACTIONAL_BITS)? as f32 * COORD_RESOLUTION
        };
        Ok(if negative { -value } else { value })
    }

    pub fn read_normal(&mut self) -> ReadResult<f32> {
        let negative = self.read_bool()?;
        let value = self.read_bits(NORMAL_FRACTIONAL_BITS)? as f32 * NORMAL_RESOLUTION;
        Ok(if negative { -value } else { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitbuffer::BitWriteStream;
    use rstest::rstest;

    fn write(f: impl FnOnce(&mut BitWriteStream<LittleEndian>)) -> Vec<u8> {
        let mut data = Vec::new();
        {
            let mut stream = BitWriteStream::new(&mut data, LittleEndian);
            f(&mut stream);
        }
        data
    }

    #[test]
    fn bits_are_lsb_first() {
        let mut cursor = Cursor::new(&[0b1010_1100]);
        assert_eq!(cursor.read_bits(4), Ok(0b1100));
        assert_eq!(cursor.read_bits(0), Ok(0));
        assert_eq!(cursor.read_bits(4), Ok(0b1010));
        assert_eq!(cursor.remaining(), 0);
    }

    #[rstest]
    #[case(0b1111, 4, -1)]
    #[case(0b0111, 4, 7)]
    #[case(0b1000, 4, -8)]
    fn signed(#[case] raw: u8, #[case] bits: usize, #[case] expected: i32) {
        let mut cursor = Cursor::new(std::slice::from_ref(&raw));
        assert_eq!(cursor.read_signed(bits), Ok(expected));
    }

    #[rstest]
    #[case(&[0x01], 1)]
    #[case(&[0xAC, 0x02], 300)]
    #[case(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F], u32::MAX)]
    fn varint(#[case] bytes: &[u8], #[case] expected: u32) {
        assert_eq!(Cursor::new(bytes).read_varint(), Ok(expected));
    }

    #[test]
    fn overlong_varint_is_malformed() {
        let mut cursor = Cursor::new(&[0xFF; 6]);
        assert!(matches!(cursor.read_varint(), Err(ErrorKind::MalformedMessage(_))));
    }

    // selector in the low two bits, value above it
    #[rstest]
    #[case(&[0b0001_0100], 5)]
    #[case(&[0b0011_1100], 15)]
    #[case(&[0b0101_0001, 0b00], 20)]
    #[case(&[0b1011_0010, 0b0100], 300)]
    #[case(&[0b0000_0011, 0, 0, 0, 0b1], 1 << 30)]
    fn ubitvar(#[case] bytes: &[u8], #[case] expected: u32) {
        assert_eq!(Cursor::new(bytes).read_ubitvar(), Ok(expected));
    }

    #[test]
    fn ubitvar_consumes_only_its_width() {
        // 1 with the 4 bit form, then 7 with the 8 bit form
        let mut cursor = Cursor::new(&[0b0100_0100, 0b0000_0111]);
        assert_eq!(cursor.read_ubitvar(), Ok(1));
        assert_eq!(cursor.read_ubitvar(), Ok(7));
        assert_eq!(cursor.position(), 16);
    }

    #[test]
    fn strings() {
        let mut cursor = Cursor::new(b"abc\0ctf_2fort\0\0\0xyz");
        assert_eq!(cursor.read_cstring().as_deref(), Ok("abc"));
        assert_eq!(cursor.read_fixed_string(12).as_deref(), Ok("ctf_2fort"));
        assert_eq!(cursor.read_bytes(3), Ok(b"xyz".to_vec()));
    }

    #[test]
    fn truncation_reports_bits_left() {
        let mut cursor = Cursor::new(&[1, 2]);
        assert_eq!(
            cursor.read_u32(),
            Err(ErrorKind::TruncatedStream {
                requested: 32,
                bits_left: 16
            })
        );
        assert!(matches!(cursor.read_blob(17), Err(ErrorKind::TruncatedStream { .. })));
    }

    #[test]
    fn blob_advances_parent() {
        let mut cursor = Cursor::new(&[0xAA, 0xBB, 0xCC]);
        let mut blob = cursor.read_blob(16).unwrap();
        assert_eq!(cursor.read_u8(), Ok(0xCC));
        assert_eq!(blob.read_u16(), Ok(0xBBAA));
        assert_eq!(blob.remaining(), 0);
    }

    #[test]
    fn coord() {
        let data = write(|stream| {
            stream.write_bool(true).unwrap();
            stream.write_bool(true).unwrap();
            stream.write_bool(true).unwrap();
            stream.write_int(9u32, COORD_INTEGER_BITS).unwrap();
            stream.write_int(16u32, COORD_FRACTIONAL_BITS).unwrap();
        });
        assert_eq!(Cursor::new(&data).read_coord(), Ok(-10.5));
        assert_eq!(Cursor::new(&[0]).read_coord(), Ok(0.0));
    }

    #[rstest]
    #[case(false, false, 12.25)]
    #[case(false, true, 12.25)]
    #[case(true, false, 12.0)]
    fn coord_mp(#[case] integral: bool, #[case] low_precision: bool, #[case] expected: f32) {
        let data = write(|stream| {
            stream.write_bool(true).unwrap(); // in bounds
            if integral {
                stream.write_bool(true).unwrap();
                stream.write_bool(false).unwrap();
                stream.write_int(11u32, COORD_MP_INTEGER_BITS).unwrap();
            } else {
                stream.write_bool(true).unwrap();
                stream.write_bool(false).unwrap();
                stream.write_int(11u32, COORD_MP_INTEGER_BITS).unwrap();
                if low_precision {
                    stream.write_int(2u32, COORD_MP_FRACTIONAL_BITS_LOWPRECISION).unwrap();
                } else {
                    stream.write_int(8u32, COORD_FRACTIONAL_BITS).unwrap();
                }
            }
        });
        assert_eq!(Cursor::new(&data).read_coord_mp(integral, low_precision), Ok(expected));
    }

    #[test]
    fn normal() {
        let data = write(|stream| {
            stream.write_bool(true).unwrap();
            stream.write_int(2047u32, NORMAL_FRACTIONAL_BITS).unwrap();
        });
        assert_eq!(Cursor::new(&data).read_normal(), Ok(-1.0));
    }

    #[test]
    fn seek_back_to_boundary() {
        let mut cursor = Cursor::new(&[1, 2, 3]);
        cursor.read_u16().unwrap();
        let mark = cursor.position();
        cursor.read_u8().unwrap();
        cursor.seek(mark).unwrap();
        assert_eq!(cursor.read_u8(), Ok(3));
        assert!(cursor.seek(100).is_err());
    }
}
