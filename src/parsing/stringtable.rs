//! String tables: creation, incremental updates, full snapshots, and the
//! `userinfo` payload they carry.

use super::cursor::Cursor;
use crate::errors::{ErrorKind, ReadResult};
use crate::types::entities::{steamid64_from_guid, PlayerInfo};
use crate::types::EntityId;

pub const TABLE_INSTANCE_BASELINE: &str = "instancebaseline";
pub const TABLE_USERINFO: &str = "userinfo";

const HISTORY_SIZE: usize = 32;
const MAX_PLAYER_NAME_LENGTH: usize = 32;
const SIGNED_GUID_LEN: usize = 33;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringTableEntry {
    pub text: Option<String>,
    pub user_data: Option<Vec<u8>>,
}

impl StringTableEntry {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedUserData {
    pub size: u16,
    pub size_bits: u8,
}

#[derive(Debug, Clone)]
pub struct CreateStringTable<'a> {
    pub name: String,
    pub max_entries: u16,
    pub entry_count: u16,
    pub fixed_user_data: Option<FixedUserData>,
    pub compressed: bool,
    pub data: Cursor<'a>,
}

impl<'a> CreateStringTable<'a> {
    pub fn read(cursor: &mut Cursor<'a>) -> ReadResult<Self> {
        let name = cursor.read_cstring()?;
        let max_entries = cursor.read_u16()?;
        let entry_count = cursor.read_bits(log2(max_entries) + 1)? as u16;
        let length = cursor.read_varint()? as usize;
        let fixed_user_data = if cursor.read_bool()? {
            Some(FixedUserData {
                size: cursor.read_bits(12)? as u16,
                size_bits: cursor.read_bits(4)? as u8,
            })
        } else {
            None
        };
        let compressed = cursor.read_bool()?;
        let data = cursor.read_blob(length)?;
        Ok(CreateStringTable {
            name,
            max_entries,
            entry_count,
            fixed_user_data,
            compressed,
            data,
        })
    }

    /// The entry data, decompressed if needed.
    pub fn entry_data(&self) -> ReadResult<Cursor<'a>> {
        if !self.compressed {
            return Ok(self.data.clone());
        }
        let mut data = self.data.clone();
        let decompressed_size = data.read_u32()? as usize;
        let compressed_size = data.read_u32()? as usize;
        let compressed = data.read_bytes(compressed_size)?;
        let decompressed = decompress_lzss(&compressed)?;
        if decompressed.len() != decompressed_size {
            return Err(ErrorKind::Decompression(format!(
                "string table {} decompressed to {} bytes, expected {}",
                self.name,
                decompressed.len(),
                decompressed_size
            )));
        }
        Ok(Cursor::from_owned(decompressed))
    }
}

#[derive(Debug, Clone)]
pub struct UpdateStringTable<'a> {
    pub table_id: u8,
    pub entry_count: u16,
    pub data: Cursor<'a>,
}

impl<'a> UpdateStringTable<'a> {
    pub fn read(cursor: &mut Cursor<'a>) -> ReadResult<Self> {
        let table_id = cursor.read_bits(5)? as u8;
        let entry_count = if cursor.read_bool()? {
            cursor.read_u16()?
        } else {
            1
        };
        let length = cursor.read_bits(20)? as usize;
        Ok(UpdateStringTable {
            table_id,
            entry_count,
            data: cursor.read_blob(length)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringTable {
    pub name: String,
    pub max_entries: u16,
    pub fixed_user_data: Option<FixedUserData>,
    pub entries: Vec<StringTableEntry>,
}

impl StringTable {
    pub fn new(name: String, max_entries: u16, fixed_user_data: Option<FixedUserData>) -> Self {
        StringTable {
            name,
            max_entries,
            fixed_user_data,
            entries: Vec::new(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&StringTableEntry> {
        self.entries.get(index)
    }

    /// Applies `entry_count` encoded entries and returns the indices that
    /// were touched, in stream order.
    pub fn parse_entries(&mut self, data: &mut Cursor, entry_count: u16) -> ReadResult<Vec<usize>> {
        let entry_bits = log2(self.max_entries);
        let mut history: Vec<String> = Vec::with_capacity(HISTORY_SIZE);
        let mut last_index: i64 = -1;
        let mut touched = Vec::with_capacity(usize::from(entry_count));

        for _ in 0..entry_count {
            let index = if data.read_bool()? {
                last_index + 1
            } else {
                i64::from(data.read_bits(entry_bits)?)
            };
            last_index = index;
            if index < 0 || index >= i64::from(self.max_entries.max(1)) {
                return Err(ErrorKind::MalformedMessage(format!(
                    "string table {} entry {} out of range ({} max)",
                    self.name, index, self.max_entries
                )));
            }
            let index = index as usize;

            let text = if data.read_bool()? {
                if data.read_bool()? {
                    let history_index = data.read_bits(5)? as usize;
                    let bytes_to_copy = data.read_bits(5)? as usize;
                    let suffix = data.read_cstring()?;
                    let prefix = history
                        .get(history_index)
                        .map(|previous| previous.as_bytes())
                        .unwrap_or_default();
                    let prefix = &prefix[..bytes_to_copy.min(prefix.len())];
                    let mut text = String::from_utf8_lossy(prefix).into_owned();
                    text.push_str(&suffix);
                    Some(text)
                } else {
                    Some(data.read_cstring()?)
                }
            } else {
                None
            };

            let user_data = if data.read_bool()? {
                Some(match self.fixed_user_data {
                    Some(fixed) => read_bits_as_bytes(data, usize::from(fixed.size_bits))?,
                    None => {
                        let bytes = data.read_bits(14)? as usize;
                        data.read_bytes(bytes)?
                    }
                })
            } else {
                None
            };

            if index < self.entries.len() {
                // existing entries keep their string, only user data changes
                let entry = &mut self.entries[index];
                if entry.text.is_none() {
                    entry.text = text;
                }
                if user_data.is_some() {
                    entry.user_data = user_data;
                }
            } else {
                self.entries.resize_with(index, StringTableEntry::default);
                self.entries.push(StringTableEntry { text, user_data });
            }

            if history.len() == HISTORY_SIZE {
                history.remove(0);
            }
            history.push(self.entries[index].text().to_string());
            touched.push(index);
        }

        Ok(touched)
    }
}

/// One table from a full string tables command.
#[derive(Debug, Clone, PartialEq)]
pub struct StringTableSnapshot {
    pub name: String,
    pub entries: Vec<StringTableEntry>,
    pub client_entries: Vec<StringTableEntry>,
}

pub fn read_snapshot(cursor: &mut Cursor) -> ReadResult<Vec<StringTableSnapshot>> {
    fn read_entries(cursor: &mut Cursor) -> ReadResult<Vec<StringTableEntry>> {
        let count = cursor.read_u16()?;
        let mut entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let text = cursor.read_cstring()?;
            let user_data = if cursor.read_bool()? {
                let length = cursor.read_u16()?;
                Some(cursor.read_bytes(usize::from(length))?)
            } else {
                None
            };
            entries.push(StringTableEntry {
                text: Some(text),
                user_data,
            });
        }
        Ok(entries)
    }

    let table_count = cursor.read_u8()?;
    let mut tables = Vec::with_capacity(usize::from(table_count));
    for _ in 0..table_count {
        let name = cursor.read_cstring()?;
        let entries = read_entries(cursor)?;
        let client_entries = if cursor.read_bool()? {
            read_entries(cursor)?
        } else {
            Vec::new()
        };
        tables.push(StringTableSnapshot {
            name,
            entries,
            client_entries,
        });
    }
    Ok(tables)
}

/// Decodes a `userinfo` entry. The entry index is the player slot, the
/// entity index is one higher.
pub fn parse_player_info(index: usize, data: &[u8]) -> ReadResult<PlayerInfo> {
    let mut cursor = Cursor::new(data);
    let name = cursor.read_fixed_string(MAX_PLAYER_NAME_LENGTH)?;
    let user_id = cursor.read_u32()?;
    let guid = cursor.read_fixed_string(SIGNED_GUID_LEN)?;

    // padding, friends id and friends name; the flags after them are missing
    // in some older recordings
    let (fake_player, is_hltv) = if cursor.remaining() >= (3 + 4 + 32 + 2) * 8 {
        cursor.skip_bits((3 + 4 + 32) * 8)?;
        (cursor.read_u8()? != 0, cursor.read_u8()? != 0)
    } else {
        (false, false)
    };

    Ok(PlayerInfo {
        entity_id: index as EntityId + 1,
        user_id: user_id as u16,
        steamid: if fake_player || is_hltv {
            None
        } else {
            steamid64_from_guid(&guid)
        },
        name,
        guid,
        fake_player,
        is_hltv,
    })
}

/// Valve's LZSS variant: `"LZSS"`, little endian output size, then the
/// command byte coded stream.
pub fn decompress_lzss(input: &[u8]) -> ReadResult<Vec<u8>> {
    const LOOKSHIFT: u8 = 4;

    if input.len() < 8 || &input[..4] != b"LZSS" {
        return Err(ErrorKind::Decompression("missing LZSS header".into()));
    }
    let expected = u32::from_le_bytes([input[4], input[5], input[6], input[7]]) as usize;
    // the size field is untrusted, a command byte expands to at most 128 bytes
    let mut output = Vec::with_capacity(expected.min(input.len().saturating_mul(128)));
    let mut position = 8;
    let mut next = || -> ReadResult<u8> {
        let byte = input
            .get(position)
            .copied()
            .ok_or_else(|| ErrorKind::Decompression("unexpected end of LZSS stream".into()))?;
        position += 1;
        Ok(byte)
    };

    let mut command = 0u8;
    let mut command_bits = 0u8;
    loop {
        if command_bits == 0 {
            command = next()?;
        }
        command_bits = (command_bits + 1) & 0x07;

        if command & 1 != 0 {
            let high = next()?;
            let low = next()?;
            let offset = (usize::from(high) << LOOKSHIFT) | usize::from(low >> LOOKSHIFT);
            let count = usize::from(low & 0x0F) + 1;
            if count == 1 {
                break;
            }
            let start = output
                .len()
                .checked_sub(offset + 1)
                .ok_or_else(|| ErrorKind::Decompression("LZSS back reference before start".into()))?;
            for i in 0..count {
                let byte = output[start + i];
                output.push(byte);
            }
        } else {
            output.push(next()?);
        }
        if output.len() > expected {
            return Err(ErrorKind::Decompression(format!(
                "LZSS output exceeds the {expected} bytes announced"
            )));
        }
        command >>= 1;
    }

    if output.len() != expected {
        return Err(ErrorKind::Decompression(format!(
            "LZSS produced {} bytes, header says {}",
            output.len(),
            expected
        )));
    }
    Ok(output)
}

fn read_bits_as_bytes(cursor: &mut Cursor, bits: usize) -> ReadResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(bits.div_ceil(8));
    let mut left = bits;
    while left > 0 {
        let take = left.min(8);
        bytes.push(cursor.read_bits(take)? as u8);
        left -= take;
    }
    Ok(bytes)
}

/// floor(log2(n)), 0 for 0.
pub(crate) fn log2(n: u16) -> usize {
    if n == 0 {
        0
    } else {
        (u16::BITS - 1 - n.leading_zeros()) as usize
    }
}
