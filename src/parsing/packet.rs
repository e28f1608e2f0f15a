//! Command framing: the outer layer of the demo body.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use super::cursor::Cursor;
use crate::errors::ReadResult;
use crate::types::DemoTick;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PacketType {
    SignOn = 1,
    Packet = 2,
    SyncTick = 3,
    ConsoleCmd = 4,
    UserCmd = 5,
    DataTables = 6,
    Stop = 7,
    StringTables = 8,
}

/// Size of the view origin/angle block in front of message data.
pub const COMMAND_INFO_SIZE: usize = 76;

#[derive(Debug, Clone)]
pub struct MessageBlock<'a> {
    pub sequence_in: u32,
    pub sequence_out: u32,
    pub data: Cursor<'a>,
}

#[derive(Debug, Clone)]
pub enum Command<'a> {
    SignOn(MessageBlock<'a>),
    Packet(MessageBlock<'a>),
    SyncTick,
    ConsoleCmd(String),
    UserCmd { sequence: u32, data: Cursor<'a> },
    DataTables(Cursor<'a>),
    Stop,
    StringTables(Cursor<'a>),
    /// Skipped by its length prefix.
    Unknown { kind: u8, length: usize },
}

#[derive(Debug, Clone)]
pub struct CommandFrame<'a> {
    pub kind: u8,
    pub tick: DemoTick,
    /// Byte offset of the command header.
    pub offset: usize,
    pub command: Command<'a>,
}

/// Reads the type byte and tick of the next command without consuming it.
pub fn peek_command(cursor: &Cursor) -> Option<(u8, DemoTick)> {
    let mut peek = cursor.clone();
    let kind = peek.read_u8().ok()?;
    let tick = peek.read_u32().ok()?;
    Some((kind, tick))
}

pub fn read_command<'a>(cursor: &mut Cursor<'a>, last_tick: DemoTick) -> ReadResult<CommandFrame<'a>> {
    let offset = cursor.position() / 8;
    let kind = cursor.read_u8()?;

    // recordings cut off by a crash often end in a stop with a short tick
    if kind == u8::from(PacketType::Stop) && cursor.remaining() < 32 {
        return Ok(CommandFrame {
            kind,
            tick: last_tick,
            offset,
            command: Command::Stop,
        });
    }

    let tick = cursor.read_u32()?;
    let command = match PacketType::try_from(kind) {
        Ok(PacketType::SignOn) => Command::SignOn(read_message_block(cursor)?),
        Ok(PacketType::Packet) => Command::Packet(read_message_block(cursor)?),
        Ok(PacketType::SyncTick) => Command::SyncTick,
        Ok(PacketType::ConsoleCmd) => {
            let mut data = read_sized(cursor)?;
            Command::ConsoleCmd(data.read_cstring()?)
        }
        Ok(PacketType::UserCmd) => {
            let sequence = cursor.read_u32()?;
            Command::UserCmd {
                sequence,
                data: read_sized(cursor)?,
            }
        }
        Ok(PacketType::DataTables) => Command::DataTables(read_sized(cursor)?),
        Ok(PacketType::Stop) => Command::Stop,
        Ok(PacketType::StringTables) => Command::StringTables(read_sized(cursor)?),
        Err(_) => {
            let data = read_sized(cursor)?;
            Command::Unknown {
                kind,
                length: data.len() / 8,
            }
        }
    };

    Ok(CommandFrame {
        kind,
        tick,
        offset,
        command,
    })
}

fn read_sized<'a>(cursor: &mut Cursor<'a>) -> ReadResult<Cursor<'a>> {
    let length = cursor.read_u32()? as usize;
    cursor.read_blob(length * 8)
}

fn read_message_block<'a>(cursor: &mut Cursor<'a>) -> ReadResult<MessageBlock<'a>> {
    cursor.skip_bits(COMMAND_INFO_SIZE * 8)?;
    let sequence_in = cursor.read_u32()?;
    let sequence_out = cursor.read_u32()?;
    Ok(MessageBlock {
        sequence_in,
        sequence_out,
        data: read_sized(cursor)?,
    })
}
