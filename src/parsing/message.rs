//! Net messages found inside sign-on and packet commands.
//!
//! Net messages carry no outer length, so every type has to be read in full
//! even when nobody is interested in it. Bodies that are only interesting
//! to some handlers (game events, entity updates) are kept as sub-cursors
//! and decoded later against the parser state.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use super::cursor::Cursor;
use super::entities::PacketEntitiesMessage;
use super::gameevent::read_descriptors;
use super::stringtable::{CreateStringTable, UpdateStringTable};
use crate::errors::{ErrorKind, ReadResult};
use crate::types::demo::ServerInfo;
use crate::types::events::EventDescriptor;
use crate::types::Vector;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Empty = 0,
    Disconnect = 1,
    File = 2,
    NetTick = 3,
    StringCmd = 4,
    SetConVar = 5,
    SignOnState = 6,
    Print = 7,
    ServerInfo = 8,
    SendTable = 9,
    ClassInfo = 10,
    SetPause = 11,
    CreateStringTable = 12,
    UpdateStringTable = 13,
    VoiceInit = 14,
    VoiceData = 15,
    ParseSounds = 17,
    SetView = 18,
    FixAngle = 19,
    CrosshairAngle = 20,
    BspDecal = 21,
    UserMessage = 23,
    EntityMessage = 24,
    GameEvent = 25,
    PacketEntities = 26,
    TempEntities = 27,
    PreFetch = 28,
    Menu = 29,
    GameEventList = 30,
    GetCvarValue = 31,
    CmdKeyValues = 32,
}

pub const MESSAGE_TYPE_BITS: usize = 6;

#[derive(Debug, Clone)]
pub enum Message<'a> {
    Empty,
    Disconnect(String),
    File {
        transfer_id: u32,
        file_name: String,
        requested: bool,
    },
    NetTick {
        tick: u32,
        frame_time: u16,
        std_dev: u16,
    },
    StringCmd(String),
    SetConVar(Vec<(String, String)>),
    SignOnState {
        state: u8,
        count: u32,
    },
    Print(String),
    ServerInfo(Box<ServerInfo>),
    SendTable {
        needs_decoder: bool,
        data: Cursor<'a>,
    },
    ClassInfo {
        count: u16,
        create: bool,
        classes: Vec<(u16, String, String)>,
    },
    SetPause(bool),
    CreateStringTable(Box<CreateStringTable<'a>>),
    UpdateStringTable(UpdateStringTable<'a>),
    VoiceInit {
        codec: String,
        quality: u8,
        sample_rate: u16,
    },
    VoiceData {
        client: u8,
        proximity: u8,
        data: Cursor<'a>,
    },
    ParseSounds {
        reliable: bool,
        count: u8,
        data: Cursor<'a>,
    },
    SetView(u16),
    FixAngle {
        relative: bool,
        angles: [u16; 3],
    },
    CrosshairAngle([u16; 3]),
    BspDecal {
        position: Vector,
        texture: u16,
        entity_model: Option<(u16, u16)>,
        low_priority: bool,
    },
    UserMessage {
        kind: u8,
        data: Cursor<'a>,
    },
    EntityMessage {
        index: u16,
        class_id: u16,
        data: Cursor<'a>,
    },
    /// Raw event body; decode with the parser state's event decoder.
    GameEvent(Cursor<'a>),
    PacketEntities(PacketEntitiesMessage<'a>),
    TempEntities {
        count: u8,
        data: Cursor<'a>,
    },
    PreFetch(u16),
    Menu {
        kind: u16,
        data: Vec<u8>,
    },
    GameEventList(Vec<EventDescriptor>),
    GetCvarValue {
        cookie: u32,
        name: String,
    },
    CmdKeyValues(Vec<u8>),
}

impl<'a> Message<'a> {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Empty => MessageType::Empty,
            Message::Disconnect(_) => MessageType::Disconnect,
            Message::File { .. } => MessageType::File,
            Message::NetTick { .. } => MessageType::NetTick,
            Message::StringCmd(_) => MessageType::StringCmd,
            Message::SetConVar(_) => MessageType::SetConVar,
            Message::SignOnState { .. } => MessageType::SignOnState,
            Message::Print(_) => MessageType::Print,
            Message::ServerInfo(_) => MessageType::ServerInfo,
            Message::SendTable { .. } => MessageType::SendTable,
            Message::ClassInfo { .. } => MessageType::ClassInfo,
            Message::SetPause(_) => MessageType::SetPause,
            Message::CreateStringTable(_) => MessageType::CreateStringTable,
            Message::UpdateStringTable(_) => MessageType::UpdateStringTable,
            Message::VoiceInit { .. } => MessageType::VoiceInit,
            Message::VoiceData { .. } => MessageType::VoiceData,
            Message::ParseSounds { .. } => MessageType::ParseSounds,
            Message::SetView(_) => MessageType::SetView,
            Message::FixAngle { .. } => MessageType::FixAngle,
            Message::CrosshairAngle(_) => MessageType::CrosshairAngle,
            Message::BspDecal { .. } => MessageType::BspDecal,
            Message::UserMessage { .. } => MessageType::UserMessage,
            Message::EntityMessage { .. } => MessageType::EntityMessage,
            Message::GameEvent(_) => MessageType::GameEvent,
            Message::PacketEntities(_) => MessageType::PacketEntities,
            Message::TempEntities { .. } => MessageType::TempEntities,
            Message::PreFetch(_) => MessageType::PreFetch,
            Message::Menu { .. } => MessageType::Menu,
            Message::GameEventList(_) => MessageType::GameEventList,
            Message::GetCvarValue { .. } => MessageType::GetCvarValue,
            Message::CmdKeyValues(_) => MessageType::CmdKeyValues,
        }
    }

    /// Reads the 6 bit type and the body that follows it.
    pub fn read(cursor: &mut Cursor<'a>, protocol: u32) -> ReadResult<Self> {
        let raw_type = cursor.read_bits(MESSAGE_TYPE_BITS)? as u8;
        let message_type = MessageType::try_from(raw_type).map_err(|_| ErrorKind::UnknownMessageType(raw_type))?;
        Self::read_body(cursor, message_type, protocol)
    }

    pub fn read_body(cursor: &mut Cursor<'a>, message_type: MessageType, protocol: u32) -> ReadResult<Self> {
        Ok(match message_type {
            MessageType::Empty => Message::Empty,
            MessageType::Disconnect => Message::Disconnect(cursor.read_cstring()?),
            MessageType::File => Message::File {
                transfer_id: cursor.read_u32()?,
                file_name: cursor.read_cstring()?,
                requested: cursor.read_bool()?,
            },
            MessageType::NetTick => Message::NetTick {
                tick: cursor.read_u32()?,
                frame_time: cursor.read_u16()?,
                std_dev: cursor.read_u16()?,
            },
            MessageType::StringCmd => Message::StringCmd(cursor.read_cstring()?),
            MessageType::SetConVar => {
                let count = cursor.read_u8()?;
                let mut vars = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    vars.push((cursor.read_cstring()?, cursor.read_cstring()?));
                }
                Message::SetConVar(vars)
            }
            MessageType::SignOnState => Message::SignOnState {
                state: cursor.read_u8()?,
                count: cursor.read_u32()?,
            },
            MessageType::Print => Message::Print(cursor.read_cstring()?),
            MessageType::ServerInfo => Message::ServerInfo(Box::new(read_server_info(cursor)?)),
            MessageType::SendTable => {
                let needs_decoder = cursor.read_bool()?;
                let length = cursor.read_u16()?;
                Message::SendTable {
                    needs_decoder,
                    data: cursor.read_blob(usize::from(length))?,
                }
            }
            MessageType::ClassInfo => {
                let count = cursor.read_u16()?;
                let create = cursor.read_bool()?;
                let mut classes = Vec::new();
                if !create {
                    let bits = super::stringtable::log2(count) + 1;
                    for _ in 0..count {
                        classes.push((
                            cursor.read_bits(bits)? as u16,
                            cursor.read_cstring()?,
                            cursor.read_cstring()?,
                        ));
                    }
                }
                Message::ClassInfo {
                    count,
                    create,
                    classes,
                }
            }
            MessageType::SetPause => Message::SetPause(cursor.read_bool()?),
            MessageType::CreateStringTable => {
                Message::CreateStringTable(Box::new(CreateStringTable::read(cursor)?))
            }
            MessageType::UpdateStringTable => Message::UpdateStringTable(UpdateStringTable::read(cursor)?),
            MessageType::VoiceInit => {
                let codec = cursor.read_cstring()?;
                let quality = cursor.read_u8()?;
                let sample_rate = if quality == 255 {
                    cursor.read_u16()?
                } else if codec == "vaudio_celt" {
                    22050
                } else {
                    11025
                };
                Message::VoiceInit {
                    codec,
                    quality,
                    sample_rate,
                }
            }
            MessageType::VoiceData => {
                let client = cursor.read_u8()?;
                let proximity = cursor.read_u8()?;
                let length = cursor.read_u16()?;
                Message::VoiceData {
                    client,
                    proximity,
                    data: cursor.read_blob(usize::from(length))?,
                }
            }
            MessageType::ParseSounds => {
                let reliable = cursor.read_bool()?;
                let (count, length) = if reliable {
                    (1, usize::from(cursor.read_u8()?))
                } else {
                    (cursor.read_u8()?, usize::from(cursor.read_u16()?))
                };
                Message::ParseSounds {
                    reliable,
                    count,
                    data: cursor.read_blob(length)?,
                }
            }
            MessageType::SetView => Message::SetView(cursor.read_bits(11)? as u16),
            MessageType::FixAngle => Message::FixAngle {
                relative: cursor.read_bool()?,
                angles: read_angles(cursor)?,
            },
            MessageType::CrosshairAngle => Message::CrosshairAngle(read_angles(cursor)?),
            MessageType::BspDecal => {
                let (has_x, has_y, has_z) = (cursor.read_bool()?, cursor.read_bool()?, cursor.read_bool()?);
                let mut position = Vector::default();
                if has_x {
                    position.x = cursor.read_coord()?;
                }
                if has_y {
                    position.y = cursor.read_coord()?;
                }
                if has_z {
                    position.z = cursor.read_coord()?;
                }
                let texture = cursor.read_bits(9)? as u16;
                let entity_model = if cursor.read_bool()? {
                    Some((cursor.read_bits(11)? as u16, cursor.read_bits(11)? as u16))
                } else {
                    None
                };
                Message::BspDecal {
                    position,
                    texture,
                    entity_model,
                    low_priority: cursor.read_bool()?,
                }
            }
            MessageType::UserMessage => {
                let kind = cursor.read_u8()?;
                let length = cursor.read_bits(11)? as usize;
                Message::UserMessage {
                    kind,
                    data: cursor.read_blob(length)?,
                }
            }
            MessageType::EntityMessage => {
                let index = cursor.read_bits(11)? as u16;
                let class_id = cursor.read_bits(9)? as u16;
                let length = cursor.read_bits(11)? as usize;
                Message::EntityMessage {
                    index,
                    class_id,
                    data: cursor.read_blob(length)?,
                }
            }
            MessageType::GameEvent => {
                let length = cursor.read_bits(11)? as usize;
                Message::GameEvent(cursor.read_blob(length)?)
            }
            MessageType::PacketEntities => Message::PacketEntities(PacketEntitiesMessage::read(cursor)?),
            MessageType::TempEntities => {
                let count = cursor.read_u8()?;
                let length = if protocol >= 24 {
                    cursor.read_varint()? as usize
                } else {
                    cursor.read_bits(17)? as usize
                };
                Message::TempEntities {
                    count,
                    data: cursor.read_blob(length)?,
                }
            }
            MessageType::PreFetch => Message::PreFetch(cursor.read_bits(14)? as u16),
            MessageType::Menu => {
                let kind = cursor.read_u16()?;
                let length = cursor.read_u16()?;
                Message::Menu {
                    kind,
                    data: cursor.read_bytes(usize::from(length))?,
                }
            }
            MessageType::GameEventList => {
                let count = cursor.read_bits(9)? as usize;
                let length = cursor.read_bits(20)? as usize;
                let mut data = cursor.read_blob(length)?;
                Message::GameEventList(read_descriptors(&mut data, count)?)
            }
            MessageType::GetCvarValue => Message::GetCvarValue {
                cookie: cursor.read_u32()?,
                name: cursor.read_cstring()?,
            },
            MessageType::CmdKeyValues => {
                let length = cursor.read_u32()? as usize;
                Message::CmdKeyValues(cursor.read_bytes(length)?)
            }
        })
    }
}

fn read_angles(cursor: &mut Cursor) -> ReadResult<[u16; 3]> {
    Ok([cursor.read_u16()?, cursor.read_u16()?, cursor.read_u16()?])
}

fn read_server_info(cursor: &mut Cursor) -> ReadResult<ServerInfo> {
    let protocol = cursor.read_u16()?;
    let _server_count = cursor.read_u32()?;
    let is_hltv = cursor.read_bool()?;
    let is_dedicated = cursor.read_bool()?;
    let _client_crc = cursor.read_u32()?;
    let max_classes = cursor.read_u16()?;
    if protocol >= 18 {
        cursor.skip_bits(16 * 8)?; // map md5
    } else {
        let _map_crc = cursor.read_u32()?;
    }
    let player_slot = cursor.read_u8()?;
    let max_player_count = cursor.read_u8()?;
    let interval_per_tick = cursor.read_f32()?;
    let _platform = cursor.read_u8()?;
    let game = cursor.read_cstring()?;
    let map = cursor.read_cstring()?;
    let skybox = cursor.read_cstring()?;
    let server_name = cursor.read_cstring()?;
    if protocol >= 16 {
        let _replay = cursor.read_bool()?;
    }
    Ok(ServerInfo {
        protocol,
        max_classes,
        player_slot,
        max_player_count,
        interval_per_tick,
        game,
        map,
        skybox,
        server_name,
        is_hltv,
        is_dedicated,
    })
}
