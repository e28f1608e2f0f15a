use super::cursor::Cursor;
use crate::errors::{ErrorKind, ReadResult};
use crate::types::demo::Header;

pub const DEMO_TYPE: &str = "HL2DEMO";
pub const HEADER_SIZE: usize = 1072;
const PATH_LENGTH: usize = 260;

pub fn read_header(cursor: &mut Cursor) -> ReadResult<Header> {
    let demo_type = cursor.read_fixed_string(8)?;
    if demo_type != DEMO_TYPE {
        return Err(ErrorKind::InvalidHeader(demo_type));
    }
    Ok(Header {
        demo_type,
        demo_protocol: cursor.read_u32()?,
        network_protocol: cursor.read_u32()?,
        server: cursor.read_fixed_string(PATH_LENGTH)?,
        client: cursor.read_fixed_string(PATH_LENGTH)?,
        map: cursor.read_fixed_string(PATH_LENGTH)?,
        game_dir: cursor.read_fixed_string(PATH_LENGTH)?,
        duration: cursor.read_f32()?,
        ticks: cursor.read_u32()?,
        frames: cursor.read_u32()?,
        signon_length: cursor.read_u32()?,
    })
}
