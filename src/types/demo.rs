use serde::Serialize;

use super::DemoTick;

/// The fixed size block at the start of every demo file.
#[derive(Serialize, Default, Debug, Clone, PartialEq)]
pub struct Header {
    /// Format tag, always `HL2DEMO`.
    pub demo_type: String,
    pub demo_protocol: u32,
    pub network_protocol: u32,
    pub server: String,
    pub client: String,
    /// The name of the map, without the `.bsp` suffix.
    pub map: String,
    pub game_dir: String,
    /// Duration of the recording, in seconds.
    pub duration: f32,
    pub ticks: u32,
    pub frames: u32,
    pub signon_length: u32,
}

impl Header {
    /// Seconds per tick as implied by duration and tick count.
    pub fn interval_per_tick(&self) -> f32 {
        if self.ticks == 0 {
            0.0
        } else {
            self.duration / self.ticks as f32
        }
    }

    /// Converts a tick into seconds since recording start.
    pub fn tick_to_seconds(&self, tick: DemoTick) -> f32 {
        tick as f32 * self.interval_per_tick()
    }
}

/// The parts of the `ServerInfo` message a query cares about.
#[derive(Serialize, Default, Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub protocol: u16,
    pub max_classes: u16,
    pub player_slot: u8,
    pub max_player_count: u8,
    pub interval_per_tick: f32,
    pub game: String,
    pub map: String,
    pub skybox: String,
    pub server_name: String,
    pub is_hltv: bool,
    pub is_dedicated: bool,
}
