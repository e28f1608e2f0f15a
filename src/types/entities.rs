//! Player and projectile records produced by the queries.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use super::{DemoTick, EntityId, UserId, Vector};

/// Account id offset of individual SteamID64s.
/// https://developer.valvesoftware.com/wiki/SteamID
pub const STEAMID64_INDIVIDUAL_BASE: u64 = 76561197960265728;

/////////////////////////////////////////////
/// PLAYER
/// /////////////////////////////////////////

/// A player as described by the `userinfo` string table.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct PlayerInfo {
    pub entity_id: EntityId,
    pub user_id: UserId,
    pub name: String,
    /// The raw GUID string, `[U:1:n]` or `STEAM_x:y:z` or `BOT`.
    pub guid: String,
    pub steamid: Option<u64>,
    pub fake_player: bool,
    pub is_hltv: bool,
}

/// Converts the GUID forms found in `userinfo` into a SteamID64.
/// Bots and malformed ids give `None`.
pub fn steamid64_from_guid(guid: &str) -> Option<u64> {
    let guid = guid.trim();
    if let Some(inner) = guid.strip_prefix("[U:").and_then(|s| s.strip_suffix(']')) {
        // [U:1:account]
        let account = inner.split(':').nth(1)?.parse::<u64>().ok()?;
        return Some(STEAMID64_INDIVIDUAL_BASE + account);
    }
    if let Some(inner) = guid.strip_prefix("STEAM_") {
        // STEAM_x:y:z, account = z * 2 + y
        let mut parts = inner.split(':').skip(1);
        let y = parts.next()?.parse::<u64>().ok()?;
        let z = parts.next()?.parse::<u64>().ok()?;
        return Some(STEAMID64_INDIVIDUAL_BASE + z * 2 + y);
    }
    match guid.parse::<u64>() {
        Ok(id) if id > STEAMID64_INDIVIDUAL_BASE => Some(id),
        _ => None,
    }
}

/////////////////////////////////////////////
/// GRENADES
/// /////////////////////////////////////////

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Default)]
#[repr(u8)]
pub enum GrenadeType {
    #[default]
    Other = 0,
    Pipe = 1,
    Sticky = 2,
    Rocket = 3,
    Flare = 4,
    Arrow = 5,
    HealingBolt = 6,
    Jar = 7,
    Cleaver = 8,
    SentryRocket = 9,
    EnergyRing = 10,
}

impl GrenadeType {
    /// Maps a server class name onto a grenade type. `None` means the class
    /// is not a thrown or fired projectile at all.
    pub fn from_class_name(class_name: &str) -> Option<GrenadeType> {
        Some(match class_name {
            "CTFGrenadePipebombProjectile" => GrenadeType::Pipe,
            "CTFProjectile_Rocket"
            | "CTFProjectile_EnergyBall" => GrenadeType::Rocket,
            "CTFProjectile_SentryRocket" => GrenadeType::SentryRocket,
            "CTFProjectile_Flare" => GrenadeType::Flare,
            "CTFProjectile_Arrow" => GrenadeType::Arrow,
            "CTFProjectile_HealingBolt" => GrenadeType::HealingBolt,
            "CTFProjectile_Jar"
            | "CTFProjectile_JarMilk"
            | "CTFProjectile_JarGas" => GrenadeType::Jar,
            "CTFProjectile_Cleaver" => GrenadeType::Cleaver,
            "CTFProjectile_EnergyRing" => GrenadeType::EnergyRing,
            name if name.contains("Projectile") => GrenadeType::Other,
            _ => return None,
        })
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct TrajectorySample {
    pub tick: DemoTick,
    pub position: Vector,
}

/// The lifetime of one projectile entity.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GrenadeRecord {
    pub entity_id: EntityId,
    pub grenade_type: GrenadeType,
    pub class_name: String,
    pub spawn_tick: DemoTick,
    /// Tick the entity was deleted at, `None` if it outlived the recording.
    pub despawn_tick: Option<DemoTick>,
    pub thrower_entity: Option<EntityId>,
    pub thrower_steamid: Option<u64>,
    pub thrower_name: Option<String>,
    pub trajectory: Vec<TrajectorySample>,
}

impl GrenadeRecord {
    /// Path length over all samples.
    pub fn distance_travelled(&self) -> f32 {
        self.trajectory
            .windows(2)
            .map(|pair| pair[0].position.dist_to(&pair[1].position))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("[U:1:39734272]", Some(76561198000000000))]
    #[case("STEAM_0:0:19867136", Some(76561198000000000))]
    #[case("76561198000000000", Some(76561198000000000))]
    #[case("BOT", None)]
    #[case("[U:1:]", None)]
    fn guid_conversion(#[case] guid: &str, #[case] expected: Option<u64>) {
        assert_eq!(steamid64_from_guid(guid), expected);
    }

    #[test]
    fn projectile_classes() {
        assert_eq!(GrenadeType::from_class_name("CTFProjectile_Rocket"), Some(GrenadeType::Rocket));
        assert_eq!(GrenadeType::from_class_name("CTFProjectile_Throwable"), Some(GrenadeType::Other));
        assert_eq!(GrenadeType::from_class_name("CTFPlayer"), None);
        assert_eq!(GrenadeType::from_class_name("CTFGrenadeLauncher"), None);
    }
}
