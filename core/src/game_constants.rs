//! Gameplay constants shared by server and client.

use crate::time::Time;

/// Maximum simultaneous players on one server.
pub const MAX_PLAYERS: usize = 8;

/// Weapon slots per player. Slot 0 is the hand; it has no ammo and no switch
/// lock-out.
pub const WEAPON_COUNT: usize = 8;

pub const PLAYER_RADIUS: f32 = 60.0 / 256.0;
pub const PLAYER_HEIGHT: f32 = 1.0;
pub const PLAYER_EYES_LEVEL: f32 = 0.75;

pub const PLAYER_MAX_HEALTH: i32 = 200;
pub const PLAYER_MAX_ARMOR: i32 = 200;
pub const PLAYER_START_HEALTH: i32 = 100;

pub const WALK_SPEED: f32 = 2.5;
pub const RUN_SPEED: f32 = 5.0;
pub const JUMP_IMPULSE: f32 = 3.0;
pub const GRAVITY: f32 = 9.8;

/// Vertical speed cap, both directions.
pub const MAX_VERTICAL_SPEED: f32 = 30.0;

/// Monsters and players taking more than this fraction of their separation
/// limit in one death blow burst into gibs.
pub const GIBS_PER_DEATH: usize = 6;
pub const GIB_LIFETIME: Time = Time::from_us(10_000_000);

/// Render-side delay between the freshest server snapshot and the interpolated
/// state presented to the camera.
pub const INTERPOLATION_DELAY: Time = Time::from_us(100_000);

/// Server tick bounds (spec: Δt = clamp(real Δt, 2 ms, 60 ms)).
pub const MIN_TICK: Time = Time::from_us(2_000);
pub const MAX_TICK: Time = Time::from_us(60_000);

/// Entities further than this from a player are not replicated to it.
pub const VISIBILITY_DISTANCE: f32 = 24.0;

/// `MonsterState.monster_type` value marking a replicated player rather than
/// a monster from the resource database.
pub const PLAYER_MONSTER_TYPE: u8 = 255;

/// Monster sound slots, as carried by `MonsterSound.monster_sound_id`.
pub mod monster_sounds {
    pub const ALERT: u8 = 0;
    pub const ATTACK: u8 = 1;
    pub const PAIN: u8 = 2;
    pub const DEATH: u8 = 3;
}

pub const DEFAULT_TCP_PORT: u16 = 6666;
pub const DEFAULT_BASE_UDP_PORT: u16 = 8000;
pub const DEFAULT_CLIENT_UDP_PORT: u16 = 9000;
/// Size of the base+offset UDP port pool handed out during handshakes.
pub const UDP_PORT_POOL_SIZE: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    pub fn parse(s: &str) -> Option<Difficulty> {
        match s {
            "easy" => Some(Difficulty::Easy),
            "normal" => Some(Difficulty::Normal),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }

    /// Monster life multiplier applied at spawn.
    pub fn life_scale(self) -> f32 {
        match self {
            Difficulty::Easy => 0.5,
            Difficulty::Normal => 1.0,
            Difficulty::Hard => 1.5,
        }
    }
}
