//! Wire protocol: the closed message catalogue.
//!
//! Every message is one id byte followed by a fixed-size packed payload, all
//! multi-byte fields little-endian. There is no length prefix; receivers
//! derive the size from the id via [`message_size`]. Coordinates travel as 8.8
//! fixed-point, angles as 1/65536ths of a turn.

use std::f32::consts::TAU;

use glam::{Vec2, Vec3};

/// Increment each time the wire format changes. Mismatching peers refuse to
/// handshake.
pub const PROTOCOL_VERSION: u32 = 106;

/// Opaque entity identifier, unique within a server's lifetime until the next
/// map change.
pub type EntityId = u16;

/// 8.8 fixed-point world coordinate.
pub type MessageCoord = i16;

/// Angle as a fraction of a full turn, 65536 = 2π.
pub type MessageAngle = u16;

pub fn coord_to_message_coord(x: f32) -> MessageCoord {
    (x * 256.0) as MessageCoord
}

pub fn message_coord_to_coord(x: MessageCoord) -> f32 {
    x as f32 / 256.0
}

pub fn position_to_message_position(pos: Vec3) -> [MessageCoord; 3] {
    [
        coord_to_message_coord(pos.x),
        coord_to_message_coord(pos.y),
        coord_to_message_coord(pos.z),
    ]
}

pub fn message_position_to_position(pos: &[MessageCoord; 3]) -> Vec3 {
    Vec3::new(
        message_coord_to_coord(pos[0]),
        message_coord_to_coord(pos[1]),
        message_coord_to_coord(pos[2]),
    )
}

pub fn position_to_message_position_xy(pos: Vec2) -> [MessageCoord; 2] {
    [coord_to_message_coord(pos.x), coord_to_message_coord(pos.y)]
}

pub fn angle_to_message_angle(angle: f32) -> MessageAngle {
    (angle / TAU * 65536.0) as i64 as MessageAngle
}

pub fn message_angle_to_angle(angle: MessageAngle) -> f32 {
    angle as f32 / 65536.0 * TAU
}

/// One fixed-size field of a packed payload.
pub trait WireField: Sized + Copy {
    const SIZE: usize;
    fn write(&self, out: &mut Vec<u8>);
    fn read(bytes: &[u8], offset: &mut usize) -> Self;
}

macro_rules! impl_wire_scalar {
    ( $( $ty:ty ),* ) => { $(
        impl WireField for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn write(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read(bytes: &[u8], offset: &mut usize) -> Self {
                let size = std::mem::size_of::<$ty>();
                let value = <$ty>::from_le_bytes(bytes[*offset..*offset + size].try_into().unwrap());
                *offset += size;
                value
            }
        }
    )* }
}

impl_wire_scalar!(u8, i8, u16, i16, u32, i32);

impl<T: WireField, const N: usize> WireField for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn write(&self, out: &mut Vec<u8>) {
        for item in self {
            item.write(out);
        }
    }

    fn read(bytes: &[u8], offset: &mut usize) -> Self {
        std::array::from_fn(|_| T::read(bytes, offset))
    }
}

macro_rules! define_messages {
    ( $( $name:ident { $( $field:ident : $ty:ty, )* } )* ) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq)]
            pub struct $name {
                $( pub $field: $ty, )*
            }

            impl WireField for $name {
                const SIZE: usize = 0 $( + <$ty as WireField>::SIZE )*;

                #[allow(unused_variables)]
                fn write(&self, out: &mut Vec<u8>) {
                    $( self.$field.write(out); )*
                }

                #[allow(unused_variables)]
                fn read(bytes: &[u8], offset: &mut usize) -> Self {
                    $name {
                        $( $field: <$ty as WireField>::read(bytes, offset), )*
                    }
                }
            }
        )*

        /// Message discriminants as they appear on the wire. 0 is reserved.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum MessageId {
            Unknown = 0,
            $( $name, )*
            NumMessages,
        }

        pub const MESSAGE_COUNT: usize = MessageId::NumMessages as usize;

        /// Full on-wire size (id byte included) per message id.
        pub const MESSAGE_SIZES: [usize; MESSAGE_COUNT] = [
            1, // Unknown
            $( 1 + <$name as WireField>::SIZE, )*
        ];

        #[derive(Debug, Clone, Copy, PartialEq)]
        pub enum Message {
            $( $name($name), )*
        }

        impl Message {
            pub fn message_id(&self) -> MessageId {
                match self {
                    $( Message::$name(_) => MessageId::$name, )*
                }
            }

            /// Full encoded size, id byte included.
            pub fn size(&self) -> usize {
                MESSAGE_SIZES[self.message_id() as usize]
            }

            pub fn encode(&self, out: &mut Vec<u8>) {
                match self {
                    $(
                        Message::$name(payload) => {
                            out.push(MessageId::$name as u8);
                            payload.write(out);
                        }
                    )*
                }
            }

            /// Decode one message whose full encoding starts at `bytes[0]`.
            /// Returns the message and its encoded size, or `None` for an
            /// unknown id or a short buffer.
            pub fn decode(bytes: &[u8]) -> Option<(Message, usize)> {
                let id = *bytes.first()?;
                let size = message_size(id)?;
                if bytes.len() < size {
                    return None;
                }
                let payload = &bytes[1..size];
                let mut offset = 0usize;
                let message = match id {
                    $(
                        id if id == MessageId::$name as u8 =>
                            Message::$name(<$name as WireField>::read(payload, &mut offset)),
                    )*
                    _ => return None,
                };
                Some((message, size))
            }
        }

        $(
            impl From<$name> for Message {
                fn from(payload: $name) -> Message {
                    Message::$name(payload)
                }
            }
        )*
    }
}

define_messages! {
    // Dummy message for connection establishing (opens the UDP pinhole).
    DummyNetMessage {
        filler: [u8; 7],
    }

    // Server to client, unreliable.
    ServerState {
        frags: [u8; crate::game_constants::MAX_PLAYERS],
        map_time_s: u16,
        player_count: u8,
        game_rules: u8,
    }
    MonsterState {
        monster_id: u16,
        xyz: [i16; 3],
        angle: u16,
        monster_type: u8,
        body_parts_mask: u8,
        animation: u16,
        animation_frame: u16,
        flags: u8,
    }
    WallPosition {
        wall_index: u16,
        vertices_xy: [i16; 4],
        z: i16,
        texture_id: u8,
    }
    PlayerSpawn {
        xyz: [i16; 3],
        direction: u16,
        player_monster_id: u16,
    }
    // Position of the player receiving this message.
    PlayerPosition {
        xyz: [i16; 3],
        speed: i16,
    }
    PlayerState {
        ammo: [u8; crate::game_constants::WEAPON_COUNT],
        health: u8,
        armor: u8,
        keys_mask: u8,
        weapons_mask: u8,
        index: u8,
        flags: u8,
    }
    PlayerWeapon {
        current_weapon_index: u8,
        animation: u8,
        animation_frame: u8,
        switch_stage: u8, // 0 - retracted, 255 - fully deployed
    }
    PlayerItemPickup {
        item_id: u8,
    }
    ItemState {
        item_index: u16,
        z: i16,
        picked: u8,
    }
    StaticModelState {
        static_model_index: u16,
        xyz: [i16; 3],
        angle: u16,
        animation_frame: u16,
        flags: u8,
        model_id: u8,
    }
    SpriteEffectBirth {
        xyz: [i16; 3],
        effect_id: u8,
    }
    ParticleEffectBirth {
        xyz: [i16; 3],
        effect_id: u8,
    }
    FullscreenBlendEffect {
        color_index: u8,
        intensity: u8,
    }
    MonsterPartBirth {
        xyz: [i16; 3],
        angle: u16,
        monster_type: u8,
        part_id: u8,
    }
    MapEventSound {
        xyz: [i16; 3],
        sound_id: u8,
    }
    MonsterLinkedSound {
        monster_id: u16,
        sound_id: u8,
    }
    MonsterSound {
        monster_id: u16,
        monster_sound_id: u8,
    }
    RocketState {
        rocket_id: u16,
        xyz: [i16; 3],
        angle: [u16; 2],
    }
    RocketBirth {
        rocket_id: u16,
        xyz: [i16; 3],
        angle: [u16; 2],
        rocket_type: u8,
    }
    RocketDeath {
        rocket_id: u16,
    }
    DynamicItemBirth {
        item_id: u16,
        xyz: [i16; 3],
        item_type_id: u8,
    }
    DynamicItemUpdate {
        item_id: u16,
        xyz: [i16; 3],
    }
    DynamicItemDeath {
        item_id: u16,
    }
    LightSourceBirth {
        light_source_id: u16,
        xy: [i16; 2],
        radius: i16,
        brightness: u8,
        turn_on_time_ms: u16,
    }
    LightSourceDeath {
        light_source_id: u16,
    }
    // Id of the parent static model.
    RotatingLightSourceBirth {
        light_source_id: u16,
        xy: [i16; 2],
        radius: i16,
        brightness: u8,
    }
    RotatingLightSourceDeath {
        light_source_id: u16,
    }

    // Server to client, reliable.
    MapChange {
        map_number: u32,
        need_play_cutscene: u8,
    }
    MonsterBirth {
        monster_id: u16,
        initial_state: MonsterState,
    }
    MonsterDeath {
        monster_id: u16,
    }
    TextMessage {
        text_message_number: u16,
    }
    DynamicTextMessage {
        text: [u8; 128],
    }

    // Client to server, unreliable.
    PlayerMove {
        view_direction: u16,
        move_direction: u16,
        acceleration: u8, // 0 - stay, 1 - walk, 2 - run
        weapon_index: u8,
        view_dir_angle_x: u16,
        view_dir_angle_z: u16,
        flags: u8,
    }

    // Client to server, reliable. Transmitted when the client renames.
    PlayerName {
        name: [u8; 64], // null-terminated
    }
}

/// Full on-wire size for a raw id byte, `None` for ids outside the catalogue.
pub fn message_size(id: u8) -> Option<usize> {
    if id == MessageId::Unknown as u8 || id as usize >= MESSAGE_COUNT {
        return None;
    }
    Some(MESSAGE_SIZES[id as usize])
}

// MonsterState flag bits; the high nibble carries the player colour.
pub const MONSTER_FLAG_FULLY_DEAD: u8 = 1 << 0;
pub const MONSTER_FLAG_INVISIBLE: u8 = 1 << 1;

// PlayerState flag bits.
pub const PLAYER_FLAG_INVISIBLE: u8 = 1 << 0;
pub const PLAYER_FLAG_SHOW_SHIELD: u8 = 1 << 1;
pub const PLAYER_FLAG_SHOW_CHOJIN: u8 = 1 << 2;

// StaticModelState flag bits.
pub const STATIC_MODEL_FLAG_VISIBLE: u8 = 1 << 0;
pub const STATIC_MODEL_FLAG_ANIMATION_PLAYING: u8 = 1 << 1;

// PlayerMove flag bits; the high nibble carries the requested colour.
pub const MOVE_FLAG_SHOOT: u8 = 1 << 0;
pub const MOVE_FLAG_JUMP: u8 = 1 << 1;

pub fn pack_color(flags: u8, color: u8) -> u8 {
    (flags & 0x0F) | (color << 4)
}

pub fn unpack_color(flags: u8) -> u8 {
    flags >> 4
}

/// Fill a fixed char buffer from a string, always leaving a terminating null.
pub fn fill_name_buffer<const N: usize>(text: &str) -> [u8; N] {
    let mut buffer = [0u8; N];
    let bytes = text.as_bytes();
    let n = bytes.len().min(N - 1);
    buffer[..n].copy_from_slice(&bytes[..n]);
    buffer
}

pub fn name_buffer_to_string(buffer: &[u8]) -> String {
    let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::MapChange(MapChange {
                map_number: 1,
                need_play_cutscene: 0,
            }),
            Message::MonsterBirth(MonsterBirth {
                monster_id: 17,
                initial_state: MonsterState {
                    monster_id: 17,
                    xyz: [256, 512, 0],
                    angle: 16384,
                    monster_type: 3,
                    body_parts_mask: 0xFF,
                    animation: 2,
                    animation_frame: 5,
                    flags: 0,
                },
            }),
            Message::PlayerPosition(PlayerPosition {
                xyz: [640, -128, 90],
                speed: 1280,
            }),
            Message::PlayerMove(PlayerMove {
                view_direction: 0,
                move_direction: 16384,
                acceleration: 2,
                weapon_index: 1,
                view_dir_angle_x: 0,
                view_dir_angle_z: 0,
                flags: pack_color(MOVE_FLAG_JUMP, 5),
            }),
            Message::DynamicTextMessage(DynamicTextMessage {
                text: fill_name_buffer("you got the blue key"),
            }),
            Message::MonsterDeath(MonsterDeath { monster_id: 17 }),
        ]
    }

    #[test]
    fn framing_is_lossless_over_concatenation() {
        let messages = sample_messages();

        let mut stream = Vec::new();
        for message in &messages {
            message.encode(&mut stream);
        }

        let mut parsed = Vec::new();
        let mut pos = 0usize;
        while pos < stream.len() {
            let (message, size) = Message::decode(&stream[pos..]).unwrap();
            parsed.push(message);
            pos += size;
        }

        assert_eq!(parsed, messages);
        assert_eq!(pos, stream.len());
    }

    #[test]
    fn encoded_sizes_match_the_table() {
        for message in sample_messages() {
            let mut out = Vec::new();
            message.encode(&mut out);
            assert_eq!(out.len(), message.size());
            assert_eq!(out.len(), message_size(out[0]).unwrap());
        }
    }

    #[test]
    fn unknown_and_reserved_ids_are_rejected() {
        assert!(message_size(0).is_none());
        assert!(message_size(MessageId::NumMessages as u8).is_none());
        assert!(Message::decode(&[0u8, 1, 2, 3]).is_none());
        assert!(Message::decode(&[0xEEu8; 4]).is_none());
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut out = Vec::new();
        Message::PlayerPosition(PlayerPosition {
            xyz: [0, 0, 0],
            speed: 0,
        })
        .encode(&mut out);
        assert!(Message::decode(&out[..out.len() - 1]).is_none());
    }

    #[test]
    fn coords_and_angles_quantise_consistently() {
        assert_eq!(coord_to_message_coord(1.0), 256);
        assert_eq!(message_coord_to_coord(256), 1.0);
        assert_eq!(coord_to_message_coord(-2.5), -640);

        let quarter_turn = angle_to_message_angle(std::f32::consts::FRAC_PI_2);
        assert_eq!(quarter_turn, 16384);
        assert!((message_angle_to_angle(quarter_turn) - std::f32::consts::FRAC_PI_2).abs() < 1e-3);
    }

    #[test]
    fn color_packing_round_trips() {
        let flags = pack_color(MOVE_FLAG_SHOOT | MOVE_FLAG_JUMP, 9);
        assert_eq!(flags & MOVE_FLAG_SHOOT, MOVE_FLAG_SHOOT);
        assert_eq!(unpack_color(flags), 9);
    }

    #[test]
    fn name_buffers_null_terminate() {
        let name: [u8; 8] = fill_name_buffer("too long for this buffer");
        assert_eq!(name[7], 0);
        assert_eq!(name_buffer_to_string(&name), "too lon");
    }
}
