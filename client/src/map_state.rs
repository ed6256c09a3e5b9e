//! Replicated view of the server's simulation.
//!
//! A passive mirror rebuilt from the message stream. Every entity class keeps
//! a map keyed by `EntityId`; deltas for unknown ids are dropped silently (an
//! unreliable delta may overtake its reliable birth). Rendering reads
//! positions interpolated between the two most recent snapshots, at a fixed
//! delay behind the newest server state.

use std::collections::HashMap;

use glam::{Vec2, Vec3};

use chasm_core::game_constants::{INTERPOLATION_DELAY, MAX_PLAYERS, WEAPON_COUNT};
use chasm_core::messages::{self, EntityId, Message};
use chasm_core::time::Time;

#[derive(Clone, Copy)]
struct Snapshot {
    time: Time,
    pos: Vec3,
    angle: f32,
}

/// Two most recent authoritative snapshots; rendering blends between them.
#[derive(Clone, Copy)]
pub struct InterpolatedPosition {
    previous: Snapshot,
    latest: Snapshot,
}

impl InterpolatedPosition {
    fn new(time: Time, pos: Vec3, angle: f32) -> Self {
        let snapshot = Snapshot { time, pos, angle };
        InterpolatedPosition {
            previous: snapshot,
            latest: snapshot,
        }
    }

    fn push(&mut self, time: Time, pos: Vec3, angle: f32) {
        self.previous = self.latest;
        self.latest = Snapshot { time, pos, angle };
    }

    /// Linear blend toward the newer snapshot at `render_time`
    /// (caller already applied the render delay).
    pub fn sample(&self, render_time: Time) -> (Vec3, f32) {
        let span = self.latest.time - self.previous.time;
        if span <= Time::ZERO {
            return (self.latest.pos, self.latest.angle);
        }
        let k = ((render_time - self.previous.time).to_seconds() / span.to_seconds())
            .clamp(0.0, 1.0);
        let pos = self.previous.pos.lerp(self.latest.pos, k);

        let mut angle_diff = self.latest.angle - self.previous.angle;
        while angle_diff > std::f32::consts::PI {
            angle_diff -= std::f32::consts::TAU;
        }
        while angle_diff < -std::f32::consts::PI {
            angle_diff += std::f32::consts::TAU;
        }
        (pos, self.previous.angle + angle_diff * k)
    }
}

pub struct MonsterEntry {
    pub monster_type: u8,
    pub body_parts_mask: u8,
    pub animation: u16,
    pub animation_frame: u16,
    pub is_fully_dead: bool,
    pub is_invisible: bool,
    pub color: u8,
    pub position: InterpolatedPosition,
}

pub struct RocketEntry {
    pub rocket_type: u8,
    pub position: InterpolatedPosition,
}

pub struct DynamicItemEntry {
    pub item_type_id: u8,
    pub position: InterpolatedPosition,
}

pub struct LightSourceEntry {
    pub pos: Vec2,
    pub radius: f32,
    pub brightness: u8,
    pub turn_on_time_ms: u16,
    pub birth_time: Time,
}

pub struct RotatingLightSourceEntry {
    pub pos: Vec2,
    pub radius: f32,
    pub brightness: u8,
}

pub struct SpriteEffectEntry {
    pub effect_id: u8,
    pub pos: Vec3,
    pub birth_time: Time,
}

#[derive(Clone, Copy)]
pub struct DynamicWallEntry {
    pub vertices: [Vec2; 2],
    pub z: f32,
    pub texture_id: u8,
}

#[derive(Clone, Copy, Default)]
pub struct OwnPlayerState {
    pub health: u8,
    pub armor: u8,
    pub ammo: [u8; WEAPON_COUNT],
    pub keys_mask: u8,
    pub weapons_mask: u8,
    pub index: u8,
    pub is_invisible: bool,
    pub show_shield: bool,
}

pub struct MapState {
    pub monsters: HashMap<EntityId, MonsterEntry>,
    pub rockets: HashMap<EntityId, RocketEntry>,
    pub dynamic_items: HashMap<EntityId, DynamicItemEntry>,
    pub light_sources: HashMap<EntityId, LightSourceEntry>,
    pub rotating_light_sources: HashMap<EntityId, RotatingLightSourceEntry>,
    pub sprite_effects: Vec<SpriteEffectEntry>,
    pub dynamic_walls: HashMap<u16, DynamicWallEntry>,
    pub picked_items: HashMap<u16, bool>,
    pub broken_models: HashMap<u16, bool>,

    pub own_position: InterpolatedPosition,
    pub own_speed: f32,
    pub own_state: OwnPlayerState,
    pub own_entity_id: EntityId,
    pub spawn_received: bool,

    pub frags: [u8; MAX_PLAYERS],
    pub player_count: u8,
    pub map_time_s: u16,

    pub fullscreen_blend: Option<(u8, u8, Time)>,
    pub text_messages: Vec<u16>,
    pub dynamic_text_messages: Vec<String>,

    now: Time,
}

impl MapState {
    pub fn new() -> MapState {
        MapState {
            monsters: HashMap::new(),
            rockets: HashMap::new(),
            dynamic_items: HashMap::new(),
            light_sources: HashMap::new(),
            rotating_light_sources: HashMap::new(),
            sprite_effects: Vec::new(),
            dynamic_walls: HashMap::new(),
            picked_items: HashMap::new(),
            broken_models: HashMap::new(),
            own_position: InterpolatedPosition::new(Time::ZERO, Vec3::ZERO, 0.0),
            own_speed: 0.0,
            own_state: OwnPlayerState::default(),
            own_entity_id: 0,
            spawn_received: false,
            frags: [0; MAX_PLAYERS],
            player_count: 0,
            map_time_s: 0,
            fullscreen_blend: None,
            text_messages: Vec::new(),
            dynamic_text_messages: Vec::new(),
            now: Time::ZERO,
        }
    }

    /// Advance the local clock and age out expired one-shot effects.
    pub fn tick(&mut self, now: Time) {
        self.now = now;
        let cutoff = now - Time::from_ms(2000);
        self.sprite_effects.retain(|e| e.birth_time >= cutoff);
        if let Some((_, _, birth)) = self.fullscreen_blend {
            if now - birth > Time::from_ms(500) {
                self.fullscreen_blend = None;
            }
        }
    }

    pub fn render_time(&self) -> Time {
        self.now - INTERPOLATION_DELAY
    }

    pub fn process_message(&mut self, message: Message) {
        let now = self.now;
        match message {
            Message::MonsterBirth(m) => {
                let pos = messages::message_position_to_position(&m.initial_state.xyz);
                let angle = messages::message_angle_to_angle(m.initial_state.angle);
                self.monsters.insert(
                    m.monster_id,
                    MonsterEntry {
                        monster_type: m.initial_state.monster_type,
                        body_parts_mask: m.initial_state.body_parts_mask,
                        animation: m.initial_state.animation,
                        animation_frame: m.initial_state.animation_frame,
                        is_fully_dead: m.initial_state.flags
                            & messages::MONSTER_FLAG_FULLY_DEAD
                            != 0,
                        is_invisible: m.initial_state.flags & messages::MONSTER_FLAG_INVISIBLE
                            != 0,
                        color: messages::unpack_color(m.initial_state.flags),
                        position: InterpolatedPosition::new(now, pos, angle),
                    },
                );
            }
            Message::MonsterState(m) => {
                // Unknown ids were either never born here or already retired.
                if let Some(entry) = self.monsters.get_mut(&m.monster_id) {
                    entry.body_parts_mask = m.body_parts_mask;
                    entry.animation = m.animation;
                    entry.animation_frame = m.animation_frame;
                    entry.is_fully_dead = m.flags & messages::MONSTER_FLAG_FULLY_DEAD != 0;
                    entry.is_invisible = m.flags & messages::MONSTER_FLAG_INVISIBLE != 0;
                    entry.color = messages::unpack_color(m.flags);
                    entry.position.push(
                        now,
                        messages::message_position_to_position(&m.xyz),
                        messages::message_angle_to_angle(m.angle),
                    );
                }
            }
            Message::MonsterDeath(m) => {
                self.monsters.remove(&m.monster_id);
            }
            Message::RocketBirth(m) => {
                let pos = messages::message_position_to_position(&m.xyz);
                let angle = messages::message_angle_to_angle(m.angle[0]);
                self.rockets.insert(
                    m.rocket_id,
                    RocketEntry {
                        rocket_type: m.rocket_type,
                        position: InterpolatedPosition::new(now, pos, angle),
                    },
                );
            }
            Message::RocketState(m) => {
                if let Some(entry) = self.rockets.get_mut(&m.rocket_id) {
                    entry.position.push(
                        now,
                        messages::message_position_to_position(&m.xyz),
                        messages::message_angle_to_angle(m.angle[0]),
                    );
                }
            }
            Message::RocketDeath(m) => {
                self.rockets.remove(&m.rocket_id);
            }
            Message::DynamicItemBirth(m) => {
                let pos = messages::message_position_to_position(&m.xyz);
                self.dynamic_items.insert(
                    m.item_id,
                    DynamicItemEntry {
                        item_type_id: m.item_type_id,
                        position: InterpolatedPosition::new(now, pos, 0.0),
                    },
                );
            }
            Message::DynamicItemUpdate(m) => {
                if let Some(entry) = self.dynamic_items.get_mut(&m.item_id) {
                    entry
                        .position
                        .push(now, messages::message_position_to_position(&m.xyz), 0.0);
                }
            }
            Message::DynamicItemDeath(m) => {
                self.dynamic_items.remove(&m.item_id);
            }
            Message::LightSourceBirth(m) => {
                self.light_sources.insert(
                    m.light_source_id,
                    LightSourceEntry {
                        pos: Vec2::new(
                            messages::message_coord_to_coord(m.xy[0]),
                            messages::message_coord_to_coord(m.xy[1]),
                        ),
                        radius: messages::message_coord_to_coord(m.radius),
                        brightness: m.brightness,
                        turn_on_time_ms: m.turn_on_time_ms,
                        birth_time: now,
                    },
                );
            }
            Message::LightSourceDeath(m) => {
                self.light_sources.remove(&m.light_source_id);
            }
            Message::RotatingLightSourceBirth(m) => {
                self.rotating_light_sources.insert(
                    m.light_source_id,
                    RotatingLightSourceEntry {
                        pos: Vec2::new(
                            messages::message_coord_to_coord(m.xy[0]),
                            messages::message_coord_to_coord(m.xy[1]),
                        ),
                        radius: messages::message_coord_to_coord(m.radius),
                        brightness: m.brightness,
                    },
                );
            }
            Message::RotatingLightSourceDeath(m) => {
                self.rotating_light_sources.remove(&m.light_source_id);
            }
            Message::SpriteEffectBirth(m) => {
                self.sprite_effects.push(SpriteEffectEntry {
                    effect_id: m.effect_id,
                    pos: messages::message_position_to_position(&m.xyz),
                    birth_time: now,
                });
            }
            Message::ParticleEffectBirth(m) => {
                self.sprite_effects.push(SpriteEffectEntry {
                    effect_id: m.effect_id,
                    pos: messages::message_position_to_position(&m.xyz),
                    birth_time: now,
                });
            }
            Message::MonsterPartBirth(m) => {
                self.sprite_effects.push(SpriteEffectEntry {
                    effect_id: m.part_id,
                    pos: messages::message_position_to_position(&m.xyz),
                    birth_time: now,
                });
            }
            Message::WallPosition(m) => {
                self.dynamic_walls.insert(
                    m.wall_index,
                    DynamicWallEntry {
                        vertices: [
                            Vec2::new(
                                messages::message_coord_to_coord(m.vertices_xy[0]),
                                messages::message_coord_to_coord(m.vertices_xy[1]),
                            ),
                            Vec2::new(
                                messages::message_coord_to_coord(m.vertices_xy[2]),
                                messages::message_coord_to_coord(m.vertices_xy[3]),
                            ),
                        ],
                        z: messages::message_coord_to_coord(m.z),
                        texture_id: m.texture_id,
                    },
                );
            }
            Message::ItemState(m) => {
                self.picked_items.insert(m.item_index, m.picked != 0);
            }
            Message::StaticModelState(m) => {
                let visible = m.flags & messages::STATIC_MODEL_FLAG_VISIBLE != 0;
                self.broken_models.insert(m.static_model_index, !visible);
            }
            Message::PlayerSpawn(m) => {
                self.own_entity_id = m.player_monster_id;
                self.spawn_received = true;
                self.own_position = InterpolatedPosition::new(
                    now,
                    messages::message_position_to_position(&m.xyz),
                    messages::message_angle_to_angle(m.direction),
                );
            }
            Message::PlayerPosition(m) => {
                self.own_speed = m.speed as f32 / 256.0;
                let (_, angle) = self.own_position.sample(now);
                self.own_position
                    .push(now, messages::message_position_to_position(&m.xyz), angle);
            }
            Message::PlayerState(m) => {
                self.own_state = OwnPlayerState {
                    health: m.health,
                    armor: m.armor,
                    ammo: m.ammo,
                    keys_mask: m.keys_mask,
                    weapons_mask: m.weapons_mask,
                    index: m.index,
                    is_invisible: m.flags & messages::PLAYER_FLAG_INVISIBLE != 0,
                    show_shield: m.flags & messages::PLAYER_FLAG_SHOW_SHIELD != 0,
                };
            }
            Message::ServerState(m) => {
                self.frags = m.frags;
                self.player_count = m.player_count;
                self.map_time_s = m.map_time_s;
            }
            Message::FullscreenBlendEffect(m) => {
                self.fullscreen_blend = Some((m.color_index, m.intensity, now));
            }
            Message::TextMessage(m) => {
                self.text_messages.push(m.text_message_number);
            }
            Message::DynamicTextMessage(m) => {
                self.dynamic_text_messages
                    .push(messages::name_buffer_to_string(&m.text));
            }
            // PlayerWeapon is routed to the weapon state machine by the
            // client; everything else is not for us.
            _ => {}
        }
    }
}

impl Default for MapState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::messages::{MonsterBirth, MonsterDeath, MonsterState};

    fn monster_state(id: EntityId, x: f32) -> MonsterState {
        MonsterState {
            monster_id: id,
            xyz: messages::position_to_message_position(Vec3::new(x, 0.0, 0.0)),
            angle: 0,
            monster_type: 0,
            body_parts_mask: 0xFF,
            animation: 0,
            animation_frame: 0,
            flags: 0,
        }
    }

    #[test]
    fn delta_before_birth_is_dropped() {
        let mut state = MapState::new();
        state.tick(Time::from_ms(100));

        state.process_message(Message::MonsterState(monster_state(5, 1.0)));
        assert!(state.monsters.is_empty());

        state.process_message(Message::MonsterBirth(MonsterBirth {
            monster_id: 5,
            initial_state: monster_state(5, 1.0),
        }));
        assert_eq!(state.monsters.len(), 1);
    }

    #[test]
    fn delta_after_death_is_dropped() {
        let mut state = MapState::new();
        state.tick(Time::from_ms(100));
        state.process_message(Message::MonsterBirth(MonsterBirth {
            monster_id: 5,
            initial_state: monster_state(5, 1.0),
        }));
        state.process_message(Message::MonsterDeath(MonsterDeath { monster_id: 5 }));
        state.process_message(Message::MonsterState(monster_state(5, 2.0)));
        assert!(state.monsters.is_empty());
    }

    #[test]
    fn interpolation_blends_between_the_last_two_snapshots() {
        let mut state = MapState::new();
        state.tick(Time::from_ms(100));
        state.process_message(Message::MonsterBirth(MonsterBirth {
            monster_id: 1,
            initial_state: monster_state(1, 0.0),
        }));

        state.tick(Time::from_ms(200));
        state.process_message(Message::MonsterState(monster_state(1, 4.0)));

        let entry = &state.monsters[&1];
        let (halfway, _) = entry.position.sample(Time::from_ms(150));
        assert!((halfway.x - 2.0).abs() < 1e-4);

        // Clamped at both ends.
        let (start, _) = entry.position.sample(Time::from_ms(50));
        assert!((start.x - 0.0).abs() < 1e-4);
        let (end, _) = entry.position.sample(Time::from_ms(300));
        assert!((end.x - 4.0).abs() < 1e-4);
    }

    #[test]
    fn render_time_lags_by_the_fixed_delay() {
        let mut state = MapState::new();
        state.tick(Time::from_ms(500));
        assert_eq!(state.render_time(), Time::from_ms(400));
    }

    #[test]
    fn one_shot_effects_age_out() {
        let mut state = MapState::new();
        state.tick(Time::from_ms(100));
        state.process_message(Message::SpriteEffectBirth(messages::SpriteEffectBirth {
            xyz: [0, 0, 0],
            effect_id: 1,
        }));
        assert_eq!(state.sprite_effects.len(), 1);

        state.tick(Time::from_ms(2200));
        assert!(state.sprite_effects.is_empty());
    }
}
