//! The authoritative simulation state for one level.
//!
//! Mutated only by [`World::tick`]; everything the clients see is derived
//! from this state through the per-tick message emission in the server.

pub mod monster;
pub mod movement;
pub mod player;

pub use monster::{AiState, Monster};
pub use player::{KeysMask, Player, WeaponState, WeaponsMask};

use std::collections::BTreeMap;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use chasm_core::game_constants::{
    Difficulty, GIBS_PER_DEATH, MAX_PLAYERS, PLAYER_MONSTER_TYPE, PLAYER_RADIUS, WEAPON_COUNT,
};
use chasm_core::map::{MapDataPtr, ProcedureAction, TriggerCondition};
use chasm_core::messages::{self, EntityId, Message, PlayerMove};
use chasm_core::random::LongRand;
use chasm_core::resources::GameResourcesPtr;
use chasm_core::time::Time;

use monster::{AiContext, AiEvent, AiPlayerView};
use movement::cast_ray;
use player::ShotRequest;

const ROCKET_BASE_SPEED: f32 = 10.0;
const ROCKET_FAST_SPEED: f32 = 20.0;
const EXPLOSION_LIGHT_LIFETIME: Time = Time::from_ms(400);
const MONSTER_BODY_RADIUS: f32 = 0.4;
const MELEE_DAMAGE: i32 = 25;
const MELEE_REACH: f32 = 2.0;
const POWERUP_DURATION: Time = Time::from_us(30_000_000);
const PICKUP_BLEND_COLOR_INDEX: u8 = 192;
const DAMAGE_BLEND_COLOR_INDEX: u8 = 176;

#[derive(Clone, Serialize, Deserialize)]
pub struct Rocket {
    pub rocket_type: u8,
    pub pos: Vec3,
    pub angle_z: f32,
    pub angle_x: f32,
    pub owner: Option<EntityId>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Item {
    pub static_model_index: u16,
    pub pos: Vec3,
    pub picked: bool,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DynamicItem {
    pub item_type_id: u8,
    pub pos: Vec3,
    pub vertical_speed: f32,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LightSource {
    pub pos: Vec2,
    pub radius: f32,
    pub brightness: u8,
    pub turn_on_time_ms: u16,
    pub kill_time: Time,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DynamicWallState {
    pub current: [Vec2; 2],
    pub z: f32,
    pub texture_id: u8,
    pub move_from: [Vec2; 2],
    pub move_to: [Vec2; 2],
    pub z_from: f32,
    pub z_to: f32,
    pub move_start: Time,
    pub move_duration: Time,
    pub moving: bool,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProcedureState {
    pub triggered: bool,
    pub pending_at: Option<Time>,
    /// Area condition held last tick; retriggerable procedures fire on the
    /// false-to-true edge only.
    pub was_active: bool,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StaticModelRuntime {
    pub health: i32,
    pub broken: bool,
    pub rotating_light_id: Option<EntityId>,
}

pub struct World {
    pub map_data: MapDataPtr,
    resources: GameResourcesPtr,
    difficulty: Difficulty,

    pub map_time: Time,
    rng: LongRand,
    next_entity_id: EntityId,

    pub players: [Option<Player>; MAX_PLAYERS],
    pub monsters: BTreeMap<EntityId, Monster>,
    pub rockets: BTreeMap<EntityId, Rocket>,
    pub items: Vec<Item>,
    pub dynamic_items: BTreeMap<EntityId, DynamicItem>,
    pub dynamic_walls: Vec<DynamicWallState>,
    pub light_sources: BTreeMap<EntityId, LightSource>,
    pub static_model_states: Vec<StaticModelRuntime>,
    procedure_states: Vec<ProcedureState>,

    // Per-tick outboxes, drained by the server after each tick.
    reliable_events: Vec<Message>,
    unreliable_events: Vec<Message>,
    removed_monsters: Vec<EntityId>,
    player_events: [Vec<Message>; MAX_PLAYERS],

    pub win_requested: bool,
}

impl World {
    pub fn new(
        map_data: MapDataPtr,
        resources: GameResourcesPtr,
        difficulty: Difficulty,
        rng_seed: u64,
    ) -> World {
        let mut world = World {
            resources,
            difficulty,
            map_time: Time::ZERO,
            rng: LongRand::new(rng_seed),
            next_entity_id: 1,
            players: Default::default(),
            monsters: BTreeMap::new(),
            rockets: BTreeMap::new(),
            items: Vec::new(),
            dynamic_items: BTreeMap::new(),
            dynamic_walls: Vec::new(),
            light_sources: BTreeMap::new(),
            static_model_states: Vec::new(),
            procedure_states: map_data
                .procedures
                .iter()
                .map(|_| ProcedureState {
                    triggered: false,
                    pending_at: None,
                    was_active: false,
                })
                .collect(),
            reliable_events: Vec::new(),
            unreliable_events: Vec::new(),
            removed_monsters: Vec::new(),
            player_events: Default::default(),
            win_requested: false,
            map_data,
        };

        for wall in &world.map_data.dynamic_walls {
            world.dynamic_walls.push(DynamicWallState {
                current: wall.vert_pos,
                z: 0.0,
                texture_id: wall.texture_id,
                move_from: wall.vert_pos,
                move_to: wall.vert_pos,
                z_from: 0.0,
                z_to: 0.0,
                move_start: Time::ZERO,
                move_duration: Time::ZERO,
                moving: false,
            });
        }

        let map_data = world.map_data.clone();
        for (model_index, model) in map_data.static_models.iter().enumerate() {
            let description = map_data
                .models_description
                .get(model.model_id as usize)
                .copied()
                .unwrap_or_default();

            let rotating_light_id = if description.rotating_light {
                Some(world.allocate_entity_id())
            } else {
                None
            };
            world.static_model_states.push(StaticModelRuntime {
                health: description.break_limit.max(1) as i32,
                broken: false,
                rotating_light_id,
            });

            // Pickable placements double as world items.
            let pickable = world
                .resources
                .items_description
                .get(model.model_id as usize)
                .map(|d| d.a_code != 0)
                .unwrap_or(false);
            if pickable {
                world.items.push(Item {
                    static_model_index: model_index as u16,
                    pos: model.pos,
                    picked: false,
                });
            }
        }

        let placements: Vec<_> = world.map_data.monster_placements.clone();
        for placement in placements {
            world.spawn_monster(
                placement.monster_type,
                Vec3::new(placement.pos.x, placement.pos.y, 0.0),
                messages::message_angle_to_angle(placement.angle),
            );
        }

        world
    }

    fn allocate_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id = self.next_entity_id.wrapping_add(1).max(1);
        id
    }

    pub fn resources(&self) -> &GameResourcesPtr {
        &self.resources
    }

    pub fn spawn_monster(&mut self, monster_type: u8, pos: Vec3, angle: f32) -> Option<EntityId> {
        let description = self
            .resources
            .monsters_description
            .get(monster_type as usize)?;
        let life = (description.life as f32 * self.difficulty.life_scale()) as i32;

        let id = self.allocate_entity_id();
        self.monsters
            .insert(id, Monster::new(monster_type, pos, angle, life.max(1)));
        Some(id)
    }

    /// Put a new player into a free slot. Returns (slot, entity id).
    pub fn spawn_player(&mut self) -> Option<(u8, EntityId)> {
        let slot = self.players.iter().position(|p| p.is_none())?;

        let spawn = self
            .map_data
            .player_spawns
            .get(slot % self.map_data.player_spawns.len().max(1))
            .copied()
            .unwrap_or(chasm_core::map::PlayerSpawn {
                pos: Vec2::new(chasm_core::map::MAP_SIZE as f32 / 2.0, chasm_core::map::MAP_SIZE as f32 / 2.0),
                direction: 0,
            });

        let id = self.allocate_entity_id();
        let player = Player::new(
            id,
            spawn.pos,
            messages::message_angle_to_angle(spawn.direction),
            &self.resources,
        );
        self.players[slot] = Some(player);
        Some((slot as u8, id))
    }

    pub fn drop_player(&mut self, slot: u8) {
        if let Some(player) = self.players[slot as usize].take() {
            self.removed_monsters.push(player.entity_id);
        }
    }

    pub fn player_move(&mut self, slot: u8, message: &PlayerMove) {
        if let Some(player) = self.players[slot as usize].as_mut() {
            player.update_movement(message);
        }
    }

    pub fn player_spawn_message(&self, slot: u8) -> Option<messages::PlayerSpawn> {
        let player = self.players[slot as usize].as_ref()?;
        Some(messages::PlayerSpawn {
            xyz: messages::position_to_message_position(player.pos),
            direction: messages::angle_to_message_angle(player.angle),
            player_monster_id: player.entity_id,
        })
    }

    fn dynamic_wall_positions(&self) -> Vec<[Vec2; 2]> {
        self.dynamic_walls
            .iter()
            // A wall raised out of the floor no longer blocks movement.
            .filter(|w| w.z < 1.0)
            .map(|w| w.current)
            .collect()
    }

    /// One simulation step. `time_delta` is already clamped by the server.
    pub fn tick(&mut self, time_delta: Time) {
        self.map_time += time_delta;
        let map_time = self.map_time;

        self.update_procedures(map_time);
        self.update_dynamic_walls(map_time);

        let wall_positions = self.dynamic_wall_positions();

        // Players: kinematics, then weapons.
        let mut shots: Vec<(u8, ShotRequest)> = Vec::new();
        for slot in 0..MAX_PLAYERS {
            let resources = self.resources.clone();
            if let Some(player) = self.players[slot].as_mut() {
                player.do_move(time_delta, &self.map_data, &wall_positions);
                if let Some(shot) = player.update_weapon(map_time, time_delta, &resources) {
                    shots.push((slot as u8, shot));
                }
                if player.damage_this_tick > 0 {
                    player.damage_this_tick = 0;
                    self.player_events[slot].push(Message::FullscreenBlendEffect(
                        messages::FullscreenBlendEffect {
                            color_index: DAMAGE_BLEND_COLOR_INDEX,
                            intensity: 128,
                        },
                    ));
                }
            }
        }
        for (slot, shot) in shots {
            self.fire_shot(slot, shot);
        }

        self.update_monsters(map_time, time_delta, &wall_positions);
        self.update_rockets(map_time, time_delta);
        self.update_dynamic_items(time_delta);
        self.update_items(map_time);
        self.update_light_sources(map_time);
        self.expire_powerups(map_time);
    }

    fn update_procedures(&mut self, map_time: Time) {
        let map_data = self.map_data.clone();
        for (index, procedure) in map_data.procedures.iter().enumerate() {
            let state = self.procedure_states[index].clone();

            if let Some(at) = state.pending_at {
                if map_time >= at {
                    self.procedure_states[index].pending_at = None;
                    self.run_procedure_actions(index, None, map_time);
                }
                continue;
            }

            let TriggerCondition::Area { min, max } = procedure.condition else {
                continue;
            };

            let triggering_player = (0..MAX_PLAYERS as u8).find(|&slot| {
                self.players[slot as usize]
                    .as_ref()
                    .map(|p| {
                        p.is_alive()
                            && p.pos.x >= min.x
                            && p.pos.x <= max.x
                            && p.pos.y >= min.y
                            && p.pos.y <= max.y
                            && KeysMask::from_bits_truncate(procedure.required_keys)
                                .difference(p.keys_mask)
                                .is_empty()
                    })
                    .unwrap_or(false)
            });

            let was_active = state.was_active;
            self.procedure_states[index].was_active = triggering_player.is_some();

            if state.triggered && !procedure.retriggerable {
                continue;
            }
            if was_active {
                continue; // fire on entry, not while standing inside
            }

            if let Some(slot) = triggering_player {
                self.procedure_states[index].triggered = true;
                if procedure.delay_s > 0.0 {
                    self.procedure_states[index].pending_at =
                        Some(map_time + Time::from_seconds(procedure.delay_s as f64));
                } else {
                    self.run_procedure_actions(index, Some(slot), map_time);
                }
            }
        }
    }

    fn run_procedure_actions(&mut self, index: usize, player_slot: Option<u8>, map_time: Time) {
        let map_data = self.map_data.clone();
        let procedure = &map_data.procedures[index];
        let duration = Time::from_seconds(procedure.duration_s as f64);

        for action in &procedure.actions {
            match action {
                ProcedureAction::MoveWall { wall_index, delta } => {
                    if let Some(wall) = self.dynamic_walls.get_mut(*wall_index as usize) {
                        wall.move_from = wall.current;
                        wall.move_to = [
                            wall.current[0] + Vec2::new(delta.x, delta.y),
                            wall.current[1] + Vec2::new(delta.x, delta.y),
                        ];
                        wall.z_from = wall.z;
                        wall.z_to = wall.z + delta.z;
                        wall.move_start = map_time;
                        wall.move_duration = duration;
                        wall.moving = true;
                    }
                }
                ProcedureAction::RotateWall {
                    wall_index,
                    center,
                    angle,
                } => {
                    if let Some(wall) = self.dynamic_walls.get_mut(*wall_index as usize) {
                        let rotate = |p: Vec2| {
                            let rel = p - *center;
                            *center
                                + Vec2::new(
                                    rel.x * angle.cos() - rel.y * angle.sin(),
                                    rel.x * angle.sin() + rel.y * angle.cos(),
                                )
                        };
                        wall.move_from = wall.current;
                        wall.move_to = [rotate(wall.current[0]), rotate(wall.current[1])];
                        wall.z_from = wall.z;
                        wall.z_to = wall.z;
                        wall.move_start = map_time;
                        wall.move_duration = duration;
                        wall.moving = true;
                    }
                }
                ProcedureAction::ChangeWallTexture {
                    wall_index,
                    texture_id,
                } => {
                    if let Some(wall) = self.dynamic_walls.get_mut(*wall_index as usize) {
                        wall.texture_id = *texture_id;
                        let message = wall_position_message(*wall_index, wall);
                        self.unreliable_events.push(Message::WallPosition(message));
                    }
                }
                ProcedureAction::ChangeFloorTexture { .. } => {
                    // Floor overrides only matter server-side (pits); the grid
                    // itself is immutable while a map is loaded.
                }
                ProcedureAction::SpawnMonster {
                    monster_type,
                    pos,
                    angle,
                } => {
                    self.spawn_monster(
                        *monster_type,
                        *pos,
                        messages::message_angle_to_angle(*angle),
                    );
                }
                ProcedureAction::PlaySound { sound_id, pos } => {
                    self.unreliable_events
                        .push(Message::MapEventSound(messages::MapEventSound {
                            xyz: messages::position_to_message_position(Vec3::new(
                                pos.x, pos.y, 0.0,
                            )),
                            sound_id: *sound_id,
                        }));
                }
                ProcedureAction::GiveKey { key_bit } => {
                    if let Some(slot) = player_slot {
                        if let Some(player) = self.players[slot as usize].as_mut() {
                            player.keys_mask |= KeysMask::from_bits_truncate(1 << key_bit);
                        }
                    }
                }
                ProcedureAction::Message { index } => {
                    self.reliable_events
                        .push(Message::TextMessage(messages::TextMessage {
                            text_message_number: *index,
                        }));
                }
                ProcedureAction::WinLevel => {
                    self.win_requested = true;
                }
            }
        }
    }

    fn update_dynamic_walls(&mut self, map_time: Time) {
        for wall in &mut self.dynamic_walls {
            if !wall.moving {
                continue;
            }
            let k = if wall.move_duration == Time::ZERO {
                1.0
            } else {
                ((map_time - wall.move_start).to_seconds() / wall.move_duration.to_seconds())
                    .clamp(0.0, 1.0)
            };

            // The final pose stays flagged as moving for one more tick so its
            // delta still goes out before the wall falls silent.
            if k >= 1.0 {
                if wall.current == wall.move_to && wall.z == wall.z_to {
                    wall.moving = false;
                } else {
                    wall.current = wall.move_to;
                    wall.z = wall.z_to;
                }
                continue;
            }

            wall.current = [
                wall.move_from[0].lerp(wall.move_to[0], k),
                wall.move_from[1].lerp(wall.move_to[1], k),
            ];
            wall.z = wall.z_from + (wall.z_to - wall.z_from) * k;
        }
    }

    fn fire_shot(&mut self, slot: u8, shot: ShotRequest) {
        let owner = self.players[slot as usize].as_ref().map(|p| p.entity_id);

        if shot.melee {
            let angle_z = messages::message_angle_to_angle(shot.view_dir_angle_z);
            let angle_x = messages::message_angle_to_angle(shot.view_dir_angle_x);
            let cos_x = angle_x.cos();
            let dir = Vec3::new(-angle_z.sin() * cos_x, angle_z.cos() * cos_x, angle_x.sin());
            self.shoot_hitscan(owner, shot.position, dir, MELEE_DAMAGE, MELEE_REACH);
            return;
        }

        for i in 0..shot.rocket_count {
            // Fan additional projectiles slightly.
            let spread = if i == 0 {
                0.0
            } else {
                self.rng.rand_value_in_range(-0.05, 0.05)
            };
            self.spawn_rocket(
                shot.rocket_type as u8,
                shot.position,
                messages::message_angle_to_angle(shot.view_dir_angle_z) + spread,
                messages::message_angle_to_angle(shot.view_dir_angle_x),
                owner,
            );
        }
    }

    pub fn spawn_rocket(
        &mut self,
        rocket_type: u8,
        pos: Vec3,
        angle_z: f32,
        angle_x: f32,
        owner: Option<EntityId>,
    ) -> EntityId {
        let id = self.allocate_entity_id();
        self.rockets.insert(
            id,
            Rocket {
                rocket_type,
                pos,
                angle_z,
                angle_x,
                owner,
            },
        );
        self.unreliable_events
            .push(Message::RocketBirth(messages::RocketBirth {
                rocket_id: id,
                xyz: messages::position_to_message_position(pos),
                angle: [
                    messages::angle_to_message_angle(angle_z),
                    messages::angle_to_message_angle(angle_x),
                ],
                rocket_type,
            }));
        id
    }

    fn update_monsters(&mut self, map_time: Time, time_delta: Time, wall_positions: &[[Vec2; 2]]) {
        let players: Vec<AiPlayerView> = self
            .players
            .iter()
            .enumerate()
            .filter_map(|(slot, p)| {
                p.as_ref().map(|p| AiPlayerView {
                    slot: slot as u8,
                    pos: p.pos,
                    alive: p.is_alive(),
                })
            })
            .collect();

        let mut events = Vec::new();
        let map_data = self.map_data.clone();
        let resources = self.resources.clone();
        for (&id, monster) in self.monsters.iter_mut() {
            let Some(description) = resources
                .monsters_description
                .get(monster.monster_type as usize)
            else {
                continue;
            };
            let mut ctx = AiContext {
                map_data: &map_data,
                dynamic_wall_positions: wall_positions,
                players: &players,
                map_time,
                time_delta,
                rng: &mut self.rng,
            };
            monster.tick(id, description, &mut ctx, &mut events);
        }

        for event in events {
            match event {
                AiEvent::ShootRocket {
                    rocket_type,
                    position,
                    target,
                } => {
                    let to_target = target - position;
                    let angle_z = (-to_target.x).atan2(to_target.y);
                    let horizontal = Vec2::new(to_target.x, to_target.y).length();
                    let angle_x = to_target.z.atan2(horizontal);
                    self.spawn_rocket(rocket_type as u8, position, angle_z, angle_x, None);
                }
                AiEvent::Melee { player_slot, damage } => {
                    if let Some(player) = self.players[player_slot as usize].as_mut() {
                        player.take_damage(damage);
                    }
                }
                AiEvent::StartedDying { monster_id, overkill } => {
                    let sep_limit = self
                        .monsters
                        .get(&monster_id)
                        .and_then(|m| {
                            resources
                                .monsters_description
                                .get(m.monster_type as usize)
                        })
                        .map(|d| d.sep_limit as i32)
                        .unwrap_or(i32::MAX);
                    if overkill >= sep_limit {
                        self.gib_monster(monster_id);
                    }
                }
                AiEvent::Sound { monster_id, sound_id } => {
                    self.unreliable_events
                        .push(Message::MonsterSound(messages::MonsterSound {
                            monster_id,
                            monster_sound_id: sound_id,
                        }));
                }
            }
        }
    }

    /// Violent death: the corpse bursts into parts and the entity is retired.
    fn gib_monster(&mut self, monster_id: EntityId) {
        let Some(monster) = self.monsters.remove(&monster_id) else {
            return;
        };

        for part_id in 0..GIBS_PER_DEATH as u8 {
            let offset = self.rng.rand_point_in_sphere(0.5);
            let angle = self.rng.rand_angle();
            self.unreliable_events
                .push(Message::MonsterPartBirth(messages::MonsterPartBirth {
                    xyz: messages::position_to_message_position(
                        monster.pos + offset + Vec3::new(0.0, 0.0, 0.5),
                    ),
                    angle: messages::angle_to_message_angle(angle),
                    monster_type: monster.monster_type,
                    part_id,
                }));
        }

        self.removed_monsters.push(monster_id);
    }

    fn rocket_velocity(&self, rocket: &Rocket) -> Vec3 {
        let description = self
            .resources
            .rockets_description
            .get(rocket.rocket_type as usize);
        let speed = if description.map(|d| d.fast).unwrap_or(false) {
            ROCKET_FAST_SPEED
        } else {
            ROCKET_BASE_SPEED
        };
        let cos_x = rocket.angle_x.cos();
        Vec3::new(
            -rocket.angle_z.sin() * cos_x,
            rocket.angle_z.cos() * cos_x,
            rocket.angle_x.sin(),
        ) * speed
    }

    fn update_rockets(&mut self, map_time: Time, time_delta: Time) {
        let dt = time_delta.to_seconds();
        let mut exploded: Vec<(EntityId, Vec3)> = Vec::new();

        let rocket_ids: Vec<EntityId> = self.rockets.keys().copied().collect();
        for id in rocket_ids {
            let (velocity, old_pos, owner, rocket_type) = {
                let rocket = &self.rockets[&id];
                (
                    self.rocket_velocity(rocket),
                    rocket.pos,
                    rocket.owner,
                    rocket.rocket_type,
                )
            };
            let mut new_pos = old_pos + velocity * dt;

            let gravity_force = self
                .resources
                .rockets_description
                .get(rocket_type as usize)
                .map(|d| d.gravity_force)
                .unwrap_or(0.0);
            if gravity_force > 0.0 {
                new_pos.z -= gravity_force * dt * dt * 0.5;
            }

            // Wall hit along this tick's segment.
            let from = Vec2::new(old_pos.x, old_pos.y);
            let to = Vec2::new(new_pos.x, new_pos.y);
            let wall_hit = cast_ray(&self.map_data, from, to);

            // Body hit: the nearest entity whose circle crosses the segment.
            let body_hit = self.find_body_hit(owner, from, to);

            let hit_t = match (wall_hit, &body_hit) {
                (Some((wt, _)), Some((bt, _))) => Some(wt.min(*bt)),
                (Some((wt, _)), None) => Some(wt),
                (None, Some((bt, _))) => Some(*bt),
                (None, None) => None,
            };

            if let Some(t) = hit_t {
                let impact = old_pos + (new_pos - old_pos) * t;
                if let Some((bt, target)) = body_hit {
                    if wall_hit.map(|(wt, _)| bt <= wt).unwrap_or(true) {
                        // Direct damage on the struck body, explosion follows.
                        let power = self
                            .resources
                            .rockets_description
                            .get(rocket_type as usize)
                            .map(|d| d.power as i32)
                            .unwrap_or(0);
                        self.damage_entity(target, power);
                    }
                }
                exploded.push((id, impact));
            } else if new_pos.z <= 0.0 && gravity_force > 0.0 {
                exploded.push((id, new_pos));
            } else {
                self.rockets.get_mut(&id).unwrap().pos = new_pos;
            }
        }

        for (id, impact) in exploded {
            let rocket = self.rockets.remove(&id).unwrap();
            self.explode(id, &rocket, impact, map_time);
        }
    }

    /// Hit target reference: a player slot or a monster id.
    fn find_body_hit(
        &self,
        owner: Option<EntityId>,
        from: Vec2,
        to: Vec2,
    ) -> Option<(f32, BodyRef)> {
        let mut best: Option<(f32, BodyRef)> = None;
        let dir = to - from;
        let len_sq = dir.length_squared();
        if len_sq == 0.0 {
            return None;
        }

        let mut consider = |t: f32, body: BodyRef| {
            if best.map(|(bt, _)| t < bt).unwrap_or(true) {
                best = Some((t, body));
            }
        };

        for (slot, player) in self.players.iter().enumerate() {
            let Some(player) = player else { continue };
            if !player.is_alive() || Some(player.entity_id) == owner {
                continue;
            }
            let center = Vec2::new(player.pos.x, player.pos.y);
            if let Some(t) = circle_segment_hit(from, dir, len_sq, center, PLAYER_RADIUS) {
                consider(t, BodyRef::Player(slot as u8));
            }
        }
        for (&id, monster) in &self.monsters {
            if Some(id) == owner || !monster.is_alive() {
                continue;
            }
            let center = Vec2::new(monster.pos.x, monster.pos.y);
            if let Some(t) = circle_segment_hit(from, dir, len_sq, center, MONSTER_BODY_RADIUS) {
                consider(t, BodyRef::Monster(id));
            }
        }
        best
    }

    fn damage_entity(&mut self, body: BodyRef, damage: i32) {
        match body {
            BodyRef::Player(slot) => {
                if let Some(player) = self.players[slot as usize].as_mut() {
                    player.take_damage(damage);
                }
            }
            BodyRef::Monster(id) => {
                if let Some(monster) = self.monsters.get_mut(&id) {
                    monster.take_damage(damage);
                }
            }
        }
    }

    fn explode(&mut self, rocket_id: EntityId, rocket: &Rocket, impact: Vec3, map_time: Time) {
        let description = self
            .resources
            .rockets_description
            .get(rocket.rocket_type as usize);
        let explosion_radius = description.map(|d| d.explosion_radius).unwrap_or(0.0);
        let power = description.map(|d| d.power as i32).unwrap_or(0);
        let blow_effect = description.map(|d| d.blow_effect as u8).unwrap_or(0);

        self.unreliable_events
            .push(Message::RocketDeath(messages::RocketDeath { rocket_id }));

        if explosion_radius > 0.0 {
            self.apply_radius_damage(impact, explosion_radius, power);

            let light_id = self.allocate_entity_id();
            self.light_sources.insert(
                light_id,
                LightSource {
                    pos: Vec2::new(impact.x, impact.y),
                    radius: explosion_radius * 2.0,
                    brightness: 255,
                    turn_on_time_ms: 50,
                    kill_time: map_time + EXPLOSION_LIGHT_LIFETIME,
                },
            );
            self.unreliable_events
                .push(Message::LightSourceBirth(messages::LightSourceBirth {
                    light_source_id: light_id,
                    xy: messages::position_to_message_position_xy(Vec2::new(impact.x, impact.y)),
                    radius: messages::coord_to_message_coord(explosion_radius * 2.0),
                    brightness: 255,
                    turn_on_time_ms: 50,
                }));
        }

        self.unreliable_events
            .push(Message::SpriteEffectBirth(messages::SpriteEffectBirth {
                xyz: messages::position_to_message_position(impact),
                effect_id: blow_effect,
            }));
    }

    /// Linear falloff from full power at the centre to zero at the boundary.
    fn apply_radius_damage(&mut self, center: Vec3, radius: f32, power: i32) {
        let mut victims: Vec<(BodyRef, i32)> = Vec::new();

        for (slot, player) in self.players.iter().enumerate() {
            let Some(player) = player else { continue };
            if !player.is_alive() {
                continue;
            }
            let distance = (player.pos - center).length();
            if distance < radius {
                let damage = ((1.0 - distance / radius) * power as f32) as i32;
                victims.push((BodyRef::Player(slot as u8), damage));
            }
        }
        for (&id, monster) in &self.monsters {
            if !monster.is_alive() {
                continue;
            }
            let distance = (monster.pos - center).length();
            if distance < radius {
                let damage = ((1.0 - distance / radius) * power as f32) as i32;
                victims.push((BodyRef::Monster(id), damage));
            }
        }

        for (body, damage) in victims {
            self.damage_entity(body, damage);
        }

        self.damage_breakable_models(center, radius);
    }

    fn damage_breakable_models(&mut self, center: Vec3, radius: f32) {
        let map_data = self.map_data.clone();
        for &model_index in map_data.collision_index.dynamic_models_indices() {
            let model = &map_data.static_models[model_index as usize];
            let description = map_data
                .models_description
                .get(model.model_id as usize)
                .copied()
                .unwrap_or_default();
            if description.blow_effect == 0 {
                continue;
            }
            let state = &mut self.static_model_states[model_index as usize];
            if state.broken {
                continue;
            }
            if (model.pos - center).length() < radius {
                self.break_model(model_index);
            }
        }
    }

    pub fn break_model(&mut self, model_index: u16) {
        let state = &mut self.static_model_states[model_index as usize];
        if state.broken {
            return;
        }
        state.broken = true;
        let rotating_light_id = state.rotating_light_id.take();

        let model = self.map_data.static_models[model_index as usize];
        let blow_effect = self
            .map_data
            .models_description
            .get(model.model_id as usize)
            .map(|d| d.blow_effect as u8)
            .unwrap_or(0);

        self.unreliable_events.push(Message::StaticModelState(
            messages::StaticModelState {
                static_model_index: model_index,
                xyz: messages::position_to_message_position(model.pos),
                angle: messages::angle_to_message_angle(model.angle),
                animation_frame: 0,
                flags: 0, // not visible, not animating
                model_id: model.model_id,
            },
        ));
        self.unreliable_events
            .push(Message::SpriteEffectBirth(messages::SpriteEffectBirth {
                xyz: messages::position_to_message_position(model.pos),
                effect_id: blow_effect,
            }));
        if let Some(light_id) = rotating_light_id {
            self.unreliable_events.push(Message::RotatingLightSourceDeath(
                messages::RotatingLightSourceDeath {
                    light_source_id: light_id,
                },
            ));
        }

        // Break triggers.
        let map_data = self.map_data.clone();
        for (index, procedure) in map_data.procedures.iter().enumerate() {
            if self.procedure_states[index].triggered && !procedure.retriggerable {
                continue;
            }
            if procedure.condition == (TriggerCondition::ModelBreak { model_index }) {
                self.procedure_states[index].triggered = true;
                self.run_procedure_actions(index, None, self.map_time);
            }
        }
    }

    fn update_dynamic_items(&mut self, time_delta: Time) {
        let dt = time_delta.to_seconds();
        let mut picked: Vec<(EntityId, u8)> = Vec::new();

        for (&id, item) in self.dynamic_items.iter_mut() {
            if item.pos.z > 0.0 {
                item.vertical_speed -= chasm_core::game_constants::GRAVITY * dt;
                item.pos.z = (item.pos.z + item.vertical_speed * dt).max(0.0);
                self.unreliable_events
                    .push(Message::DynamicItemUpdate(messages::DynamicItemUpdate {
                        item_id: id,
                        xyz: messages::position_to_message_position(item.pos),
                    }));
            }

            for (slot, player) in self.players.iter().enumerate() {
                let Some(player) = player else { continue };
                if !player.is_alive() {
                    continue;
                }
                let distance = (player.pos - item.pos).length();
                if distance < PLAYER_RADIUS + 0.25 {
                    picked.push((id, slot as u8));
                    break;
                }
            }
        }

        for (id, slot) in picked {
            let Some(item) = self.dynamic_items.remove(&id) else {
                continue;
            };
            self.apply_pickup(slot, item.item_type_id);
            self.unreliable_events
                .push(Message::DynamicItemDeath(messages::DynamicItemDeath {
                    item_id: id,
                }));
        }
    }

    fn update_items(&mut self, _map_time: Time) {
        let resources = self.resources.clone();
        let mut pickups: Vec<(usize, u8, u8)> = Vec::new();

        for (item_index, item) in self.items.iter().enumerate() {
            if item.picked {
                continue;
            }
            let model = &self.map_data.static_models[item.static_model_index as usize];
            let Some(description) = resources.items_description.get(model.model_id as usize)
            else {
                continue;
            };

            for (slot, player) in self.players.iter().enumerate() {
                let Some(player) = player else { continue };
                if !player.is_alive() {
                    continue;
                }
                let distance = (player.pos - item.pos).length();
                if distance < PLAYER_RADIUS + description.radius {
                    pickups.push((item_index, slot as u8, description.a_code as u8));
                    break;
                }
            }
        }

        for (item_index, slot, a_code) in pickups {
            if !self.pickup_is_useful(slot, a_code) {
                continue;
            }
            self.items[item_index].picked = true;
            let static_model_index = self.items[item_index].static_model_index;
            let z = self.items[item_index].pos.z;

            self.apply_pickup(slot, a_code);
            self.unreliable_events
                .push(Message::ItemState(messages::ItemState {
                    item_index: static_model_index,
                    z: messages::coord_to_message_coord(z),
                    picked: 1,
                }));
            self.player_events[slot as usize].push(Message::PlayerItemPickup(
                messages::PlayerItemPickup { item_id: a_code },
            ));
            self.player_events[slot as usize].push(Message::FullscreenBlendEffect(
                messages::FullscreenBlendEffect {
                    color_index: PICKUP_BLEND_COLOR_INDEX,
                    intensity: 96,
                },
            ));
        }
    }

    /// Health and armor pickups are skipped at full value; everything else is
    /// always taken.
    fn pickup_is_useful(&self, slot: u8, a_code: u8) -> bool {
        let Some(player) = self.players[slot as usize].as_ref() else {
            return false;
        };
        match a_code {
            10 => player.health < chasm_core::game_constants::PLAYER_MAX_HEALTH,
            11 => player.armor < chasm_core::game_constants::PLAYER_MAX_ARMOR,
            _ => true,
        }
    }

    /// Item effect table, by activation code: 1..8 weapons, 10 health,
    /// 11 armor, 12..14 timed powerups, 20..22 keys, 30..37 ammo.
    fn apply_pickup(&mut self, slot: u8, a_code: u8) {
        let resources = self.resources.clone();
        let powerup_end = self.map_time + POWERUP_DURATION;
        let Some(player) = self.players[slot as usize].as_mut() else {
            return;
        };

        match a_code {
            w @ 1..=7 => {
                let weapon_index = w as usize;
                if let Some(description) = resources.weapons_description.get(weapon_index) {
                    player.weapons_mask.give(w);
                    player.give_ammo(weapon_index, description.start, &resources);
                }
            }
            10 => player.give_health(25),
            11 => player.give_armor(100),
            12 => player.invisibility_end = Some(powerup_end),
            13 => player.shield_end = Some(powerup_end),
            14 => player.chojin_end = Some(powerup_end),
            20 => player.keys_mask |= KeysMask::RED,
            21 => player.keys_mask |= KeysMask::GREEN,
            22 => player.keys_mask |= KeysMask::BLUE,
            a @ 30..=37 => {
                let weapon_index = (a - 30) as usize;
                if weapon_index < WEAPON_COUNT {
                    if let Some(description) = resources.weapons_description.get(weapon_index) {
                        player.give_ammo(weapon_index, description.d_am.max(1), &resources);
                    }
                }
            }
            _ => {}
        }
    }

    fn expire_powerups(&mut self, map_time: Time) {
        for player in self.players.iter_mut().flatten() {
            for end in [
                &mut player.invisibility_end,
                &mut player.shield_end,
                &mut player.chojin_end,
            ] {
                if end.map(|t| map_time >= t).unwrap_or(false) {
                    *end = None;
                }
            }
        }
    }

    pub fn spawn_dynamic_item(&mut self, item_type_id: u8, pos: Vec3) -> EntityId {
        let id = self.allocate_entity_id();
        self.dynamic_items.insert(
            id,
            DynamicItem {
                item_type_id,
                pos,
                vertical_speed: 0.0,
            },
        );
        self.unreliable_events
            .push(Message::DynamicItemBirth(messages::DynamicItemBirth {
                item_id: id,
                xyz: messages::position_to_message_position(pos),
                item_type_id,
            }));
        id
    }

    fn update_light_sources(&mut self, map_time: Time) {
        let dead: Vec<EntityId> = self
            .light_sources
            .iter()
            .filter(|(_, l)| map_time >= l.kill_time)
            .map(|(&id, _)| id)
            .collect();
        for id in dead {
            self.light_sources.remove(&id);
            self.unreliable_events
                .push(Message::LightSourceDeath(messages::LightSourceDeath {
                    light_source_id: id,
                }));
        }
    }

    /// Instant-hit damage along a ray from a shooter.
    pub fn shoot_hitscan(
        &mut self,
        owner: Option<EntityId>,
        from: Vec3,
        dir: Vec3,
        damage: i32,
        reach: f32,
    ) {
        let from_xy = Vec2::new(from.x, from.y);
        let to_xy = from_xy + Vec2::new(dir.x, dir.y).normalize_or_zero() * reach;

        let wall_t = cast_ray(&self.map_data, from_xy, to_xy).map(|(t, _)| t);
        let body = self.find_body_hit(owner, from_xy, to_xy);

        if let Some((bt, target)) = body {
            if wall_t.map(|wt| bt <= wt).unwrap_or(true) {
                self.damage_entity(target, damage);
            }
        }
    }

    /// Broadcast a line of text to every client, reliably.
    pub fn announce(&mut self, text: &str) {
        self.reliable_events
            .push(Message::DynamicTextMessage(messages::DynamicTextMessage {
                text: messages::fill_name_buffer(text),
            }));
    }

    /// Drain this tick's broadcast events:
    /// (reliable, unreliable, retired monster entities).
    pub fn drain_events(&mut self) -> (Vec<Message>, Vec<Message>, Vec<EntityId>) {
        (
            std::mem::take(&mut self.reliable_events),
            std::mem::take(&mut self.unreliable_events),
            std::mem::take(&mut self.removed_monsters),
        )
    }

    pub fn drain_player_events(&mut self, slot: u8) -> Vec<Message> {
        std::mem::take(&mut self.player_events[slot as usize])
    }

    pub fn monster_state_message(&self, id: EntityId, monster: &Monster) -> messages::MonsterState {
        let fully_dead = matches!(monster.state, AiState::Dead);
        messages::MonsterState {
            monster_id: id,
            xyz: messages::position_to_message_position(monster.pos),
            angle: messages::angle_to_message_angle(monster.angle),
            monster_type: monster.monster_type,
            body_parts_mask: monster.body_parts_mask,
            animation: monster.animation,
            animation_frame: monster.animation_frame as u16,
            flags: if fully_dead {
                messages::MONSTER_FLAG_FULLY_DEAD
            } else {
                0
            },
        }
    }

    /// A player replicated to the other clients, in monster clothing.
    pub fn player_as_monster_state(&self, player: &Player) -> messages::MonsterState {
        let mut flags = 0u8;
        if !player.is_alive() {
            flags |= messages::MONSTER_FLAG_FULLY_DEAD;
        }
        if player.invisibility_end.is_some() {
            flags |= messages::MONSTER_FLAG_INVISIBLE;
        }
        messages::MonsterState {
            monster_id: player.entity_id,
            xyz: messages::position_to_message_position(player.pos),
            angle: messages::angle_to_message_angle(player.angle),
            monster_type: PLAYER_MONSTER_TYPE,
            body_parts_mask: 0xFF,
            animation: 0,
            animation_frame: 0,
            flags: messages::pack_color(flags, player.color),
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum BodyRef {
    Player(u8),
    Monster(EntityId),
}

/// Snapshot of everything [`World::tick`] mutates, for save files. The map
/// itself is reloaded from its number on restore.
#[derive(Serialize, Deserialize)]
pub struct SavedWorld {
    pub map_number: u32,
    pub map_time: Time,
    pub rng: LongRand,
    pub next_entity_id: EntityId,
    pub players: Vec<Option<Player>>,
    pub monsters: Vec<(EntityId, Monster)>,
    pub rockets: Vec<(EntityId, Rocket)>,
    pub items_picked: Vec<bool>,
    pub dynamic_items: Vec<(EntityId, DynamicItem)>,
    pub dynamic_walls: Vec<DynamicWallState>,
    pub light_sources: Vec<(EntityId, LightSource)>,
    pub static_model_states: Vec<StaticModelRuntime>,
    pub procedure_states: Vec<ProcedureState>,
    pub win_requested: bool,
}

impl World {
    pub fn to_saved(&self) -> SavedWorld {
        SavedWorld {
            map_number: self.map_data.number,
            map_time: self.map_time,
            rng: self.rng.clone(),
            next_entity_id: self.next_entity_id,
            players: self.players.to_vec(),
            monsters: self.monsters.iter().map(|(&k, v)| (k, v.clone())).collect(),
            rockets: self.rockets.iter().map(|(&k, v)| (k, v.clone())).collect(),
            items_picked: self.items.iter().map(|i| i.picked).collect(),
            dynamic_items: self
                .dynamic_items
                .iter()
                .map(|(&k, v)| (k, v.clone()))
                .collect(),
            dynamic_walls: self.dynamic_walls.clone(),
            light_sources: self
                .light_sources
                .iter()
                .map(|(&k, v)| (k, v.clone()))
                .collect(),
            static_model_states: self.static_model_states.clone(),
            procedure_states: self.procedure_states.clone(),
            win_requested: self.win_requested,
        }
    }

    /// Rebuild a world over freshly loaded map data. The saved state replaces
    /// everything the tick mutates; replays from here are bit-identical.
    pub fn from_saved(
        map_data: MapDataPtr,
        resources: GameResourcesPtr,
        difficulty: Difficulty,
        saved: SavedWorld,
    ) -> World {
        let mut world = World::new(map_data, resources, difficulty, 0);

        world.map_time = saved.map_time;
        world.rng = saved.rng;
        world.next_entity_id = saved.next_entity_id;
        for (slot, player) in saved.players.into_iter().enumerate().take(MAX_PLAYERS) {
            world.players[slot] = player;
        }
        world.monsters = saved.monsters.into_iter().collect();
        world.rockets = saved.rockets.into_iter().collect();
        for (item, picked) in world.items.iter_mut().zip(saved.items_picked) {
            item.picked = picked;
        }
        world.dynamic_items = saved.dynamic_items.into_iter().collect();
        if saved.dynamic_walls.len() == world.dynamic_walls.len() {
            world.dynamic_walls = saved.dynamic_walls;
        }
        world.light_sources = saved.light_sources.into_iter().collect();
        if saved.static_model_states.len() == world.static_model_states.len() {
            world.static_model_states = saved.static_model_states;
        }
        if saved.procedure_states.len() == world.procedure_states.len() {
            world.procedure_states = saved.procedure_states;
        }
        world.win_requested = saved.win_requested;

        // Whatever the construction pass queued is stale; the catch-up path
        // resynchronises clients instead.
        world.reliable_events.clear();
        world.unreliable_events.clear();
        world.removed_monsters.clear();

        world
    }
}

/// Wire form of one dynamic wall's current pose.
pub fn wall_position_message(wall_index: u16, wall: &DynamicWallState) -> messages::WallPosition {
    messages::WallPosition {
        wall_index,
        vertices_xy: [
            messages::coord_to_message_coord(wall.current[0].x),
            messages::coord_to_message_coord(wall.current[0].y),
            messages::coord_to_message_coord(wall.current[1].x),
            messages::coord_to_message_coord(wall.current[1].y),
        ],
        z: messages::coord_to_message_coord(wall.z),
        texture_id: wall.texture_id,
    }
}

/// Parameter along `from + t*dir` of the first crossing into the circle.
fn circle_segment_hit(from: Vec2, dir: Vec2, len_sq: f32, center: Vec2, radius: f32) -> Option<f32> {
    let to_center = center - from;
    let t = (to_center.dot(dir) / len_sq).clamp(0.0, 1.0);
    let closest = from + dir * t;
    if (closest - center).length() <= radius {
        Some(t)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::map::MapLoader;
    use chasm_core::test_fixtures::write_test_archive;
    use chasm_core::vfs::Vfs;
    use std::rc::Rc;

    pub(crate) fn test_world() -> World {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_test_archive(&archive_path);
        let vfs = Rc::new(Vfs::open(&archive_path, &[]).unwrap());
        let resources = chasm_core::resources::load_game_resources(Rc::clone(&vfs)).unwrap();
        let map_loader = MapLoader::new(vfs, Rc::clone(&resources));
        let map_data = map_loader.load_map(1).unwrap();
        World::new(map_data, resources, Difficulty::Normal, 0x5EED)
    }

    #[test]
    fn explosion_damage_falls_off_linearly() {
        let mut world = test_world();
        world.monsters.clear();

        let near = world
            .spawn_monster(0, Vec3::new(10.0, 11.0, 0.0), 0.0)
            .unwrap();
        let far = world
            .spawn_monster(0, Vec3::new(10.0, 14.0, 0.0), 0.0)
            .unwrap();
        let near_life = world.monsters[&near].health;
        let far_life = world.monsters[&far].health;

        world.apply_radius_damage(Vec3::new(10.0, 10.0, 0.0), 3.0, 100);

        let near_damage = near_life - world.monsters[&near].health;
        assert!(
            (66..=67).contains(&near_damage),
            "near damage {}",
            near_damage
        );
        assert_eq!(world.monsters[&far].health, far_life);
    }

    #[test]
    fn rocket_into_a_wall_explodes_and_reports_death() {
        let mut world = test_world();
        world.monsters.clear();

        // Westward, straight into the x = 1 wall of the fixture room.
        let id = world.spawn_rocket(
            0,
            Vec3::new(1.1, 8.0, 0.5),
            std::f32::consts::FRAC_PI_2,
            0.0,
            None,
        );
        world.drain_events();

        for _ in 0..10 {
            world.tick(Time::from_ms(16));
            if world.rockets.is_empty() {
                break;
            }
        }
        assert!(world.rockets.is_empty());

        let (_, unreliable, _) = world.drain_events();
        assert!(unreliable.iter().any(
            |m| matches!(m, Message::RocketDeath(d) if d.rocket_id == id)
        ));
        assert!(unreliable
            .iter()
            .any(|m| matches!(m, Message::SpriteEffectBirth(_))));
        assert!(unreliable
            .iter()
            .any(|m| matches!(m, Message::LightSourceBirth(_))));
    }

    #[test]
    fn overkill_turns_the_corpse_into_gibs() {
        let mut world = test_world();
        world.monsters.clear();
        let id = world
            .spawn_monster(0, Vec3::new(10.0, 10.0, 0.0), 0.0)
            .unwrap();

        // Separation limit in the fixture manifest is 150.
        world.monsters.get_mut(&id).unwrap().take_damage(400);
        world.tick(Time::from_ms(16));

        assert!(!world.monsters.contains_key(&id));
        let (_, unreliable, removed) = world.drain_events();
        assert!(removed.contains(&id));
        let parts = unreliable
            .iter()
            .filter(|m| matches!(m, Message::MonsterPartBirth(_)))
            .count();
        assert_eq!(parts, GIBS_PER_DEATH);
    }

    #[test]
    fn mild_death_keeps_the_corpse() {
        let mut world = test_world();
        world.monsters.clear();
        let id = world
            .spawn_monster(0, Vec3::new(10.0, 10.0, 0.0), 0.0)
            .unwrap();

        world.monsters.get_mut(&id).unwrap().take_damage(125);
        for _ in 0..80 {
            world.tick(Time::from_ms(16));
        }

        let monster = &world.monsters[&id];
        assert_eq!(monster.state, AiState::Dead);
        let (_, _, removed) = world.drain_events();
        assert!(!removed.contains(&id));
    }

    #[test]
    fn area_trigger_opens_the_door_over_its_duration() {
        let mut world = test_world();
        let (slot, _) = world.spawn_player().unwrap();
        // The fixture spawn (4, 4) sits inside the door trigger area.
        assert_eq!(slot, 0);

        world.tick(Time::from_ms(16));
        assert!(world.dynamic_walls[0].moving);
        let early_z = world.dynamic_walls[0].z;

        for _ in 0..30 {
            world.tick(Time::from_ms(16));
        }
        let mid_z = world.dynamic_walls[0].z;
        assert!(mid_z > early_z);

        for _ in 0..60 {
            world.tick(Time::from_ms(16));
        }
        assert!((world.dynamic_walls[0].z - 2.0).abs() < 1e-4);
        assert!(!world.dynamic_walls[0].moving);
    }

    #[test]
    fn hitscan_respects_walls_and_reach() {
        let mut world = test_world();
        world.monsters.clear();

        let near = world
            .spawn_monster(0, Vec3::new(8.0, 10.0, 0.0), 0.0)
            .unwrap();
        let near_life = world.monsters[&near].health;

        // Straight up +Y from below; the monster sits within reach.
        world.shoot_hitscan(None, Vec3::new(8.0, 9.0, 0.5), Vec3::Y, 25, 2.0);
        assert_eq!(near_life - world.monsters[&near].health, 25);

        // Out of reach: untouched.
        let life = world.monsters[&near].health;
        world.shoot_hitscan(None, Vec3::new(8.0, 2.0, 0.5), Vec3::Y, 25, 2.0);
        assert_eq!(world.monsters[&near].health, life);

        // The room wall at y = 16 shields a monster behind it.
        let behind = world
            .spawn_monster(0, Vec3::new(8.0, 17.0, 0.0), 0.0)
            .unwrap();
        let behind_life = world.monsters[&behind].health;
        world.shoot_hitscan(None, Vec3::new(8.0, 14.0, 0.5), Vec3::Y, 25, 64.0);
        assert_eq!(world.monsters[&behind].health, behind_life);
    }

    #[test]
    fn map_time_accumulates_exactly_the_tick_deltas() {
        let mut world = test_world();
        let deltas = [2i64, 16, 60, 33, 7];
        let mut expected = Time::ZERO;
        let mut previous = world.map_time;
        for &ms in &deltas {
            world.tick(Time::from_ms(ms));
            expected += Time::from_ms(ms);
            assert!(world.map_time >= previous);
            previous = world.map_time;
        }
        assert_eq!(world.map_time, expected);
    }

    #[test]
    fn saved_world_replays_bit_identically() {
        let run = |ticks_before: u32| -> (World, SavedWorld) {
            let mut world = test_world();
            world.spawn_player().unwrap();
            for _ in 0..ticks_before {
                world.tick(Time::from_ms(16));
                world.drain_events();
            }
            let saved = world.to_saved();
            (world, saved)
        };

        let (mut original, saved) = run(5);

        let mut restored = World::from_saved(
            Rc::clone(&original.map_data),
            Rc::clone(original.resources()),
            Difficulty::Normal,
            saved,
        );

        for _ in 0..5 {
            original.tick(Time::from_ms(16));
            restored.tick(Time::from_ms(16));
        }

        let a = bincode::serde::encode_to_vec(original.to_saved(), bincode::config::standard())
            .unwrap();
        let b = bincode::serde::encode_to_vec(restored.to_saved(), bincode::config::standard())
            .unwrap();
        assert_eq!(a, b);
    }
}
