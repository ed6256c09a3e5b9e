//! Server-side player: kinematics and the weapon state machine.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use chasm_core::game_constants::{
    GRAVITY, JUMP_IMPULSE, MAX_VERTICAL_SPEED, PLAYER_MAX_ARMOR, PLAYER_MAX_HEALTH, PLAYER_RADIUS,
    PLAYER_START_HEALTH, RUN_SPEED, WALK_SPEED, WEAPON_COUNT,
};
use chasm_core::map::{MapData, EMPTY_FLOOR_TEXTURE_ID};
use chasm_core::messages::{self, EntityId, PlayerMove};
use chasm_core::resources::GameResources;
use chasm_core::time::Time;

use super::movement::collide_with_map;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct WeaponsMask: u8 {
        const HAND = 1 << 0;
    }
}

impl WeaponsMask {
    pub fn has(self, weapon_index: u8) -> bool {
        self.bits() & (1 << weapon_index) != 0
    }

    pub fn give(&mut self, weapon_index: u8) {
        *self = WeaponsMask::from_bits_retain(self.bits() | (1 << weapon_index));
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct KeysMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
    }
}

/// Weapon deployment per the wire encoding: 0 retracted, 255 ready.
pub const SWITCH_STAGE_MAX: u8 = 255;

/// Full raise or lower takes this long.
const SWITCH_TIME: Time = Time::from_ms(300);

/// The shoot animation part of a reload cycle.
const FIRE_ANIMATION_TIME: Time = Time::from_ms(100);

/// Reload times in the manifest are in 1/128 second units.
const RELOADING_TIME_UNIT_S: f32 = 1.0 / 128.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeaponState {
    Idle,
    Raise,
    Lower,
    Fire { end_time: Time },
    Reload { end_time: Time },
}

#[derive(Debug, Clone, Copy)]
pub struct ShotRequest {
    pub rocket_type: u32,
    pub rocket_count: u32,
    /// Ammo-less weapons strike instantly instead of spawning a projectile.
    pub melee: bool,
    pub position: Vec3,
    pub view_dir_angle_z: u16,
    pub view_dir_angle_x: u16,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Player {
    pub entity_id: EntityId,
    pub pos: Vec3,
    pub vertical_speed: f32,
    pub horizontal_speed: f32,
    pub angle: f32,
    pub on_ground: bool,

    pub health: i32,
    pub armor: i32,
    pub ammo: [u8; WEAPON_COUNT],
    pub weapons_mask: WeaponsMask,
    pub keys_mask: KeysMask,
    pub frags: u8,
    pub color: u8,
    pub name: String,

    pub invisibility_end: Option<Time>,
    pub shield_end: Option<Time>,
    pub chojin_end: Option<Time>,

    pub current_weapon_index: u8,
    pub weapon_state: WeaponState,
    pub switch_stage: u8,
    pub queued_weapon: Option<u8>,
    pub weapon_animation_frame: u16,

    /// Latest movement input, applied every tick until replaced.
    #[serde(skip)]
    pub last_move: Option<PlayerMove>,
    /// Damage taken in the current tick, for gib decisions and pain flashes.
    #[serde(skip)]
    pub damage_this_tick: i32,
}

impl Player {
    pub fn new(entity_id: EntityId, spawn_pos: Vec2, angle: f32, resources: &GameResources) -> Self {
        let mut ammo = [0u8; WEAPON_COUNT];
        let mut weapons_mask = WeaponsMask::HAND;
        // Weapon 1 comes loaded from the start, hand has no ammo at all.
        if let Some(description) = resources.weapons_description.get(1) {
            weapons_mask.give(1);
            ammo[1] = description.start.min(description.limit) as u8;
        }

        Player {
            entity_id,
            pos: Vec3::new(spawn_pos.x, spawn_pos.y, 0.0),
            vertical_speed: 0.0,
            horizontal_speed: 0.0,
            angle,
            on_ground: true,
            health: PLAYER_START_HEALTH,
            armor: 0,
            ammo,
            weapons_mask,
            keys_mask: KeysMask::default(),
            frags: 0,
            color: 0,
            name: String::new(),
            invisibility_end: None,
            shield_end: None,
            chojin_end: None,
            current_weapon_index: if resources.weapons_description.len() > 1 { 1 } else { 0 },
            weapon_state: WeaponState::Raise,
            switch_stage: 0,
            queued_weapon: None,
            weapon_animation_frame: 0,
            last_move: None,
            damage_this_tick: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn update_movement(&mut self, message: &PlayerMove) {
        self.last_move = Some(*message);
        self.color = messages::unpack_color(message.flags);
    }

    /// Integrate one tick of kinematics and resolve collisions.
    pub fn do_move(
        &mut self,
        time_delta: Time,
        map_data: &MapData,
        dynamic_wall_positions: &[[Vec2; 2]],
    ) {
        let dt = time_delta.to_seconds();

        let mut velocity = Vec2::ZERO;
        if let Some(m) = self.last_move {
            if self.is_alive() {
                self.angle = messages::message_angle_to_angle(m.view_direction);
                let move_angle = messages::message_angle_to_angle(m.move_direction);

                let speed = match m.acceleration {
                    0 => 0.0,
                    1 => WALK_SPEED,
                    _ => RUN_SPEED,
                };
                velocity = Vec2::new(-move_angle.sin(), move_angle.cos()) * speed;

                if m.flags & messages::MOVE_FLAG_JUMP != 0 && self.on_ground {
                    self.vertical_speed = JUMP_IMPULSE;
                    self.on_ground = false;
                }
            }
        }

        let desired = Vec2::new(self.pos.x, self.pos.y) + velocity * dt;
        let (corrected, restriction) =
            collide_with_map(map_data, dynamic_wall_positions, desired, PLAYER_RADIUS);

        let effective = restriction.restrict_velocity(velocity);
        self.horizontal_speed = effective.length();
        self.pos.x = corrected.x;
        self.pos.y = corrected.y;

        // Vertical motion: the floor is at z = 0 where the cell has a floor
        // texture; sky cells are pits.
        let cell_x = self.pos.x.floor() as i32;
        let cell_y = self.pos.y.floor() as i32;
        let has_floor = map_data.floor_texture(cell_x, cell_y) != EMPTY_FLOOR_TEXTURE_ID;

        self.vertical_speed =
            (self.vertical_speed - GRAVITY * dt).clamp(-MAX_VERTICAL_SPEED, MAX_VERTICAL_SPEED);
        self.pos.z += self.vertical_speed * dt;

        if has_floor && self.pos.z <= 0.0 {
            self.pos.z = 0.0;
            self.vertical_speed = 0.0;
            self.on_ground = true;
        } else {
            self.on_ground = false;
        }
    }

    fn weapon_reload_time(&self, resources: &GameResources) -> Time {
        let reloading_time = resources
            .weapons_description
            .get(self.current_weapon_index as usize)
            .map(|d| d.reloading_time)
            .unwrap_or(0);
        Time::from_seconds((reloading_time as f32 * RELOADING_TIME_UNIT_S) as f64)
    }

    fn can_fire(&self) -> bool {
        // The hand needs no ammo; everything else does.
        self.current_weapon_index == 0 || self.ammo[self.current_weapon_index as usize] > 0
    }

    fn requested_weapon(&self) -> Option<u8> {
        let m = self.last_move?;
        let requested = m.weapon_index;
        if requested == self.current_weapon_index
            || requested as usize >= WEAPON_COUNT
            || !self.weapons_mask.has(requested)
        {
            return None;
        }
        Some(requested)
    }

    fn switch_step(time_delta: Time) -> u8 {
        let step = 255.0 * time_delta.to_seconds() / SWITCH_TIME.to_seconds();
        (step as i32).clamp(1, 255) as u8
    }

    /// Advance the weapon state machine one tick. Returns a shot to spawn if
    /// the trigger frame was reached; ammunition is decremented exactly then.
    pub fn update_weapon(
        &mut self,
        map_time: Time,
        time_delta: Time,
        resources: &GameResources,
    ) -> Option<ShotRequest> {
        let shoot_pressed = self
            .last_move
            .map(|m| m.flags & messages::MOVE_FLAG_SHOOT != 0)
            .unwrap_or(false)
            && self.is_alive();

        if let Some(requested) = self.requested_weapon() {
            self.queued_weapon = Some(requested);
        }

        match self.weapon_state {
            WeaponState::Raise => {
                self.switch_stage = self.switch_stage.saturating_add(Self::switch_step(time_delta));
                if self.switch_stage == SWITCH_STAGE_MAX {
                    self.weapon_state = WeaponState::Idle;
                }
                None
            }
            WeaponState::Lower => {
                self.switch_stage = self.switch_stage.saturating_sub(Self::switch_step(time_delta));
                if self.switch_stage == 0 {
                    if let Some(next) = self.queued_weapon.take() {
                        self.current_weapon_index = next;
                    }
                    self.weapon_animation_frame = 0;
                    self.weapon_state = WeaponState::Raise;
                }
                None
            }
            WeaponState::Idle => {
                // Queued switches are taken at idle.
                if self.queued_weapon.is_some() {
                    self.weapon_state = WeaponState::Lower;
                    return None;
                }
                if shoot_pressed && self.can_fire() {
                    self.weapon_state = WeaponState::Fire {
                        end_time: map_time + FIRE_ANIMATION_TIME,
                    };
                    self.weapon_animation_frame = 0;

                    let description =
                        resources.weapons_description.get(self.current_weapon_index as usize)?;
                    if self.current_weapon_index != 0 {
                        self.ammo[self.current_weapon_index as usize] -= 1;
                    }
                    let m = self.last_move?;
                    return Some(ShotRequest {
                        rocket_type: description.r_type,
                        rocket_count: description.r_count.max(1),
                        melee: description.limit == 0,
                        position: self.pos
                            + Vec3::new(0.0, 0.0, chasm_core::game_constants::PLAYER_EYES_LEVEL),
                        view_dir_angle_z: m.view_direction,
                        view_dir_angle_x: m.view_dir_angle_x,
                    });
                }
                None
            }
            WeaponState::Fire { end_time } => {
                self.weapon_animation_frame = self.weapon_animation_frame.wrapping_add(1);
                if map_time >= end_time {
                    self.weapon_state = WeaponState::Reload {
                        end_time: map_time + self.weapon_reload_time(resources),
                    };
                }
                None
            }
            WeaponState::Reload { end_time } => {
                if map_time >= end_time {
                    self.weapon_animation_frame = 0;
                    self.weapon_state = WeaponState::Idle;
                }
                None
            }
        }
    }

    pub fn give_health(&mut self, amount: i32) {
        self.health = (self.health + amount).min(PLAYER_MAX_HEALTH);
    }

    pub fn give_armor(&mut self, amount: i32) {
        self.armor = (self.armor + amount).min(PLAYER_MAX_ARMOR);
    }

    pub fn give_ammo(&mut self, weapon_index: usize, amount: u32, resources: &GameResources) {
        let limit = resources
            .weapons_description
            .get(weapon_index)
            .map(|d| d.limit)
            .unwrap_or(0);
        let new_value = (self.ammo[weapon_index] as u32 + amount).min(limit);
        self.ammo[weapon_index] = new_value as u8;
    }

    /// Apply damage through armor. Returns the health actually lost.
    pub fn take_damage(&mut self, damage: i32) -> i32 {
        if self.shield_end.is_some() {
            return 0;
        }
        let absorbed = (damage / 2).min(self.armor);
        self.armor -= absorbed;
        let health_damage = damage - absorbed;
        self.health -= health_damage;
        self.damage_this_tick += health_damage;
        health_damage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::map::{CollisionIndex, Wall, MAP_SIZE};
    use chasm_core::messages::{MOVE_FLAG_JUMP, MOVE_FLAG_SHOOT};
    use chasm_core::test_fixtures::write_test_archive;
    use chasm_core::vfs::Vfs;
    use std::rc::Rc;

    fn test_resources() -> Rc<GameResources> {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_test_archive(&archive_path);
        let vfs = Rc::new(Vfs::open(&archive_path, &[]).unwrap());
        chasm_core::resources::load_game_resources(vfs).unwrap()
    }

    fn open_map() -> MapData {
        let mut map = MapData::empty(1);
        for cell in map.floor_textures.iter_mut() {
            *cell = 1;
        }
        map
    }

    fn run_move(direction: u16, acceleration: u8) -> PlayerMove {
        PlayerMove {
            view_direction: direction,
            move_direction: direction,
            acceleration,
            weapon_index: 1,
            view_dir_angle_x: 0,
            view_dir_angle_z: direction,
            flags: 0,
        }
    }

    #[test]
    fn running_forward_advances_along_plus_y() {
        let resources = test_resources();
        let map = open_map();
        let mut player = Player::new(1, Vec2::new(10.0, 10.0), 0.0, &resources);
        player.update_movement(&run_move(0, 2));

        let dt = Time::from_ms(16);
        for _ in 0..10 {
            player.do_move(dt, &map, &[]);
        }

        let expected = 10.0 + 10.0 * 0.016 * RUN_SPEED;
        assert!((player.pos.y - expected).abs() < 1e-3, "y = {}", player.pos.y);
        assert!((player.pos.x - 10.0).abs() < 1e-3);
    }

    #[test]
    fn wall_stops_forward_motion_at_radius() {
        let resources = test_resources();
        let mut map = open_map();
        map.static_walls.push(Wall {
            vert_pos: [Vec2::new(2.0, 1.0), Vec2::new(2.0, 2.0)],
            texture_id: 0,
            vert_tex_coord: [0, 1],
        });
        map.collision_index = CollisionIndex::build(&map);

        let mut player = Player::new(1, Vec2::new(1.5, 1.5), 0.0, &resources);
        // Facing +X: move direction is a quarter turn clockwise from +Y.
        player.update_movement(&run_move(49152, 2));

        for _ in 0..60 {
            player.do_move(Time::from_ms(16), &map, &[]);
            assert!(player.pos.x <= 2.0 - PLAYER_RADIUS + 1e-4);
        }
        assert!((player.pos.x - (2.0 - PLAYER_RADIUS)).abs() < 1e-3);
        assert!((player.pos.y - 1.5).abs() < 1e-3);
    }

    #[test]
    fn jump_requires_ground_and_gravity_pulls_back() {
        let resources = test_resources();
        let map = open_map();
        let mut player = Player::new(1, Vec2::new(10.0, 10.0), 0.0, &resources);

        let mut m = run_move(0, 0);
        m.flags = MOVE_FLAG_JUMP;
        player.update_movement(&m);

        player.do_move(Time::from_ms(16), &map, &[]);
        assert!(!player.on_ground);
        assert!(player.pos.z > 0.0);

        // Mid-air jump requests do nothing.
        let speed_before = player.vertical_speed;
        player.do_move(Time::from_ms(16), &map, &[]);
        assert!(player.vertical_speed < speed_before);

        // Release the key and fall back down.
        player.update_movement(&run_move(0, 0));
        for _ in 0..200 {
            player.do_move(Time::from_ms(16), &map, &[]);
        }
        assert!(player.on_ground);
        assert_eq!(player.pos.z, 0.0);
    }

    #[test]
    fn sky_cells_have_no_floor() {
        let resources = test_resources();
        let mut map = open_map();
        let x = 10usize;
        let y = 10usize;
        map.floor_textures[x + y * MAP_SIZE] = chasm_core::map::EMPTY_FLOOR_TEXTURE_ID;

        let mut player = Player::new(1, Vec2::new(10.5, 10.5), 0.0, &resources);
        for _ in 0..20 {
            player.do_move(Time::from_ms(16), &map, &[]);
        }
        assert!(player.pos.z < 0.0);
        assert!(!player.on_ground);
    }

    #[test]
    fn firing_decrements_ammo_exactly_once_per_shot() {
        let resources = test_resources();
        let mut player = Player::new(1, Vec2::new(10.0, 10.0), 0.0, &resources);

        // Deploy the weapon first.
        let mut time = Time::ZERO;
        let dt = Time::from_ms(16);
        while player.weapon_state != WeaponState::Idle {
            time += dt;
            player.update_weapon(time, dt, &resources);
        }

        let mut m = run_move(0, 0);
        m.flags = MOVE_FLAG_SHOOT;
        player.update_movement(&m);

        let ammo_before = player.ammo[1];
        let mut shots = 0;
        for _ in 0..200 {
            time += dt;
            if player.update_weapon(time, dt, &resources).is_some() {
                shots += 1;
            }
        }

        assert!(shots >= 2, "expected repeated shots, got {}", shots);
        assert_eq!(player.ammo[1] as i32, ammo_before as i32 - shots);
    }

    #[test]
    fn switch_while_reloading_is_queued_until_idle() {
        let resources = test_resources();
        let mut player = Player::new(1, Vec2::new(10.0, 10.0), 0.0, &resources);
        player.weapons_mask.give(0);

        let mut time = Time::ZERO;
        let dt = Time::from_ms(16);
        while player.weapon_state != WeaponState::Idle {
            time += dt;
            player.update_weapon(time, dt, &resources);
        }

        // Fire, then request the hand mid-cycle.
        let mut m = run_move(0, 0);
        m.flags = MOVE_FLAG_SHOOT;
        player.update_movement(&m);
        time += dt;
        assert!(player.update_weapon(time, dt, &resources).is_some());

        let mut m = run_move(0, 0);
        m.weapon_index = 0;
        player.update_movement(&m);

        // The switch does not happen during Fire/Reload.
        for _ in 0..4 {
            time += dt;
            player.update_weapon(time, dt, &resources);
            assert_eq!(player.current_weapon_index, 1);
        }

        // Run the machine until the queued switch lands.
        for _ in 0..400 {
            time += dt;
            player.update_weapon(time, dt, &resources);
            if player.current_weapon_index == 0 {
                break;
            }
        }
        assert_eq!(player.current_weapon_index, 0);
        assert_eq!(player.weapon_state, WeaponState::Raise);
    }

    #[test]
    fn armor_absorbs_half_the_damage() {
        let resources = test_resources();
        let mut player = Player::new(1, Vec2::new(0.0, 0.0), 0.0, &resources);
        player.armor = 10;

        let lost = player.take_damage(30);
        assert_eq!(lost, 20);
        assert_eq!(player.armor, 0);
        assert_eq!(player.health, PLAYER_START_HEALTH - 20);
    }
}
