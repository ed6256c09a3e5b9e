//! Monster state and the per-tick AI machine.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use chasm_core::map::MapData;
use chasm_core::messages::EntityId;
use chasm_core::random::LongRand;
use chasm_core::resources::{model::ANIMATIONS_FPS, MonsterDescription};
use chasm_core::time::Time;

use super::movement::{collide_with_map, line_of_sight};

/// Animation slots shared by every monster model.
pub mod animations {
    pub const IDLE: u16 = 0;
    pub const WALK: u16 = 1;
    pub const ATTACK: u16 = 2;
    pub const PAIN: u16 = 3;
    pub const DEATH: u16 = 4;
}

const REACTION_DELAY: Time = Time::from_ms(300);
const ATTACK_TIME: Time = Time::from_ms(700);
const PAIN_TIME: Time = Time::from_ms(400);
const DEATH_TIME: Time = Time::from_ms(900);
const ATTACK_COOLDOWN: Time = Time::from_ms(500);

/// Melee connects within this many times the monster's body radius.
const MELEE_REACH_FACTOR: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AiState {
    Idle,
    See { until: Time },
    Pursue,
    Attack { end_time: Time, shot_done: bool },
    Pain { end_time: Time },
    Dying { end_time: Time },
    Dead,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Monster {
    pub monster_type: u8,
    pub pos: Vec3,
    pub angle: f32,
    pub state: AiState,
    pub health: i32,
    pub body_parts_mask: u8,
    pub animation: u16,
    pub animation_frame: f32,
    pub target_player: Option<u8>,
    pub attack_cooldown_end: Time,
    /// Damage received in the current tick, for pain and gib decisions.
    #[serde(skip)]
    pub damage_this_tick: i32,
}

/// Side effects of one monster's tick, applied by the world after the loop.
pub enum AiEvent {
    ShootRocket {
        rocket_type: u32,
        position: Vec3,
        target: Vec3,
    },
    Melee { player_slot: u8, damage: i32 },
    StartedDying { monster_id: EntityId, overkill: i32 },
    Sound { monster_id: EntityId, sound_id: u8 },
}

/// Player data visible to the AI this tick.
pub struct AiPlayerView {
    pub slot: u8,
    pub pos: Vec3,
    pub alive: bool,
}

pub struct AiContext<'a> {
    pub map_data: &'a MapData,
    pub dynamic_wall_positions: &'a [[Vec2; 2]],
    pub players: &'a [AiPlayerView],
    pub map_time: Time,
    pub time_delta: Time,
    pub rng: &'a mut LongRand,
}

impl Monster {
    pub fn new(monster_type: u8, pos: Vec3, angle: f32, life: i32) -> Self {
        Monster {
            monster_type,
            pos,
            angle,
            state: AiState::Idle,
            health: life,
            body_parts_mask: 0xFF,
            animation: animations::IDLE,
            animation_frame: 0.0,
            target_player: None,
            attack_cooldown_end: Time::ZERO,
            damage_this_tick: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.state, AiState::Dying { .. } | AiState::Dead)
    }

    fn pos_xy(&self) -> Vec2 {
        Vec2::new(self.pos.x, self.pos.y)
    }

    fn set_animation(&mut self, animation: u16) {
        if self.animation != animation {
            self.animation = animation;
            self.animation_frame = 0.0;
        }
    }

    fn select_target(&self, ctx: &AiContext, description: &MonsterDescription) -> Option<u8> {
        let mut best: Option<(u8, f32)> = None;
        for player in ctx.players {
            if !player.alive {
                continue;
            }
            let distance = (Vec2::new(player.pos.x, player.pos.y) - self.pos_xy()).length();
            if distance > description.attack_radius {
                continue;
            }
            if !line_of_sight(ctx.map_data, self.pos_xy(), Vec2::new(player.pos.x, player.pos.y)) {
                continue;
            }
            if best.map(|(_, d)| distance < d).unwrap_or(true) {
                best = Some((player.slot, distance));
            }
        }
        best.map(|(slot, _)| slot)
    }

    fn target_view<'a>(&self, ctx: &'a AiContext) -> Option<&'a AiPlayerView> {
        let slot = self.target_player?;
        ctx.players.iter().find(|p| p.slot == slot && p.alive)
    }

    fn rotate_towards(&mut self, target: Vec2, rotation_speed: f32, dt: f32) {
        let to_target = target - self.pos_xy();
        if to_target == Vec2::ZERO {
            return;
        }
        // Model forward is +Y at angle zero, matching the player convention.
        let desired = (-to_target.x).atan2(to_target.y);
        let mut diff = desired - self.angle;
        while diff > std::f32::consts::PI {
            diff -= std::f32::consts::TAU;
        }
        while diff < -std::f32::consts::PI {
            diff += std::f32::consts::TAU;
        }
        let max_step = rotation_speed * dt;
        self.angle += diff.clamp(-max_step, max_step);
    }

    /// Take damage; state transitions (pain, dying) are decided in the tick.
    pub fn take_damage(&mut self, damage: i32) {
        if !self.is_alive() {
            return;
        }
        self.health -= damage;
        self.damage_this_tick += damage;
    }

    pub fn tick(
        &mut self,
        monster_id: EntityId,
        description: &MonsterDescription,
        ctx: &mut AiContext,
        events: &mut Vec<AiEvent>,
    ) {
        let dt = ctx.time_delta.to_seconds();
        self.animation_frame += ANIMATIONS_FPS * dt;

        // Death and pain interrupts come first.
        if self.is_alive() && self.health <= 0 {
            self.state = AiState::Dying {
                end_time: ctx.map_time + DEATH_TIME,
            };
            self.set_animation(animations::DEATH);
            events.push(AiEvent::StartedDying {
                monster_id,
                overkill: self.damage_this_tick,
            });
            events.push(AiEvent::Sound {
                monster_id,
                sound_id: chasm_core::game_constants::monster_sounds::DEATH,
            });
            self.damage_this_tick = 0;
            return;
        }
        if self.is_alive() && self.damage_this_tick > 0 {
            let pain_chance = self.damage_this_tick as f32 / (self.damage_this_tick as f32 + 30.0);
            if !matches!(self.state, AiState::Pain { .. })
                && ctx.rng.rand_value(1.0) < pain_chance
            {
                self.state = AiState::Pain {
                    end_time: ctx.map_time + PAIN_TIME,
                };
                self.set_animation(animations::PAIN);
                events.push(AiEvent::Sound {
                    monster_id,
                    sound_id: chasm_core::game_constants::monster_sounds::PAIN,
                });
            }
            self.damage_this_tick = 0;
        }

        match self.state {
            AiState::Idle => {
                self.set_animation(animations::IDLE);
                if let Some(slot) = self.select_target(ctx, description) {
                    self.target_player = Some(slot);
                    self.state = AiState::See {
                        until: ctx.map_time + REACTION_DELAY,
                    };
                    events.push(AiEvent::Sound {
                        monster_id,
                        sound_id: chasm_core::game_constants::monster_sounds::ALERT,
                    });
                }
            }
            AiState::See { until } => {
                if let Some(target) = self.target_view(ctx) {
                    let target_xy = Vec2::new(target.pos.x, target.pos.y);
                    self.rotate_towards(target_xy, description.rotation_speed, dt);
                    if ctx.map_time >= until {
                        self.state = AiState::Pursue;
                    }
                } else {
                    self.target_player = None;
                    self.state = AiState::Idle;
                }
            }
            AiState::Pursue => {
                let Some(target) = self.target_view(ctx) else {
                    self.target_player = None;
                    self.state = AiState::Idle;
                    return;
                };
                let target_pos = target.pos;
                let target_xy = Vec2::new(target_pos.x, target_pos.y);
                let distance = (target_xy - self.pos_xy()).length();
                let sees = line_of_sight(ctx.map_data, self.pos_xy(), target_xy);

                // Ranged monsters attack anywhere inside the attack radius;
                // melee monsters close in first.
                let attack_range = if description.rock != 0 {
                    description.attack_radius
                } else {
                    description.w_radius * MELEE_REACH_FACTOR
                };

                if distance <= attack_range && sees && ctx.map_time >= self.attack_cooldown_end {
                    self.state = AiState::Attack {
                        end_time: ctx.map_time + ATTACK_TIME,
                        shot_done: false,
                    };
                    self.set_animation(animations::ATTACK);
                    events.push(AiEvent::Sound {
                        monster_id,
                        sound_id: chasm_core::game_constants::monster_sounds::ATTACK,
                    });
                    return;
                }

                self.set_animation(animations::WALK);
                self.rotate_towards(target_xy, description.rotation_speed, dt);

                let forward = Vec2::new(-self.angle.sin(), self.angle.cos());
                let desired = self.pos_xy() + forward * description.speed * dt;
                let (corrected, _) = collide_with_map(
                    ctx.map_data,
                    ctx.dynamic_wall_positions,
                    desired,
                    description.w_radius,
                );
                self.pos.x = corrected.x;
                self.pos.y = corrected.y;
            }
            AiState::Attack { end_time, shot_done } => {
                let target = self.target_view(ctx).map(|t| t.pos);
                if let Some(target_pos) = target {
                    self.rotate_towards(
                        Vec2::new(target_pos.x, target_pos.y),
                        description.rotation_speed,
                        dt,
                    );
                }

                // The blow lands at the animation midpoint.
                let halfway = end_time - Time::from_us(ATTACK_TIME.as_us() / 2);
                if !shot_done && ctx.map_time >= halfway {
                    self.state = AiState::Attack {
                        end_time,
                        shot_done: true,
                    };
                    if let Some(target_pos) = target {
                        if description.rock != 0 {
                            events.push(AiEvent::ShootRocket {
                                rocket_type: description.rock,
                                position: self.pos + Vec3::new(0.0, 0.0, 0.5),
                                target: target_pos + Vec3::new(0.0, 0.0, 0.5),
                            });
                        } else if let Some(slot) = self.target_player {
                            let distance = (Vec2::new(target_pos.x, target_pos.y)
                                - self.pos_xy())
                            .length();
                            if distance <= description.w_radius * MELEE_REACH_FACTOR {
                                events.push(AiEvent::Melee {
                                    player_slot: slot,
                                    damage: description.kick as i32,
                                });
                            }
                        }
                    }
                }

                if ctx.map_time >= end_time {
                    self.attack_cooldown_end = ctx.map_time + ATTACK_COOLDOWN;
                    self.state = AiState::Pursue;
                }
            }
            AiState::Pain { end_time } => {
                if ctx.map_time >= end_time {
                    self.state = if self.target_player.is_some() {
                        AiState::Pursue
                    } else {
                        AiState::Idle
                    };
                }
            }
            AiState::Dying { end_time } => {
                if ctx.map_time >= end_time {
                    self.state = AiState::Dead;
                }
            }
            AiState::Dead => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::map::{CollisionIndex, Wall};

    fn description() -> MonsterDescription {
        MonsterDescription {
            model_file_name: "TEST.CAR".to_string(),
            w_radius: 0.4,
            attack_radius: 8.0,
            speed: 2.0,
            rotation_speed: 6.0,
            life: 100,
            kick: 15,
            rock: 0,
            sep_limit: 150,
        }
    }

    fn open_map() -> MapData {
        MapData::empty(1)
    }

    fn players_at(pos: Vec3) -> Vec<AiPlayerView> {
        vec![AiPlayerView {
            slot: 0,
            pos,
            alive: true,
        }]
    }

    fn run_ticks(
        monster: &mut Monster,
        description: &MonsterDescription,
        map: &MapData,
        players: &[AiPlayerView],
        rng: &mut LongRand,
        start: Time,
        ticks: u32,
    ) -> (Time, Vec<AiEvent>) {
        let mut events = Vec::new();
        let dt = Time::from_ms(16);
        let mut now = start;
        for _ in 0..ticks {
            now += dt;
            let mut ctx = AiContext {
                map_data: map,
                dynamic_wall_positions: &[],
                players,
                map_time: now,
                time_delta: dt,
                rng,
            };
            monster.tick(1, description, &mut ctx, &mut events);
        }
        (now, events)
    }

    #[test]
    fn idle_to_see_needs_range_and_los() {
        let description = description();
        let map = open_map();
        let mut rng = LongRand::new(1);

        // Out of range: stays idle.
        let mut monster = Monster::new(0, Vec3::new(10.0, 10.0, 0.0), 0.0, 100);
        let far = players_at(Vec3::new(30.0, 10.0, 0.0));
        run_ticks(&mut monster, &description, &map, &far, &mut rng, Time::ZERO, 5);
        assert_eq!(monster.state, AiState::Idle);

        // In range with clear sight: wakes up, then pursues after the delay.
        let near = players_at(Vec3::new(14.0, 10.0, 0.0));
        run_ticks(&mut monster, &description, &map, &near, &mut rng, Time::ZERO, 2);
        assert!(matches!(monster.state, AiState::See { .. }));

        run_ticks(&mut monster, &description, &map, &near, &mut rng, Time::from_ms(32), 30);
        assert!(matches!(
            monster.state,
            AiState::Pursue | AiState::Attack { .. }
        ));
    }

    #[test]
    fn a_wall_blocks_the_wakeup() {
        let description = description();
        let mut map = open_map();
        map.static_walls.push(Wall {
            vert_pos: [Vec2::new(12.0, 0.0), Vec2::new(12.0, 20.0)],
            texture_id: 0,
            vert_tex_coord: [0, 1],
        });
        map.collision_index = CollisionIndex::build(&map);

        let mut rng = LongRand::new(1);
        let mut monster = Monster::new(0, Vec3::new(10.0, 10.0, 0.0), 0.0, 100);
        let players = players_at(Vec3::new(14.0, 10.0, 0.0));
        run_ticks(&mut monster, &description, &map, &players, &mut rng, Time::ZERO, 10);
        assert_eq!(monster.state, AiState::Idle);
    }

    #[test]
    fn pursue_closes_distance_and_melee_lands() {
        let description = description();
        let map = open_map();
        let mut rng = LongRand::new(1);
        let mut monster = Monster::new(0, Vec3::new(10.0, 10.0, 0.0), 0.0, 100);
        let players = players_at(Vec3::new(10.0, 13.0, 0.0));

        let start_distance = (monster.pos_xy() - Vec2::new(10.0, 13.0)).length();
        let (_, events) = run_ticks(
            &mut monster,
            &description,
            &map,
            &players,
            &mut rng,
            Time::ZERO,
            400,
        );
        let end_distance = (monster.pos_xy() - Vec2::new(10.0, 13.0)).length();

        assert!(end_distance < start_distance);
        assert!(events
            .iter()
            .any(|e| matches!(e, AiEvent::Melee { player_slot: 0, damage: 15 })));
    }

    #[test]
    fn lethal_damage_leads_to_dying_then_dead() {
        let description = description();
        let map = open_map();
        let mut rng = LongRand::new(1);
        let mut monster = Monster::new(0, Vec3::new(10.0, 10.0, 0.0), 0.0, 100);
        let players = players_at(Vec3::new(30.0, 30.0, 0.0));

        monster.take_damage(250);
        let (_, events) = run_ticks(
            &mut monster,
            &description,
            &map,
            &players,
            &mut rng,
            Time::ZERO,
            1,
        );
        assert!(matches!(monster.state, AiState::Dying { .. }));
        assert_eq!(monster.animation, animations::DEATH);
        assert!(events
            .iter()
            .any(|e| matches!(e, AiEvent::StartedDying { monster_id: 1, .. })));

        run_ticks(&mut monster, &description, &map, &players, &mut rng, Time::from_ms(16), 80);
        assert_eq!(monster.state, AiState::Dead);
        assert!(!monster.is_alive());
    }

    #[test]
    fn ranged_monsters_emit_rockets_instead_of_melee() {
        let mut description = description();
        description.rock = 2;
        let map = open_map();
        let mut rng = LongRand::new(1);
        let mut monster = Monster::new(0, Vec3::new(10.0, 10.0, 0.0), 0.0, 100);
        let players = players_at(Vec3::new(10.0, 16.0, 0.0));

        let (_, events) = run_ticks(
            &mut monster,
            &description,
            &map,
            &players,
            &mut rng,
            Time::ZERO,
            200,
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, AiEvent::ShootRocket { rocket_type: 2, .. })));
        assert!(!events.iter().any(|e| matches!(e, AiEvent::Melee { .. })));
    }
}
