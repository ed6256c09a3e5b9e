//! Client-side weapon animation.
//!
//! Authoritative transitions arrive as `PlayerWeapon` messages; between them
//! the frame counter advances locally at the model's fixed animation rate.

use chasm_core::messages::PlayerWeapon;
use chasm_core::resources::{model::ANIMATIONS_FPS, GameResourcesPtr};
use chasm_core::time::Time;

pub struct WeaponState {
    game_resources: GameResourcesPtr,

    current_weapon_index: u8,
    current_animation: u8,
    animation_frame: f32,
    switch_stage: f32,
    last_update: Time,
}

impl WeaponState {
    pub fn new(game_resources: GameResourcesPtr) -> WeaponState {
        WeaponState {
            game_resources,
            current_weapon_index: 0,
            current_animation: 0,
            animation_frame: 0.0,
            switch_stage: 0.0,
            last_update: Time::ZERO,
        }
    }

    pub fn process_message(&mut self, message: &PlayerWeapon, now: Time) {
        self.current_weapon_index = message.current_weapon_index;
        self.current_animation = message.animation;
        self.animation_frame = message.animation_frame as f32;
        self.switch_stage = message.switch_stage as f32 / 255.0;
        self.last_update = now;
    }

    /// Local frame advance between server messages, wrapped to the weapon
    /// animation's frame count.
    pub fn tick(&mut self, now: Time) {
        let dt = (now - self.last_update).to_seconds().max(0.0);
        self.last_update = now;

        let frame_count = self
            .game_resources
            .weapons_models
            .get(self.current_weapon_index as usize)
            .and_then(|model| model.animations.get(self.current_animation as usize))
            .map(|animation| animation.frame_count)
            .unwrap_or(0);
        if frame_count == 0 {
            return;
        }

        self.animation_frame =
            (self.animation_frame + ANIMATIONS_FPS * dt) % frame_count as f32;
    }

    pub fn current_weapon_index(&self) -> u8 {
        self.current_weapon_index
    }

    pub fn current_animation(&self) -> u8 {
        self.current_animation
    }

    pub fn current_animation_frame(&self) -> u32 {
        self.animation_frame as u32
    }

    /// 0.0 retracted, 1.0 fully deployed.
    pub fn switch_stage(&self) -> f32 {
        self.switch_stage
    }
}
