//! Abstract per-frame input state and its quantisation into `PlayerMove`.
//!
//! The window layer (out of scope here) sets digital key states and
//! accumulated mouse deltas; composing the message quantises everything to
//! wire precision, so identical input streams replay identically.

use chasm_core::messages::{
    self, PlayerMove, MOVE_FLAG_JUMP, MOVE_FLAG_SHOOT,
};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyState: u16 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const STRAFE_LEFT = 1 << 2;
        const STRAFE_RIGHT = 1 << 3;
        const WALK = 1 << 4;
        const JUMP = 1 << 5;
        const SHOOT = 1 << 6;
    }
}

#[derive(Default)]
pub struct InputState {
    pub keys: KeyState,
    /// View yaw in radians, mouse-driven.
    pub view_angle_z: f32,
    /// View pitch in radians.
    pub view_angle_x: f32,
    pub requested_weapon_index: u8,
    pub color: u8,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mouse_delta(&mut self, dz: f32, dx: f32) {
        self.view_angle_z += dz;
        self.view_angle_x = (self.view_angle_x + dx)
            .clamp(-std::f32::consts::FRAC_PI_2, std::f32::consts::FRAC_PI_2);
    }

    /// Movement direction relative to the view, as an angle offset, and
    /// whether any movement key is held.
    fn movement(&self) -> (f32, bool) {
        let mut forward = 0i32;
        let mut strafe = 0i32;
        if self.keys.contains(KeyState::FORWARD) {
            forward += 1;
        }
        if self.keys.contains(KeyState::BACKWARD) {
            forward -= 1;
        }
        if self.keys.contains(KeyState::STRAFE_LEFT) {
            strafe += 1;
        }
        if self.keys.contains(KeyState::STRAFE_RIGHT) {
            strafe -= 1;
        }
        if forward == 0 && strafe == 0 {
            return (0.0, false);
        }
        ((strafe as f32).atan2(forward as f32), true)
    }

    /// Compose this frame's movement message.
    pub fn compose_player_move(&self) -> PlayerMove {
        let (move_offset, moving) = self.movement();

        let acceleration = if !moving {
            0
        } else if self.keys.contains(KeyState::WALK) {
            1
        } else {
            2
        };

        let mut flags = 0u8;
        if self.keys.contains(KeyState::SHOOT) {
            flags |= MOVE_FLAG_SHOOT;
        }
        if self.keys.contains(KeyState::JUMP) {
            flags |= MOVE_FLAG_JUMP;
        }

        PlayerMove {
            view_direction: messages::angle_to_message_angle(self.view_angle_z),
            move_direction: messages::angle_to_message_angle(self.view_angle_z + move_offset),
            acceleration,
            weapon_index: self.requested_weapon_index,
            view_dir_angle_x: messages::angle_to_message_angle(self.view_angle_x),
            view_dir_angle_z: messages::angle_to_message_angle(self.view_angle_z),
            flags: messages::pack_color(flags, self.color),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_run_composes_the_expected_message() {
        let mut input = InputState::new();
        input.keys = KeyState::FORWARD;
        input.requested_weapon_index = 1;

        let m = input.compose_player_move();
        assert_eq!(m.move_direction, 0);
        assert_eq!(m.acceleration, 2);
        assert_eq!(m.weapon_index, 1);
        assert_eq!(m.flags, 0);
    }

    #[test]
    fn walk_modifier_lowers_the_acceleration_tier() {
        let mut input = InputState::new();
        input.keys = KeyState::FORWARD | KeyState::WALK;
        assert_eq!(input.compose_player_move().acceleration, 1);

        input.keys = KeyState::WALK;
        assert_eq!(input.compose_player_move().acceleration, 0);
    }

    #[test]
    fn strafing_offsets_the_movement_direction() {
        let mut input = InputState::new();
        input.keys = KeyState::STRAFE_LEFT;
        let m = input.compose_player_move();
        // A quarter turn from the view direction.
        assert_eq!(m.move_direction, 16384);
        assert_eq!(m.view_direction, 0);
    }

    #[test]
    fn quantisation_is_deterministic() {
        let mut input = InputState::new();
        input.keys = KeyState::FORWARD | KeyState::SHOOT;
        input.add_mouse_delta(0.123456, -0.2);

        let a = input.compose_player_move();
        let b = input.compose_player_move();
        assert_eq!(a, b);
        assert_ne!(a.flags & MOVE_FLAG_SHOOT, 0);
    }

    #[test]
    fn pitch_clamps_at_straight_up_and_down() {
        let mut input = InputState::new();
        input.add_mouse_delta(0.0, 10.0);
        assert!((input.view_angle_x - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        input.add_mouse_delta(0.0, -20.0);
        assert!((input.view_angle_x + std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }
}
