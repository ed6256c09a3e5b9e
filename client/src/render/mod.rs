//! Frame rendering: one scene state, two interchangeable backends.
//!
//! The renderer is a pure function of `(MapData, MapState, camera)` into a
//! framebuffer (software) or a stream of device commands (GPU). Both
//! backends share the palette and the per-wall lightmap coordinates, so
//! static lighting is identical between them.

pub mod gpu;
pub mod soft;

use glam::Vec3;

use chasm_core::map::MapDataPtr;
use chasm_core::time::Time;

use crate::map_state::MapState;
use crate::minimap_state::MinimapState;
use crate::weapon_state::WeaponState;

#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub pos: Vec3,
    /// Yaw; zero looks along +Y.
    pub angle_z: f32,
    /// Pitch.
    pub angle_x: f32,
    /// Horizontal field of view in radians.
    pub fov: f32,
}

impl Camera {
    pub fn new(pos: Vec3, angle_z: f32, angle_x: f32) -> Camera {
        Camera {
            pos,
            angle_z,
            angle_x,
            fov: std::f32::consts::FRAC_PI_2,
        }
    }
}

/// The two concrete renderers behind one face, chosen at startup from the
/// settings.
pub enum Renderer {
    Soft(soft::SoftRenderer),
    Gpu(gpu::GlRenderer),
}

impl Renderer {
    pub fn set_map(&mut self, map_data: MapDataPtr) {
        match self {
            Renderer::Soft(r) => r.set_map(map_data),
            Renderer::Gpu(r) => r.set_map(map_data),
        }
    }

    pub fn draw(&mut self, map_state: &MapState, camera: &Camera, now: Time) {
        match self {
            Renderer::Soft(r) => r.draw(map_state, camera, now),
            Renderer::Gpu(r) => r.draw(map_state, camera, now),
        }
    }

    pub fn draw_weapon(&mut self, weapon_state: &WeaponState) {
        match self {
            Renderer::Soft(r) => r.draw_weapon(weapon_state),
            Renderer::Gpu(r) => r.draw_weapon(weapon_state),
        }
    }

    pub fn draw_hud(&mut self, map_state: &MapState, weapon_state: &WeaponState) {
        match self {
            Renderer::Soft(r) => r.draw_hud(map_state, weapon_state),
            Renderer::Gpu(r) => r.draw_hud(map_state, weapon_state),
        }
    }

    pub fn draw_minimap(&mut self, minimap: &MinimapState, camera: &Camera) {
        match self {
            Renderer::Soft(r) => r.draw_minimap(minimap, camera),
            Renderer::Gpu(r) => r.draw_minimap(minimap, camera),
        }
    }

    pub fn do_fullscreen_postprocess(&mut self, map_state: &MapState) {
        match self {
            Renderer::Soft(r) => r.do_fullscreen_postprocess(map_state),
            Renderer::Gpu(r) => r.do_fullscreen_postprocess(map_state),
        }
    }
}
