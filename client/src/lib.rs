//! Game client: replicated state, prediction-side input, dual-backend
//! renderer and the host loop.

pub mod client;
pub mod host;
pub mod hud;
pub mod input;
pub mod map_state;
pub mod minimap_state;
pub mod render;
pub mod sound;
pub mod weapon_state;

pub use client::Client;
pub use host::{Host, HostOptions};
