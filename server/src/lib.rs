//! Authoritative game server: the simulation world and its tick driver.

pub mod server;
pub mod world;

pub use server::Server;
pub use world::World;
