//! The client proper: connection, replicated state, input and camera.

use std::rc::Rc;

use glam::{Vec2, Vec3};

use chasm_core::game_constants::PLAYER_EYES_LEVEL;
use chasm_core::map::{MapDataPtr, MapLoader};
use chasm_core::messages::Message;
use chasm_core::net::{ConnectionPtr, MessagesExtractor, MessagesSender};
use chasm_core::resources::GameResourcesPtr;
use chasm_core::time::Time;

use crate::input::InputState;
use crate::map_state::MapState;
use crate::minimap_state::MinimapState;
use crate::render::Camera;
use crate::sound::SoundEngine;
use crate::weapon_state::WeaponState;

struct ConnectionInfo {
    sender: MessagesSender,
    extractor: MessagesExtractor,
}

pub struct Client {
    game_resources: GameResourcesPtr,
    map_loader: Rc<MapLoader>,

    connection: Option<ConnectionInfo>,
    pub map_state: MapState,
    pub weapon_state: WeaponState,
    pub input: InputState,
    pub sound: SoundEngine,

    current_map_data: Option<MapDataPtr>,
    minimap_state: Option<MinimapState>,
    /// Set when a `MapChange` arrived; the host hands the map to the renderer.
    map_changed: bool,
}

impl Client {
    pub fn new(game_resources: GameResourcesPtr, map_loader: Rc<MapLoader>) -> Client {
        Client {
            sound: SoundEngine::new(Rc::clone(&game_resources)),
            weapon_state: WeaponState::new(Rc::clone(&game_resources)),
            game_resources,
            map_loader,
            connection: None,
            map_state: MapState::new(),
            input: InputState::new(),
            current_map_data: None,
            minimap_state: None,
            map_changed: false,
        }
    }

    pub fn set_connection(&mut self, connection: ConnectionPtr) {
        self.connection = Some(ConnectionInfo {
            sender: MessagesSender::new(Rc::clone(&connection)),
            extractor: MessagesExtractor::new(connection),
        });
    }

    pub fn disconnect(&mut self) {
        if let Some(info) = self.connection.take() {
            info.sender.connection().disconnect();
        }
        self.map_state = MapState::new();
        self.current_map_data = None;
        self.minimap_state = None;
        self.sound.stop_all();
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .map(|c| !c.sender.connection().is_disconnected())
            .unwrap_or(false)
    }

    pub fn map_data(&self) -> Option<&MapDataPtr> {
        self.current_map_data.as_ref()
    }

    pub fn minimap_state(&self) -> Option<&MinimapState> {
        self.minimap_state.as_ref()
    }

    /// The freshly loaded map, once per map change, for the renderer.
    pub fn take_changed_map(&mut self) -> Option<MapDataPtr> {
        if self.map_changed {
            self.map_changed = false;
            self.current_map_data.clone()
        } else {
            None
        }
    }

    fn change_map(&mut self, map_number: u32, now: Time) {
        match self.map_loader.load_map(map_number) {
            Ok(map_data) => {
                self.map_state = MapState::new();
                self.map_state.tick(now);
                self.minimap_state = Some(MinimapState::new(Rc::clone(&map_data)));
                self.sound.stop_all();
                self.sound.load_map_sounds(&map_data.map_sounds);
                self.current_map_data = Some(map_data);
                self.map_changed = true;
                log::info!("client entered map {}", map_number);
            }
            Err(e) => log::warn!("client can not load map {}: {:#}", map_number, e),
        }
    }

    /// One client frame: ingest messages, advance local animation, send input.
    pub fn tick(&mut self, now: Time) {
        self.map_state.tick(now);

        // Drain both channels first, then apply in arrival order: the
        // messages following a `MapChange` in the same batch belong to the
        // new map and must land in the fresh state.
        let mut incoming: Vec<Message> = Vec::new();
        if let Some(info) = self.connection.as_mut() {
            info.extractor.process_messages(|message| incoming.push(message));
        }

        let mut sounds: Vec<(u16, Option<Vec2>)> = Vec::new();
        for message in incoming {
            match message {
                Message::MapChange(m) => self.change_map(m.map_number, now),
                Message::PlayerWeapon(m) => self.weapon_state.process_message(&m, now),
                Message::MapEventSound(m) => {
                    let pos = chasm_core::messages::message_position_to_position(&m.xyz);
                    sounds.push((m.sound_id as u16, Some(Vec2::new(pos.x, pos.y))));
                }
                Message::MonsterLinkedSound(m) => {
                    sounds.push((m.sound_id as u16, monster_xy(&self.map_state, m.monster_id)));
                }
                Message::MonsterSound(m) => {
                    // Monster voice slots resolve through the monster's own
                    // sound table; the global fallback keeps it audible.
                    sounds.push((
                        m.monster_sound_id as u16,
                        monster_xy(&self.map_state, m.monster_id),
                    ));
                }
                other => self.map_state.process_message(other),
            }
        }

        self.weapon_state.tick(now);

        let (own_pos, _) = self.map_state.own_position.sample(now);
        self.sound
            .set_listener(Vec2::new(own_pos.x, own_pos.y), self.input.view_angle_z);
        for (sound_id, pos) in sounds {
            match pos {
                Some(pos) => self.sound.play_sound_at(sound_id, pos),
                None => self.sound.play_head_sound(sound_id),
            }
        }

        if let Some(minimap) = self.minimap_state.as_mut() {
            minimap.update(Vec2::new(own_pos.x, own_pos.y), self.input.view_angle_z);
        }

        // At most one input packet per frame.
        if let Some(info) = self.connection.as_mut() {
            if self.map_state.spawn_received {
                let message = self.input.compose_player_move();
                info.sender.send_unreliable_message(message);
                info.sender.flush();
            }
        }
    }

    /// First-person camera: authoritative position, local view angles.
    pub fn camera(&self, now: Time) -> Camera {
        let (pos, _) = self.map_state.own_position.sample(now);
        Camera::new(
            pos + Vec3::new(0.0, 0.0, PLAYER_EYES_LEVEL),
            self.input.view_angle_z,
            self.input.view_angle_x,
        )
    }

    pub fn game_resources(&self) -> &GameResourcesPtr {
        &self.game_resources
    }
}

fn monster_xy(map_state: &MapState, monster_id: chasm_core::messages::EntityId) -> Option<Vec2> {
    map_state.monsters.get(&monster_id).map(|m| {
        let (pos, _) = m.position.sample(Time::ZERO);
        Vec2::new(pos.x, pos.y)
    })
}
