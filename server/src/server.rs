//! The authoritative server: connections, tick driving, message emission.

use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::{Context, Result};

use chasm_core::game_constants::{Difficulty, MAX_TICK, MIN_TICK, VISIBILITY_DISTANCE};
use chasm_core::map::MapLoader;
use chasm_core::messages::{self, EntityId, Message};
use chasm_core::net::{ConnectionPtr, ConnectionsListenerPtr, MessagesExtractor, MessagesSender};
use chasm_core::resources::GameResourcesPtr;
use chasm_core::save;
use chasm_core::time::Time;

use crate::world::{wall_position_message, SavedWorld, WeaponState, World};

struct ClientConnection {
    sender: MessagesSender,
    extractor: MessagesExtractor,
    player_slot: u8,
    known_entities: BTreeSet<EntityId>,
}

pub struct Server {
    game_resources: GameResourcesPtr,
    map_loader: Rc<MapLoader>,
    connections_listener: ConnectionsListenerPtr,
    connections: Vec<ClientConnection>,

    world: Option<World>,
    current_map_number: u32,
    difficulty: Difficulty,
    rng_seed: u64,
    saves_dir: std::path::PathBuf,

    last_tick: Option<Time>,
    last_tick_duration: Time,
}

impl Server {
    pub fn new(
        game_resources: GameResourcesPtr,
        map_loader: Rc<MapLoader>,
        connections_listener: ConnectionsListenerPtr,
        difficulty: Difficulty,
    ) -> Server {
        Server {
            game_resources,
            map_loader,
            connections_listener,
            connections: Vec::new(),
            world: None,
            current_map_number: 0,
            difficulty,
            rng_seed: 0x5EED,
            saves_dir: std::path::PathBuf::from("."),
            last_tick: None,
            last_tick_duration: Time::ZERO,
        }
    }

    pub fn set_saves_dir(&mut self, dir: std::path::PathBuf) {
        self.saves_dir = dir;
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn last_tick_duration(&self) -> Time {
        self.last_tick_duration
    }

    pub fn change_map(&mut self, map_number: u32) -> Result<()> {
        let map_data = self
            .map_loader
            .load_map(map_number)
            .with_context(|| format!("can not load map {}", map_number))?;

        self.current_map_number = map_number;
        let mut world = World::new(
            map_data,
            Rc::clone(&self.game_resources),
            self.difficulty,
            self.rng_seed,
        );

        for connection in &mut self.connections {
            connection.known_entities.clear();
            if let Some((slot, _)) = world.spawn_player() {
                connection.player_slot = slot;
            }
            connection
                .sender
                .send_reliable_message(messages::MapChange {
                    map_number,
                    need_play_cutscene: 0,
                });
        }

        self.world = Some(world);

        // Catch-up state after the map change message.
        for i in 0..self.connections.len() {
            self.send_catch_up_state(i);
            self.connections[i].sender.flush();
        }

        Ok(())
    }

    /// One server loop iteration. `now` comes from the host's monotonic clock;
    /// the simulation step is `clamp(now - previous, 2 ms, 60 ms)`.
    pub fn tick(&mut self, now: Time) {
        self.accept_new_connections();
        self.drop_dead_connections();
        self.process_client_messages();

        let dt = match self.last_tick {
            Some(last) => (now - last).clamp(MIN_TICK, MAX_TICK),
            None => MIN_TICK,
        };
        self.last_tick = Some(now);
        self.last_tick_duration = dt;

        if let Some(world) = self.world.as_mut() {
            world.tick(dt);
        }

        self.emit_state();

        if self.world.as_ref().map(|w| w.win_requested).unwrap_or(false) {
            let next = self.current_map_number + 1;
            log::info!("level won, switching to map {}", next);
            if let Err(e) = self.change_map(next) {
                log::warn!("{:#}", e);
                if let Some(world) = self.world.as_mut() {
                    world.win_requested = false;
                }
            }
        }
    }

    fn accept_new_connections(&mut self) {
        while let Some(connection) = self.connections_listener.get_new_connection() {
            log::info!("new connection: {}", connection.connection_info());
            self.add_connection(connection);
        }
    }

    fn add_connection(&mut self, connection: ConnectionPtr) {
        let mut client = ClientConnection {
            sender: MessagesSender::new(Rc::clone(&connection)),
            extractor: MessagesExtractor::new(connection),
            player_slot: 0,
            known_entities: BTreeSet::new(),
        };

        if let Some(world) = self.world.as_mut() {
            if let Some((slot, _)) = world.spawn_player() {
                client.player_slot = slot;
            } else {
                log::warn!("server full, dropping connection");
                client.sender.connection().disconnect();
                return;
            }
        }

        client.sender.send_reliable_message(messages::MapChange {
            map_number: self.current_map_number,
            need_play_cutscene: 0,
        });

        self.connections.push(client);
        let index = self.connections.len() - 1;
        self.send_catch_up_state(index);
        self.connections[index].sender.flush();
    }

    fn drop_dead_connections(&mut self) {
        let mut i = 0;
        while i < self.connections.len() {
            if self.connections[i].sender.connection().is_disconnected() {
                let slot = self.connections[i].player_slot;
                log::info!("connection for player slot {} gone", slot);
                if let Some(world) = self.world.as_mut() {
                    world.drop_player(slot);
                }
                self.connections.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn process_client_messages(&mut self) {
        let Some(world) = self.world.as_mut() else {
            for connection in &mut self.connections {
                connection.extractor.process_messages(|_| {});
            }
            return;
        };

        for connection in &mut self.connections {
            let slot = connection.player_slot;
            connection.extractor.process_messages(|message| match message {
                Message::PlayerMove(m) => world.player_move(slot, &m),
                Message::PlayerName(m) => {
                    let name = messages::name_buffer_to_string(&m.name);
                    if let Some(player) = world.players[slot as usize].as_mut() {
                        log::info!("player {} renamed to \"{}\"", slot, name);
                        player.name = name.clone();
                    }
                    world.announce(&format!("{} is here", name));
                }
                Message::DummyNetMessage(_) => {}
                other => {
                    log::warn!("unexpected message for server: {:?}", other.message_id());
                }
            });
        }
    }

    /// All active entities, for a client that just joined or changed map.
    fn send_catch_up_state(&mut self, connection_index: usize) {
        let Some(world) = self.world.as_ref() else {
            return;
        };
        let connection = &mut self.connections[connection_index];

        if let Some(spawn) = world.player_spawn_message(connection.player_slot) {
            connection.sender.send_unreliable_message(spawn);
        }

        for (&id, monster) in &world.monsters {
            connection.known_entities.insert(id);
            connection.sender.send_reliable_message(messages::MonsterBirth {
                monster_id: id,
                initial_state: world.monster_state_message(id, monster),
            });
        }
        for (slot, player) in world.players.iter().enumerate() {
            let Some(player) = player else { continue };
            if slot as u8 == connection.player_slot {
                continue;
            }
            connection.known_entities.insert(player.entity_id);
            connection.sender.send_reliable_message(messages::MonsterBirth {
                monster_id: player.entity_id,
                initial_state: world.player_as_monster_state(player),
            });
        }

        for (wall_index, wall) in world.dynamic_walls.iter().enumerate() {
            connection
                .sender
                .send_unreliable_message(wall_position_message(wall_index as u16, wall));
        }
        for item in &world.items {
            if item.picked {
                connection.sender.send_unreliable_message(messages::ItemState {
                    item_index: item.static_model_index,
                    z: messages::coord_to_message_coord(item.pos.z),
                    picked: 1,
                });
            }
        }
        for (&id, item) in &world.dynamic_items {
            connection
                .sender
                .send_unreliable_message(messages::DynamicItemBirth {
                    item_id: id,
                    xyz: messages::position_to_message_position(item.pos),
                    item_type_id: item.item_type_id,
                });
        }
        for (&id, light) in &world.light_sources {
            connection
                .sender
                .send_unreliable_message(messages::LightSourceBirth {
                    light_source_id: id,
                    xy: messages::position_to_message_position_xy(light.pos),
                    radius: messages::coord_to_message_coord(light.radius),
                    brightness: light.brightness,
                    turn_on_time_ms: light.turn_on_time_ms,
                });
        }
        for (model_index, state) in world.static_model_states.iter().enumerate() {
            if let Some(light_id) = state.rotating_light_id {
                let model = &world.map_data.static_models[model_index];
                connection
                    .sender
                    .send_unreliable_message(messages::RotatingLightSourceBirth {
                        light_source_id: light_id,
                        xy: messages::position_to_message_position_xy(glam::Vec2::new(
                            model.pos.x,
                            model.pos.y,
                        )),
                        radius: messages::coord_to_message_coord(2.0),
                        brightness: 224,
                    });
            }
        }
    }

    fn emit_state(&mut self) {
        let Some(world) = self.world.as_mut() else {
            return;
        };

        let (reliable_events, unreliable_events, removed_monsters) = world.drain_events();

        let slots: Vec<u8> = self.connections.iter().map(|c| c.player_slot).collect();
        let mut per_player_events: Vec<(u8, Vec<Message>)> = Vec::new();
        for slot in slots {
            per_player_events.push((slot, world.drain_player_events(slot)));
        }

        let world = self.world.as_ref().unwrap();

        let mut server_state = messages::ServerState {
            frags: [0; chasm_core::game_constants::MAX_PLAYERS],
            map_time_s: world.map_time.to_seconds() as u16,
            player_count: 0,
            game_rules: 0,
        };
        for (slot, player) in world.players.iter().enumerate() {
            if let Some(player) = player {
                server_state.frags[slot] = player.frags;
                server_state.player_count += 1;
            }
        }
        for connection in &mut self.connections {
            let slot = connection.player_slot;
            let Some(player) = world.players[slot as usize].as_ref() else {
                continue;
            };
            let player_pos = player.pos;

            // Own snapshot.
            connection.sender.send_unreliable_message(messages::PlayerPosition {
                xyz: messages::position_to_message_position(player.pos),
                speed: (player.horizontal_speed * 256.0) as i16,
            });
            connection
                .sender
                .send_unreliable_message(player_state_message(player, slot));
            connection
                .sender
                .send_unreliable_message(player_weapon_message(player));
            connection.sender.send_unreliable_message(server_state);

            // Entity deltas, distance gated, birth-before-delta.
            for (&id, monster) in &world.monsters {
                let distance = (monster.pos - player_pos).length();
                if distance > VISIBILITY_DISTANCE {
                    continue;
                }
                if connection.known_entities.insert(id) {
                    connection.sender.send_reliable_message(messages::MonsterBirth {
                        monster_id: id,
                        initial_state: world.monster_state_message(id, monster),
                    });
                } else {
                    connection
                        .sender
                        .send_unreliable_message(world.monster_state_message(id, monster));
                }
            }
            for (other_slot, other) in world.players.iter().enumerate() {
                let Some(other) = other else { continue };
                if other_slot as u8 == slot {
                    continue;
                }
                if connection.known_entities.insert(other.entity_id) {
                    connection.sender.send_reliable_message(messages::MonsterBirth {
                        monster_id: other.entity_id,
                        initial_state: world.player_as_monster_state(other),
                    });
                } else {
                    connection
                        .sender
                        .send_unreliable_message(world.player_as_monster_state(other));
                }
            }

            for (&id, rocket) in &world.rockets {
                connection.sender.send_unreliable_message(messages::RocketState {
                    rocket_id: id,
                    xyz: messages::position_to_message_position(rocket.pos),
                    angle: [
                        messages::angle_to_message_angle(rocket.angle_z),
                        messages::angle_to_message_angle(rocket.angle_x),
                    ],
                });
            }

            for (wall_index, wall) in world.dynamic_walls.iter().enumerate() {
                if wall.moving {
                    connection
                        .sender
                        .send_unreliable_message(wall_position_message(wall_index as u16, wall));
                }
            }

            // Retirements and broadcast events.
            for &id in &removed_monsters {
                if connection.known_entities.remove(&id) {
                    connection
                        .sender
                        .send_reliable_message(messages::MonsterDeath { monster_id: id });
                }
            }
            for message in &reliable_events {
                connection.sender.send_reliable_message(*message);
            }
            for message in &unreliable_events {
                connection.sender.send_unreliable_message(*message);
            }
            for (event_slot, events) in &per_player_events {
                if *event_slot == slot {
                    for message in events {
                        connection.sender.send_unreliable_message(*message);
                    }
                }
            }

            connection.sender.flush();
        }
    }

    pub fn save(&self, slot_number: u32) -> Result<()> {
        let world = self
            .world
            .as_ref()
            .context("no game in progress to save")?;

        let saved = world.to_saved();
        let content = bincode::serde::encode_to_vec(&saved, bincode::config::standard())
            .context("can not serialise world state")?;

        let comment = save::make_comment(&format!("map {}", self.current_map_number));
        let path = self.saves_dir.join(save::save_file_name_for_slot(slot_number));
        save::save_data(&path, &comment, &content)?;
        log::info!("game saved to slot {}", slot_number);
        Ok(())
    }

    pub fn load(&mut self, slot_number: u32) -> Result<()> {
        let path = self.saves_dir.join(save::save_file_name_for_slot(slot_number));
        let content = save::load_data(&path)?;
        let (saved, _): (SavedWorld, usize) =
            bincode::serde::decode_from_slice(&content, bincode::config::standard())
                .context("can not deserialise world state")?;

        let map_data = self
            .map_loader
            .load_map(saved.map_number)
            .with_context(|| format!("can not load map {}", saved.map_number))?;

        self.current_map_number = saved.map_number;
        self.world = Some(World::from_saved(
            map_data,
            Rc::clone(&self.game_resources),
            self.difficulty,
            saved,
        ));

        // Clients resynchronise exactly like a fresh join.
        for connection in &mut self.connections {
            connection.known_entities.clear();
            connection.sender.send_reliable_message(messages::MapChange {
                map_number: self.current_map_number,
                need_play_cutscene: 0,
            });
        }
        for i in 0..self.connections.len() {
            self.send_catch_up_state(i);
            self.connections[i].sender.flush();
        }

        log::info!("game loaded from slot {}", slot_number);
        Ok(())
    }
}

fn player_state_message(player: &crate::world::Player, slot: u8) -> messages::PlayerState {
    let mut flags = 0u8;
    if player.invisibility_end.is_some() {
        flags |= messages::PLAYER_FLAG_INVISIBLE;
    }
    if player.shield_end.is_some() {
        flags |= messages::PLAYER_FLAG_SHOW_SHIELD;
    }
    if player.chojin_end.is_some() {
        flags |= messages::PLAYER_FLAG_SHOW_CHOJIN;
    }
    messages::PlayerState {
        ammo: player.ammo,
        health: player.health.clamp(0, 255) as u8,
        armor: player.armor.clamp(0, 255) as u8,
        keys_mask: player.keys_mask.bits(),
        weapons_mask: player.weapons_mask.bits(),
        index: slot,
        flags,
    }
}

fn player_weapon_message(player: &crate::world::Player) -> messages::PlayerWeapon {
    // Animation slot 0 is the idle loop, 1 the shoot cycle.
    let animation = match player.weapon_state {
        WeaponState::Fire { .. } | WeaponState::Reload { .. } => 1,
        _ => 0,
    };
    messages::PlayerWeapon {
        current_weapon_index: player.current_weapon_index,
        animation,
        animation_frame: (player.weapon_animation_frame & 0xFF) as u8,
        switch_stage: player.switch_stage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::net::{Connection, LoopbackBuffer};
    use chasm_core::test_fixtures::write_test_archive;
    use chasm_core::vfs::Vfs;

    struct TestHost {
        server: Server,
        client_connection: ConnectionPtr,
        _dir: tempfile::TempDir,
    }

    fn test_host() -> TestHost {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_test_archive(&archive_path);

        let vfs = Rc::new(Vfs::open(&archive_path, &[]).unwrap());
        let resources = chasm_core::resources::load_game_resources(Rc::clone(&vfs)).unwrap();
        let map_loader = Rc::new(chasm_core::map::MapLoader::new(vfs, Rc::clone(&resources)));

        let loopback = Rc::new(LoopbackBuffer::new());
        loopback.request_connect();
        let client_connection = loopback.get_client_side_connection().unwrap();

        let mut server = Server::new(resources, map_loader, loopback, Difficulty::Normal);
        server.change_map(1).unwrap();

        TestHost {
            server,
            client_connection,
            _dir: dir,
        }
    }

    fn drain_client(connection: &ConnectionPtr) -> Vec<Message> {
        let mut extractor = MessagesExtractor::new(Rc::clone(connection));
        let mut out = Vec::new();
        extractor.process_messages(|m| out.push(m));
        out
    }

    fn drain_client_bytes(connection: &ConnectionPtr) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut buffer = [0u8; 4096];
        loop {
            let n = connection.read_reliable_data(&mut buffer);
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&buffer[..n]);
        }
        loop {
            let n = connection.read_unreliable_data(&mut buffer);
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&buffer[..n]);
        }
        bytes
    }

    #[test]
    fn first_tick_delivers_map_change_and_spawn() {
        let mut host = test_host();
        host.server.tick(Time::from_ms(16));

        let messages = drain_client(&host.client_connection);
        assert!(messages
            .iter()
            .any(|m| matches!(m, Message::MapChange(c) if c.map_number == 1)));
        assert!(messages
            .iter()
            .any(|m| matches!(m, Message::PlayerSpawn(_))));
        assert!(messages
            .iter()
            .any(|m| matches!(m, Message::PlayerPosition(_))));

        // One placed monster announced reliably before any delta.
        let birth_pos = messages
            .iter()
            .position(|m| matches!(m, Message::MonsterBirth(_)));
        assert!(birth_pos.is_some());

        let map_time = host.server.world().unwrap().map_time;
        assert!(map_time >= Time::from_ms(2) && map_time <= Time::from_ms(60));
    }

    #[test]
    fn tick_delta_is_clamped_to_bounds() {
        let mut host = test_host();

        host.server.tick(Time::from_ms(100));
        // First tick has no predecessor and uses the minimum step.
        assert_eq!(host.server.last_tick_duration(), Time::from_ms(2));

        host.server.tick(Time::from_ms(101));
        assert_eq!(host.server.last_tick_duration(), Time::from_ms(2));

        host.server.tick(Time::from_ms(117));
        assert_eq!(host.server.last_tick_duration(), Time::from_ms(16));

        host.server.tick(Time::from_ms(1000));
        assert_eq!(host.server.last_tick_duration(), Time::from_ms(60));

        // Map time never decreases.
        let before = host.server.world().unwrap().map_time;
        host.server.tick(Time::from_ms(1001));
        assert!(host.server.world().unwrap().map_time >= before);
    }

    #[test]
    fn run_input_advances_the_player_and_streams_positions() {
        let mut host = test_host();
        host.server.tick(Time::from_ms(16));
        drain_client(&host.client_connection);

        let start_y = host.server.world().unwrap().players[0]
            .as_ref()
            .unwrap()
            .pos
            .y;

        let mut sender = MessagesSender::new(Rc::clone(&host.client_connection));
        let mut position_count = 0;
        for frame in 0..10 {
            sender.send_unreliable_message(messages::PlayerMove {
                view_direction: 0,
                move_direction: 0,
                acceleration: 2,
                weapon_index: 1,
                view_dir_angle_x: 0,
                view_dir_angle_z: 0,
                flags: 0,
            });
            sender.flush();

            host.server.tick(Time::from_ms(32 + frame * 16));
            position_count += drain_client(&host.client_connection)
                .iter()
                .filter(|m| matches!(m, Message::PlayerPosition(_)))
                .count();
        }

        let end_y = host.server.world().unwrap().players[0]
            .as_ref()
            .unwrap()
            .pos
            .y;
        let expected = 10.0 * 0.016 * chasm_core::game_constants::RUN_SPEED;
        assert!(
            (end_y - start_y - expected).abs() < 0.05,
            "moved {}",
            end_y - start_y
        );
        assert!(position_count >= 10);
    }

    #[test]
    fn ammo_decreases_exactly_once_per_shot_and_never_otherwise() {
        let mut host = test_host();

        // Deploy the weapon.
        let mut now = Time::from_ms(16);
        while host.server.world().unwrap().players[0]
            .as_ref()
            .map(|p| p.weapon_state != WeaponState::Idle)
            .unwrap_or(true)
        {
            host.server.tick(now);
            now += Time::from_ms(16);
        }
        drain_client(&host.client_connection);

        let mut sender = MessagesSender::new(Rc::clone(&host.client_connection));
        let mut previous_ammo = host.server.world().unwrap().players[0]
            .as_ref()
            .unwrap()
            .ammo[1] as i32;

        for _ in 0..120 {
            sender.send_unreliable_message(messages::PlayerMove {
                view_direction: 0,
                move_direction: 0,
                acceleration: 0,
                weapon_index: 1,
                view_dir_angle_x: 0,
                view_dir_angle_z: 0,
                flags: messages::MOVE_FLAG_SHOOT,
            });
            sender.flush();

            let rockets_before = host.server.world().unwrap().rockets.len();
            host.server.tick(now);
            now += Time::from_ms(16);
            drain_client(&host.client_connection);

            let world = host.server.world().unwrap();
            let ammo = world.players[0].as_ref().unwrap().ammo[1] as i32;
            let fired_this_tick = world.rockets.len() > rockets_before;

            if fired_this_tick {
                assert_eq!(ammo, previous_ammo - 1);
            } else {
                assert!(ammo >= previous_ammo - 1 && ammo <= previous_ammo);
                if !fired_this_tick {
                    assert!(ammo == previous_ammo || ammo == previous_ammo - 1);
                }
            }
            previous_ammo = ammo;
        }
    }

    #[test]
    fn load_replays_the_same_message_trace() {
        let saves = tempfile::tempdir().unwrap();
        let mut host = test_host();
        host.server.set_saves_dir(saves.path().to_path_buf());

        let mut now = Time::from_ms(16);
        for _ in 0..5 {
            host.server.tick(now);
            now += Time::from_ms(16);
        }
        drain_client_bytes(&host.client_connection);

        host.server.save(0).unwrap();

        let mut second_half = Vec::new();
        for _ in 0..5 {
            host.server.tick(now);
            now += Time::from_ms(16);
            second_half.extend(drain_client_bytes(&host.client_connection));
        }

        host.server.load(0).unwrap();
        drain_client_bytes(&host.client_connection); // map change + catch-up

        let mut replayed = Vec::new();
        for _ in 0..5 {
            host.server.tick(now);
            now += Time::from_ms(16);
            replayed.extend(drain_client_bytes(&host.client_connection));
        }

        assert_eq!(second_half, replayed);
    }
}

