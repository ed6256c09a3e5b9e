//! The host: owns server, client, renderer and console, and runs the
//! `server.tick -> client.tick -> render` loop.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};

use chasm_core::commands::{CommandFn, CommandsMap, CommandsMapPtr, CommandsProcessor};
use chasm_core::game_constants::{Difficulty, DEFAULT_CLIENT_UDP_PORT};
use chasm_core::map::MapLoader;
use chasm_core::net::{socket, ConnectionsListenerPtr, LoopbackBuffer};
use chasm_core::resources::{load_game_resources, GameResourcesPtr};
use chasm_core::settings::Settings;
use chasm_core::time::{Clock, Time};
use chasm_core::vfs::Vfs;

use chasm_server::Server;

use crate::client::Client;
use crate::render::{gpu, soft, Renderer};

pub const SETTINGS_FILE_NAME: &str = "chasm.cfg";
const DEFAULT_VIEWPORT: (u32, u32) = (640, 480);

pub struct HostOptions {
    pub archive_path: PathBuf,
    pub addon_paths: Vec<PathBuf>,
    pub start_map: u32,
    pub difficulty: Difficulty,
    pub connect_address: Option<String>,
    pub settings_path: PathBuf,
}

impl Default for HostOptions {
    fn default() -> Self {
        HostOptions {
            archive_path: PathBuf::from("CSM.BIN"),
            addon_paths: Vec::new(),
            start_map: 1,
            difficulty: Difficulty::Normal,
            connect_address: None,
            settings_path: PathBuf::from(SETTINGS_FILE_NAME),
        }
    }
}

enum HostCommand {
    Quit,
    NewGame,
    RunLevel(u32),
    Save(u32),
    Load(u32),
    Connect(String),
    Disconnect,
    VidRestart,
}

pub struct Host {
    settings: Settings,
    commands_processor: CommandsProcessor,
    _host_commands: CommandsMapPtr,
    command_queue: Rc<RefCell<Vec<HostCommand>>>,

    game_resources: GameResourcesPtr,
    map_loader: Rc<MapLoader>,

    loopback_buffer: Option<Rc<LoopbackBuffer>>,
    local_server: Option<Server>,
    client: Client,
    renderer: Renderer,

    clock: Clock,
    quit_requested: bool,
    difficulty: Difficulty,
}

fn parse_slot(args: &[String]) -> u32 {
    args.first().and_then(|a| a.parse().ok()).unwrap_or(0)
}

fn make_renderer(settings: &Settings, game_resources: &GameResourcesPtr) -> Renderer {
    let (width, height) = (
        settings.get_int("r_window_width", DEFAULT_VIEWPORT.0 as i32) as u32,
        settings.get_int("r_window_height", DEFAULT_VIEWPORT.1 as i32) as u32,
    );
    if settings.get_string("r_renderer", "software") == "gl" {
        // The concrete 3D API lives behind the device trait; without a bound
        // window the recording device stands in.
        Renderer::Gpu(gpu::GlRenderer::new(
            Box::<gpu::RecordingDevice>::default(),
            Rc::clone(game_resources),
        ))
    } else {
        Renderer::Soft(soft::SoftRenderer::new(
            Rc::clone(game_resources),
            width,
            height,
        ))
    }
}

impl Host {
    pub fn new(options: HostOptions) -> Result<Host> {
        log::info!("read game archive");
        let vfs = Rc::new(Vfs::open(Path::new(&options.archive_path), &options.addon_paths)?);

        log::info!("loading game resources");
        let game_resources = load_game_resources(Rc::clone(&vfs))?;
        let map_loader = Rc::new(MapLoader::new(vfs, Rc::clone(&game_resources)));

        let settings = Settings::load(options.settings_path.clone());
        let renderer = make_renderer(&settings, &game_resources);

        let command_queue: Rc<RefCell<Vec<HostCommand>>> = Rc::new(RefCell::new(Vec::new()));
        let mut commands = CommandsMap::new();
        {
            let push = |queue: &Rc<RefCell<Vec<HostCommand>>>,
                        f: fn(&[String]) -> HostCommand|
             -> CommandFn {
                let queue = Rc::clone(queue);
                Box::new(move |args| queue.borrow_mut().push(f(args)))
            };
            commands.insert("quit".into(), push(&command_queue, |_| HostCommand::Quit));
            commands.insert("new".into(), push(&command_queue, |_| HostCommand::NewGame));
            commands.insert(
                "go".into(),
                push(&command_queue, |args| {
                    HostCommand::RunLevel(parse_slot(args).clamp(1, 99))
                }),
            );
            commands.insert(
                "save".into(),
                push(&command_queue, |args| HostCommand::Save(parse_slot(args))),
            );
            commands.insert(
                "load".into(),
                push(&command_queue, |args| HostCommand::Load(parse_slot(args))),
            );
            commands.insert(
                "connect".into(),
                push(&command_queue, |args| {
                    HostCommand::Connect(args.first().cloned().unwrap_or_default())
                }),
            );
            commands.insert(
                "disconnect".into(),
                push(&command_queue, |_| HostCommand::Disconnect),
            );
            commands.insert(
                "vid_restart".into(),
                push(&command_queue, |_| HostCommand::VidRestart),
            );
        }
        let host_commands: CommandsMapPtr = Rc::new(commands);
        let mut commands_processor = CommandsProcessor::new();
        commands_processor.register_commands(&host_commands);

        let client = Client::new(Rc::clone(&game_resources), Rc::clone(&map_loader));

        let mut host = Host {
            settings,
            commands_processor,
            _host_commands: host_commands,
            command_queue,
            game_resources,
            map_loader,
            loopback_buffer: None,
            local_server: None,
            client,
            renderer,
            clock: Clock::new(),
            quit_requested: false,
            difficulty: options.difficulty,
        };

        match &options.connect_address {
            Some(address) => host.connect_to(address.clone())?,
            None => host.start_local_game(options.start_map)?,
        }

        Ok(host)
    }

    /// Single player: a local server behind the loopback buffer.
    fn start_local_game(&mut self, map_number: u32) -> Result<()> {
        log::info!("create loopback buffer");
        let loopback = Rc::new(LoopbackBuffer::new());
        loopback.request_connect();

        log::info!("create local server");
        let listener: ConnectionsListenerPtr = Rc::clone(&loopback) as ConnectionsListenerPtr;
        let mut server = Server::new(
            Rc::clone(&self.game_resources),
            Rc::clone(&self.map_loader),
            listener,
            self.difficulty,
        );
        server.change_map(map_number)?;

        let client_connection = loopback
            .get_client_side_connection()
            .context("loopback buffer has no client side")?;
        self.client.set_connection(client_connection);

        self.loopback_buffer = Some(loopback);
        self.local_server = Some(server);
        Ok(())
    }

    fn connect_to(&mut self, address: String) -> Result<()> {
        self.drop_local_game();
        log::info!("connecting to {}", address);
        let connection = socket::connect_to_server(&address, DEFAULT_CLIENT_UDP_PORT)?;
        self.client.set_connection(connection);
        Ok(())
    }

    fn drop_local_game(&mut self) {
        self.client.disconnect();
        self.local_server = None;
        if let Some(loopback) = self.loopback_buffer.take() {
            loopback.request_disconnect();
        }
    }

    pub fn process_console_line(&mut self, line: &str) {
        self.commands_processor.process_command(line, &mut self.settings);
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn local_server(&self) -> Option<&Server> {
        self.local_server.as_ref()
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    fn run_queued_commands(&mut self) {
        let queued: Vec<HostCommand> = self.command_queue.borrow_mut().drain(..).collect();
        for command in queued {
            let result: Result<()> = match command {
                HostCommand::Quit => {
                    self.quit_requested = true;
                    Ok(())
                }
                HostCommand::NewGame => self.change_level(1),
                HostCommand::RunLevel(n) => self.change_level(n),
                HostCommand::Save(slot) => match self.local_server.as_ref() {
                    Some(server) => server.save(slot),
                    None => {
                        log::info!("no local game to save");
                        Ok(())
                    }
                },
                HostCommand::Load(slot) => match self.local_server.as_mut() {
                    Some(server) => server.load(slot),
                    None => {
                        log::info!("no local game to load into");
                        Ok(())
                    }
                },
                HostCommand::Connect(address) => self.connect_to(address),
                HostCommand::Disconnect => {
                    self.drop_local_game();
                    Ok(())
                }
                HostCommand::VidRestart => {
                    self.renderer = make_renderer(&self.settings, &self.game_resources);
                    if let Some(map) = self.client.map_data().cloned() {
                        self.renderer.set_map(map);
                    }
                    Ok(())
                }
            };
            // Failed console actions report to the player and leave the
            // current state untouched.
            if let Err(e) = result {
                log::warn!("{:#}", e);
            }
        }
    }

    fn change_level(&mut self, map_number: u32) -> Result<()> {
        match self.local_server.as_mut() {
            Some(server) => server.change_map(map_number),
            None => self.start_local_game(map_number),
        }
    }

    /// One iteration; returns false when the host wants to quit.
    pub fn loop_once(&mut self) -> bool {
        self.run_queued_commands();

        let now = self.clock.now();

        if let Some(server) = self.local_server.as_mut() {
            server.tick(now);
        }

        self.client.tick(now);

        if let Some(map_data) = self.client.take_changed_map() {
            self.renderer.set_map(map_data);
        }

        if self.client.map_data().is_some() {
            let camera = self.client.camera(self.client.map_state.render_time());
            self.renderer.draw(&self.client.map_state, &camera, now);
            self.renderer.draw_weapon(&self.client.weapon_state);
            self.renderer
                .draw_hud(&self.client.map_state, &self.client.weapon_state);
            if let Some(minimap) = self.client.minimap_state() {
                self.renderer.draw_minimap(minimap, &camera);
            }
            self.renderer.do_fullscreen_postprocess(&self.client.map_state);
        }

        !self.quit_requested
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.settings.store();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::KeyState;
    use chasm_core::game_constants::{MAX_TICK, MIN_TICK, RUN_SPEED};
    use chasm_core::test_fixtures::write_test_archive;

    fn host_in(dir: &Path) -> Host {
        let archive_path = dir.join("CSM.BIN");
        write_test_archive(&archive_path);

        // A small viewport keeps the software rasteriser cheap in tests.
        let settings_path = dir.join(SETTINGS_FILE_NAME);
        std::fs::write(
            &settings_path,
            "\"r_renderer\" \"software\"\r\n\
             \"r_window_width\" \"80\"\r\n\"r_window_height\" \"60\"\r\n",
        )
        .unwrap();

        Host::new(HostOptions {
            archive_path,
            settings_path,
            ..HostOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn start_to_first_tick_spawns_the_player() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host_in(dir.path());

        assert!(host.loop_once());
        // The loopback client saw the map change and its own spawn.
        assert!(host.client().map_state.spawn_received);
        assert!(host.client().map_data().is_some());

        let map_time = host.local_server().unwrap().world().unwrap().map_time;
        assert!(map_time >= MIN_TICK && map_time <= MAX_TICK);
    }

    #[test]
    fn forward_input_moves_the_replicated_player() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host_in(dir.path());

        host.loop_once();
        let now0 = Time::from_ms(0);
        let (start, _) = host.client().map_state.own_position.sample(now0);

        host.client_mut().input.keys = KeyState::FORWARD;
        for _ in 0..20 {
            std::thread::sleep(std::time::Duration::from_millis(4));
            host.loop_once();
        }

        let (end, _) = host
            .client()
            .map_state
            .own_position
            .sample(Time::from_ms(i64::MAX / 2));
        let moved = end.y - start.y;
        assert!(moved > 0.05, "moved {}", moved);
        assert!(moved < RUN_SPEED, "moved {}", moved);
    }

    #[test]
    fn console_go_and_quit_are_wired() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host_in(dir.path());

        host.loop_once();
        host.process_console_line("go 1");
        assert!(host.loop_once());

        host.process_console_line("quit");
        assert!(!host.loop_once());
    }

    #[test]
    fn unknown_commands_fall_through_to_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host_in(dir.path());

        // One argument sets an existing settings key...
        host.process_console_line("r_renderer gl");
        assert_eq!(host.settings.get_string("r_renderer", ""), "gl");

        // ...and a key that never existed stays a missing command.
        host.process_console_line("no_such_cvar 1");
        assert!(!host.settings.is_value("no_such_cvar"));
    }

    #[test]
    fn save_then_load_round_trips_through_the_console() {
        let dir = tempfile::tempdir().unwrap();
        let saves = tempfile::tempdir().unwrap();
        let mut host = host_in(dir.path());
        host.local_server
            .as_mut()
            .unwrap()
            .set_saves_dir(saves.path().to_path_buf());

        for _ in 0..5 {
            host.loop_once();
        }
        host.process_console_line("save 0");
        host.loop_once();

        host.process_console_line("load 0");
        host.loop_once();
        // The reloaded world keeps running.
        assert!(host.local_server().unwrap().world().is_some());
    }
}
