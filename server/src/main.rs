//! Dedicated server binary.

use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chasm_core::game_constants::{Difficulty, DEFAULT_BASE_UDP_PORT, DEFAULT_TCP_PORT};
use chasm_core::map::MapLoader;
use chasm_core::net::socket::ServerListener;
use chasm_core::time::Clock;
use chasm_core::vfs::Vfs;

use chasm_server::Server;

struct Options {
    addon_paths: Vec<PathBuf>,
    map_number: u32,
    difficulty: Difficulty,
    tcp_port: u16,
    base_udp_port: u16,
}

fn parse_options(args: &[String]) -> Options {
    let mut options = Options {
        addon_paths: Vec::new(),
        map_number: 1,
        difficulty: Difficulty::Normal,
        tcp_port: DEFAULT_TCP_PORT,
        base_udp_port: DEFAULT_BASE_UDP_PORT,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addon-path" => {
                options
                    .addon_paths
                    .push(PathBuf::from(next_value(args, &mut i)));
            }
            "--map" => {
                options.map_number = next_value(args, &mut i).parse().unwrap_or(1).clamp(1, 99);
            }
            "--difficulty" => {
                let name = next_value(args, &mut i);
                options.difficulty = Difficulty::parse(&name).unwrap_or_else(|| {
                    eprintln!("unknown difficulty \"{}\"", name);
                    process::exit(1);
                });
            }
            "--port" => {
                options.tcp_port = next_value(args, &mut i).parse().unwrap_or(DEFAULT_TCP_PORT);
            }
            other => {
                eprintln!("unknown argument \"{}\"", other);
                process::exit(1);
            }
        }
        i += 1;
    }

    options
}

fn next_value(args: &[String], i: &mut usize) -> String {
    let flag = args[*i].clone();
    *i += 1;
    args.get(*i).cloned().unwrap_or_else(|| {
        eprintln!("missing value for {}", flag);
        process::exit(1);
    })
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_options(&args);

    chasm_core::initialize_logger(log::LevelFilter::Info, Some(chasm_core::LOG_FILE_NAME))
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize logger: {}. Exiting.", e);
            process::exit(1);
        });

    log::info!("starting dedicated server, pid {}", process::id());

    let quit_flag = Arc::new(AtomicBool::new(false));
    {
        let quit_flag = Arc::clone(&quit_flag);
        ctrlc::set_handler(move || {
            quit_flag.store(true, Ordering::SeqCst);
        })
        .expect("can not install signal handler");
    }

    let vfs = match Vfs::open(Path::new("CSM.BIN"), &options.addon_paths) {
        Ok(vfs) => Rc::new(vfs),
        Err(e) => {
            log::error!("{:#}", e);
            process::exit(1);
        }
    };
    let game_resources = match chasm_core::resources::load_game_resources(Rc::clone(&vfs)) {
        Ok(resources) => resources,
        Err(e) => {
            log::error!("{:#}", e);
            process::exit(1);
        }
    };
    let map_loader = Rc::new(MapLoader::new(vfs, Rc::clone(&game_resources)));

    let listener = match ServerListener::bind(options.tcp_port, options.base_udp_port) {
        Ok(listener) => Rc::new(listener),
        Err(e) => {
            log::error!("{:#}", e);
            process::exit(1);
        }
    };
    log::info!(
        "listening on tcp port {}, udp base {}",
        options.tcp_port,
        options.base_udp_port
    );

    let mut server = Server::new(game_resources, map_loader, listener, options.difficulty);
    if let Err(e) = server.change_map(options.map_number) {
        log::error!("{:#}", e);
        process::exit(1);
    }

    let clock = Clock::new();
    while !quit_flag.load(Ordering::SeqCst) {
        server.tick(clock.now());
        std::thread::sleep(std::time::Duration::from_millis(16));
    }

    log::info!("shutdown signal received, exiting");
}
