//! Host executable: single player over loopback by default, `--client` to
//! join a server, `--server` for a dedicated listen loop.

use std::path::PathBuf;
use std::process;
use std::rc::Rc;

use chasm_core::game_constants::{
    Difficulty, DEFAULT_BASE_UDP_PORT, DEFAULT_TCP_PORT,
};

use chasm_client::{Host, HostOptions};

struct Options {
    host: HostOptions,
    dedicated_server: bool,
}

fn next_value(args: &[String], i: &mut usize) -> String {
    let flag = args[*i].clone();
    *i += 1;
    args.get(*i).cloned().unwrap_or_else(|| {
        eprintln!("missing value for {}", flag);
        process::exit(1);
    })
}

fn parse_options(args: &[String]) -> Options {
    let mut options = Options {
        host: HostOptions::default(),
        dedicated_server: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addon-path" => {
                options
                    .host
                    .addon_paths
                    .push(PathBuf::from(next_value(args, &mut i)));
            }
            "--server" => options.dedicated_server = true,
            "--client" => {
                options.host.connect_address = Some(next_value(args, &mut i));
            }
            "--map" => {
                options.host.start_map =
                    next_value(args, &mut i).parse().unwrap_or(1).clamp(1, 99);
            }
            "--difficulty" => {
                let name = next_value(args, &mut i);
                options.host.difficulty = Difficulty::parse(&name).unwrap_or_else(|| {
                    eprintln!("unknown difficulty \"{}\"", name);
                    process::exit(1);
                });
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

fn run_dedicated_server(options: &Options) -> anyhow::Result<()> {
    use chasm_core::map::MapLoader;
    use chasm_core::net::socket::ServerListener;
    use chasm_core::time::Clock;
    use chasm_core::vfs::Vfs;

    let vfs = Rc::new(Vfs::open(
        &options.host.archive_path,
        &options.host.addon_paths,
    )?);
    let game_resources = chasm_core::resources::load_game_resources(Rc::clone(&vfs))?;
    let map_loader = Rc::new(MapLoader::new(vfs, Rc::clone(&game_resources)));
    let listener = Rc::new(ServerListener::bind(DEFAULT_TCP_PORT, DEFAULT_BASE_UDP_PORT)?);
    log::info!("listening on tcp port {}", DEFAULT_TCP_PORT);

    let mut server = chasm_server::Server::new(
        game_resources,
        map_loader,
        listener,
        options.host.difficulty,
    );
    server.change_map(options.host.start_map)?;

    let clock = Clock::new();
    loop {
        server.tick(clock.now());
        std::thread::sleep(std::time::Duration::from_millis(16));
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_options(&args);

    chasm_core::initialize_logger(log::LevelFilter::Info, Some(chasm_core::LOG_FILE_NAME))
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize logger: {}. Exiting.", e);
            process::exit(1);
        });

    if options.dedicated_server {
        if let Err(e) = run_dedicated_server(&options) {
            log::error!("{:#}", e);
            process::exit(1);
        }
        return;
    }

    let mut host = match Host::new(options.host) {
        Ok(host) => host,
        Err(e) => {
            log::error!("{:#}", e);
            process::exit(1);
        }
    };

    while host.loop_once() {
        std::thread::sleep(std::time::Duration::from_millis(4));
    }

    log::info!("clean quit");
}
