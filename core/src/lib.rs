use log::{LevelFilter, SetLoggerError};
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};

pub mod commands;
pub mod fixed;
pub mod game_constants;
pub mod images;
pub mod map;
pub mod messages;
pub mod net;
pub mod random;
pub mod resources;
pub mod save;
pub mod settings;
pub mod test_fixtures;
pub mod time;
pub mod vfs;

/// Log file written next to the executable, append-only.
pub const LOG_FILE_NAME: &str = "panzer_chasm.log";

/// Install the process-wide logger: everything to the log file, the requested
/// level to stderr. Call once at startup, before any other subsystem.
pub fn initialize_logger(
    log_level: LevelFilter,
    file_path: Option<&str>,
) -> Result<(), SetLoggerError> {
    let stderr = ConsoleAppender::builder().target(Target::Stderr).build();

    let mut config_builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(log_level)))
            .build("stderr", Box::new(stderr)),
    );

    let mut root_builder = Root::builder().appender("stderr");

    if let Some(path) = file_path {
        match FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {l} - {m}\n")))
            .build(path)
        {
            Ok(logfile) => {
                config_builder =
                    config_builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
                root_builder = root_builder.appender("logfile");
            }
            Err(e) => eprintln!("Can not open log file \"{}\": {}", path, e),
        }
    }

    let config = config_builder
        .build(root_builder.build(LevelFilter::Trace))
        .expect("invalid logger config");

    let _handle = log4rs::init_config(config)?;

    Ok(())
}
