use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use crate::util::env as env_util;

pub const LOG_FILE_NAME: &str = "psc_sync.log";

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// Filter precedence: `RUST_LOG`, then `LOG_LEVEL`, then `default_filter`.
/// When `LOG_PATH` names a directory, output is appended to
/// `<LOG_PATH>/psc_sync.log` instead of stdout.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| match env_util::env_opt("LOG_LEVEL") {
            Some(level) => EnvFilter::try_new(level.trim().to_ascii_lowercase()),
            None => EnvFilter::try_new(default_filter),
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(true);

    let res = match env_util::env_opt("LOG_PATH") {
        Some(dir) => {
            let dir = Path::new(dir.trim());
            fs::create_dir_all(dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE_NAME))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.try_init(),
    };

    res.map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
