//! Logger wiring
use std::fs::OpenOptions;
use std::sync::Mutex;

use eyre::{eyre, WrapErr};
use seckill_core::Config;
use tracing_subscriber::EnvFilter;

/// Install the global logger
///
/// `RUST_LOG` takes precedence over the configured `log_level`. The log is
/// appended to `log_path` if set, and written to stderr otherwise.
pub fn init(config: &Config) -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .wrap_err_with(|| format!("invalid log_level `{}`", config.log_level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true);

    let installed = match &config.log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("cannot open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|err| eyre!("cannot install logger: {err}"))
}
