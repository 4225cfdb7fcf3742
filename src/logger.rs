//! Logger configuration.

use std::fs;
use std::fs::OpenOptions;
use std::str::FromStr;

use tracing::{Level, debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry, filter};

use crate::config::ApiConfig;

/// Sets the global logger for the application from the `LOG_*` settings of `cfg`.
/// * `log_level` - Log level (DEBUG, INFO, WARN, ERROR). Unknown values fall back to INFO.
/// * `log_to_file` - Whether to log to `log_dir/log_file`.
/// * `log_to_stdout` - Whether to log to stdout.
/// * `log_json` - Write the file layer as JSON lines instead of the compact format.
/// # Usage
/// At the start of the application, call this function to set up the logger.
/// ```no_run
/// use vigil::{config::ApiConfig, logger::set_logger};
/// let cfg = ApiConfig::from_env().unwrap();
/// set_logger(&cfg).unwrap();
/// ```
/// # Errors
/// 1) Returns an error if the log directory cannot be created or the log file cannot be opened.
/// 2) Returns an error if the global subscriber cannot be set.
pub fn set_logger(cfg: &ApiConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Set up the log level and filter.
    let ll = Level::from_str(&cfg.log_level).unwrap_or(Level::INFO);
    let lf = filter::LevelFilter::from_level(ll);

    // If stdout logging is enabled, set up the stdout logging layer.
    let lys = if cfg.log_to_stdout {
        Some(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_filter(lf),
        )
    } else {
        None
    };

    let p = format!("{d}/{f}", d = cfg.log_dir, f = cfg.log_file);

    // If file logging is enabled, create the directory and the layer.
    let (lyf, lyj) = if cfg.log_to_file {
        fs::create_dir_all(&cfg.log_dir)?;
        let f = OpenOptions::new().append(true).create(true).open(&p)?;
        if cfg.log_json {
            let lyj = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(f)
                .with_filter(lf);
            (None, Some(lyj))
        } else {
            let lyf = tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_writer(f)
                .with_filter(lf);
            (Some(lyf), None)
        }
    } else {
        (None, None)
    };

    const BANNER: &str = r#"
|--------------------------------|
|  _    ___       _ __           |
| | |  / (_)___ _(_) /           |
| | | / / / __ `/ / /            |
| | |/ / / /_/ / / /             |
| |___/_/\__, /_/_/              |
|       /____/  prayer requests  |
|--------------------------------|
    "#;
    let s = Registry::default().with(lys).with(lyf).with(lyj);
    tracing::subscriber::set_global_default(s)?;
    info!("{}", BANNER);
    info!("Logger initialized, log level set to: {}", ll);
    if cfg.log_to_stdout {
        debug!("Logging to stdout.")
    }
    if cfg.log_to_file {
        debug!("Logging to file: {}", p.replace('\\', "\\\\"))
    }
    Ok(())
}
