//! File-based tracing setup
//!
//! droidherd is a CLI whose stdout and stderr belong to the user, so tracing
//! output goes to a daily-rolled file under the platform data directory
//! instead. Verbosity is controlled by the `DROIDHERD_LOG` environment
//! variable, which takes any `EnvFilter` directive:
//!
//! ```bash
//! DROIDHERD_LOG=debug droidherd devices
//! DROIDHERD_LOG=droidherd_engine=trace droidherd batch --folder ./accounts --device emu-5554
//! ```

use std::path::PathBuf;

use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

const LOG_ENV_VAR: &str = "DROIDHERD_LOG";
const LOG_FILE_PREFIX: &str = "droidherd.log";
const DEFAULT_FILTER: &str = "droidherd=info,warn";

/// Directory log files are written to: `<data-local-dir>/droidherd/logs`.
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("droidherd")
        .join("logs")
}

/// Path of the current log file (the appender adds the date suffix).
pub fn current_log_file() -> PathBuf {
    log_dir().join(LOG_FILE_PREFIX)
}

/// Install the global subscriber. Call once at startup.
pub fn init() -> Result<()> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;

    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = fmt::layer()
        .with_writer(rolling::daily(&dir, LOG_FILE_PREFIX))
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::config(format!("failed to install subscriber: {}", e)))?;

    tracing::info!("droidherd session start, logging to {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_paths_are_consistent() {
        let file = current_log_file();
        assert!(file.starts_with(log_dir()));
        assert!(file.ends_with(LOG_FILE_PREFIX));
    }
}
