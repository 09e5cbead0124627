//! Logging setup (spec §6 "Environment variables" — `LINYAPS_BOX_LOG_LEVEL`,
//! `LINYAPS_BOX_LOG_FORCE_STDERR`). Grounded on `youki::observability`'s
//! `tracing-subscriber` wiring, with the env-var-driven debug/log-file/
//! systemd branching collapsed to the two variables this runtime defines.

use std::os::fd::AsRawFd;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::prelude::*;

const LOG_LEVEL_ENV_NAME: &str = "LINYAPS_BOX_LOG_LEVEL";
const FORCE_STDERR_ENV_NAME: &str = "LINYAPS_BOX_LOG_FORCE_STDERR";

/// Syslog-style severity, 0 (emergency) through 7 (debug); default 7.
fn detect_log_level() -> Result<Level> {
    let raw = match std::env::var(LOG_LEVEL_ENV_NAME) {
        Ok(v) => v.parse::<u8>().with_context(|| format!("invalid {LOG_LEVEL_ENV_NAME}: {v:?}"))?,
        Err(_) => 7,
    };
    Ok(match raw {
        0..=3 => Level::ERROR,
        4 => Level::WARN,
        5 | 6 => Level::INFO,
        _ => Level::DEBUG,
    })
}

/// Initializes the global `tracing` subscriber. Idempotent across repeated
/// calls within a process (later calls are no-ops), matching the teacher's
/// own `try_init` usage.
pub fn init() -> Result<()> {
    let level_filter = tracing_subscriber::filter::LevelFilter::from(detect_log_level()?);
    let force_stderr = std::env::var(FORCE_STDERR_ENV_NAME).is_ok();
    let stderr_is_tty = nix::unistd::isatty(std::io::stderr().as_raw_fd()).unwrap_or(false);

    let subscriber = tracing_subscriber::registry().with(level_filter);

    if force_stderr || stderr_is_tty {
        subscriber
            .with(tracing_subscriber::fmt::layer().without_time().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init logger: {e}"))?;
        return Ok(());
    }

    match tracing_journald::layer() {
        Ok(layer) => {
            subscriber
                .with(layer.with_syslog_identifier("linyaps-box".to_string()))
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init logger: {e}"))?;
        }
        Err(err) => {
            eprintln!("failed to initialize syslog logging, falling back to stderr: {err}");
            subscriber
                .with(tracing_subscriber::fmt::layer().without_time().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init logger: {e}"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn level_thresholds_map_to_expected_severities() {
        std::env::set_var(LOG_LEVEL_ENV_NAME, "0");
        assert_eq!(detect_log_level().unwrap(), Level::ERROR);
        std::env::set_var(LOG_LEVEL_ENV_NAME, "4");
        assert_eq!(detect_log_level().unwrap(), Level::WARN);
        std::env::set_var(LOG_LEVEL_ENV_NAME, "6");
        assert_eq!(detect_log_level().unwrap(), Level::INFO);
        std::env::set_var(LOG_LEVEL_ENV_NAME, "7");
        assert_eq!(detect_log_level().unwrap(), Level::DEBUG);
        std::env::remove_var(LOG_LEVEL_ENV_NAME);
        assert_eq!(detect_log_level().unwrap(), Level::DEBUG);
    }

    #[test]
    #[serial]
    fn invalid_level_is_rejected() {
        std::env::set_var(LOG_LEVEL_ENV_NAME, "not-a-number");
        assert!(detect_log_level().is_err());
        std::env::remove_var(LOG_LEVEL_ENV_NAME);
    }
}
