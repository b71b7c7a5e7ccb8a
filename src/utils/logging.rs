//! Per-module switchable logging.
//!
//! Each module that logs through these macros declares its own flag:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn};
//!
//! log_info!("scan produced {} segments", count);
//! ```
//! Flipping the flag to `false` silences that module without touching the
//! global `RUST_LOG` filter, which is handy for the chatty controller loop.

/// Conditional `log::debug!`, gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Conditional `log::info!`, gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional `log::warn!`, gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Conditional `log::error!`, gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Initialise `env_logger` from `RUST_LOG`, defaulting to `Info`.
///
/// `TWHIGHLIGHT_DEBUG=1` (or `true`) raises the default to `Debug`.
pub fn init() {
    let debug_mode = std::env::var("TWHIGHLIGHT_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let level = if debug_mode {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // try_init: tests and embedders may already have installed a logger
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}
