//! Tracing setup for the game server.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Used when `RUST_LOG` is unset. Per-frame traffic only shows at debug.
pub const DEFAULT_FILTER: &str = "info,roomgame=info,tower_http=info,axum=info";

pub fn init() -> bool {
    init_with(DEFAULT_FILTER)
}

/// Install the global subscriber; `RUST_LOG` wins over `default_filter`.
/// Returns false if a subscriber was already installed.
pub fn init_with(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_names(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_with("warn");
        assert!(!init_with("debug"));
    }
}
