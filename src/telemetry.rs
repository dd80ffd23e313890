//! Structured logging setup.
//!
//! Kept deliberately small: this worker has no metrics surface and nothing to export spans
//! to, so only the `tracing-subscriber` `EnvFilter` + fmt layer is initialized. `RUST_LOG`
//! controls verbosity, defaulting to `info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .finish()
        .try_init()
        .ok();
}
