use tracing_subscriber::{fmt, EnvFilter};

use sirix_types::{Result, SirixError};

/// Initializes a process-wide `tracing` subscriber at `level` (e.g. `"info"`,
/// `"sirix=debug"`). Intended for embedding applications and tests, not for
/// the library itself — `sirix` only ever emits events through `tracing`,
/// never configures a subscriber on its own.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| SirixError::Config(format!("invalid log level {level:?}: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| SirixError::Config("logging already initialized".into()))
}
