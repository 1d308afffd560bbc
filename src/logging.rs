//! Process-wide logging setup.
//!
//! The `env_logger` backend is built once at program start. The same instance
//! is installed as the `log` facade backend for the CLI/GUI layers and handed
//! back so it can be injected into the conversion engine explicitly.

use log::{LevelFilter, Log, Metadata, Record};
use std::sync::Arc;

/// Forwards the global `log` facade to a shared logger
struct SharedLogger(Arc<dyn Log>);

impl Log for SharedLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.0.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        self.0.log(record)
    }

    fn flush(&self) {
        self.0.flush()
    }
}

/// Pick the filter level the way the CLI flags describe it
pub fn level_for(verbose: bool, quiet: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else if quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    }
}

/// Build the logger, install it globally, and return it for injection.
///
/// `RUST_LOG` directives are honoured on top of `level`. Calling this twice
/// keeps the first global logger but still returns a working instance.
pub fn init(level: LevelFilter) -> Arc<dyn Log> {
    let logger = env_logger::Builder::from_default_env()
        .filter_level(level)
        .build();
    let max_level = logger.filter();
    let logger: Arc<dyn Log> = Arc::new(logger);

    if log::set_boxed_logger(Box::new(SharedLogger(Arc::clone(&logger)))).is_ok() {
        log::set_max_level(max_level);
    } else {
        log::debug!("Logger already initialized, keeping the existing one");
    }

    logger
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_levels() {
        assert_eq!(level_for(true, false), LevelFilter::Debug);
        assert_eq!(level_for(false, true), LevelFilter::Warn);
        assert_eq!(level_for(false, false), LevelFilter::Info);
    }
}
