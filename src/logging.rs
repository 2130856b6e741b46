// ==========================================
// Logging initialisation
// ==========================================
// tracing + tracing-subscriber
// RUST_LOG overrides the verbosity flags
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// Maps the CLI verbosity counter to a level directive.
///
/// `0` → warn, `1` → info, `2` → debug, `3+` → trace, negative → error.
pub fn level_for(verbosity: i8) -> &'static str {
    match verbosity {
        i8::MIN..=-1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialises the global subscriber.
///
/// # Arguments
/// - `verbosity`: count of `-v` minus count of `-q`
/// - `json`: emit JSON lines instead of human-readable text
///
/// # Environment
/// - RUST_LOG: filter directive, e.g. `RUST_LOG=molmod_importer=trace`
pub fn init(verbosity: i8, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Test subscriber: debug level, captured by the test harness
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
