//! Logging setup on top of `tracing`.
//!
//! ```text
//! TREE_PATCHER_LOG set?  --yes-->  EnvFilter from the variable
//!        |no
//!        v
//! -v count: 0=warn 1=info 2=debug 3+=trace
//! ```
//!
//! Events go to stderr so stdout stays free for the run summary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "TREE_PATCHER_LOG";

/// Filter directive for a `-v` count.
pub fn filter_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(filter_for_verbosity(verbosity)));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .try_init();
}
