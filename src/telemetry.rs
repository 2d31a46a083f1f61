//! Ambient logging setup (§6), using `tracing`/`tracing-subscriber` the way
//! the modernized corpus standardizes on it (`jeffa5-themelios` and the rest
//! of the retrieved kube-rs operators), in place of the teacher's bare
//! `log` crate.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs the global `tracing` subscriber. `verbosity` raises the default
/// level above whatever `RUST_LOG` sets when no env var is present at all;
/// an explicit `RUST_LOG` always wins.
pub fn init(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("tracing subscriber already initialized");
}
