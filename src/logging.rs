//! Tracing setup.
//!
//! The crate emits structured events through `tracing` and never installs a
//! subscriber on its own; embedding applications bring their own. [`init`]
//! is a convenience for binaries and examples that just want sensible
//! output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a formatting subscriber honoring `RUST_LOG`, defaulting to
/// `mimir=info`. Safe to call more than once; later calls are no-ops.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mimir=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();
}
