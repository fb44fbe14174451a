//! Log output for the server.
//!
//! Events go to stdout through `tracing_subscriber::fmt`, filtered by
//! `RUST_LOG` (default `info`). Library events from `seqalloc` carry `tier`,
//! `batch` and `error` fields, so degradations can be grepped by tier:
//!
//! ```bash
//! RUST_LOG=seqalloc=debug,info seqalloc-server
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()?;
    Ok(())
}
