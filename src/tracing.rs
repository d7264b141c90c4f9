use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Installs the global fmt subscriber shared by the `catalog` and `api_server` binaries.
///
/// `default_filter` applies only when `RUST_LOG` is unset.
pub fn init_tracing(bin: &str, default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing for {bin}: {e}"))?;

    tracing::debug!(bin, version = env!("CARGO_PKG_VERSION"), "tracing ready");
    Ok(())
}
