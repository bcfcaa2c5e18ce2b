use anyhow::{Context, Result};
use listmate_backend::config::BackendConfig;
use listmate_backend::runtime::BackendRuntime;
use listmate_backend::server::serve_backend;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,listmate_backend=debug")),
        )
        .init();

    let config = BackendConfig::load();
    if std::env::args().any(|arg| arg == "--write-config") {
        return config.save();
    }

    let runtime = BackendRuntime::bootstrap(config).context("failed to bootstrap backend runtime")?;

    tracing::info!(
        "Starting listmate backend (set LISTMATE_BACKEND_TOKEN + optional LISTMATE_BACKEND_BIND; auth mode via LISTMATE_BACKEND_AUTH_MODE)"
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve_backend(runtime))
}
