use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use lendbook::config::LendbookConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = LendbookConfig::from_env()?;

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config_file = std::env::var("LENDBOOK_CONFIG").unwrap_or_else(|_| "<none>".to_string());
    info!(
        target: "startup",
        "Lendbook starting: RUST_LOG='{}', config='{}', http_port={}, max_login_attempts={}, permission_cache={}",
        rust_log, config_file, config.http_port, config.max_login_attempts, config.permission_cache_enabled
    );

    lendbook::server::run(config).await
}
