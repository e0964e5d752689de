use anyhow::Context;
use handyman_backend::{
    app,
    config::{env_var, Config},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "handyman_backend=info,tower_http=info";

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = env_var("LOG_FORMAT", Some("pretty"))
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads .env first so RUST_LOG and LOG_FORMAT from it apply to logging.
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing();
    app::run(config).await
}
