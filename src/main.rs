use clap::Parser;
use tracing_subscriber::EnvFilter;

use carel_agent::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` may set RUST_LOG, so it is read before the subscriber exists.
    let env_report = carel_agent::bootstrap::load_carel_env();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("carel_agent=info"));
    let json = std::env::var("CAREL_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    env_report.log();

    cli::run(Cli::parse()).await
}
