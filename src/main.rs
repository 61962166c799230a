//! Caddystat — self-hosted analytics for reverse-proxy access logs.

use caddystat::app;
use caddystat::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    app::run(config).await
}
