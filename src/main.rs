//! Relay server binary.
//!
//! Reads bind addresses from `HOST_HOST`/`HOST_PORT` and
//! `WS_HOST`/`WS_PORT`, serves until Ctrl+C, then drains every live
//! session before exiting.

use screenrelay::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("screenrelay=info".parse()?),
        )
        .init();

    let config = RelayConfig::from_env()?;
    let server = RelayServer::bind(config).await?;

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
