use anyhow::Context;
use portal_core::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("thunder_portal=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let path = thunder_portal::config_path(
        std::env::args().skip(1),
        std::env::var(thunder_portal::CONFIG_ENV).ok(),
    );
    let config = AppConfig::load(path.as_deref()).context("loading configuration")?;

    thunder_portal::run(config).await
}
