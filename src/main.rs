use anyhow::Result;
use tollgate::Application;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let app = Application::new().await?;

    // RUST_LOG wins; the configured level is the fallback.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&app.settings().logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if app.settings().logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Tollgate gateway");

    app.run().await?;

    Ok(())
}
