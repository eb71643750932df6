use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vidweave::config::{DEFAULT_LOG_FILTER, Settings};
use vidweave::services::ServiceContainer;
use vidweave::{database, utils};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;

    // Initialize database
    let pool = database::init_pool(&settings.database_url).await?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(pool, &settings).await?;

    // Clear leftovers from interrupted downloads.
    let removed = utils::fs::cleanup_scratch(&settings.temp_dir).await;
    if removed > 0 {
        tracing::info!(removed, "cleaned scratch downloads from previous run");
    }
    container.sweep_expired().await?;

    tracing::info!(
        version = container.context.version(),
        "vidweave initialized successfully"
    );

    Ok(())
}
