//! text-labeler server binary.

use text_labeler::{api, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("text_labeler=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!(
        "Starting text-labeler v{} (dev_mode={}, database={})",
        env!("CARGO_PKG_VERSION"),
        config.dev_mode,
        config.database_path.display()
    );
    tracing::info!(
        "Pricing: {} / {} per million input / output tokens",
        config.pricing.price_per_million_input_tokens,
        config.pricing.price_per_million_output_tokens
    );

    api::serve(config).await
}
