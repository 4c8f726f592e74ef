use clap::Parser;
use nucleus_forms::config::{Args, BatchConfig, Command, ServerConfig};
use nucleus_forms::{batch, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting nucleus-forms v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Batch(batch_args) => {
            let config = BatchConfig::from(batch_args);
            // Image processing is CPU bound, keep it off the async workers
            let summary = tokio::task::spawn_blocking(move || batch::run(&config)).await??;
            if summary.processed == 0 && summary.failed > 0 {
                anyhow::bail!("none of the {} images could be processed", summary.failed);
            }
            Ok(())
        }
        Command::Serve(serve_args) => {
            let config = ServerConfig::from(serve_args);
            tracing::info!("Binding to {}:{}", config.host, config.port);
            server::run(config).await
        }
    }
}
