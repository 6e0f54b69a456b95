use bookchat_core::BookchatConfig;
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use bookchat_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "bookchat.toml")]
    config: String,

    /// Print configuration status and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match BookchatConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.check {
        let key = if config.provider.api_key.is_some() { "✅" } else { "❌" };
        let store = if config.retrieval.vector_store_id.is_some() { "✅" } else { "❌" };
        println!("{} OPENAI_API_KEY", key);
        println!("{} OPENAI_VECTOR_STORE_ID", store);
        println!("   model:    {}", config.provider.model);
        println!("   provider: {}", config.provider.base_url);
        println!("   listen:   {}:{}", config.http.host, config.http.port);
        return Ok(());
    }

    config.warn_missing();

    let state = HttpState::from_config(config)?;
    tracing::info!(
        model = %state.config.provider.model,
        provider_configured = state.completion.is_some(),
        "Provider client ready"
    );

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
