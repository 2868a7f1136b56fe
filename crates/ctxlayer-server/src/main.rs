//! Context intelligence layer service entry point.

mod cli;
mod server;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use ctxlayer_core::{Config, Runtime};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!(git_commit = env!("GIT_COMMIT"), build_time = env!("BUILD_TIME"), "starting");

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Migrate => {
            let runtime = Runtime::bootstrap(config).await?;
            runtime.memory.initialize().await?;
            println!("migrations applied");
        }
        Commands::Serve { host, port } => {
            let runtime = Arc::new(Runtime::bootstrap(config).await?);
            server::run(runtime, &host, port).await?;
        }
        Commands::Health { url } => match health_check(&url).await {
            Ok(()) => println!("ok"),
            Err(e) => {
                eprintln!("health check failed: {e}");
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

async fn health_check(base_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let response = reqwest::get(&url).await?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("unexpected status {}", response.status()).into())
    }
}
