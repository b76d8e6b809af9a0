mod cli;

use altsmith::{config, server::auth};
use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on the
    // verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "altsmith=trace,altsmith_db=debug,altsmith_common=debug,tower_http=debug".to_string()
        } else {
            "altsmith=debug,altsmith_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("altsmith {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::GenerateApiKey => {
            println!("{}", auth::generate_api_key());
            Ok(())
        }
        Commands::GenerateSecret => {
            println!("{}", auth::generate_secret());
            Ok(())
        }
    }
}

async fn start_server(
    host: String,
    port: u16,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    config.server.host = host;
    config.server.port = port;

    tracing::info!("Starting Altsmith");
    altsmith::start(config).await
}

fn validate_config(config_path: Option<&std::path::Path>) -> Result<()> {
    match config::load_config_or_default(config_path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  database: {}", config.database.path);
            println!("  workers: {}", config.scheduler.workers);
            println!("  sweep interval: {}h", config.scheduler.interval_hours);
            println!("  provider order: {}", config.providers.order.join(", "));
            println!("  clients: {}", config.clients.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration is invalid: {e}");
            std::process::exit(1);
        }
    }
}
