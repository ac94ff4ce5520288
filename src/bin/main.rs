use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dashgate::{GatewayConfig, InMemoryProvider, JwksCache, fallback_jwks};

#[derive(Parser)]
#[command(name = "dashgate")]
#[command(about = "Authentication gateway for the dashboard platform")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the gateway in front of the dashboard platform
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Base URL of the IdAM instance publishing the signing keys
        #[arg(long, env = "DASHGATE_IDAM_URL")]
        idam_url: String,
        /// Client id employee tokens must be issued for (empty disables
        /// the audience check)
        #[arg(long, env = "DASHGATE_CLIENT_ID", default_value = "")]
        client_id: String,
        /// Base URL of the dashboard platform
        #[arg(long, env = "DASHGATE_PLATFORM_URL")]
        platform_url: String,
        /// Name of the platform session cookie
        #[arg(long, env = "DASHGATE_COOKIE_NAME", default_value = "platform_session")]
        cookie_name: String,
        /// Orgs to seed the built-in provider with, as name=id pairs
        #[arg(long, env = "DASHGATE_ORGS", value_delimiter = ',')]
        orgs: Vec<String>,
    },
    /// Fetch the JWK set once and print what would be cached
    FetchKeys {
        #[arg(long, env = "DASHGATE_IDAM_URL")]
        idam_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dashgate=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            idam_url,
            client_id,
            platform_url,
            cookie_name,
            orgs,
        } => {
            let config = GatewayConfig::new(idam_url, platform_url)
                .with_client_id(client_id)
                .with_cookie_name(cookie_name);

            info!("Starting dashgate on port {}", port);
            info!("Using IdAM at {}", config.idam_base_url);
            info!("Using dashboard platform at {}", config.platform_base_url);

            let provider = Arc::new(InMemoryProvider::with_orgs(parse_orgs(&orgs)?));
            let authenticator = dashgate::create_gateway(&config, provider).await?;

            dashgate::server::run_server(authenticator, port).await?;
        }
        Commands::FetchKeys { idam_url } => {
            let config = GatewayConfig {
                idam_base_url: idam_url,
                ..GatewayConfig::default()
            };
            config.validate()?;

            let keys = JwksCache::new(config.jwks_url(), fallback_jwks());
            keys.refresh().await?;

            println!(
                "Retrieved {} key(s) from {}",
                keys.key_count().await,
                config.jwks_url()
            );
            for (kid, fingerprint) in keys.key_fingerprints().await {
                println!("  {}  sha256:{}", kid, fingerprint);
            }
        }
    }

    Ok(())
}

/// Parse `--orgs` entries of the form `name=id` into the provider's seed
/// list. Org 1 always exists on the platform, so it is always seeded.
fn parse_orgs(pairs: &[String]) -> Result<Vec<(String, i64)>> {
    let mut orgs = vec![(
        "default".to_string(),
        dashgate::auth::roles::DEFAULT_ORG_ID,
    )];
    for pair in pairs {
        match pair.split_once('=') {
            Some((name, id)) => orgs.push((name.trim().to_string(), id.trim().parse()?)),
            None => anyhow::bail!("invalid org '{}', expected name=id", pair),
        }
    }
    Ok(orgs)
}
