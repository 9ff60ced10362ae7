use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use url::Url;

use mcp_gateway::config::{self, GatewayConfig};
use mcp_gateway::observability::logging;
use mcp_gateway::Gateway;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the MCP gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall health with breaker, token and quota reports
    Status,
    /// Circuit breaker states
    Breakers,
    /// Remaining API quotas
    Quotas,
    /// Cached OAuth token status
    Tokens,
    /// Run the OAuth consent flow for a service and store the credential
    Authorize {
        service: String,

        #[arg(short, long)]
        account: Option<String>,

        /// Gateway configuration file (for credential paths and scopes)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let path = match cli.command {
        Commands::Status => "status",
        Commands::Breakers => "breakers",
        Commands::Quotas => "quotas",
        Commands::Tokens => "tokens",
        Commands::Authorize {
            service,
            account,
            config,
        } => return authorize(&service, account.as_deref(), config).await,
    };

    let client = reqwest::Client::new();
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let endpoint = Url::parse(&cli.url)?.join(&format!("admin/{path}"))?;
    let res = client
        .get(endpoint)
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn authorize(
    service: &str,
    account: Option<&str>,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config: GatewayConfig = match config_path {
        Some(path) => config::load_config(&path)?,
        None => config::default_config()?,
    };
    logging::init_logging(&config.observability);

    let gateway = Gateway::from_config(config)?;
    let credential = gateway.auth().reauthorize(service, account).await?;

    println!(
        "Authorized {}:{} (expires {})",
        credential.service,
        credential.account,
        credential
            .expiry
            .map(|e| e.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
