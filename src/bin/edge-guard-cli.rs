use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use edge_guard::credentials::generate_secret;

#[derive(Parser)]
#[command(name = "edge-guard-cli")]
#[command(about = "Management CLI for the edge guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Admin API key (`admin.api_key`).
    #[arg(short, long, default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show limiter, cache and secret status
    Status,
    /// Lift a rate-limit block for a client
    Unblock { client: String },
    /// Rotate the signing secret
    Rotate {
        /// Rotate even while a transition is in progress
        #[arg(long)]
        force: bool,
    },
    /// Show secret rotation state
    Secrets,
    /// Print a fresh secret without contacting the service
    GenerateSecret {
        #[arg(short, long, default_value_t = 64)]
        length: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::GenerateSecret { length } = cli.command {
        println!("{}", generate_secret(length));
        return Ok(());
    }

    let client = reqwest::Client::new();
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let base = cli.url.trim_end_matches('/');

    let request = match &cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Unblock { client: target } => {
            client.post(format!("{}/admin/clients/{}/unblock", base, target))
        }
        Commands::Rotate { force } => client
            .post(format!("{}/admin/secrets/rotate", base))
            .query(&[("force", force.to_string())]),
        Commands::Secrets => client.get(format!("{}/admin/secrets", base)),
        Commands::GenerateSecret { .. } => unreachable!("handled above"),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("{}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
