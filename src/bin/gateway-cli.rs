use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the chaos gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3000")]
    url: String,

    #[arg(short, long, env = "ADMIN_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the fault policy in force
    Policy,
    /// Replace the fault policy until the next sync
    Push {
        #[arg(long)]
        enabled: bool,
        #[arg(long, default_value_t = 0.0)]
        error_rate: f64,
        #[arg(long, default_value_t = 0.0)]
        timeout_rate: f64,
        #[arg(long, default_value_t = 0)]
        latency_min_ms: u64,
        #[arg(long, default_value_t = 0)]
        latency_max_ms: u64,
    },
    /// Pull the policy from the chaos service now
    Sync,
    /// Print the JSON metrics summary
    Metrics,
    /// Check gateway health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = match cli.command {
        Commands::Policy => {
            client.get(format!("{base}/admin/policy")).headers(headers).send().await?
        }
        Commands::Push {
            enabled,
            error_rate,
            timeout_rate,
            latency_min_ms,
            latency_max_ms,
        } => {
            let body = json!({
                "enabled": enabled,
                "error_rate": error_rate,
                "timeout_rate": timeout_rate,
                "latency_min_ms": latency_min_ms,
                "latency_max_ms": latency_max_ms,
            });
            client
                .put(format!("{base}/admin/policy"))
                .headers(headers)
                .json(&body)
                .send()
                .await?
        }
        Commands::Sync => {
            client.post(format!("{base}/admin/policy/sync")).headers(headers).send().await?
        }
        Commands::Metrics => client.get(format!("{base}/metrics/summary")).send().await?,
        Commands::Health => client.get(format!("{base}/health")).send().await?,
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {status}");
        if let Ok(text) = res.text().await {
            eprintln!("Response: {text}");
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
