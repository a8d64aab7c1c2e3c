use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "resilience-cli")]
#[command(about = "Operator CLI for the resilience layer", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show overall and per-backend health
    Health,
    /// Show queue and recovery statistics
    Stats,
    /// Check whether a backend's circuit is accepting calls
    Available {
        /// speech-to-text, text-to-speech or conversational-ai
        backend: String,
    },
    /// Submit a JSON payload to a backend
    Submit {
        backend: String,
        /// Payload as a JSON document
        payload: String,
        #[arg(short, long, default_value = "normal")]
        priority: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Stats => {
            let res = client.get(format!("{}/stats", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Available { backend } => {
            let res = client
                .get(format!("{}/backends/{}/available", cli.url, backend))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Submit {
            backend,
            payload,
            priority,
            timeout_ms,
            max_attempts,
        } => {
            let payload: Value = serde_json::from_str(&payload)?;
            let mut body = json!({ "payload": payload, "priority": priority });
            if let Some(ms) = timeout_ms {
                body["timeoutMs"] = json!(ms);
            }
            if let Some(n) = max_attempts {
                body["maxAttempts"] = json!(n);
            }
            let res = client
                .post(format!("{}/v1/backends/{}", cli.url, backend))
                .json(&body)
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Some(retry_after) = res.headers().get(reqwest::header::RETRY_AFTER) {
        eprintln!("Retry-After: {}s", retry_after.to_str().unwrap_or("?"));
    }
    if !status.is_success() {
        eprintln!("Error: service returned status {}", status);
    }

    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
