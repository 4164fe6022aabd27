use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "lb-cli")]
#[command(about = "Management CLI for the prefix load balancer", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Admin API key, if the load balancer requires one.
    #[arg(short, long, env = "LB_ADMIN_KEY")]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List routes with their strategy and backends
    Routes,
    /// List backend liveness and load
    Backends,
    /// Add a backend to a route, creating the route if needed
    AddBackend {
        prefix: String,
        backend: String,
        /// Strategy for a newly created route
        #[arg(short, long)]
        strategy: Option<String>,
    },
    /// Remove a backend from a route
    RemoveBackend { prefix: String, backend: String },
    /// Replace a route's backends and/or strategy
    UpdateRoute {
        prefix: String,
        /// Replacement backends (repeatable); omit to keep the current ones
        #[arg(short, long = "backend")]
        backends: Vec<String>,
        #[arg(short, long)]
        strategy: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);
    }
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Routes => {
            client.get(format!("{}/admin/routes", base)).headers(headers).send().await?
        }
        Commands::Backends => {
            client.get(format!("{}/admin/backends", base)).headers(headers).send().await?
        }
        Commands::AddBackend { prefix, backend, strategy } => {
            client
                .post(format!("{}/admin/add-backend", base))
                .headers(headers)
                .json(&json!({ "prefix": prefix, "url": backend, "strategy": strategy }))
                .send()
                .await?
        }
        Commands::RemoveBackend { prefix, backend } => {
            client
                .post(format!("{}/admin/remove-backend", base))
                .headers(headers)
                .json(&json!({ "prefix": prefix, "url": backend }))
                .send()
                .await?
        }
        Commands::UpdateRoute { prefix, backends, strategy } => {
            client
                .post(format!("{}/admin/update-route", base))
                .headers(headers)
                .json(&json!({ "prefix": prefix, "backends": backends, "strategy": strategy }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
