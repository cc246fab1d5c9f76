use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "runtime-cli")]
#[command(about = "Query a running module runtime through its admin interface", long_about = None)]
struct Cli {
    #[arg(short, long, env = "RUNTIME_ADMIN_URL", default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "RUNTIME_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall runtime status
    Status,
    /// Whether the root unit is loaded (exit code 1 if not)
    Ready,
    /// List every unit and its state
    Units,
    /// Show one unit by tree path, e.g. app/http/auth
    Unit { path: String },
    /// Look up an effective configuration value; omit the key for the whole tree
    Config { key: Option<String> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let request = match &cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Ready => client.get(format!("{}/admin/ready", base)),
        Commands::Units => client.get(format!("{}/admin/units", base)),
        Commands::Unit { path } => {
            client.get(format!("{}/admin/units/{}", base, path.trim_start_matches('/')))
        }
        Commands::Config { key } => {
            let request = client.get(format!("{}/admin/config", base));
            match key {
                Some(key) => request.query(&[("key", key)]),
                None => request,
            }
        }
    };

    let res = request.headers(headers).send().await?;
    let ok = print_response(res).await?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the body; returns whether the status was a success.
async fn print_response(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        return Ok(false);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(true)
}
