use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use emby_relay::accounting::{format_rate, StreamStatSnapshot};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Management CLI for the Emby relay admin API", long_about = None)]
struct Cli {
    #[arg(short, long, env = "RELAY_ADMIN_URL", default_value = "http://127.0.0.1:8081")]
    url: String,

    #[arg(short, long, env = "RELAY_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check relay status and in-flight relays
    Status,
    /// List live media stream records
    Streams {
        /// Print raw JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Only show the N busiest streams
        #[arg(long)]
        top: Option<usize>,
    },
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

    match cli.command {
        Commands::Status => {
            let res = client
                .get(format!("{base}/admin/status"))
                .headers(headers)
                .send()
                .await?;
            let json = read_json(res).await?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::Streams { json, top } => {
            let res = client
                .get(format!("{base}/admin/streams"))
                .headers(headers)
                .send()
                .await?;
            let mut streams: Vec<StreamStatSnapshot> = serde_json::from_value(read_json(res).await?)?;
            if let Some(top) = top {
                streams.truncate(top);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&streams)?);
            } else {
                print_table(&streams);
            }
        }
    }

    Ok(())
}

async fn read_json(res: reqwest::Response) -> Result<Value, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        return Err(format!("admin API returned status {}", status).into());
    }

    Ok(res.json().await?)
}

fn print_table(streams: &[StreamStatSnapshot]) {
    if streams.is_empty() {
        println!("No active streams");
        return;
    }

    println!(
        "{:<48} {:>12} {:>8} {:>6} {:>12} {:>8}",
        "PATH", "BYTES", "CHUNKS", "REQS", "AVG RATE", "IDLE"
    );
    for s in streams {
        let avg = if s.age_secs > 0.0 { s.bytes as f64 / s.age_secs } else { 0.0 };
        println!(
            "{:<48} {:>12} {:>8} {:>6} {:>12} {:>7.1}s",
            s.path,
            s.bytes,
            s.chunks,
            s.requests,
            format_rate(avg),
            s.idle_secs
        );
    }
}
