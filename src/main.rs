use clap::{Parser, Subcommand};
use log::{LevelFilter, error, info};
use rankline::config::{self, CONFIG_PATH};
use rankline::ui::ranking_table;
use rankline::{LeaderboardClient, PendingRequest, RequestStatus};
use std::error::Error;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "rankline", version, about = "Fetch and submit leaderboard scores")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Leaderboard config file (created with defaults if missing)
    #[arg(long, global = true, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Endpoint URL, overriding the config file
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Log every transport attempt
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current ranking
    Fetch {
        /// Output as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show where a score would place and whether it is worth submitting
    Rank { score: i64 },
    /// Submit a score
    Post { score: i64, name: String },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // --- Logging Setup ---
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .filter_module(
            "rankline::core",
            if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info },
        )
        .init();

    let mut cfg = config::load(&cli.config);
    if let Some(endpoint) = cli.endpoint {
        cfg = cfg.with_endpoint(endpoint);
    }

    let client = match LeaderboardClient::new(cfg) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to set up leaderboard client: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Fetch { json } => {
            let Some(snapshot) = wait_with_spinner(client.spawn_fetch()).flatten() else {
                println!("Ranking unavailable.");
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", ranking_table::render(&snapshot, None));
            }
        }
        Command::Rank { score } => {
            let snapshot = client.fetch_ranking();
            match client.get_user_rank(score, snapshot.as_ref()) {
                Some(rank) => println!("Score {} would place #{}.", ranking_table::format_score(score), rank),
                None => println!("Ranking unavailable; position unknown."),
            }
            println!("{}", client.should_post_to_ranking(score, snapshot.as_ref()).reason);
        }
        Command::Post { score, name } => {
            let outcome = wait_with_spinner(client.spawn_post(score, name.clone()))
                .ok_or("submission worker exited without a result")?;
            if outcome.success {
                match outcome.rank {
                    Some(rank) => println!("{} Ranked #{}.", outcome.message, rank),
                    None => println!("{}", outcome.message),
                }
                if let Some(snapshot) = client.cached_ranking() {
                    println!("{}", ranking_table::render(&snapshot, Some(&name)));
                }
            } else {
                println!("Not submitted: {}", outcome.message);
            }
        }
    }

    info!("Done.");
    Ok(())
}

/// Polls a background request the way a frame loop would.
fn wait_with_spinner<T: Send + 'static>(pending: PendingRequest<T>) -> Option<T> {
    loop {
        match pending.poll() {
            RequestStatus::Ready(value) => return Some(value),
            RequestStatus::Lost => return None,
            RequestStatus::Pending => thread::sleep(POLL_INTERVAL),
        }
    }
}
