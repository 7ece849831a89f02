//! Command-line front-end for the Jikan client.

use anime_api::{JikanClient, SearchParams, TopFilter};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::{Config, LogConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search anime by title and filters
    Search {
        query: String,
        /// Comma-separated genre IDs
        #[arg(long, value_delimiter = ',')]
        genres: Vec<u32>,
        #[arg(long)]
        order_by: Option<String>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        page: Option<u32>,
    },
    /// Top anime ranking
    Top {
        /// airing, upcoming, bypopularity or favorite
        #[arg(long)]
        filter: Option<TopFilter>,
        #[arg(long)]
        page: Option<u32>,
    },
    /// Anime airing this season
    SeasonNow {
        #[arg(long)]
        page: Option<u32>,
    },
    /// Anime announced for upcoming seasons
    SeasonUpcoming {
        #[arg(long)]
        page: Option<u32>,
    },
    /// Full details for one anime
    Anime { id: u32 },
    /// Recommendations for one anime
    Recommendations { id: u32 },
    /// All anime genres
    Genres,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let mut log_config = LogConfig::from_config(&config, "anime-api");
    if args.verbose {
        log_config.default_level = tracing::Level::DEBUG;
    }
    shared::logging::init(log_config)?;

    info!(config_file = %args.config.display(), "Loaded configuration");

    let client = JikanClient::new(&config.api).context("Failed to create Jikan client")?;

    match args.command {
        Command::Search {
            query,
            genres,
            order_by,
            sort,
            page,
        } => {
            let params = SearchParams {
                genres,
                order_by,
                sort,
                page,
                ..SearchParams::query(query)
            };
            print_json(&client.search_anime(&params).await?)?;
        }
        Command::Top { filter, page } => {
            print_json(&client.get_top_anime(filter, page).await?)?;
        }
        Command::SeasonNow { page } => {
            print_json(&client.get_season_now(page).await?)?;
        }
        Command::SeasonUpcoming { page } => {
            print_json(&client.get_season_upcoming(page).await?)?;
        }
        Command::Anime { id } => {
            print_json(&client.get_anime_by_id(id).await?)?;
        }
        Command::Recommendations { id } => {
            print_json(&client.get_anime_recommendations(id).await?)?;
        }
        Command::Genres => {
            print_json(&client.get_genres().await?)?;
        }
    }

    let stats = client.cache_stats();
    info!(
        requests = client.dispatched_requests(),
        cached_entries = stats.entries,
        "Done"
    );

    Ok(())
}
