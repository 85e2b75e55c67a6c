use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use threadmine_core::WindowDays;
use threadmine_pipeline::{EnvSessions, PipelineConfig, ScrapePipeline};
use threadmine_storage::PgStore;

#[derive(Debug, Parser)]
#[command(name = "threadmine")]
#[command(about = "Mine subreddits for problem statements and business ideas")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the JSON API server.
    Serve,
    /// Run one scrape end to end for a subreddit.
    Scrape {
        /// Subreddit name, with or without the r/ prefix.
        #[arg(long)]
        subreddit: String,
        /// Trailing window in days: 1, 7, or 30.
        #[arg(long, default_value_t = 7)]
        window: u32,
    },
    /// Apply pending database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("threadmine=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => threadmine_web::serve_from_env().await?,
        Commands::Scrape { subreddit, window } => {
            let window = WindowDays::try_from(window).map_err(anyhow::Error::msg)?;
            let store = Arc::new(connect_store().await?);
            store.migrate().await?;
            let tracked = store.upsert_subreddit(&subreddit, true).await?;
            let pipeline = ScrapePipeline::new(
                Arc::new(EnvSessions),
                store,
                PipelineConfig::from_env(),
            );
            let outcome = pipeline.execute(tracked.id, window).await?;
            println!(
                "scrape {}: run_id={} posts={} comments={} problems={} clusters={} ideas={}",
                outcome.status.as_str(),
                outcome.run_id,
                outcome.stats.posts_scraped,
                outcome.stats.comments_scraped,
                outcome.stats.problems_extracted,
                outcome.stats.clusters_created,
                outcome.stats.ideas_generated,
            );
            if let Some(message) = outcome.error_message {
                eprintln!("run error: {message}");
            }
        }
        Commands::Migrate => {
            let store = connect_store().await?;
            store.migrate().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

async fn connect_store() -> Result<PgStore> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    PgStore::connect(&database_url).await
}
