use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feedsync::app::AppContext;
use feedsync::cli::{commands, Cli, Commands, DaemonAction};
use feedsync::config::Config;
use feedsync::daemon::{self, Daemon, DaemonConfig};
use feedsync::domain::{FeedSet, ReadingAction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Daemon control needs no database.
    if let Commands::Daemon { action } = &cli.command {
        match action {
            DaemonAction::Stop => {
                daemon::stop_daemon().map_err(anyhow::Error::msg)?;
                println!("Daemon stopping");
                return Ok(());
            }
            DaemonAction::Status => {
                println!("{}", daemon::daemon_status());
                return Ok(());
            }
            DaemonAction::Start { .. } => {}
        }
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("loading configuration")?;
    let ctx = AppContext::new(cli.db.clone(), config)?;

    match cli.command {
        Commands::Sync => {
            commands::sync(&ctx).await?;
        }
        Commands::Feeds => {
            commands::list_feeds(&ctx)?;
        }
        Commands::Actions => {
            commands::list_actions(&ctx)?;
        }
        Commands::Read { story_hash } => {
            commands::perform(&ctx, ReadingAction::mark_story_read(story_hash)).await?;
        }
        Commands::Unread { story_hash } => {
            commands::perform(&ctx, ReadingAction::mark_story_unread(story_hash)).await?;
        }
        Commands::Star { story_hash, tags } => {
            commands::perform(&ctx, ReadingAction::save_story(story_hash, tags)).await?;
        }
        Commands::Unstar { story_hash } => {
            commands::perform(&ctx, ReadingAction::unsave_story(story_hash)).await?;
        }
        Commands::MarkFeedRead { feed_id } => {
            let action = ReadingAction::mark_feed_read(FeedSet::single_feed(feed_id), None, None);
            commands::perform(&ctx, action).await?;
        }
        Commands::Stories { feed_id, limit } => {
            commands::list_stories(&ctx, &feed_id, limit).await?;
        }
        Commands::Daemon {
            action:
                DaemonAction::Start {
                    interval,
                    no_initial_sync,
                    log,
                },
        } => {
            let daemon_config = DaemonConfig {
                update_interval_secs: DaemonConfig::parse_interval(&interval)
                    .map_err(anyhow::Error::msg)?,
                update_on_start: !no_initial_sync,
                log_file: log,
            };
            Daemon::new(Arc::new(ctx), daemon_config).run().await?;
        }
        Commands::Daemon { .. } => {}
    }

    Ok(())
}
