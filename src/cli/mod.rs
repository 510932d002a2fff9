pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "feedsync")]
#[command(about = "Offline-first NewsBlur sync", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/feedsync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file (default: the platform data directory)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one sync pass and wait for it to finish
    Sync,
    /// List feeds with server and local unread counts
    Feeds,
    /// List actions waiting to reach the server
    Actions,
    /// Mark a story read
    Read {
        /// Story hash, e.g. "42:a1b2c3"
        story_hash: String,
    },
    /// Mark a story unread
    Unread {
        story_hash: String,
    },
    /// Save a story
    Star {
        story_hash: String,

        /// Tag to save the story under (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Unsave a story
    Unstar {
        story_hash: String,
    },
    /// Mark every story of a feed read
    MarkFeedRead {
        feed_id: String,
    },
    /// Show the stories of a feed, fetching more if needed
    Stories {
        feed_id: String,

        /// How many stories to show
        #[arg(short = 'n', long, default_value_t = 25)]
        limit: usize,
    },
    /// Background daemon for periodic sync
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Start the background daemon
    Start {
        /// Sync interval (e.g., "15m", "1h", "1d")
        #[arg(short, long, default_value = "1h")]
        interval: String,

        /// Skip the sync on start
        #[arg(long)]
        no_initial_sync: bool,

        /// Log file path (default: stdout)
        #[arg(short, long)]
        log: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_star_with_tags() {
        let cli = Cli::parse_from(["feedsync", "star", "1:a", "-t", "rust", "--tag", "later"]);
        match cli.command {
            Commands::Star { story_hash, tags } => {
                assert_eq!(story_hash, "1:a");
                assert_eq!(tags, vec!["rust", "later"]);
            }
            _ => panic!("expected star"),
        }
    }

    #[test]
    fn test_parse_daemon_start_defaults() {
        let cli = Cli::parse_from(["feedsync", "--db", "/tmp/x.db", "daemon", "start"]);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        match cli.command {
            Commands::Daemon {
                action:
                    DaemonAction::Start {
                        interval,
                        no_initial_sync,
                        log,
                    },
            } => {
                assert_eq!(interval, "1h");
                assert!(!no_initial_sync);
                assert!(log.is_none());
            }
            _ => panic!("expected daemon start"),
        }
    }
}
