//! # feedsync
//!
//! An offline-first sync engine for a NewsBlur account.
//!
//! ## Architecture
//!
//! The engine keeps a local SQLite mirror of feeds, folders, stories and
//! social data, and reconciles it with the server in passes:
//!
//! ```text
//! UI actions → action queue → API
//!                    ↓
//! API → feeds/folders, stories, counts → Store → UI queries
//! ```
//!
//! - [`api`]: the remote API trait and its reqwest implementation
//! - [`store`]: SQLite persistence and reading-session bookkeeping
//! - [`sync`]: the engine, its primary pass and background workers
//! - [`cache`]: on-disk image and thumbnail caches
//!
//! ## Quick Start
//!
//! ```bash
//! # One sync pass
//! feedsync sync
//!
//! # List feeds with their unread counts
//! feedsync feeds
//!
//! # Mark a story read; it reaches the server on the next pass
//! feedsync read 42:a1b2c3
//!
//! # Sync every half hour in the background
//! feedsync daemon start --interval 30m
//! ```

/// The NewsBlur API.
///
/// - [`ApiClient`](api::ApiClient): async trait the engine calls
/// - [`HttpApi`](api::HttpApi): reqwest-based implementation
pub mod api;

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// the API client and the sync engine.
pub mod app;

/// Image and thumbnail caches used by the prefetch worker and cleanup.
pub mod cache;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/feedsync/config.toml`.
pub mod config;

/// Background daemon that runs sync passes on an interval.
///
/// - `feedsync daemon start` - Start the background syncer
/// - `feedsync daemon stop` - Stop the daemon
/// - `feedsync daemon status` - Check if the daemon is running
pub mod daemon;

/// Core domain models.
///
/// - [`Feed`](domain::Feed) and [`Folder`](domain::Folder): subscriptions
/// - [`Story`](domain::Story): stories with read, saved and shared state
/// - [`FeedSet`](domain::FeedSet): what a reading session shows
/// - [`ReadingAction`](domain::ReadingAction): queued user actions
pub mod domain;

/// SQLite persistence layer.
pub mod store;

/// The sync engine.
pub mod sync;
