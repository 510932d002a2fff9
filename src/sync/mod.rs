//! The sync engine and its background workers.
//!
//! A primary pass runs, in order: housekeeping, queued actions, the
//! feed/folder refresh, stories for the feed set the UI is waiting on,
//! action follow-ups, and recounts. It then hands over to the unread,
//! text and image workers and finally announces notifications.

mod actions;
mod cleanup;
mod engine;
mod images;
mod metadata;
mod recount;
mod service;
mod starred;
mod state;
mod stories;
mod text;
mod unreads;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use engine::SyncEngine;
pub use service::{SubService, Worker};
pub use state::SyncEngineState;
pub use text::NULL_STORY_TEXT;

/// Lock a std mutex, carrying on with the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
