use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::domain::{FeedSet, ReadingAction};

/// Everything the engine remembers between passes.
///
/// None of this is durable. Losing it costs at most a re-fetch: pagination
/// restarts from page one and recount candidates are rediscovered.
#[derive(Debug)]
pub struct SyncEngineState {
    /// Feed set the UI is waiting on, and how many stories it wants.
    pub pending_feed: Option<FeedSet>,
    pub pending_target: usize,
    /// Feed set of the most recent story fetch.
    pub last_feed_set: Option<FeedSet>,
    /// Feed sets for which the server returned an empty page.
    pub exhausted: HashSet<FeedSet>,
    pub pages_seen: HashMap<FeedSet, u32>,
    pub stories_seen: HashMap<FeedSet, usize>,
    /// Pagination of this set is dropped at the start of the next story fetch.
    pub reset_feed: Option<FeedSet>,

    /// Confirmed actions to re-apply locally after story pages land.
    pub followups: Vec<ReadingAction>,
    /// Actions still queued, for status reporting.
    pub last_action_count: usize,

    pub recount_candidates: HashSet<FeedSet>,
    /// Recounted from local stories while offline; the server still has to
    /// confirm them.
    pub local_recounts: HashSet<FeedSet>,
    pub flush_recounts: bool,

    /// Refresh feeds and folders on the next pass regardless of the interval.
    pub do_feeds_folders: bool,
    pub auth_fails: u32,
    pub last_api_failure: Option<Instant>,
    pub orphan_feed_ids: HashSet<String>,
    pub disabled_feed_ids: HashSet<String>,
    pub is_premium: bool,
    pub is_archive: bool,
    pub is_staff: bool,

    pub online: bool,
    pub foreground: bool,
    pub halt_now: bool,
    /// Set when a pass was cut short because the network went away.
    pub offline_now: bool,

    pub housekeeping_running: bool,
    pub actions_running: bool,
    pub ffsync_running: bool,
    pub story_sync_running: bool,
    pub recounts_running: bool,

    /// Synthetic timestamps handed out to feed sets the server does not sort.
    pub read_stamp: i64,
    pub shared_stamp: i64,
}

impl Default for SyncEngineState {
    fn default() -> Self {
        Self {
            pending_feed: None,
            pending_target: 0,
            last_feed_set: None,
            exhausted: HashSet::new(),
            pages_seen: HashMap::new(),
            stories_seen: HashMap::new(),
            reset_feed: None,
            followups: Vec::new(),
            last_action_count: 0,
            recount_candidates: HashSet::new(),
            local_recounts: HashSet::new(),
            flush_recounts: false,
            do_feeds_folders: false,
            auth_fails: 0,
            last_api_failure: None,
            orphan_feed_ids: HashSet::new(),
            disabled_feed_ids: HashSet::new(),
            is_premium: false,
            is_archive: false,
            is_staff: false,
            online: true,
            foreground: true,
            halt_now: false,
            offline_now: false,
            housekeeping_running: false,
            actions_running: false,
            ffsync_running: false,
            story_sync_running: false,
            recounts_running: false,
            read_stamp: 0,
            shared_stamp: 0,
        }
    }
}

impl SyncEngineState {
    /// Whether work should stop now, because of a soft interrupt or because
    /// the network is gone.
    pub fn stop_sync(&mut self) -> bool {
        if self.halt_now {
            info!("Stopping sync, soft interrupt set");
            return true;
        }
        if !self.online {
            self.offline_now = true;
            return true;
        }
        false
    }

    pub fn note_hard_api_failure(&mut self, now: Instant) {
        info!("Hard API failure, backing off background syncs");
        self.last_api_failure = Some(now);
    }

    /// Background passes wait out a window after a hard API failure.
    pub fn in_backoff(&self, now: Instant, window: Duration) -> bool {
        if self.foreground {
            return false;
        }
        self.last_api_failure
            .is_some_and(|failed| now < failed + window)
    }

    /// Ask for more stories of a feed set.
    ///
    /// `caller_seen` is how many stories the caller already shows, if it
    /// knows. Returns whether a story fetch needs to run to satisfy the
    /// request.
    pub fn request_more_for_feed(
        &mut self,
        fs: &FeedSet,
        desired: usize,
        caller_seen: Option<usize>,
    ) -> bool {
        if caller_seen.is_some() && self.exhausted.contains(fs) {
            debug!(feed_set = %fs, "Feed set exhausted, not fetching more");
            return false;
        }

        let mut already_pending = match &self.pending_feed {
            Some(pending) if pending == fs => self.pending_target,
            _ => 0,
        };
        let mut already_seen = self.stories_seen.get(fs).copied().unwrap_or(0);

        if let Some(seen) = caller_seen {
            // The caller lost stories, e.g. after a filter change.
            if seen < already_seen {
                debug!(feed_set = %fs, seen, already_seen, "Rewinding stories seen");
                already_seen = seen;
                self.stories_seen.insert(fs.clone(), seen);
                already_pending = 0;
            }
        }

        self.pending_feed = Some(fs.clone());
        self.pending_target = desired;

        if self.last_feed_set.as_ref() != Some(fs) {
            return true;
        }
        if desired <= already_seen || desired <= already_pending {
            return false;
        }
        true
    }

    /// Apply a pending pagination reset, returning the set it applied to.
    pub fn take_reset(&mut self) -> Option<FeedSet> {
        let fs = self.reset_feed.take()?;
        debug!(feed_set = %fs, "Resetting pagination");
        self.exhausted.remove(&fs);
        self.stories_seen.remove(&fs);
        self.pages_seen.remove(&fs);
        Some(fs)
    }

    /// Forget pagination for every feed set.
    pub fn clear_pagination(&mut self) {
        self.exhausted.clear();
        self.pages_seen.clear();
        self.stories_seen.clear();
    }

    /// Restart pagination of one set from page one.
    pub fn rewind(&mut self, fs: &FeedSet) {
        self.pages_seen.insert(fs.clone(), 0);
        self.stories_seen.insert(fs.clone(), 0);
    }

    /// Sets that name no countable feeds are ignored.
    pub fn add_recount_candidate(&mut self, fs: FeedSet) {
        if fs.flat_feed_ids().is_empty() {
            return;
        }
        self.recount_candidates.insert(fs);
    }

    pub fn clear_pending_story_request(&mut self) {
        self.pending_feed = None;
        self.pending_target = 0;
    }

    pub fn is_feed_set_exhausted(&self, fs: &FeedSet) -> bool {
        self.exhausted.contains(fs)
    }

    pub fn is_feed_set_stories_fresh(&self, fs: &FeedSet) -> bool {
        self.stories_seen.get(fs).copied().unwrap_or(0) >= 1
    }

    /// Drop all sync bookkeeping. Host flags (online, foreground, halt)
    /// survive.
    pub fn clear(&mut self) {
        *self = Self {
            online: self.online,
            foreground: self.foreground,
            halt_now: self.halt_now,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(id: &str) -> FeedSet {
        FeedSet::single_feed(id)
    }

    #[test]
    fn test_new_feed_set_needs_fetch() {
        let mut state = SyncEngineState::default();
        assert!(state.request_more_for_feed(&feed("1"), 20, Some(0)));
        assert_eq!(state.pending_feed, Some(feed("1")));
        assert_eq!(state.pending_target, 20);
    }

    #[test]
    fn test_satisfied_request_is_suppressed() {
        let mut state = SyncEngineState::default();
        state.last_feed_set = Some(feed("1"));
        state.stories_seen.insert(feed("1"), 30);

        assert!(!state.request_more_for_feed(&feed("1"), 25, Some(30)));
        assert!(state.request_more_for_feed(&feed("1"), 40, Some(30)));
        // Already pending at 40.
        assert!(!state.request_more_for_feed(&feed("1"), 40, Some(30)));
    }

    #[test]
    fn test_exhausted_feed_set_returns_false_until_reset() {
        let mut state = SyncEngineState::default();
        state.exhausted.insert(feed("9"));

        assert!(!state.request_more_for_feed(&feed("9"), 50, Some(10)));
        assert!(!state.request_more_for_feed(&feed("9"), 100, Some(0)));

        state.reset_feed = Some(feed("9"));
        assert_eq!(state.take_reset(), Some(feed("9")));
        assert!(state.request_more_for_feed(&feed("9"), 50, Some(10)));
    }

    #[test]
    fn test_caller_rewind_lowers_seen_count() {
        let mut state = SyncEngineState::default();
        state.last_feed_set = Some(feed("1"));
        state.pending_feed = Some(feed("1"));
        state.pending_target = 60;
        state.stories_seen.insert(feed("1"), 60);

        assert!(state.request_more_for_feed(&feed("1"), 20, Some(5)));
        assert_eq!(state.stories_seen[&feed("1")], 5);
    }

    #[test]
    fn test_uncountable_sets_are_not_recount_candidates() {
        let mut state = SyncEngineState::default();
        state.add_recount_candidate(FeedSet::AllSaved);
        state.add_recount_candidate(FeedSet::AllStories);
        state.add_recount_candidate(feed("3"));
        assert_eq!(state.recount_candidates, HashSet::from([feed("3")]));
    }

    #[test]
    fn test_stop_sync_when_offline_marks_offline() {
        let mut state = SyncEngineState::default();
        assert!(!state.stop_sync());
        state.online = false;
        assert!(state.stop_sync());
        assert!(state.offline_now);
    }

    #[test]
    fn test_backoff_applies_to_background_only() {
        let mut state = SyncEngineState::default();
        let now = Instant::now();
        state.note_hard_api_failure(now);
        let window = Duration::from_secs(300);

        assert!(!state.in_backoff(now, window));
        state.foreground = false;
        assert!(state.in_backoff(now + Duration::from_secs(10), window));
        assert!(!state.in_backoff(now + Duration::from_secs(301), window));
    }

    #[test]
    fn test_clear_keeps_host_flags() {
        let mut state = SyncEngineState::default();
        state.online = false;
        state.foreground = false;
        state.exhausted.insert(feed("1"));
        state.followups.push(ReadingAction::mark_story_read("1:a"));

        state.clear();
        assert!(!state.online);
        assert!(!state.foreground);
        assert!(state.exhausted.is_empty());
        assert!(state.followups.is_empty());
    }
}
