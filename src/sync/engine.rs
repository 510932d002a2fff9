use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info};

use super::cleanup::CleanupService;
use super::images::ImagePrefetchService;
use super::lock;
use super::service::Worker;
use super::starred::StarredService;
use super::state::SyncEngineState;
use super::text::OriginalTextService;
use super::unreads::UnreadsService;
use crate::api::ApiClient;
use crate::app::Result;
use crate::cache::ImageCaches;
use crate::config::Config;
use crate::domain::{FeedSet, StoriesPage, SyncEvent, SyncStatus, UpdateFlags};
use crate::store::{keys, now_millis, LocalStore};

const EVENT_CAPACITY: usize = 256;

/// The offline-first sync engine.
///
/// One engine drives one account. Passes are started with [`start`],
/// which coalesces requests that arrive while a pass is still queued, and
/// the returned ticket resolves once the pass and every background worker
/// it started have gone idle.
///
/// [`start`]: SyncEngine::start
pub struct SyncEngine {
    pub(crate) store: LocalStore,
    pub(crate) api: Arc<dyn ApiClient>,
    pub(crate) config: Config,
    state: Mutex<SyncEngineState>,
    /// Keeps "which feed set is primed" atomic against page inserts.
    pub(crate) session_lock: tokio::sync::Mutex<()>,
    pass_gate: tokio::sync::Mutex<()>,
    pass_queued: AtomicBool,
    pass_running: AtomicBool,
    tickets: Mutex<Vec<oneshot::Sender<()>>>,
    events: broadcast::Sender<SyncEvent>,
    pub(crate) cleanup: Worker<CleanupService>,
    pub(crate) starred: Worker<StarredService>,
    pub(crate) unreads: Worker<UnreadsService>,
    pub(crate) text: Worker<OriginalTextService>,
    pub(crate) images: Worker<ImagePrefetchService>,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        api: Arc<dyn ApiClient>,
        caches: ImageCaches,
        config: Config,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let workers = config.sync.workers;
        Arc::new(Self {
            store,
            api,
            config,
            state: Mutex::new(SyncEngineState::default()),
            session_lock: tokio::sync::Mutex::new(()),
            pass_gate: tokio::sync::Mutex::new(()),
            pass_queued: AtomicBool::new(false),
            pass_running: AtomicBool::new(false),
            tickets: Mutex::new(Vec::new()),
            events,
            cleanup: Worker::new(CleanupService::new(caches.clone())),
            starred: Worker::new(StarredService),
            unreads: Worker::new(UnreadsService::default()),
            text: Worker::new(OriginalTextService::default()),
            images: Worker::new(ImagePrefetchService::new(&caches, workers)),
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SyncEngineState> {
        lock(&self.state)
    }

    pub(crate) fn send_update(&self, flags: UpdateFlags) {
        let _ = self.events.send(SyncEvent::Update(flags));
    }

    pub(crate) fn send_event(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn stop_sync(&self) -> bool {
        self.state().stop_sync()
    }

    pub(crate) fn note_hard_api_failure(&self) {
        self.state().note_hard_api_failure(Instant::now());
    }

    pub(crate) fn backoff(&self) -> bool {
        let window = self.config.sync.background_backoff();
        let backoff = self.state().in_backoff(Instant::now(), window);
        if backoff {
            info!("Abandoning background sync due to recent API failures");
        }
        backoff
    }

    // Host scheduler hooks

    /// Queue a primary pass.
    ///
    /// The receiver resolves once the pass and all workers are idle. A
    /// request made while a pass is waiting to run joins that pass.
    pub fn start(self: &Arc<Self>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.state().halt_now = false;
        let already_queued = self.pass_queued.swap(true, Ordering::SeqCst);
        lock(&self.tickets).push(tx);
        if already_queued {
            debug!("Sync pass already queued, coalescing");
            return rx;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let gate = engine.pass_gate.lock().await;
            engine.pass_queued.store(false, Ordering::SeqCst);
            engine.pass_running.store(true, Ordering::SeqCst);

            let pass_engine = engine.clone();
            if let Err(e) = tokio::spawn(async move { pass_engine.do_sync().await }).await {
                error!("Task join error in sync pass: {}", e);
            }

            engine.pass_running.store(false, Ordering::SeqCst);
            drop(gate);
            engine.send_update(UpdateFlags::STATUS);
            engine.check_completion();
        });
        rx
    }

    /// Run a pass and wait for it and its workers to finish.
    pub async fn sync_now(self: &Arc<Self>) {
        let _ = self.start().await;
    }

    /// Ask the running pass and workers to stop at their next check.
    pub fn soft_interrupt(&self) {
        info!("Soft stop");
        self.state().halt_now = true;
    }

    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.state().foreground = foreground;
    }

    /// Refresh feeds and folders on the next pass even if the interval has
    /// not elapsed.
    pub fn force_feeds_folders(&self) {
        self.state().do_feeds_folders = true;
    }

    pub fn flush_recounts(&self) {
        self.state().flush_recounts = true;
    }

    /// Drop every queue and all pagination bookkeeping, e.g. on logout.
    pub fn clear_state(&self) {
        self.state().clear();
        self.unreads.service().clear();
        self.text.service().clear();
        self.images.service().clear();
    }

    /// Resolve outstanding tickets if nothing is running any more.
    pub fn check_completion(&self) {
        if self.pass_running.load(Ordering::SeqCst) || self.pass_queued.load(Ordering::SeqCst) {
            return;
        }
        if self.cleanup.is_running()
            || self.starred.is_running()
            || self.text.is_running()
            || self.unreads.is_running()
            || self.images.is_running()
        {
            return;
        }
        let tickets = std::mem::take(&mut *lock(&self.tickets));
        if !tickets.is_empty() {
            debug!("Confirmed completion");
        }
        for ticket in tickets {
            let _ = ticket.send(());
        }
    }

    // Pagination requests from the UI

    /// Ask for at least `desired` stories of `fs`. Returns true when a
    /// pass was started to fetch them.
    pub fn request_more_for_feed(
        self: &Arc<Self>,
        fs: &FeedSet,
        desired: usize,
        caller_seen: Option<usize>,
    ) -> bool {
        let more = self.state().request_more_for_feed(fs, desired, caller_seen);
        if more {
            let _ = self.start();
        }
        more
    }

    /// Pagination of `fs` restarts from page one on the next fetch,
    /// typically because the order or filter changed.
    pub fn reset_fetch_state(&self, fs: &FeedSet) {
        debug!(feed_set = %fs, "Requesting feed fetch state reset");
        self.state().reset_feed = Some(fs.clone());
    }

    /// Prime the reading session for `fs` unless it already is.
    pub async fn prepare_reading_session(&self, fs: &FeedSet) -> Result<()> {
        let _session = self.session_lock.lock().await;
        let filters = self.config.reading.cursor_filters();
        let target = fs.clone();
        let changed = self
            .store
            .call(move |s| s.switch_reading_session(&target, filters))
            .await?;
        if changed {
            debug!(feed_set = %fs, "Prepared new reading session");
            self.send_update(UpdateFlags::STORY | UpdateFlags::STATUS);
        }
        Ok(())
    }

    /// Forget the pending story request and mark the session stale.
    pub async fn reset_reading_session(&self) -> Result<()> {
        let _session = self.session_lock.lock().await;
        debug!("Requesting reading session reset");
        self.state().clear_pending_story_request();
        self.store.call(|s| s.set_session_feed_set(None)).await
    }

    pub fn is_feed_set_syncing(&self, fs: &FeedSet) -> bool {
        let mut state = self.state();
        state.pending_feed.as_ref() == Some(fs) && !state.stop_sync()
    }

    pub fn is_feed_set_exhausted(&self, fs: &FeedSet) -> bool {
        self.state().is_feed_set_exhausted(fs)
    }

    pub fn is_feed_set_stories_fresh(&self, fs: &FeedSet) -> bool {
        self.state().is_feed_set_stories_fresh(fs)
    }

    /// Is the feed/folder list being rebuilt?
    pub fn is_feed_folder_sync_running(&self) -> bool {
        let state = self.state();
        state.housekeeping_running || state.ffsync_running
    }

    /// Are unread counts possibly in flux?
    pub fn is_feed_count_sync_running(&self) -> bool {
        let state = self.state();
        state.housekeeping_running || state.recounts_running || state.ffsync_running
    }

    /// Premium, archive and staff flags from the last feed/folder refresh.
    pub fn account_flags(&self) -> (bool, bool, bool) {
        let state = self.state();
        (state.is_premium, state.is_archive, state.is_staff)
    }

    /// The most important thing going on right now, if anything.
    pub fn status(&self) -> Option<SyncStatus> {
        let (offline, housekeeping, ffsync, actions, action_count, recounts, stories) = {
            let state = self.state();
            (
                state.offline_now,
                state.housekeeping_running,
                state.ffsync_running,
                state.actions_running,
                state.last_action_count,
                state.recounts_running,
                state.story_sync_running,
            )
        };
        if offline {
            return Some(SyncStatus::Offline);
        }
        if housekeeping {
            return Some(SyncStatus::Housekeeping);
        }
        if ffsync {
            return Some(SyncStatus::FeedsFolders);
        }
        if self.cleanup.is_running() {
            return Some(SyncStatus::Cleanup);
        }
        if self.starred.is_running() {
            return Some(SyncStatus::Starred);
        }
        if actions {
            return Some(SyncStatus::Actions(action_count));
        }
        if recounts {
            return Some(SyncStatus::Recounts);
        }
        if stories {
            return Some(SyncStatus::Stories);
        }
        if self.unreads.is_running() {
            return Some(SyncStatus::Unreads(self.unreads.service().pending()));
        }
        if self.text.is_running() {
            return Some(SyncStatus::Text(self.text.service().pending()));
        }
        if self.images.is_running() {
            return Some(SyncStatus::Images(self.images.service().pending()));
        }
        None
    }

    // The primary pass

    async fn do_sync(self: &Arc<Self>) {
        if let Err(e) = self.primary_pass().await {
            error!("Sync error: {}", e);
        }
    }

    async fn primary_pass(self: &Arc<Self>) -> Result<()> {
        if self.state().halt_now {
            return Ok(());
        }
        debug!("Starting primary sync");

        let back_online = {
            let mut state = self.state();
            if state.offline_now {
                if !state.online {
                    debug!("Abandoning sync: network still offline");
                    return Ok(());
                }
                state.offline_now = false;
                true
            } else {
                false
            }
        };
        if back_online {
            self.send_update(UpdateFlags::STATUS);
        }

        self.housekeeping().await?;

        let foreground = self.state().foreground;
        let prefs = &self.config.reading;
        if !(foreground || prefs.notifications_enabled || prefs.background_network_allowed) {
            debug!("Abandoning sync: app not active and background network not allowed");
            return Ok(());
        }

        self.send_update(UpdateFlags::DB_READY);

        // The UI may be waiting on text requests; they go first.
        self.text.start(self);

        self.sync_actions().await?;
        self.sync_metadata().await?;
        self.sync_pending_feed_stories().await?;
        self.finish_actions().await?;
        self.check_recounts().await?;

        self.unreads.start(self);
        self.images.start(self);

        self.push_notifications().await?;

        debug!("Finishing primary sync");
        Ok(())
    }

    /// Wipe on upgrade and vacuum when due.
    async fn housekeeping(&self) -> Result<()> {
        let outcome = self.run_housekeeping().await;
        let was_running = std::mem::replace(&mut self.state().housekeeping_running, false);
        if was_running {
            self.send_update(UpdateFlags::METADATA);
        }
        outcome
    }

    async fn run_housekeeping(&self) -> Result<()> {
        let version = env!("CARGO_PKG_VERSION");
        let foreground = self.state().foreground;

        let stored = self.store.call(|s| s.sync_value(keys::SCHEMA_VERSION)).await?;
        let upgraded = stored.as_deref() != Some(version);
        if upgraded {
            self.state().housekeeping_running = true;
            self.send_update(UpdateFlags::STATUS | UpdateFlags::REBUILD);
            // A fresh database has nothing to throw away; it is only stamped.
            if stored.is_some() {
                info!(from = ?stored, to = version, "Local data written by another version, wiping");
                self.store.call(|s| s.wipe()).await?;
                self.clear_state();
                self.state().housekeeping_running = true;
                self.force_feeds_folders();
            }
            self.store
                .call(move |s| s.set_sync_value(keys::SCHEMA_VERSION, version))
                .await?;
        }

        let interval = self.config.sync.vacuum_interval().as_millis() as i64;
        let last_vacuum = self.store.call(|s| s.sync_timestamp(keys::LAST_VACUUM)).await?;
        // Vacuuming locks the database for a while.
        let auto_vacuum = !foreground && now_millis() - last_vacuum > interval;

        if upgraded || auto_vacuum {
            self.state().housekeeping_running = true;
            self.send_update(UpdateFlags::STATUS);
            info!("Rebuilding database");
            self.store
                .call(|s| {
                    s.vacuum()?;
                    s.set_sync_timestamp(keys::LAST_VACUUM, now_millis())
                })
                .await?;
            info!("Done rebuilding database");
        }
        Ok(())
    }

    /// Announce unread stories in feeds with notifications turned on.
    pub(crate) async fn push_notifications(&self) -> Result<()> {
        if !self.config.reading.notifications_enabled {
            return Ok(());
        }
        // Wait for the unread queue to drain so notifications don't churn.
        if self.unreads.service().pending() > 0 {
            return Ok(());
        }
        if self.state().pending_feed.is_some() {
            return Ok(());
        }

        let candidates = self.store.call(|s| s.notify_candidates()).await?;
        if candidates.is_empty() {
            return Ok(());
        }
        let hashes = candidates.into_hashes();
        debug!("Notifying {} stories", hashes.len());
        self.send_event(SyncEvent::Notify(hashes));
        Ok(())
    }

    // Prefetch queues

    /// Queue original text for unread stories in text-mode feeds that have
    /// none stored yet.
    pub(crate) async fn prefetch_original_text(self: &Arc<Self>, page: &StoriesPage) -> Result<()> {
        let text_mode = &self.config.reading.text_mode_feeds;
        let candidates: Vec<String> = page
            .stories
            .iter()
            .filter(|s| !s.read && text_mode.contains(&s.feed_id))
            .map(|s| s.story_hash.clone())
            .collect();

        if !candidates.is_empty() {
            let missing = self
                .store
                .call(move |s| {
                    let mut missing = Vec::new();
                    for hash in candidates {
                        if s.story_text(&hash)?.is_none() {
                            missing.push(hash);
                        }
                    }
                    Ok(missing)
                })
                .await?;
            self.text.service().add_hashes(missing);
        }
        self.text.start(self);
        Ok(())
    }

    /// Queue the images and thumbnails of unread stories.
    pub(crate) fn prefetch_images(self: &Arc<Self>, page: &StoriesPage) {
        let service = self.images.service();
        for story in page.stories.iter().filter(|s| !s.read) {
            service.add_urls(story.image_urls.iter().cloned());
            if let Some(thumbnail) = &story.thumbnail_url {
                service.add_thumbnail_url(thumbnail.clone());
            }
        }
        self.images.start(self);
    }
}
