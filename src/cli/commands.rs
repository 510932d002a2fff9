use chrono::{Local, TimeZone};
use tokio::sync::broadcast::error::TryRecvError;

use crate::app::{AppContext, Result, SyncError};
use crate::domain::feed::ZERO_FEED_ID;
use crate::domain::{FeedSet, ReadingAction, SyncEvent};

/// Run one pass and report what happened.
pub async fn sync(ctx: &AppContext) -> Result<()> {
    let mut events = ctx.engine.subscribe();
    ctx.engine.set_foreground(true);
    ctx.engine.force_feeds_folders();

    println!("Syncing...");
    ctx.engine.sync_now().await;

    let mut errors = 0;
    loop {
        match events.try_recv() {
            Ok(SyncEvent::Error(msg)) => {
                errors += 1;
                eprintln!("  ! {}", msg);
            }
            Ok(SyncEvent::Notify(hashes)) => {
                println!("  {} stories to notify about", hashes.len());
            }
            Ok(SyncEvent::LoggedOut) => {
                eprintln!("  ! Session rejected; local data was cleared");
            }
            Ok(SyncEvent::Update(_)) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    let (feeds, pending) = ctx
        .store
        .call(|s| {
            let feeds = s.feeds()?.iter().filter(|f| f.feed_id != ZERO_FEED_ID).count();
            Ok((feeds, s.actions()?.len()))
        })
        .await?;
    println!(
        "Sync complete: {} feeds, {} actions pending, {} errors",
        feeds,
        pending,
        errors
    );
    Ok(())
}

pub fn list_feeds(ctx: &AppContext) -> Result<()> {
    let store = ctx.store.blocking();
    let feeds: Vec<_> = store
        .feeds()?
        .into_iter()
        .filter(|f| f.feed_id != ZERO_FEED_ID)
        .collect();

    if feeds.is_empty() {
        println!("No feeds");
        return Ok(());
    }

    let state = ctx.config.reading.state_filter;
    for feed in feeds {
        let local = store.local_unread_count(&FeedSet::single_feed(feed.feed_id.as_str()), state)?;
        let muted = if feed.active { "" } else { " (muted)" };
        println!(
            "{}{}  [{}]\n  {} focus, {} unread, {} hidden, {} held locally",
            feed.title,
            muted,
            feed.feed_id,
            feed.counts.positive,
            feed.counts.neutral,
            feed.counts.negative,
            local
        );
    }
    Ok(())
}

pub fn list_actions(ctx: &AppContext) -> Result<()> {
    let records = ctx.store.blocking().actions()?;

    if records.is_empty() {
        println!("No pending actions");
        return Ok(());
    }

    for record in records {
        let when = Local
            .timestamp_millis_opt(record.time)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "                ".to_string());
        match record.decode() {
            Ok(queued) => println!(
                "#{} {} {} (tried {})",
                queued.id,
                when,
                queued.action.kind(),
                queued.tried
            ),
            Err(e) => println!("#{} {} unreadable: {}", record.id, when, e),
        }
    }
    Ok(())
}

/// Apply an action locally and queue it for the next pass.
pub async fn perform(ctx: &AppContext, action: ReadingAction) -> Result<()> {
    let kind = action.kind();
    ctx.engine.perform_action(action).await?;
    println!("Queued {}", kind);
    Ok(())
}

/// Show up to `limit` stories of a feed, fetching pages as needed.
pub async fn list_stories(ctx: &AppContext, feed_id: &str, limit: usize) -> Result<()> {
    let known = {
        let id = feed_id.to_string();
        ctx.store.call(move |s| s.feed(&id)).await?
    };
    if known.is_none() {
        return Err(SyncError::Other(format!("Unknown feed: {}", feed_id)));
    }

    let fs = FeedSet::single_feed(feed_id);
    ctx.engine.prepare_reading_session(&fs).await?;
    if ctx.engine.request_more_for_feed(&fs, limit, None) {
        ctx.engine.sync_now().await;
        ctx.engine.prepare_reading_session(&fs).await?;
    }

    let filters = ctx.config.reading.cursor_filters();
    let target = fs.clone();
    let stories = ctx
        .store
        .call(move |s| s.active_stories(&target, filters))
        .await?;

    if stories.is_empty() {
        println!("No stories");
        return Ok(());
    }

    for story in stories.iter().take(limit) {
        let marker = if story.read { " " } else { "●" };
        let saved = if story.starred { "★" } else { " " };
        let date = Local
            .timestamp_millis_opt(story.timestamp)
            .single()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "          ".to_string());
        println!("{}{} {} {}  {}", marker, saved, date, story.title, story.story_hash);
    }
    if ctx.engine.is_feed_set_exhausted(&fs) {
        println!("(no more stories on the server)");
    }
    Ok(())
}
