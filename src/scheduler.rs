use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::Config;
use crate::db::Repository;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::matcher;
use crate::models::{DueSite, Question, Subscription, UpdateStatus};
use crate::registry::SiteRegistry;
use crate::stackexchange::StackExchangeClient;

// Subscribers are streamed in pages so memory stays bounded no matter how
// many a site has.
const SUBSCRIBER_PAGE_SIZE: usize = 1000;

// Overlap subtracted from the last seen creation time to tolerate clock and
// ordering skew at the source. Tuned empirically; the id threshold dedups
// whatever the overlap re-fetches.
const FETCH_OVERLAP_SECS: i64 = 5_000;

// Window for the very first fetch of a site.
const INITIAL_WINDOW_SECS: i64 = 3_600;

/// Lower time bound for fetching a site's questions.
fn fetch_from(last_question_time: Option<i64>, now: DateTime<Utc>) -> i64 {
    match last_question_time {
        Some(t) => t - FETCH_OVERLAP_SECS,
        None => now.timestamp() - INITIAL_WINDOW_SECS,
    }
}

/// Evaluate one subscriber page against the fetched questions, grouping the
/// matches per chat. Questions at or below the previous watermark are skipped
/// before any filter runs; a chat with several matching subscriptions still
/// gets each question once.
fn queue_matches(
    questions: &[Question],
    subscribers: &[Subscription],
    last_question_id: Option<i64>,
) -> BTreeMap<i64, Vec<Question>> {
    let mut queued: BTreeMap<i64, Vec<Question>> = BTreeMap::new();

    for question in questions {
        if let Some(last) = last_question_id {
            if question.question_id <= last {
                continue;
            }
        }

        let tags: HashSet<&str> = question.tags.iter().map(String::as_str).collect();
        let mut claimed: HashSet<i64> = HashSet::new();

        for subscription in subscribers {
            if claimed.contains(&subscription.chat_id) {
                continue;
            }
            if matcher::matches(&tags, &subscription.filter) {
                tracing::debug!(
                    "Question {} matches subscription {} (chat {}, site {})",
                    question.question_id,
                    subscription.id,
                    subscription.chat_id,
                    subscription.site_id
                );
                queued
                    .entry(subscription.chat_id)
                    .or_default()
                    .push(question.clone());
                claimed.insert(subscription.chat_id);
            }
        }
    }

    queued
}

pub struct Scheduler {
    repo: Repository,
    registry: Arc<SiteRegistry>,
    stack: StackExchangeClient,
    dispatcher: Dispatcher,
    config: Config,
}

impl Scheduler {
    pub fn new(
        repo: Repository,
        registry: Arc<SiteRegistry>,
        stack: StackExchangeClient,
        dispatcher: Dispatcher,
        config: Config,
    ) -> Self {
        Self {
            repo,
            registry,
            stack,
            dispatcher,
            config,
        }
    }

    /// The polling loop. Runs until shutdown is signalled; a site in flight
    /// finishes its update before the signal is honored.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let catalog_interval = Duration::from_secs(self.config.catalog_sync_hours * 3600);
        let cooldown = Duration::from_secs(self.config.error_cooldown_secs);
        let idle = Duration::from_secs(self.config.idle_sleep_secs);
        let mut next_catalog_sync = Instant::now();

        while !*shutdown.borrow() {
            if Instant::now() >= next_catalog_sync {
                match self.registry.sync_catalog(&self.repo, &self.stack).await {
                    Ok(count) => {
                        tracing::info!("Synced site catalog, {} sites known", count);
                        next_catalog_sync = Instant::now() + catalog_interval;
                    }
                    Err(e) => {
                        tracing::warn!("Site catalog sync failed: {}", e);
                        next_catalog_sync = Instant::now() + cooldown;
                    }
                }
            }

            match self.run_cycle().await {
                Ok(()) => {
                    self.sleep_or_shutdown(idle, &mut shutdown).await;
                }
                Err(e) if e.is_recoverable_store() => {
                    tracing::warn!("Store error, retrying next cycle: {}", e);
                    self.sleep_or_shutdown(cooldown, &mut shutdown).await;
                }
                Err(e) => {
                    tracing::error!("Cycle failed: {}", e);
                    if !self.config.suppress_errors {
                        return Err(e);
                    }
                    self.sleep_or_shutdown(cooldown, &mut shutdown).await;
                }
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    async fn sleep_or_shutdown(&self, duration: Duration, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown.changed() => {}
        }
    }

    /// One pass over all due sites, strictly sequential. The outbound message
    /// counter spans the whole cycle so pacing is global.
    async fn run_cycle(&self) -> Result<()> {
        let due = self.repo.due_sites().await?;
        tracing::info!("Found {} sites to check", due.len());

        let mut sent = 0u64;
        for site in due {
            match site.cursor_id {
                None => {
                    // First activation: record the cursor now, fetch next cycle.
                    self.repo.create_cursor(site.site_id).await?;
                    tracing::info!("Saved new update cursor for site {}", site.site_slug);
                }
                Some(cursor_id) => {
                    if site.status == Some(UpdateStatus::Updating) {
                        // An earlier cycle died mid-update; the cursor was
                        // never completed and the site is simply re-picked.
                        tracing::warn!(
                            "Site {} was left mid-update, re-picking",
                            site.site_slug
                        );
                    }
                    self.update_site(cursor_id, &site, &mut sent).await?;
                }
            }
        }
        Ok(())
    }

    async fn update_site(&self, cursor_id: i64, site: &DueSite, sent: &mut u64) -> Result<()> {
        self.repo.begin_update(cursor_id).await?;
        tracing::info!("Started update for site {}", site.site_slug);

        let outcome = self.poll_site(site, sent).await;
        let (max_id, max_time) = match &outcome {
            Ok(watermark) => *watermark,
            Err(_) => (None, None),
        };

        // The cursor advances even when this site's cycle failed part-way;
        // a persistently bad site must not stall the schedule. This skips
        // the failed window on a prolonged source outage.
        let next_update =
            Utc::now() + chrono::Duration::seconds(self.config.poll_interval_secs as i64);
        self.repo
            .complete_update(cursor_id, next_update, max_id, max_time)
            .await?;

        outcome.map(|_| ())
    }

    async fn poll_site(
        &self,
        site: &DueSite,
        sent: &mut u64,
    ) -> Result<(Option<i64>, Option<i64>)> {
        let from_date = fetch_from(site.last_question_time, Utc::now());
        let questions = self
            .stack
            .fetch_unanswered(&site.site_slug, from_date)
            .await?;
        tracing::info!("Got {} questions for {}", questions.len(), site.site_slug);

        let max_id = questions.iter().map(|q| q.question_id).max();
        let max_time = questions.iter().map(|q| q.creation_date).max();

        if !questions.is_empty() {
            let mut after_id = 0i64;
            loop {
                let subscribers = self
                    .repo
                    .subscriptions_for_site(site.site_id, after_id, SUBSCRIBER_PAGE_SIZE)
                    .await?;
                let Some(last) = subscribers.last() else {
                    break;
                };
                after_id = last.id;

                let queued = queue_matches(&questions, &subscribers, site.last_question_id);
                self.dispatcher.deliver(&self.repo, &queued, sent).await?;

                if subscribers.len() < SUBSCRIBER_PAGE_SIZE {
                    break;
                }
            }
        }

        Ok((max_id, max_time))
    }
}
