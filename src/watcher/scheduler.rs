use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::classifier::CycleClassifier;
use super::fetcher::ItemFetcher;
use super::formatter::NotificationFormatter;
use super::retry::RetryPolicy;
use super::session::SessionManager;
use crate::api::{AccountId, MarketplaceApi};
use crate::core::{HealthChecker, WatchError, WatchResult, WatcherConfig};
use crate::dispatch::{JobSender, NotificationJob};
use crate::storage::{blacklist_index, AlertPreferences, ItemSnapshot, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Running,
    Fetching,
    Classifying,
    Dispatching,
    Sleeping,
    CoolingDown,
    ShuttingDown,
    Stopped,
}

/// Outcome of one pass over every account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub accounts_processed: usize,
    pub accounts_skipped: usize,
    pub jobs_enqueued: u64,
    pub snapshots_saved: usize,
    pub budget_errors: u32,
    pub threshold_reached: bool,
    pub interrupted: bool,
}

/// Drives the polling cycle. Runs on its own task and owns all polling state.
pub struct PollScheduler {
    config: WatcherConfig,
    store: Arc<dyn Store>,
    sessions: SessionManager,
    fetcher: ItemFetcher,
    formatter: NotificationFormatter,
    jobs: JobSender,
    health: HealthChecker,
    shutdown: CancellationToken,
    state: SchedulerState,
    consecutive_errors: u32,
    unsaved: HashMap<String, ItemSnapshot>,
}

impl PollScheduler {
    pub fn new(
        config: WatcherConfig,
        api: Arc<dyn MarketplaceApi>,
        store: Arc<dyn Store>,
        jobs: JobSender,
        health: HealthChecker,
        shutdown: CancellationToken,
    ) -> Self {
        let fetcher = ItemFetcher::new(
            api.clone(),
            RetryPolicy::from_config(&config),
            config.account_delay(),
        );
        let formatter = NotificationFormatter::with_offset_minutes(config.display_utc_offset_minutes);

        Self {
            sessions: SessionManager::new(api, store.clone()),
            fetcher,
            formatter,
            store,
            jobs,
            health,
            shutdown,
            state: SchedulerState::Running,
            consecutive_errors: 0,
            unsaved: HashMap::new(),
            config,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn run(mut self) {
        tracing::info!(
            "🚀 Poll scheduler started (interval {}s ±{}s)",
            self.config.poll_interval_secs,
            self.config.poll_jitter_secs
        );

        while !self.shutdown.is_cancelled() {
            match self.run_cycle().await {
                Ok(report) => {
                    tracing::info!(
                        "✅ Cycle complete: {} accounts, {} skipped, {} jobs, {} snapshots saved",
                        report.accounts_processed,
                        report.accounts_skipped,
                        report.jobs_enqueued,
                        report.snapshots_saved
                    );
                    if report.interrupted {
                        break;
                    }
                }
                Err(e) => {
                    self.consecutive_errors += 1;
                    tracing::error!(
                        "❌ Cycle failed ({}/{} consecutive errors): {}",
                        self.consecutive_errors,
                        self.config.error_threshold,
                        e
                    );
                    self.health.set_consecutive_errors(self.consecutive_errors).await;
                }
            }

            if self.consecutive_errors >= self.config.error_threshold {
                tracing::error!(
                    "🧊 Reached {} consecutive errors, cooling down for {}s",
                    self.consecutive_errors,
                    self.config.cooldown_secs
                );
                self.set_state(SchedulerState::CoolingDown).await;
                if !self.pause(Duration::from_secs(self.config.cooldown_secs)).await {
                    break;
                }
                self.consecutive_errors = 0;
                self.health.set_consecutive_errors(0).await;
            }

            let interval = self.next_interval();
            tracing::info!("😴 Next cycle in {:.0}s", interval.as_secs_f64());
            self.set_state(SchedulerState::Sleeping).await;
            if !self.pause(interval).await {
                break;
            }
        }

        self.set_state(SchedulerState::ShuttingDown).await;
        self.flush_unsaved().await;
        self.set_state(SchedulerState::Stopped).await;
        tracing::info!("🛑 Poll scheduler stopped");
    }

    /// One pass over every registered account in random order.
    ///
    /// Loading the cycle's inputs is the only step whose failure aborts the cycle;
    /// per-account failures are logged and counted and the loop moves on.
    pub async fn run_cycle(&mut self) -> WatchResult<CycleReport> {
        self.set_state(SchedulerState::Fetching).await;

        let mut accounts: Vec<AccountId> = self.store.all_credentials().await?.into_keys().collect();
        accounts.shuffle(&mut rand::thread_rng());
        let preferences = self.store.all_preferences().await?;
        let blacklist = blacklist_index(&self.store.all_blacklist().await?);

        let baseline = self.store.all_snapshots().await?;
        let mut classifier = CycleClassifier::begin(baseline, std::mem::take(&mut self.unsaved));

        let mut report = CycleReport::default();

        for account in &accounts {
            if self.shutdown.is_cancelled() {
                report.interrupted = true;
                break;
            }

            self.set_state(SchedulerState::Fetching).await;
            let delay = self.fetcher.pacing_delay();
            tracing::debug!("⏱️ Waiting {:.1}s before fetching account {}", delay.as_secs_f64(), account);
            if !self.pause(delay).await {
                report.interrupted = true;
                break;
            }

            let prefs = preferences.get(account).copied().unwrap_or_default();
            let ignored = blacklist.get(account);

            match self.process_account(&mut classifier, account, prefs, ignored).await {
                Ok(enqueued) => {
                    report.accounts_processed += 1;
                    report.jobs_enqueued += enqueued;
                }
                Err(e) => {
                    report.accounts_skipped += 1;
                    if e.counts_toward_error_budget() {
                        report.budget_errors += 1;
                        self.consecutive_errors += 1;
                        tracing::error!(
                            "❌ Account {} failed ({}/{} consecutive errors): {}",
                            account,
                            self.consecutive_errors,
                            self.config.error_threshold,
                            e
                        );
                    } else {
                        tracing::warn!("⚠️ Skipping account {} this cycle: {}", account, e);
                    }

                    if self.consecutive_errors >= self.config.error_threshold {
                        report.threshold_reached = true;
                        break;
                    }
                }
            }
        }

        let updates = classifier.into_updates();
        match self.save_snapshots(updates).await {
            Ok(saved) => report.snapshots_saved = saved,
            Err(e) => {
                report.budget_errors += 1;
                self.consecutive_errors += 1;
                tracing::error!("❌ Snapshot save failed, keeping them for the next cycle: {}", e);
            }
        }

        if report.budget_errors == 0 {
            self.consecutive_errors = 0;
        }
        report.threshold_reached |= self.consecutive_errors >= self.config.error_threshold;

        self.health
            .record_cycle(accounts.len(), self.consecutive_errors)
            .await;

        Ok(report)
    }

    async fn process_account(
        &mut self,
        classifier: &mut CycleClassifier,
        account: &AccountId,
        prefs: AlertPreferences,
        ignored: Option<&HashSet<String>>,
    ) -> WatchResult<u64> {
        let items = self.fetcher.fetch_account(&mut self.sessions, account).await?;

        self.set_state(SchedulerState::Classifying).await;
        let mut jobs = Vec::new();
        for item in &items {
            if ignored.map_or(false, |stores| stores.contains(item.store_id())) {
                continue;
            }

            let transition = classifier.classify(item);
            if !transition.is_alert() || !prefs.is_enabled(transition) {
                continue;
            }

            let snapshot = match classifier.snapshot(item.item_id()) {
                Some(snapshot) => snapshot,
                None => continue,
            };
            let message = self.formatter.render_now(snapshot, transition);
            tracing::info!(
                "🛍️ {} for account {}: {} (item {}, {} left)",
                transition,
                account,
                message.store_name,
                message.item_id,
                item.items_available
            );
            jobs.push(NotificationJob::new(account.clone(), transition, message));
        }

        self.set_state(SchedulerState::Dispatching).await;
        let mut enqueued = 0;
        for job in jobs {
            if self.jobs.enqueue(job) {
                enqueued += 1;
            }
        }
        if enqueued > 0 {
            self.health.record_enqueued(enqueued).await;
        }

        tracing::debug!(
            "📦 Account {}: {} items fetched, {} notifications queued",
            account,
            items.len(),
            enqueued
        );
        Ok(enqueued)
    }

    async fn save_snapshots(&mut self, updates: Vec<ItemSnapshot>) -> WatchResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        match self.store.upsert_snapshots(&updates).await {
            Ok(()) => Ok(updates.len()),
            Err(e) => {
                self.unsaved
                    .extend(updates.into_iter().map(|s| (s.item_id.clone(), s)));
                Err(WatchError::Persistence(e))
            }
        }
    }

    async fn flush_unsaved(&mut self) {
        if self.unsaved.is_empty() {
            return;
        }
        let pending: Vec<ItemSnapshot> = self.unsaved.drain().map(|(_, s)| s).collect();
        if let Err(e) = self.save_snapshots(pending).await {
            tracing::error!("❌ Could not save pending snapshots on shutdown: {}", e);
        }
    }

    /// Base interval plus uniform jitter and noise, never below one second.
    pub fn next_interval(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let base = self.config.poll_interval_secs as f64;
        let jitter = symmetric(&mut rng, self.config.poll_jitter_secs as f64);
        let noise = symmetric(&mut rng, self.config.poll_noise_secs as f64);
        Duration::from_secs_f64((base + jitter + noise).max(1.0))
    }

    /// Sleeps unless shutdown is requested first. Returns false on shutdown.
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.shutdown.is_cancelled();
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn set_state(&mut self, state: SchedulerState) {
        if self.state != state {
            self.state = state;
            self.health.set_state(state).await;
        }
    }
}

fn symmetric<R: Rng>(rng: &mut R, spread: f64) -> f64 {
    if spread <= 0.0 {
        0.0
    } else {
        rng.gen_range(-spread..=spread)
    }
}
