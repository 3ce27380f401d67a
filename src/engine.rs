use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{AccountId, ChatDelivery, Credentials, MarketplaceApi};
use crate::core::{HealthChecker, WatchError, WatchResult, WatcherConfig};
use crate::dispatch::{dispatch_queue, DeliveryLoop, DeliveryStats};
use crate::storage::{AlertPreferences, BlacklistEntry, ItemSnapshot, Store};
use crate::watcher::{
    ItemFetcher, Message, NotificationFormatter, PollScheduler, RetryPolicy, SessionManager,
    Transition,
};

/// Running engine: the polling worker, the delivery loop and the operations
/// callers use to manage accounts while both are running.
pub struct Engine {
    config: WatcherConfig,
    api: Arc<dyn MarketplaceApi>,
    store: Arc<dyn Store>,
    health: HealthChecker,
    formatter: NotificationFormatter,
    poller_shutdown: CancellationToken,
    delivery_shutdown: CancellationToken,
    poller: JoinHandle<()>,
    delivery: JoinHandle<DeliveryStats>,
}

impl Engine {
    /// Spawns the polling worker and the delivery loop. Must run inside a tokio runtime.
    pub fn start(
        config: WatcherConfig,
        api: Arc<dyn MarketplaceApi>,
        chat: Arc<dyn ChatDelivery>,
        store: Arc<dyn Store>,
        health: HealthChecker,
    ) -> Self {
        let (jobs_tx, jobs_rx) = dispatch_queue();
        let poller_shutdown = CancellationToken::new();
        let delivery_shutdown = CancellationToken::new();

        let scheduler = PollScheduler::new(
            config.clone(),
            api.clone(),
            store.clone(),
            jobs_tx,
            health.clone(),
            poller_shutdown.clone(),
        );
        let poller = tokio::spawn(scheduler.run());

        let delivery_loop = DeliveryLoop::new(
            chat,
            jobs_rx,
            health.clone(),
            delivery_shutdown.clone(),
            config.dequeue_timeout(),
            config.drain_timeout(),
        );
        let delivery = tokio::spawn(delivery_loop.run());

        tracing::info!("✅ Engine started");

        Self {
            formatter: NotificationFormatter::with_offset_minutes(config.display_utc_offset_minutes),
            config,
            api,
            store,
            health,
            poller_shutdown,
            delivery_shutdown,
            poller,
            delivery,
        }
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    /// Stores credentials for `account`; new accounts get the default alert preferences.
    pub async fn register_account(
        &self,
        account: AccountId,
        credentials: Credentials,
    ) -> WatchResult<()> {
        self.store
            .upsert_credentials(&[(account.clone(), credentials)])
            .await?;

        if self.store.preferences(&account).await?.is_none() {
            self.store
                .upsert_preferences(&[(account.clone(), AlertPreferences::default())])
                .await?;
        }

        tracing::info!("👤 Registered account {}", account);
        Ok(())
    }

    /// Everything currently available for `account`, formatted without a header.
    ///
    /// Uses its own session so the polling worker's cache is left alone, and never
    /// classifies or saves snapshots.
    pub async fn trigger_immediate_fetch(&self, account: &AccountId) -> WatchResult<Vec<Message>> {
        let mut sessions = SessionManager::new(self.api.clone(), self.store.clone());
        let fetcher = ItemFetcher::new(
            self.api.clone(),
            RetryPolicy::from_config(&self.config),
            (std::time::Duration::ZERO, std::time::Duration::ZERO),
        );

        let items = fetcher.fetch_account(&mut sessions, account).await?;
        let ignored: std::collections::HashSet<String> = self
            .store
            .blacklist(account)
            .await?
            .into_iter()
            .map(|entry| entry.store_id)
            .collect();

        let now = chrono::Utc::now();
        let messages: Vec<Message> = items
            .iter()
            .filter(|item| item.items_available > 0 && !ignored.contains(item.store_id()))
            .map(|item| {
                self.formatter
                    .render_now(&ItemSnapshot::from_raw(item, now), Transition::Unchanged)
            })
            .collect();

        tracing::info!(
            "🔎 On-demand fetch for account {}: {} of {} items available",
            account,
            messages.len(),
            items.len()
        );
        Ok(messages)
    }

    pub async fn preferences(&self, account: &AccountId) -> WatchResult<AlertPreferences> {
        Ok(self.store.preferences(account).await?.unwrap_or_default())
    }

    pub async fn set_alert(
        &self,
        account: &AccountId,
        transition: Transition,
        enabled: bool,
    ) -> WatchResult<AlertPreferences> {
        self.update_preferences(account, |prefs| prefs.set(transition, enabled).then_some(()))
            .await
            .and_then(|prefs| prefs.ok_or_else(|| WatchError::NotAnAlert(transition.to_string())))
    }

    pub async fn toggle_alert(
        &self,
        account: &AccountId,
        transition: Transition,
    ) -> WatchResult<AlertPreferences> {
        self.update_preferences(account, |prefs| prefs.toggle(transition).then_some(()))
            .await
            .and_then(|prefs| prefs.ok_or_else(|| WatchError::NotAnAlert(transition.to_string())))
    }

    pub async fn set_all_alerts(
        &self,
        account: &AccountId,
        enabled: bool,
    ) -> WatchResult<AlertPreferences> {
        self.update_preferences(account, |prefs| {
            prefs.set_all(enabled);
            Some(())
        })
        .await?
        .ok_or_else(|| WatchError::UnknownAccount(account.clone()))
    }

    /// Applies `change` to the stored preferences. Returns `None` without saving
    /// when `change` reports it did nothing.
    async fn update_preferences<F>(
        &self,
        account: &AccountId,
        change: F,
    ) -> WatchResult<Option<AlertPreferences>>
    where
        F: FnOnce(&mut AlertPreferences) -> Option<()>,
    {
        if self.store.credentials(account).await?.is_none() {
            return Err(WatchError::UnknownAccount(account.clone()));
        }

        let mut prefs = self.preferences(account).await?;
        if change(&mut prefs).is_none() {
            return Ok(None);
        }

        self.store
            .upsert_preferences(&[(account.clone(), prefs)])
            .await?;
        tracing::info!("⚙️ Updated alert preferences for account {}: {:?}", account, prefs);
        Ok(Some(prefs))
    }

    pub async fn blacklist_store(
        &self,
        account: &AccountId,
        store_id: &str,
        store_name: &str,
    ) -> WatchResult<BlacklistEntry> {
        let entry = BlacklistEntry::new(account.clone(), store_id, store_name);
        self.store.upsert_blacklist(&[entry.clone()]).await?;
        tracing::info!("🚫 Account {} ignores store {} ({})", account, store_name, store_id);
        Ok(entry)
    }

    /// Returns false if the store was not blacklisted.
    pub async fn unblacklist_store(&self, account: &AccountId, store_id: &str) -> WatchResult<bool> {
        let removed = self.store.remove_blacklist(account, store_id).await?;
        if removed {
            tracing::info!("♻️ Account {} watches store {} again", account, store_id);
        }
        Ok(removed)
    }

    pub async fn blacklist(&self, account: &AccountId) -> WatchResult<Vec<BlacklistEntry>> {
        Ok(self.store.blacklist(account).await?)
    }

    /// Stops polling, lets the in-flight account finish, drains the dispatch queue
    /// within its window and closes the store last.
    pub async fn shutdown(self) -> DeliveryStats {
        tracing::info!("🛑 Engine shutting down...");

        self.poller_shutdown.cancel();
        let mut poller = self.poller;
        match tokio::time::timeout(self.config.shutdown_timeout(), &mut poller).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("❌ Poll scheduler task failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    "⏱️ Poll scheduler did not stop within {}s, aborting",
                    self.config.shutdown_timeout_secs
                );
                poller.abort();
                match poller.await {
                    Err(e) if !e.is_cancelled() => {
                        tracing::error!("❌ Poll scheduler task failed: {}", e)
                    }
                    _ => {}
                }
            }
        }

        self.delivery_shutdown.cancel();
        let stats = match self.delivery.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!("❌ Delivery task failed: {}", e);
                DeliveryStats::default()
            }
        };

        self.store.close().await;
        tracing::info!("👋 Engine stopped");
        stats
    }
}
