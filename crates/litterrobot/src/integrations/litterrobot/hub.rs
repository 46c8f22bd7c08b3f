//! A wrapper "hub" for one Litter-Robot account.
//!
//! The hub owns the account session, polls the API on a fixed interval and
//! tells listeners whenever robot data may have changed. Its logged-in flag
//! is the availability signal for every entity of the account.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::PoisonError;
use std::time::Duration;

use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::account::Account;
use crate::account::AccountError;
use crate::account::Robot;
use crate::config::AccountConfig;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The API rejected the credentials; retrying will not help
    #[error("Invalid credentials")]
    InvalidAuth(#[source] AccountError),

    /// The API could not be reached or misbehaved; setup may be retried
    #[error("Unable to connect to Litter-Robot API")]
    NotReady(#[source] AccountError),
}

pub struct Hub {
    entry_id: String,
    config: AccountConfig,
    timezone: Tz,
    account: Arc<dyn Account>,
    logged_in: AtomicBool,

    /// Serializes refreshes so a forced refresh never overlaps a scheduled one
    refresh_lock: Mutex<()>,

    /// Bumped after every refresh and every out-of-band data update
    updates: watch::Sender<u64>,

    polling: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    pub fn new(
        entry_id: String,
        config: AccountConfig,
        timezone: Tz,
        account: Arc<dyn Account>,
    ) -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            entry_id,
            config,
            timezone,
            account,
            logged_in: AtomicBool::new(false),
            refresh_lock: Mutex::new(()),
            updates,
            polling: std::sync::Mutex::new(None),
        }
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// Log in to the Litter-Robot API.
    pub async fn login(&self, load_robots: bool) -> Result<(), HubError> {
        self.logged_in.store(false, Ordering::SeqCst);
        debug!("[{}] Trying to connect to Litter-Robot API", self.entry_id);

        match self
            .account
            .connect(&self.config.username, &self.config.password, load_robots)
            .await
        {
            Ok(()) => {
                self.logged_in.store(true, Ordering::SeqCst);
                debug!("[{}] Successfully connected to Litter-Robot API", self.entry_id);
                Ok(())
            }
            Err(e) if e.is_login() => {
                error!("[{}] Invalid credentials", self.entry_id);
                Err(HubError::InvalidAuth(e))
            }
            Err(e) => {
                error!("[{}] Unable to connect to Litter-Robot API: {}", self.entry_id, e);
                Err(HubError::NotReady(e))
            }
        }
    }

    /// Update all robot states from the Litter-Robot API.
    ///
    /// Failures are logged and mark the hub as logged out until the next
    /// successful refresh; they are never propagated.
    pub async fn refresh(&self) -> bool {
        let _guard = self.refresh_lock.lock().await;

        let ok = match self.account.refresh_robots().await {
            Ok(()) => {
                debug!("[{}] Refreshed robot data", self.entry_id);
                true
            }
            Err(e) => {
                warn!("[{}] Failed to refresh robot data: {}", self.entry_id, e);
                false
            }
        };
        self.logged_in.store(ok, Ordering::SeqCst);
        self.notify();
        ok
    }

    /// Tell listeners the robot data changed without asking the API again.
    pub fn set_updated_data(&self) {
        self.notify();
    }

    fn notify(&self) {
        self.updates.send_modify(|n| *n += 1);
    }

    /// Receiver that changes after every refresh or data update.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    /// Number of update notifications sent so far.
    pub fn update_count(&self) -> u64 {
        *self.updates.borrow()
    }

    pub fn logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    pub fn robots(&self) -> Vec<Arc<dyn Robot>> {
        self.account.robots()
    }

    /// Default timezone for user supplied times of day
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Wait between an action and the refresh that observes its effect
    pub fn refresh_wait(&self) -> Duration {
        self.config.refresh_wait()
    }

    pub fn update_interval(&self) -> Duration {
        self.config.update_interval()
    }

    /// Start refreshing every `update_interval`. The first refresh happens
    /// one interval from now.
    pub fn spawn_polling(self: &Arc<Self>) {
        let hub = Arc::downgrade(self);
        let period = self.update_interval();
        let entry_id = self.entry_id.clone();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                hub.refresh().await;
            }
            debug!("[{}] Polling stopped", entry_id);
        });

        let previous = self
            .polling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        info!(
            "[{}] Polling Litter-Robot API every {:?}",
            self.entry_id, period
        );
    }

    /// Stop polling and mark the hub as logged out.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .polling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.logged_in.store(false, Ordering::SeqCst);
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        if let Some(handle) = self
            .polling
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::fake::FakeAccount;
    use crate::account::fake::FakeRobot;

    fn hub_with(account: Arc<FakeAccount>) -> Arc<Hub> {
        Arc::new(Hub::new(
            "test".to_string(),
            AccountConfig::new("cat@example.com", "secret"),
            Tz::UTC,
            account,
        ))
    }

    fn account() -> Arc<FakeAccount> {
        Arc::new(
            FakeAccount::new(vec![Arc::new(FakeRobot::with_serial("LR3C1", "Kitty"))])
                .with_password("secret"),
        )
    }

    #[tokio::test]
    async fn test_login_success() {
        let account = account();
        let hub = hub_with(account.clone());

        hub.login(true).await.unwrap();
        assert!(hub.logged_in());
        assert_eq!(hub.robots().len(), 1);
        assert_eq!(account.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_login_invalid_credentials() {
        let account = Arc::new(FakeAccount::new(vec![]).with_password("other"));
        let hub = hub_with(account);

        let err = hub.login(true).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidAuth(_)));
        assert!(!hub.logged_in());
    }

    #[tokio::test]
    async fn test_login_unreachable_is_not_ready() {
        let account = account();
        account.set_unreachable(true);
        let hub = hub_with(account);

        let err = hub.login(true).await.unwrap_err();
        assert!(matches!(err, HubError::NotReady(_)));
        assert!(!hub.logged_in());
    }

    #[tokio::test]
    async fn test_refresh_failure_toggles_availability() {
        let account = account();
        let hub = hub_with(account.clone());
        hub.login(true).await.unwrap();

        account.set_fail_refresh(true);
        assert!(!hub.refresh().await);
        assert!(!hub.logged_in());

        account.set_fail_refresh(false);
        assert!(hub.refresh().await);
        assert!(hub.logged_in());
        assert_eq!(hub.update_count(), 2);
    }

    #[tokio::test]
    async fn test_set_updated_data_notifies_without_refresh() {
        let account = account();
        let hub = hub_with(account.clone());
        let mut rx = hub.subscribe();

        hub.set_updated_data();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(account.refresh_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_refreshes_on_interval() {
        let account = account();
        let hub = hub_with(account.clone());
        hub.login(true).await.unwrap();
        hub.spawn_polling();

        // Nothing happens before the first interval elapses
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(account.refresh_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(account.refresh_count(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(account.refresh_count(), 2);

        hub.shutdown();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(account.refresh_count(), 2);
        assert!(!hub.logged_in());
    }
}
