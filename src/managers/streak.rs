// managers/streak.rs - StreakManager lifecycle (spec.md §4.3, §5)

use chrono::Utc;
use chrono_tz::Tz;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::calculators::calculate_streak;
use crate::config::{FreezeBehavior, StreakConfiguration};
use crate::error::{Error, Result};
use crate::logger::{AnalyticsEvent, Logger};
use crate::model::{CurrentStreakData, StreakEvent, StreakFreeze};
use crate::persistence::LocalPersistence;
use crate::remote::StreakRemote;

const PREFIX: &str = crate::logger::STREAK_PREFIX;

/// Owns one `(user, streakKey)` aggregate: the in-memory value, the
/// remote listener task, and the self-healing "failed to attach" latch
/// (spec.md §4.3, §5).
pub struct StreakManager {
    config: StreakConfiguration,
    local: Arc<dyn LocalPersistence>,
    remote: Arc<dyn StreakRemote>,
    logger: Arc<dyn Logger>,
    user_zone: Tz,

    user_id: RwLock<Option<String>>,
    current: watch::Sender<CurrentStreakData>,
    listener: RwLock<Option<JoinHandle<()>>>,
    listener_failed: AtomicBool,
}

impl StreakManager {
    pub fn new(
        config: StreakConfiguration,
        local: Arc<dyn LocalPersistence>,
        remote: Arc<dyn StreakRemote>,
        logger: Arc<dyn Logger>,
        user_zone: Tz,
    ) -> Self {
        let (tx, _rx) = watch::channel(CurrentStreakData::blank(config.streak_key.clone()));
        Self {
            config,
            local,
            remote,
            logger,
            user_zone,
            user_id: RwLock::new(None),
            current: tx,
            listener: RwLock::new(None),
            listener_failed: AtomicBool::new(false),
        }
    }

    /// Subscribe to the observable aggregate. Cloning the receiver is
    /// cheap; every successful recompute or listener emission publishes here.
    pub fn observe(&self) -> watch::Receiver<CurrentStreakData> {
        self.current.subscribe()
    }

    pub fn snapshot(&self) -> CurrentStreakData {
        self.current.borrow().clone()
    }

    pub async fn log_in(self: &Arc<Self>, user_id: impl Into<String>) -> Result<()> {
        let user_id = user_id.into();
        {
            let current = self.user_id.read().await;
            if current.as_deref().is_some_and(|u| u != user_id) {
                drop(current);
                self.log_out().await;
            }
        }

        *self.user_id.write().await = Some(user_id.clone());

        if let Ok(Some(cached)) = self.local.get_saved_streak_data(&self.config.streak_key).await {
            let _ = self.current.send(cached);
        }

        self.attach_listener().await;

        if !self.config.use_server_calculation {
            self.recompute().await;
        }

        Ok(())
    }

    pub async fn log_out(&self) {
        self.cancel_listener().await;
        *self.user_id.write().await = None;
        let blank = CurrentStreakData::blank(self.config.streak_key.clone());
        let _ = self.local.save_current_streak_data(&blank).await;
        let _ = self.current.send(blank);
    }

    async fn cancel_listener(&self) {
        if let Some(handle) = self.listener.write().await.take() {
            handle.abort();
        }
        self.listener_failed.store(false, Ordering::SeqCst);
    }

    async fn attach_listener(self: &Arc<Self>) {
        self.cancel_listener().await;
        self.logger.log(AnalyticsEvent::info(
            format!("{PREFIX}RemoteListener_Start"),
            serde_json::json!({ "streak_key": self.config.streak_key }),
        ));

        let weak = Arc::downgrade(self);
        let streak_key = self.config.streak_key.clone();
        let mut stream = self.remote.stream_aggregate(&streak_key);

        let handle = tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                let Some(manager) = weak.upgrade() else { return };
                match result {
                    Ok(data) => {
                        manager.logger.log(AnalyticsEvent::info(
                            format!("{PREFIX}RemoteListener_Success"),
                            serde_json::json!({ "streak_key": manager.config.streak_key }),
                        ));
                        let _ = manager.current.send(data);
                    }
                    Err(e) => {
                        manager.logger.log(AnalyticsEvent::error(
                            format!("{PREFIX}RemoteListener_Fail"),
                            e.to_string(),
                        ));
                        manager.listener_failed.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            }
        });

        *self.listener.write().await = Some(handle);
    }

    /// Every mutation checks the listener-failed latch afterward and
    /// re-attaches if needed (spec.md §4.3 "Retry-on-failed-listener").
    async fn maybe_reattach(self: &Arc<Self>) {
        if self.listener_failed.load(Ordering::SeqCst) {
            self.attach_listener().await;
        }
    }

    async fn require_logged_in(&self) -> Result<String> {
        self.user_id.read().await.clone().ok_or(Error::NotLoggedIn)
    }

    async fn recompute(self: &Arc<Self>) {
        self.logger.log(AnalyticsEvent::info(
            format!("{PREFIX}CalculateStreak_Start"),
            serde_json::json!({ "streak_key": self.config.streak_key }),
        ));

        let result: Result<()> = async {
            let events = self.remote.list_events(&self.config.streak_key).await?;
            let freezes = self.remote.list_freezes(&self.config.streak_key).await?;
            let (mut data, _consumed) =
                calculate_streak(&events, &freezes, &self.config, Utc::now(), self.user_zone);
            data.user_id = self.user_id.read().await.clone();

            self.remote.write_aggregate(&data).await?;
            let _ = self.local.save_current_streak_data(&data).await;
            let _ = self.current.send(data);
            Ok(())
        }
        .await;

        match result {
            Ok(()) => self.logger.log(AnalyticsEvent::info(
                format!("{PREFIX}CalculateStreak_Success"),
                serde_json::json!({ "streak_key": self.config.streak_key }),
            )),
            Err(e) => self
                .logger
                .log(AnalyticsEvent::error(format!("{PREFIX}CalculateStreak_Fail"), e.to_string())),
        }
    }

    pub async fn add_streak_event(self: &Arc<Self>, event: StreakEvent) -> Result<()> {
        event.validate(Utc::now())?;
        self.require_logged_in().await?;

        let result = self.remote.append_event(&self.config.streak_key, &event).await;
        if result.is_ok() && !self.config.use_server_calculation {
            self.recompute().await;
        }
        self.maybe_reattach().await;
        result
    }

    pub async fn get_all_streak_events(&self) -> Result<Vec<StreakEvent>> {
        self.require_logged_in().await?;
        self.remote.list_events(&self.config.streak_key).await
    }

    pub async fn delete_all_streak_events(self: &Arc<Self>) -> Result<()> {
        self.require_logged_in().await?;
        let result = self.remote.delete_all_events(&self.config.streak_key).await;
        self.maybe_reattach().await;
        result
    }

    pub async fn add_streak_freeze(self: &Arc<Self>, freeze: StreakFreeze) -> Result<()> {
        self.require_logged_in().await?;
        let result = self.remote.add_freeze(&self.config.streak_key, &freeze).await;
        self.maybe_reattach().await;
        result
    }

    pub async fn use_streak_freeze(self: &Arc<Self>, freeze_id: &str) -> Result<()> {
        self.require_logged_in().await?;
        if self.config.freeze_behavior == FreezeBehavior::None {
            return Err(Error::FreezeNotAvailable(freeze_id.to_string()));
        }
        let result = self.remote.mark_freeze_used(&self.config.streak_key, freeze_id).await;
        self.maybe_reattach().await;
        result
    }

    pub async fn get_all_streak_freezes(&self) -> Result<Vec<StreakFreeze>> {
        self.require_logged_in().await?;
        self.remote.list_freezes(&self.config.streak_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreakConfiguration;
    use crate::logger::NoopLogger;
    use crate::managers::fakes::{FakeLocalPersistence, FakeStreakRemote};
    use chrono_tz::UTC;
    use std::time::Duration;

    fn manager() -> (Arc<StreakManager>, Arc<FakeStreakRemote>) {
        let remote = Arc::new(FakeStreakRemote::new());
        let manager = Arc::new(StreakManager::new(
            StreakConfiguration::new("reading"),
            Arc::new(FakeLocalPersistence::new()),
            remote.clone(),
            Arc::new(NoopLogger),
            UTC,
        ));
        (manager, remote)
    }

    #[tokio::test]
    async fn mutations_require_login() {
        let (manager, _remote) = manager();
        let event = StreakEvent {
            id: "e1".to_string(),
            timestamp: Utc::now(),
            timezone: "UTC".to_string(),
            metadata: Default::default(),
            is_freeze: false,
            freeze_id: None,
        };
        let err = manager.add_streak_event(event).await.unwrap_err();
        assert!(matches!(err, Error::NotLoggedIn));
    }

    #[tokio::test]
    async fn logout_resets_to_blank_aggregate() {
        let (manager, _remote) = manager();
        manager.log_in("alice").await.unwrap();
        manager.log_out().await;

        let blank = CurrentStreakData::blank("reading");
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.current_streak, blank.current_streak);
        assert_eq!(snapshot.streak_key, blank.streak_key);
        assert!(manager.require_logged_in().await.is_err());
    }

    #[tokio::test]
    async fn relogin_with_different_user_ignores_stale_listener_emissions() {
        let (manager, remote) = manager();
        manager.log_in("alice").await.unwrap();
        let stale_emitter = remote.current_emitter();

        manager.log_in("bob").await.unwrap();

        // Alice's listener task was aborted by the relogin; this emission
        // has nowhere to land (its receiver is no longer polled).
        let mut stale = CurrentStreakData::blank("reading");
        stale.current_streak = Some(999);
        let _ = stale_emitter.send(Ok(stale));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_ne!(manager.snapshot().current_streak, Some(999));
    }

    #[tokio::test]
    async fn listener_failure_latches_and_self_heals_on_next_mutation() {
        let (manager, remote) = manager();
        manager.log_in("alice").await.unwrap();
        let emitter = remote.current_emitter();
        let _ = emitter.send(Err(Error::Network("disconnected".to_string())));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.listener_failed.load(Ordering::SeqCst));

        let event = StreakEvent {
            id: "e1".to_string(),
            timestamp: Utc::now(),
            timezone: "UTC".to_string(),
            metadata: Default::default(),
            is_freeze: false,
            freeze_id: None,
        };
        manager.add_streak_event(event).await.unwrap();
        assert!(!manager.listener_failed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn add_event_triggers_client_recompute_and_writes_back() {
        let (manager, remote) = manager();
        manager.log_in("alice").await.unwrap();

        let event = StreakEvent {
            id: "e1".to_string(),
            timestamp: Utc::now(),
            timezone: "UTC".to_string(),
            metadata: Default::default(),
            is_freeze: false,
            freeze_id: None,
        };
        manager.add_streak_event(event).await.unwrap();

        assert_eq!(manager.snapshot().current_streak, Some(1));
        assert!(!remote.aggregate_writes.lock().unwrap().is_empty());
    }
}
