// managers/xp.rs - ExperiencePointsManager lifecycle (spec.md §4.4, §5)
//
// Mirrors StreakManager: same listener/retry/logging shape, keyed by
// `experienceKey` instead of `streakKey`, with no freeze concept.

use chrono::Utc;
use chrono_tz::Tz;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::calculators::{calculate_xp, get_total_points_for_metadata};
use crate::config::XPConfiguration;
use crate::error::{Error, Result};
use crate::logger::{AnalyticsEvent, Logger};
use crate::model::{CurrentXPData, MetadataValue, XPEvent};
use crate::persistence::LocalPersistence;
use crate::remote::XPRemote;

const PREFIX: &str = crate::logger::XP_PREFIX;

pub struct ExperiencePointsManager {
    config: XPConfiguration,
    local: Arc<dyn LocalPersistence>,
    remote: Arc<dyn XPRemote>,
    logger: Arc<dyn Logger>,
    user_zone: Tz,

    user_id: RwLock<Option<String>>,
    current: watch::Sender<CurrentXPData>,
    listener: RwLock<Option<JoinHandle<()>>>,
    listener_failed: AtomicBool,
}

impl ExperiencePointsManager {
    pub fn new(
        config: XPConfiguration,
        local: Arc<dyn LocalPersistence>,
        remote: Arc<dyn XPRemote>,
        logger: Arc<dyn Logger>,
        user_zone: Tz,
    ) -> Self {
        let (tx, _rx) = watch::channel(CurrentXPData::blank(config.experience_key.clone()));
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

    pub fn observe(&self) -> watch::Receiver<CurrentXPData> {
        self.current.subscribe()
    }

    pub fn snapshot(&self) -> CurrentXPData {
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

        if let Ok(Some(cached)) = self.local.get_saved_xp_data(&self.config.experience_key).await {
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
        let blank = CurrentXPData::blank(self.config.experience_key.clone());
        let _ = self.local.save_current_xp_data(&blank).await;
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
            serde_json::json!({ "experience_key": self.config.experience_key }),
        ));

        let weak = Arc::downgrade(self);
        let experience_key = self.config.experience_key.clone();
        let mut stream = self.remote.stream_aggregate(&experience_key);

        let handle = tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                let Some(manager) = weak.upgrade() else { return };
                match result {
                    Ok(data) => {
                        manager.logger.log(AnalyticsEvent::info(
                            format!("{PREFIX}RemoteListener_Success"),
                            serde_json::json!({ "experience_key": manager.config.experience_key }),
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
            format!("{PREFIX}CalculateXP_Start"),
            serde_json::json!({ "experience_key": self.config.experience_key }),
        ));

        let result: Result<()> = async {
            let events = self.remote.list_events(&self.config.experience_key).await?;
            let mut data = calculate_xp(&events, &self.config, Utc::now(), self.user_zone);
            data.user_id = self.user_id.read().await.clone();

            self.remote.write_aggregate(&data).await?;
            let _ = self.local.save_current_xp_data(&data).await;
            let _ = self.current.send(data);
            Ok(())
        }
        .await;

        match result {
            Ok(()) => self.logger.log(AnalyticsEvent::info(
                format!("{PREFIX}CalculateXP_Success"),
                serde_json::json!({ "experience_key": self.config.experience_key }),
            )),
            Err(e) => self
                .logger
                .log(AnalyticsEvent::error(format!("{PREFIX}CalculateXP_Fail"), e.to_string())),
        }
    }

    pub async fn add_experience_points(self: &Arc<Self>, event: XPEvent) -> Result<()> {
        self.logger.log(AnalyticsEvent::info(
            format!("{PREFIX}AddExperiencePoints_Start"),
            serde_json::json!({ "experience_key": self.config.experience_key }),
        ));

        event.validate(Utc::now())?;
        self.require_logged_in().await?;

        let result = self.remote.append_event(&self.config.experience_key, &event).await;
        match &result {
            Ok(()) => self.logger.log(AnalyticsEvent::info(
                format!("{PREFIX}AddExperiencePoints_Success"),
                serde_json::json!({ "experience_key": self.config.experience_key }),
            )),
            Err(e) => self.logger.log(AnalyticsEvent::error(
                format!("{PREFIX}AddExperiencePoints_Fail"),
                e.to_string(),
            )),
        }

        if result.is_ok() && !self.config.use_server_calculation {
            self.recompute().await;
        }
        self.maybe_reattach().await;
        result
    }

    pub async fn get_all_experience_points_events(&self) -> Result<Vec<XPEvent>> {
        self.require_logged_in().await?;
        self.remote.list_events(&self.config.experience_key).await
    }

    /// Applies the metadata filter at the manager layer after fetching all
    /// events (spec.md §4.4).
    pub async fn get_all_experience_points_events_for(
        &self,
        for_field: &str,
        equal_to: &MetadataValue,
    ) -> Result<Vec<XPEvent>> {
        let events = self.get_all_experience_points_events().await?;
        Ok(events
            .into_iter()
            .filter(|e| e.metadata.get(for_field) == Some(equal_to))
            .collect())
    }

    pub async fn get_total_points_for_metadata(&self, field: &str, value: &MetadataValue) -> Result<u64> {
        let events = self.get_all_experience_points_events().await?;
        Ok(get_total_points_for_metadata(&events, field, value))
    }

    pub async fn delete_all_experience_points_events(self: &Arc<Self>) -> Result<()> {
        self.require_logged_in().await?;
        let result = self.remote.delete_all_events(&self.config.experience_key).await;
        self.maybe_reattach().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::XPConfiguration;
    use crate::logger::NoopLogger;
    use crate::managers::fakes::{FakeLocalPersistence, FakeXPRemote};
    use chrono_tz::UTC;
    use std::time::Duration;

    fn manager() -> (Arc<ExperiencePointsManager>, Arc<FakeXPRemote>) {
        let remote = Arc::new(FakeXPRemote::new());
        let manager = Arc::new(ExperiencePointsManager::new(
            XPConfiguration::new("reading"),
            Arc::new(FakeLocalPersistence::new()),
            remote.clone(),
            Arc::new(NoopLogger),
            UTC,
        ));
        (manager, remote)
    }

    fn event(points: i64) -> XPEvent {
        XPEvent {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            timezone: "UTC".to_string(),
            metadata: Default::default(),
            experience_key: "reading".to_string(),
            points,
        }
    }

    #[tokio::test]
    async fn add_points_requires_login() {
        let (manager, _remote) = manager();
        let err = manager.add_experience_points(event(10)).await.unwrap_err();
        assert!(matches!(err, Error::NotLoggedIn));
    }

    #[tokio::test]
    async fn add_points_recomputes_and_accumulates_today() {
        let (manager, _remote) = manager();
        manager.log_in("alice").await.unwrap();

        manager.add_experience_points(event(10)).await.unwrap();
        manager.add_experience_points(event(15)).await.unwrap();

        assert_eq!(manager.snapshot().points_today, 25);
    }

    #[tokio::test]
    async fn metadata_filter_sums_only_matching_events() {
        let (manager, _remote) = manager();
        manager.log_in("alice").await.unwrap();

        let mut math = event(10);
        math.metadata.insert("category".to_string(), MetadataValue::String("math".to_string()));
        let mut reading = event(5);
        reading
            .metadata
            .insert("category".to_string(), MetadataValue::String("reading".to_string()));

        manager.add_experience_points(math).await.unwrap();
        manager.add_experience_points(reading).await.unwrap();

        let total = manager
            .get_total_points_for_metadata("category", &MetadataValue::String("math".to_string()))
            .await
            .unwrap();
        assert_eq!(total, 10);
    }

    #[tokio::test]
    async fn logout_then_login_clears_prior_points() {
        let (manager, _remote) = manager();
        manager.log_in("alice").await.unwrap();
        manager.add_experience_points(event(50)).await.unwrap();
        assert_eq!(manager.snapshot().points_today, 50);

        manager.log_out().await;
        assert_eq!(manager.snapshot().points_today, 0);
    }

    #[tokio::test]
    async fn negative_points_are_rejected_before_touching_remote() {
        let (manager, remote) = manager();
        manager.log_in("alice").await.unwrap();
        let err = manager.add_experience_points(event(-1)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(remote.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn listener_failure_latches_and_clears_on_next_mutation() {
        let (manager, remote) = manager();
        manager.log_in("alice").await.unwrap();
        let emitter = remote.current_emitter();
        let _ = emitter.send(Err(Error::Network("disconnected".to_string())));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.listener_failed.load(Ordering::SeqCst));

        manager.add_experience_points(event(5)).await.unwrap();
        assert!(!manager.listener_failed.load(Ordering::SeqCst));
    }
}
