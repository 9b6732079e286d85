// managers/progress.rs - ProgressManager lifecycle (spec.md §4.5, §5)
//
// Unlike Streak/XP, this Manager owns a *collection* keyed by item id, and
// the listener streams per-item changes rather than a single aggregate.

use chrono::Utc;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::config::ProgressConfiguration;
use crate::error::{Error, Result};
use crate::logger::{AnalyticsEvent, Logger};
use crate::model::{Metadata, MetadataValue, ProgressItem};
use crate::persistence::LocalPersistence;
use crate::remote::ProgressRemote;

const PREFIX: &str = crate::logger::PROGRESS_PREFIX;
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A single change to a progress item, as broadcast to subscribers.
#[derive(Debug, Clone)]
pub struct ProgressChange {
    pub id: String,
    pub item: ProgressItem,
}

pub struct ProgressManager {
    config: ProgressConfiguration,
    local: Arc<dyn LocalPersistence>,
    remote: Arc<dyn ProgressRemote>,
    logger: Arc<dyn Logger>,

    user_id: RwLock<Option<String>>,
    cache: RwLock<HashMap<String, ProgressItem>>,
    changes: broadcast::Sender<ProgressChange>,
    listener: RwLock<Option<JoinHandle<()>>>,
    listener_failed: AtomicBool,
}

impl ProgressManager {
    pub fn new(
        config: ProgressConfiguration,
        local: Arc<dyn LocalPersistence>,
        remote: Arc<dyn ProgressRemote>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            config,
            local,
            remote,
            logger,
            user_id: RwLock::new(None),
            cache: RwLock::new(HashMap::new()),
            changes,
            listener: RwLock::new(None),
            listener_failed: AtomicBool::new(false),
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ProgressChange> {
        self.changes.subscribe()
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

        // Warm start from local persistence before the bulk remote fetch.
        if let Ok(local_items) = self.local.get_all_progress_items(&self.config.progress_key).await {
            let mut cache = self.cache.write().await;
            for item in local_items {
                cache.insert(item.id.clone(), item);
            }
        }

        self.logger.log(AnalyticsEvent::info(
            format!("{PREFIX}BulkLoad_Start"),
            serde_json::json!({ "progress_key": self.config.progress_key }),
        ));

        match self.remote.list_items(&self.config.progress_key).await {
            Ok(items) => {
                let mut cache = self.cache.write().await;
                for item in items {
                    merge_never_regress(&mut cache, item);
                }
                self.logger.log(AnalyticsEvent::info(
                    format!("{PREFIX}BulkLoad_Success"),
                    serde_json::json!({ "progress_key": self.config.progress_key, "count": cache.len() }),
                ));
            }
            Err(e) => self
                .logger
                .log(AnalyticsEvent::error(format!("{PREFIX}BulkLoad_Fail"), e.to_string())),
        }

        self.attach_listener().await;
        Ok(())
    }

    pub async fn log_out(&self) {
        self.cancel_listener().await;
        *self.user_id.write().await = None;
        self.cache.write().await.clear();
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
            serde_json::json!({ "progress_key": self.config.progress_key }),
        ));

        let weak = Arc::downgrade(self);
        let progress_key = self.config.progress_key.clone();
        let mut stream = self.remote.stream_changes(&progress_key);

        let handle = tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                let Some(manager) = weak.upgrade() else { return };
                match result {
                    Ok(item) => {
                        manager.logger.log(AnalyticsEvent::info(
                            format!("{PREFIX}RemoteListener_Success"),
                            serde_json::json!({ "progress_key": manager.config.progress_key, "id": item.id }),
                        ));
                        let mut cache = manager.cache.write().await;
                        merge_listener_update(&mut cache, item, &manager.changes);
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

    pub async fn get_progress(&self, id: &str) -> f64 {
        self.cache.read().await.get(id).map(|item| item.value).unwrap_or(0.0)
    }

    pub async fn get_progress_item(&self, id: &str) -> Option<ProgressItem> {
        self.cache.read().await.get(id).cloned()
    }

    pub async fn get_all_progress(&self) -> HashMap<String, f64> {
        self.cache
            .read()
            .await
            .iter()
            .map(|(id, item)| (id.clone(), item.value))
            .collect()
    }

    pub async fn get_all_progress_items(&self) -> Vec<ProgressItem> {
        self.cache.read().await.values().cloned().collect()
    }

    pub async fn get_progress_items(&self, for_field: &str, equal_to: &MetadataValue) -> Vec<ProgressItem> {
        self.cache
            .read()
            .await
            .values()
            .filter(|item| item.metadata.get(for_field) == Some(equal_to))
            .cloned()
            .collect()
    }

    pub async fn get_max_progress(&self, for_field: &str, equal_to: &MetadataValue) -> f64 {
        self.cache
            .read()
            .await
            .values()
            .filter(|item| item.metadata.get(for_field) == Some(equal_to))
            .map(|item| item.value)
            .fold(0.0, f64::max)
    }

    /// `addProgress(id, value, metadata?)` (spec.md §4.5): never-regress on
    /// `value`, shallow-merge on `metadata`, optimistic write-through.
    pub async fn add_progress(self: &Arc<Self>, id: impl Into<String>, value: f64, metadata: Option<Metadata>) -> Result<()> {
        let id = id.into();
        self.logger.log(AnalyticsEvent::info(
            format!("{PREFIX}AddProgress_Start"),
            serde_json::json!({ "progress_key": self.config.progress_key, "id": id }),
        ));

        self.require_logged_in().await?;
        if !(0.0..=1.0).contains(&value) {
            let err = Error::Validation("progress value must be in [0.0, 1.0]".to_string());
            self.logger
                .log(AnalyticsEvent::error(format!("{PREFIX}AddProgress_Fail"), err.to_string()));
            return Err(err);
        }

        let now = Utc::now();
        let item = {
            let mut cache = self.cache.write().await;
            let merged = match cache.get(&id) {
                Some(existing) => {
                    let resolved_value = if existing.value > value { existing.value } else { value };
                    let resolved_metadata = merge_metadata(&existing.metadata, metadata.as_ref());
                    ProgressItem {
                        id: id.clone(),
                        progress_key: self.config.progress_key.clone(),
                        value: resolved_value,
                        date_created: existing.date_created,
                        date_modified: now,
                        metadata: resolved_metadata,
                    }
                }
                None => ProgressItem {
                    id: id.clone(),
                    progress_key: self.config.progress_key.clone(),
                    value,
                    date_created: now,
                    date_modified: now,
                    metadata: metadata.unwrap_or_default(),
                },
            };
            merged.validate()?;
            cache.insert(id.clone(), merged.clone());
            merged
        };

        let _ = self.changes.send(ProgressChange { id: id.clone(), item: item.clone() });

        if let Err(e) = self.local.save_progress_item(&item).await {
            self.logger
                .log(AnalyticsEvent::error(format!("{PREFIX}SaveLocal_Fail"), e.to_string()));
        }

        let result = self.remote.upsert_item(&item).await;
        match &result {
            Ok(()) => self.logger.log(AnalyticsEvent::info(
                format!("{PREFIX}AddProgress_Success"),
                serde_json::json!({ "progress_key": self.config.progress_key, "id": id }),
            )),
            Err(e) => self
                .logger
                .log(AnalyticsEvent::error(format!("{PREFIX}AddProgress_Fail"), e.to_string())),
        }

        self.maybe_reattach().await;
        result
    }

    pub async fn delete_progress(self: &Arc<Self>, id: &str) -> Result<()> {
        self.logger.log(AnalyticsEvent::info(
            format!("{PREFIX}DeleteProgress_Start"),
            serde_json::json!({ "progress_key": self.config.progress_key, "id": id }),
        ));

        self.require_logged_in().await?;
        self.cache.write().await.remove(id);
        let _ = self.local.delete_progress_item(&self.config.progress_key, id).await;
        let result = self.remote.delete_item(&self.config.progress_key, id).await;

        match &result {
            Ok(()) => self.logger.log(AnalyticsEvent::info(
                format!("{PREFIX}DeleteProgress_Success"),
                serde_json::json!({ "progress_key": self.config.progress_key, "id": id }),
            )),
            Err(e) => self
                .logger
                .log(AnalyticsEvent::error(format!("{PREFIX}DeleteProgress_Fail"), e.to_string())),
        }

        self.maybe_reattach().await;
        result
    }

    pub async fn delete_all_progress(self: &Arc<Self>) -> Result<()> {
        self.logger.log(AnalyticsEvent::info(
            format!("{PREFIX}DeleteAllProgress_Start"),
            serde_json::json!({ "progress_key": self.config.progress_key }),
        ));

        self.require_logged_in().await?;
        self.cache.write().await.clear();
        let _ = self.local.delete_all_progress_items(&self.config.progress_key).await;
        let result = self.remote.delete_all_items(&self.config.progress_key).await;

        match &result {
            Ok(()) => self.logger.log(AnalyticsEvent::info(
                format!("{PREFIX}DeleteAllProgress_Success"),
                serde_json::json!({ "progress_key": self.config.progress_key }),
            )),
            Err(e) => self.logger.log(AnalyticsEvent::error(
                format!("{PREFIX}DeleteAllProgress_Fail"),
                e.to_string(),
            )),
        }

        self.maybe_reattach().await;
        result
    }
}

/// Bulk-load merge: an incoming item always wins unless the cache already
/// holds a strictly higher value (never-regress, spec.md §4.5/§8).
fn merge_never_regress(cache: &mut HashMap<String, ProgressItem>, incoming: ProgressItem) {
    match cache.get(&incoming.id) {
        Some(existing) if existing.value > incoming.value => {
            let mut kept = existing.clone();
            kept.metadata = merge_metadata(&kept.metadata, Some(&incoming.metadata));
            kept.date_modified = incoming.date_modified.max(existing.date_modified);
            cache.insert(incoming.id.clone(), kept);
        }
        _ => {
            cache.insert(incoming.id.clone(), incoming);
        }
    }
}

/// Listener merge policy (spec.md §4.5): a lower incoming value is a stale
/// echo — keep the cached value but still accept metadata/date updates.
fn merge_listener_update(
    cache: &mut HashMap<String, ProgressItem>,
    incoming: ProgressItem,
    changes: &broadcast::Sender<ProgressChange>,
) {
    let resolved = match cache.get(&incoming.id) {
        Some(existing) if existing.value > incoming.value => {
            let mut kept = existing.clone();
            kept.metadata = merge_metadata(&kept.metadata, Some(&incoming.metadata));
            kept.date_modified = incoming.date_modified;
            kept
        }
        _ => incoming,
    };
    cache.insert(resolved.id.clone(), resolved.clone());
    let _ = changes.send(ProgressChange { id: resolved.id.clone(), item: resolved });
}

/// Metadata merge rule (spec.md §4.5): nil/empty preserves existing
/// verbatim; otherwise a shallow key-wise merge.
fn merge_metadata(existing: &Metadata, incoming: Option<&Metadata>) -> Metadata {
    match incoming {
        None => existing.clone(),
        Some(m) if m.is_empty() => existing.clone(),
        Some(m) => {
            let mut merged = existing.clone();
            for (k, v) in m {
                merged.insert(k.clone(), v.clone());
            }
            merged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgressConfiguration;
    use crate::logger::NoopLogger;
    use crate::managers::fakes::{FakeLocalPersistence, FakeProgressRemote};
    use crate::model::MetadataValue;
    use std::time::Duration;

    fn manager() -> (Arc<ProgressManager>, Arc<FakeProgressRemote>) {
        let remote = Arc::new(FakeProgressRemote::new());
        let manager = Arc::new(ProgressManager::new(
            ProgressConfiguration::new("lessons"),
            Arc::new(FakeLocalPersistence::new()),
            remote.clone(),
            Arc::new(NoopLogger),
        ));
        (manager, remote)
    }

    #[tokio::test]
    async fn mutations_require_login() {
        let (manager, _remote) = manager();
        let err = manager.add_progress("lvl_1", 0.5, None).await.unwrap_err();
        assert!(matches!(err, Error::NotLoggedIn));
    }

    #[tokio::test]
    async fn out_of_range_value_is_rejected() {
        let (manager, _remote) = manager();
        manager.log_in("alice").await.unwrap();
        let err = manager.add_progress("lvl_1", 1.5, None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    /// spec.md §8 scenario 5 / the never-regress property.
    #[tokio::test]
    async fn scenario_5_never_regress_and_metadata_merge() {
        let (manager, _remote) = manager();
        manager.log_in("alice").await.unwrap();

        manager.add_progress("lvl_1", 0.3, None).await.unwrap();

        let mut stars = Metadata::new();
        stars.insert("stars".to_string(), MetadataValue::Int(3));
        manager.add_progress("lvl_1", 0.9, Some(stars)).await.unwrap();

        let mut hint = Metadata::new();
        hint.insert("hint_used".to_string(), MetadataValue::Bool(true));
        manager.add_progress("lvl_1", 0.5, Some(hint)).await.unwrap();

        let item = manager.get_progress_item("lvl_1").await.unwrap();
        assert_eq!(item.value, 0.9);
        assert_eq!(item.metadata.get("stars"), Some(&MetadataValue::Int(3)));
        assert_eq!(item.metadata.get("hint_used"), Some(&MetadataValue::Bool(true)));
        assert_eq!(manager.get_progress("lvl_1").await, 0.9);
    }

    #[tokio::test]
    async fn empty_metadata_preserves_existing() {
        let (manager, _remote) = manager();
        manager.log_in("alice").await.unwrap();

        let mut meta = Metadata::new();
        meta.insert("stars".to_string(), MetadataValue::Int(2));
        manager.add_progress("lvl_1", 0.4, Some(meta)).await.unwrap();

        manager.add_progress("lvl_1", 0.6, Some(Metadata::new())).await.unwrap();

        let item = manager.get_progress_item("lvl_1").await.unwrap();
        assert_eq!(item.value, 0.6);
        assert_eq!(item.metadata.get("stars"), Some(&MetadataValue::Int(2)));
    }

    #[tokio::test]
    async fn logout_clears_cache() {
        let (manager, _remote) = manager();
        manager.log_in("alice").await.unwrap();
        manager.add_progress("lvl_1", 0.4, None).await.unwrap();
        manager.log_out().await;
        assert!(manager.get_all_progress_items().await.is_empty());
        assert_eq!(manager.get_progress("lvl_1").await, 0.0);
    }

    #[tokio::test]
    async fn bulk_load_applies_never_regress_against_local_warm_start() {
        let (manager, remote) = manager();
        let now = Utc::now();
        remote.seed(ProgressItem {
            id: "lvl_1".to_string(),
            progress_key: "lessons".to_string(),
            value: 0.2,
            date_created: now,
            date_modified: now,
            metadata: Metadata::new(),
        });

        manager.log_in("alice").await.unwrap();
        assert_eq!(manager.get_progress("lvl_1").await, 0.2);
    }

    #[tokio::test]
    async fn listener_update_with_lower_value_is_ignored_but_metadata_lands() {
        let (manager, remote) = manager();
        manager.log_in("alice").await.unwrap();
        manager.add_progress("lvl_1", 0.8, None).await.unwrap();

        let emitter = remote.current_emitter();
        let mut stale = Metadata::new();
        stale.insert("note".to_string(), MetadataValue::String("synced".to_string()));
        let now = Utc::now();
        let _ = emitter.send(Ok(ProgressItem {
            id: "lvl_1".to_string(),
            progress_key: "lessons".to_string(),
            value: 0.1,
            date_created: now,
            date_modified: now,
            metadata: stale,
        }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.get_progress("lvl_1").await, 0.8);
        let item = manager.get_progress_item("lvl_1").await.unwrap();
        assert_eq!(item.metadata.get("note"), Some(&MetadataValue::String("synced".to_string())));
    }

    #[tokio::test]
    async fn get_max_progress_filters_by_metadata() {
        let (manager, _remote) = manager();
        manager.log_in("alice").await.unwrap();

        let mut tier_a = Metadata::new();
        tier_a.insert("tier".to_string(), MetadataValue::String("bronze".to_string()));
        manager.add_progress("a", 0.4, Some(tier_a.clone())).await.unwrap();
        manager.add_progress("b", 0.7, Some(tier_a)).await.unwrap();

        let mut tier_b = Metadata::new();
        tier_b.insert("tier".to_string(), MetadataValue::String("gold".to_string()));
        manager.add_progress("c", 0.95, Some(tier_b)).await.unwrap();

        let max = manager
            .get_max_progress("tier", &MetadataValue::String("bronze".to_string()))
            .await;
        assert_eq!(max, 0.7);
    }
}
