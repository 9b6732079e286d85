// managers/fakes.rs - Hand-rolled in-memory fakes for Manager lifecycle tests.
//
// Grounded on the teacher's own test style (`focus_time/focus_time_tests.rs`
// builds plain fixture structs rather than reaching for a mocking crate);
// a hand-rolled fake is simpler than `mockall` here because the contract
// is small and tests need to inspect call sequences and script emissions
// on the listener stream (e.g. pushing a failure to exercise the
// "listener failed to attach" latch).
#![cfg(test)]

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::model::{CurrentStreakData, CurrentXPData, ProgressItem, StreakEvent, StreakFreeze, XPEvent};
use crate::persistence::LocalPersistence;
use crate::remote::{ProgressRemote, StreakRemote, XPRemote};

#[derive(Default)]
pub struct FakeLocalPersistence {
    streak: Mutex<HashMap<String, CurrentStreakData>>,
    xp: Mutex<HashMap<String, CurrentXPData>>,
    progress: Mutex<HashMap<String, ProgressItem>>,
}

impl FakeLocalPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalPersistence for FakeLocalPersistence {
    async fn get_saved_streak_data(&self, streak_key: &str) -> Result<Option<CurrentStreakData>> {
        Ok(self.streak.lock().unwrap().get(streak_key).cloned())
    }

    async fn save_current_streak_data(&self, data: &CurrentStreakData) -> Result<()> {
        self.streak.lock().unwrap().insert(data.streak_key.clone(), data.clone());
        Ok(())
    }

    async fn get_saved_xp_data(&self, experience_key: &str) -> Result<Option<CurrentXPData>> {
        Ok(self.xp.lock().unwrap().get(experience_key).cloned())
    }

    async fn save_current_xp_data(&self, data: &CurrentXPData) -> Result<()> {
        self.xp.lock().unwrap().insert(data.experience_key.clone(), data.clone());
        Ok(())
    }

    async fn get_all_progress_items(&self, progress_key: &str) -> Result<Vec<ProgressItem>> {
        Ok(self
            .progress
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.progress_key == progress_key)
            .cloned()
            .collect())
    }

    async fn get_progress_item(&self, progress_key: &str, id: &str) -> Result<Option<ProgressItem>> {
        let key = format!("{progress_key}_{id}");
        Ok(self.progress.lock().unwrap().get(&key).cloned())
    }

    async fn save_progress_item(&self, item: &ProgressItem) -> Result<()> {
        self.progress.lock().unwrap().insert(item.composite_id(), item.clone());
        Ok(())
    }

    async fn save_progress_items(&self, items: &[ProgressItem]) -> Result<()> {
        let mut guard = self.progress.lock().unwrap();
        for item in items {
            guard.insert(item.composite_id(), item.clone());
        }
        Ok(())
    }

    async fn delete_progress_item(&self, progress_key: &str, id: &str) -> Result<()> {
        let key = format!("{progress_key}_{id}");
        self.progress.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn delete_all_progress_items(&self, progress_key: &str) -> Result<()> {
        self.progress.lock().unwrap().retain(|_, v| v.progress_key != progress_key);
        Ok(())
    }
}

/// A scriptable remote fake: every `stream_*` call replaces the emission
/// channel, and tests grab the freshest `Sender` via `current_emitter()` to
/// push listener updates/failures on demand.
#[derive(Default)]
pub struct FakeStreakRemote {
    pub events: Mutex<Vec<StreakEvent>>,
    pub freezes: Mutex<Vec<StreakFreeze>>,
    pub aggregate_writes: Mutex<Vec<CurrentStreakData>>,
    emitter: Mutex<Option<mpsc::UnboundedSender<Result<CurrentStreakData>>>>,
}

impl FakeStreakRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_emitter(&self) -> mpsc::UnboundedSender<Result<CurrentStreakData>> {
        self.emitter.lock().unwrap().clone().expect("listener not attached yet")
    }
}

#[async_trait]
impl StreakRemote for FakeStreakRemote {
    async fn append_event(&self, _streak_key: &str, event: &StreakEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn list_events(&self, _streak_key: &str) -> Result<Vec<StreakEvent>> {
        Ok(self.events.lock().unwrap().clone())
    }

    async fn delete_all_events(&self, _streak_key: &str) -> Result<()> {
        self.events.lock().unwrap().clear();
        Ok(())
    }

    async fn list_freezes(&self, _streak_key: &str) -> Result<Vec<StreakFreeze>> {
        Ok(self.freezes.lock().unwrap().clone())
    }

    async fn add_freeze(&self, _streak_key: &str, freeze: &StreakFreeze) -> Result<()> {
        self.freezes.lock().unwrap().push(freeze.clone());
        Ok(())
    }

    async fn mark_freeze_used(&self, _streak_key: &str, freeze_id: &str) -> Result<()> {
        let mut freezes = self.freezes.lock().unwrap();
        if let Some(freeze) = freezes.iter_mut().find(|f| f.id == freeze_id) {
            freeze.date_used = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn write_aggregate(&self, data: &CurrentStreakData) -> Result<()> {
        self.aggregate_writes.lock().unwrap().push(data.clone());
        Ok(())
    }

    async fn request_server_calculation(&self, _streak_key: &str) -> Result<CurrentStreakData> {
        Ok(self.aggregate_writes.lock().unwrap().last().cloned().unwrap_or_default())
    }

    fn stream_aggregate(&self, _streak_key: &str) -> BoxStream<'static, Result<CurrentStreakData>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.emitter.lock().unwrap() = Some(tx);
        Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        }))
    }
}

#[derive(Default)]
pub struct FakeXPRemote {
    pub events: Mutex<Vec<XPEvent>>,
    pub aggregate_writes: Mutex<Vec<CurrentXPData>>,
    emitter: Mutex<Option<mpsc::UnboundedSender<Result<CurrentXPData>>>>,
}

impl FakeXPRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_emitter(&self) -> mpsc::UnboundedSender<Result<CurrentXPData>> {
        self.emitter.lock().unwrap().clone().expect("listener not attached yet")
    }
}

#[async_trait]
impl XPRemote for FakeXPRemote {
    async fn append_event(&self, _experience_key: &str, event: &XPEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn list_events(&self, _experience_key: &str) -> Result<Vec<XPEvent>> {
        Ok(self.events.lock().unwrap().clone())
    }

    async fn delete_all_events(&self, _experience_key: &str) -> Result<()> {
        self.events.lock().unwrap().clear();
        Ok(())
    }

    async fn write_aggregate(&self, data: &CurrentXPData) -> Result<()> {
        self.aggregate_writes.lock().unwrap().push(data.clone());
        Ok(())
    }

    async fn request_server_calculation(&self, _experience_key: &str) -> Result<CurrentXPData> {
        Ok(self.aggregate_writes.lock().unwrap().last().cloned().unwrap_or_default())
    }

    fn stream_aggregate(&self, _experience_key: &str) -> BoxStream<'static, Result<CurrentXPData>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.emitter.lock().unwrap() = Some(tx);
        Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        }))
    }
}

#[derive(Default)]
pub struct FakeProgressRemote {
    pub items: Mutex<HashMap<String, ProgressItem>>,
    pub upserts: Mutex<Vec<ProgressItem>>,
    emitter: Mutex<Option<mpsc::UnboundedSender<Result<ProgressItem>>>>,
}

impl FakeProgressRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_emitter(&self) -> mpsc::UnboundedSender<Result<ProgressItem>> {
        self.emitter.lock().unwrap().clone().expect("listener not attached yet")
    }

    pub fn seed(&self, item: ProgressItem) {
        self.items.lock().unwrap().insert(item.composite_id(), item);
    }
}

#[async_trait]
impl ProgressRemote for FakeProgressRemote {
    async fn list_items(&self, progress_key: &str) -> Result<Vec<ProgressItem>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.progress_key == progress_key)
            .cloned()
            .collect())
    }

    async fn get_item(&self, progress_key: &str, id: &str) -> Result<Option<ProgressItem>> {
        let key = format!("{progress_key}_{id}");
        Ok(self.items.lock().unwrap().get(&key).cloned())
    }

    async fn upsert_item(&self, item: &ProgressItem) -> Result<()> {
        self.items.lock().unwrap().insert(item.composite_id(), item.clone());
        self.upserts.lock().unwrap().push(item.clone());
        Ok(())
    }

    async fn delete_item(&self, progress_key: &str, id: &str) -> Result<()> {
        let key = format!("{progress_key}_{id}");
        self.items.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn delete_all_items(&self, progress_key: &str) -> Result<()> {
        self.items.lock().unwrap().retain(|_, v| v.progress_key != progress_key);
        Ok(())
    }

    fn stream_changes(&self, _progress_key: &str) -> BoxStream<'static, Result<ProgressItem>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.emitter.lock().unwrap() = Some(tx);
        Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        }))
    }
}
