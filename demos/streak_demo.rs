// demos/streak_demo.rs - End-to-end StreakManager walkthrough against the
// in-memory fakes, wired the way the teacher wires its own `examples/`
// binaries: construct the shared services, exercise the public API, print
// what changed.

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::UTC;
use gamification_engine::{
    CurrentStreakData, FreezeBehavior, Logger, StreakConfiguration, StreakEvent, StreakManager,
};

struct StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, event: gamification_engine::AnalyticsEvent) {
        println!("[{:?}] {} {}", event.severity, event.name, event.parameters);
    }
}

struct InMemoryLocal(tokio::sync::Mutex<Option<CurrentStreakData>>);

#[async_trait::async_trait]
impl gamification_engine::LocalPersistence for InMemoryLocal {
    async fn get_saved_streak_data(&self, _streak_key: &str) -> gamification_engine::Result<Option<CurrentStreakData>> {
        Ok(self.0.lock().await.clone())
    }
    async fn save_current_streak_data(&self, data: &CurrentStreakData) -> gamification_engine::Result<()> {
        *self.0.lock().await = Some(data.clone());
        Ok(())
    }
    async fn get_saved_xp_data(&self, _k: &str) -> gamification_engine::Result<Option<gamification_engine::CurrentXPData>> {
        Ok(None)
    }
    async fn save_current_xp_data(&self, _d: &gamification_engine::CurrentXPData) -> gamification_engine::Result<()> {
        Ok(())
    }
    async fn get_all_progress_items(&self, _k: &str) -> gamification_engine::Result<Vec<gamification_engine::ProgressItem>> {
        Ok(Vec::new())
    }
    async fn get_progress_item(&self, _k: &str, _id: &str) -> gamification_engine::Result<Option<gamification_engine::ProgressItem>> {
        Ok(None)
    }
    async fn save_progress_item(&self, _i: &gamification_engine::ProgressItem) -> gamification_engine::Result<()> {
        Ok(())
    }
    async fn save_progress_items(&self, _i: &[gamification_engine::ProgressItem]) -> gamification_engine::Result<()> {
        Ok(())
    }
    async fn delete_progress_item(&self, _k: &str, _id: &str) -> gamification_engine::Result<()> {
        Ok(())
    }
    async fn delete_all_progress_items(&self, _k: &str) -> gamification_engine::Result<()> {
        Ok(())
    }
}

struct InMemoryRemote {
    events: tokio::sync::Mutex<Vec<StreakEvent>>,
    freezes: tokio::sync::Mutex<Vec<gamification_engine::StreakFreeze>>,
}

#[async_trait::async_trait]
impl gamification_engine::StreakRemote for InMemoryRemote {
    async fn append_event(&self, _streak_key: &str, event: &StreakEvent) -> gamification_engine::Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
    async fn list_events(&self, _streak_key: &str) -> gamification_engine::Result<Vec<StreakEvent>> {
        Ok(self.events.lock().await.clone())
    }
    async fn delete_all_events(&self, _streak_key: &str) -> gamification_engine::Result<()> {
        self.events.lock().await.clear();
        Ok(())
    }
    async fn list_freezes(&self, _streak_key: &str) -> gamification_engine::Result<Vec<gamification_engine::StreakFreeze>> {
        Ok(self.freezes.lock().await.clone())
    }
    async fn add_freeze(&self, _streak_key: &str, freeze: &gamification_engine::StreakFreeze) -> gamification_engine::Result<()> {
        self.freezes.lock().await.push(freeze.clone());
        Ok(())
    }
    async fn mark_freeze_used(&self, _streak_key: &str, freeze_id: &str) -> gamification_engine::Result<()> {
        let mut freezes = self.freezes.lock().await;
        if let Some(f) = freezes.iter_mut().find(|f| f.id == freeze_id) {
            f.date_used = Some(Utc::now());
        }
        Ok(())
    }
    async fn write_aggregate(&self, _data: &CurrentStreakData) -> gamification_engine::Result<()> {
        Ok(())
    }
    async fn request_server_calculation(&self, _streak_key: &str) -> gamification_engine::Result<CurrentStreakData> {
        Ok(CurrentStreakData::blank("reading"))
    }
    fn stream_aggregate(&self, _streak_key: &str) -> futures_util::stream::BoxStream<'static, gamification_engine::Result<CurrentStreakData>> {
        Box::pin(futures_util::stream::pending())
    }
}

#[tokio::main]
async fn main() {
    gamification_engine::init_tracing();

    let mut config = StreakConfiguration::new("daily_reading");
    config.freeze_behavior = FreezeBehavior::AutoConsume;

    let remote = Arc::new(InMemoryRemote {
        events: tokio::sync::Mutex::new(Vec::new()),
        freezes: tokio::sync::Mutex::new(Vec::new()),
    });
    let local = Arc::new(InMemoryLocal(tokio::sync::Mutex::new(None)));
    let manager = Arc::new(StreakManager::new(config, local, remote, Arc::new(StdoutLogger), UTC));

    manager.log_in("demo-user").await.unwrap();

    for day_offset in (0..3).rev() {
        let event = StreakEvent {
            id: format!("evt-{day_offset}"),
            timestamp: Utc::now() - chrono::Duration::days(day_offset),
            timezone: "UTC".to_string(),
            metadata: Default::default(),
            is_freeze: false,
            freeze_id: None,
        };
        manager.add_streak_event(event).await.unwrap();
    }

    let snapshot = manager.snapshot();
    println!(
        "current_streak={:?} longest_streak={:?} is_streak_active={}",
        snapshot.current_streak,
        snapshot.longest_streak,
        snapshot.is_streak_active(Utc::now())
    );

    manager.log_out().await;
}
