// demos/xp_demo.rs - End-to-end ExperiencePointsManager walkthrough,
// mirroring demos/streak_demo.rs's fixture style.

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::UTC;
use gamification_engine::{
    CurrentStreakData, CurrentXPData, ExperiencePointsManager, Logger, ProgressItem, Result, XPConfiguration, XPEvent,
};

struct StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, event: gamification_engine::AnalyticsEvent) {
        println!("[{:?}] {} {}", event.severity, event.name, event.parameters);
    }
}

#[derive(Default)]
struct InMemoryLocal(tokio::sync::Mutex<Option<CurrentXPData>>);

#[async_trait::async_trait]
impl gamification_engine::LocalPersistence for InMemoryLocal {
    async fn get_saved_streak_data(&self, _k: &str) -> Result<Option<CurrentStreakData>> {
        Ok(None)
    }
    async fn save_current_streak_data(&self, _d: &CurrentStreakData) -> Result<()> {
        Ok(())
    }
    async fn get_saved_xp_data(&self, _experience_key: &str) -> Result<Option<CurrentXPData>> {
        Ok(self.0.lock().await.clone())
    }
    async fn save_current_xp_data(&self, data: &CurrentXPData) -> Result<()> {
        *self.0.lock().await = Some(data.clone());
        Ok(())
    }
    async fn get_all_progress_items(&self, _k: &str) -> Result<Vec<ProgressItem>> {
        Ok(Vec::new())
    }
    async fn get_progress_item(&self, _k: &str, _id: &str) -> Result<Option<ProgressItem>> {
        Ok(None)
    }
    async fn save_progress_item(&self, _i: &ProgressItem) -> Result<()> {
        Ok(())
    }
    async fn save_progress_items(&self, _i: &[ProgressItem]) -> Result<()> {
        Ok(())
    }
    async fn delete_progress_item(&self, _k: &str, _id: &str) -> Result<()> {
        Ok(())
    }
    async fn delete_all_progress_items(&self, _k: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryRemote {
    events: tokio::sync::Mutex<Vec<XPEvent>>,
}

#[async_trait::async_trait]
impl gamification_engine::XPRemote for InMemoryRemote {
    async fn append_event(&self, _experience_key: &str, event: &XPEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
    async fn list_events(&self, _experience_key: &str) -> Result<Vec<XPEvent>> {
        Ok(self.events.lock().await.clone())
    }
    async fn delete_all_events(&self, _experience_key: &str) -> Result<()> {
        self.events.lock().await.clear();
        Ok(())
    }
    async fn write_aggregate(&self, _data: &CurrentXPData) -> Result<()> {
        Ok(())
    }
    async fn request_server_calculation(&self, experience_key: &str) -> Result<CurrentXPData> {
        Ok(CurrentXPData::blank(experience_key))
    }
    fn stream_aggregate(&self, _experience_key: &str) -> futures_util::stream::BoxStream<'static, Result<CurrentXPData>> {
        Box::pin(futures_util::stream::pending())
    }
}

#[tokio::main]
async fn main() {
    gamification_engine::init_tracing();

    let config = XPConfiguration::new("vocabulary");
    let remote = Arc::new(InMemoryRemote::default());
    let local = Arc::new(InMemoryLocal::default());
    let manager = Arc::new(ExperiencePointsManager::new(config, local, remote, Arc::new(StdoutLogger), UTC));

    manager.log_in("demo-user").await.unwrap();

    for points in [10, 25, 5] {
        let event = XPEvent {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            timezone: "UTC".to_string(),
            metadata: Default::default(),
            experience_key: "vocabulary".to_string(),
            points,
        };
        manager.add_experience_points(event).await.unwrap();
    }

    let snapshot = manager.snapshot();
    println!(
        "points_today={} points_this_week={} points_last_7_days={}",
        snapshot.points_today, snapshot.points_this_week, snapshot.points_last_7_days
    );

    manager.log_out().await;
}
