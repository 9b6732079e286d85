// remote/mod.rs - Remote event log contract (spec.md §4.7)
//
// The concrete backend is an external collaborator (spec.md §1); this
// module owns the three per-projection trait contracts plus one reference
// adapter (`trailbase`) grounded on the teacher's `trailbase` module.

pub mod trailbase;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::model::{CurrentStreakData, CurrentXPData, ProgressItem, StreakEvent, StreakFreeze, XPEvent};

#[async_trait]
pub trait StreakRemote: Send + Sync {
    async fn append_event(&self, streak_key: &str, event: &StreakEvent) -> Result<()>;
    async fn list_events(&self, streak_key: &str) -> Result<Vec<StreakEvent>>;
    async fn delete_all_events(&self, streak_key: &str) -> Result<()>;

    async fn list_freezes(&self, streak_key: &str) -> Result<Vec<StreakFreeze>>;
    async fn add_freeze(&self, streak_key: &str, freeze: &StreakFreeze) -> Result<()>;
    async fn mark_freeze_used(&self, streak_key: &str, freeze_id: &str) -> Result<()>;

    /// Write the server-computed aggregate after a recompute, when
    /// `useServerCalculation` is enabled.
    async fn write_aggregate(&self, data: &CurrentStreakData) -> Result<()>;

    /// Ask the backend to compute the aggregate itself rather than
    /// fetching raw events (also gated by `useServerCalculation`).
    async fn request_server_calculation(&self, streak_key: &str) -> Result<CurrentStreakData>;

    /// A cancellable stream of aggregate updates for the remote listener.
    /// Dropping the stream (or aborting the task polling it) stops it;
    /// there is no separate unsubscribe call.
    fn stream_aggregate(&self, streak_key: &str) -> BoxStream<'static, Result<CurrentStreakData>>;
}

#[async_trait]
pub trait XPRemote: Send + Sync {
    async fn append_event(&self, experience_key: &str, event: &XPEvent) -> Result<()>;
    async fn list_events(&self, experience_key: &str) -> Result<Vec<XPEvent>>;
    async fn delete_all_events(&self, experience_key: &str) -> Result<()>;

    async fn write_aggregate(&self, data: &CurrentXPData) -> Result<()>;
    async fn request_server_calculation(&self, experience_key: &str) -> Result<CurrentXPData>;

    fn stream_aggregate(&self, experience_key: &str) -> BoxStream<'static, Result<CurrentXPData>>;
}

#[async_trait]
pub trait ProgressRemote: Send + Sync {
    async fn list_items(&self, progress_key: &str) -> Result<Vec<ProgressItem>>;
    async fn get_item(&self, progress_key: &str, id: &str) -> Result<Option<ProgressItem>>;
    async fn upsert_item(&self, item: &ProgressItem) -> Result<()>;
    async fn delete_item(&self, progress_key: &str, id: &str) -> Result<()>;
    async fn delete_all_items(&self, progress_key: &str) -> Result<()>;

    /// A cancellable stream of individual item changes for the remote listener.
    fn stream_changes(&self, progress_key: &str) -> BoxStream<'static, Result<ProgressItem>>;
}
