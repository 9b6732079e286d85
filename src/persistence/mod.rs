// persistence/mod.rs - Local cache contract (spec.md §4.6)
//
// The concrete store is an external collaborator (spec.md §1); this module
// only owns the trait each Manager programs against, plus one reference
// implementation (`sqlite`) grounded on the teacher's `db` module.

pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{CurrentStreakData, CurrentXPData, ProgressItem};

/// Key-value-shaped local cache, read on login to warm a Manager's
/// in-memory state and written after every successful recompute.
#[async_trait]
pub trait LocalPersistence: Send + Sync {
    async fn get_saved_streak_data(&self, streak_key: &str) -> Result<Option<CurrentStreakData>>;
    async fn save_current_streak_data(&self, data: &CurrentStreakData) -> Result<()>;

    async fn get_saved_xp_data(&self, experience_key: &str) -> Result<Option<CurrentXPData>>;
    async fn save_current_xp_data(&self, data: &CurrentXPData) -> Result<()>;

    async fn get_all_progress_items(&self, progress_key: &str) -> Result<Vec<ProgressItem>>;
    async fn get_progress_item(&self, progress_key: &str, id: &str) -> Result<Option<ProgressItem>>;
    async fn save_progress_item(&self, item: &ProgressItem) -> Result<()>;
    async fn save_progress_items(&self, items: &[ProgressItem]) -> Result<()>;
    async fn delete_progress_item(&self, progress_key: &str, id: &str) -> Result<()>;
    async fn delete_all_progress_items(&self, progress_key: &str) -> Result<()>;
}
