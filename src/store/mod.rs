//! Entitlement record storage.
//!
//! The engine only needs get/set of one record per user id; anything richer
//! is the surrounding application's business. `JsonFileStore` is the
//! production implementation, `MemoryStore` backs tests.

pub mod file;
pub mod mock;

pub use file::JsonFileStore;
pub use mock::MemoryStore;

use crate::models::UserEntitlement;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Load a user's record. `None` means the user has never been seen.
    async fn load(&self, user_id: i64) -> Result<Option<UserEntitlement>>;

    /// Persist a user's record, creating it if needed.
    async fn save(&self, user_id: i64, record: &UserEntitlement) -> Result<()>;
}
