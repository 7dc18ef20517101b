use super::EntitlementStore;
use crate::models::UserEntitlement;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory store for tests and harnesses.
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<i64, UserEntitlement>>>,
    save_count: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            save_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_record(self, user_id: i64, record: UserEntitlement) -> Self {
        self.records.lock().unwrap().insert(user_id, record);
        self
    }

    pub fn get_save_count(&self) -> usize {
        *self.save_count.lock().unwrap()
    }

    /// Snapshot of a user's record for assertions.
    pub fn get_record(&self, user_id: i64) -> Option<UserEntitlement> {
        self.records.lock().unwrap().get(&user_id).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn load(&self, user_id: i64) -> Result<Option<UserEntitlement>> {
        Ok(self.records.lock().unwrap().get(&user_id).cloned())
    }

    async fn save(&self, user_id: i64, record: &UserEntitlement) -> Result<()> {
        let mut count = self.save_count.lock().unwrap();
        *count += 1;

        self.records.lock().unwrap().insert(user_id, record.clone());
        Ok(())
    }
}
