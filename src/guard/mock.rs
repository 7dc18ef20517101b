use super::{ContentGuard, GuardVerdict};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Scripted guard for dispatcher tests. Queued verdicts are served in
/// order (cycling); with no queue it always answers `Absent`.
#[derive(Clone)]
pub struct MockContentGuard {
    verdicts: Arc<Mutex<Vec<GuardVerdict>>>,
    call_count: Arc<Mutex<usize>>,
}

impl MockContentGuard {
    pub fn new() -> Self {
        Self {
            verdicts: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_verdict(self, verdict: GuardVerdict) -> Self {
        self.verdicts.lock().unwrap().push(verdict);
        self
    }

    pub fn get_call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

impl Default for MockContentGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentGuard for MockContentGuard {
    async fn check(&self, _image_bytes: &[u8]) -> GuardVerdict {
        let mut count = self.call_count.lock().unwrap();
        *count += 1;

        let verdicts = self.verdicts.lock().unwrap();
        if verdicts.is_empty() {
            GuardVerdict::Absent
        } else {
            verdicts[(*count - 1) % verdicts.len()]
        }
    }
}
