//! Operation registry (§3's catchup operation registry, §9): tracks which (chain, family, stage) tasks are
//! currently running so the Coordinator's monitor can log progress without
//! each task owning its own logging cadence.

use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

#[derive(Debug, Clone)]
pub struct OperationInfo {
    pub name: String,
    pub started_at: Instant,
}

#[derive(Default)]
pub struct ActiveOperations {
    next_id: std::sync::atomic::AtomicU64,
    operations: Mutex<HashMap<OperationId, OperationInfo>>,
}

impl ActiveOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn begin(&self, name: impl Into<String>) -> OperationId {
        let id = OperationId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
        self.operations.lock().await.insert(
            id,
            OperationInfo {
                name: name.into(),
                started_at: Instant::now(),
            },
        );
        id
    }

    pub async fn end(&self, id: OperationId) {
        self.operations.lock().await.remove(&id);
    }

    /// Logs one line per active operation with its running duration,
    /// matching the teacher's periodic `progress` log lines in `runner.rs`.
    pub async fn log_progress(&self) {
        let operations = self.operations.lock().await;
        for (_, info) in operations.iter() {
            tracing::info!(
                operation = %info.name,
                running_secs = info.started_at.elapsed().as_secs(),
                "operation in progress"
            );
        }
    }

    pub async fn count(&self) -> usize {
        self.operations.lock().await.len()
    }
}
