use crate::models::TargetSuggestions;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How long and how many finished task results stay readable.
#[derive(Debug, Clone, Copy)]
pub struct ResultRetention {
    pub per_tenant: usize,
    pub ttl: Duration,
}

impl Default for ResultRetention {
    fn default() -> Self {
        Self {
            per_tenant: 20,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

struct StoredResults {
    tenant_id: Uuid,
    stored_at: Instant,
    results: Arc<Vec<TargetSuggestions>>,
}

/// In-process bookkeeping shared by the task service and the workers:
/// cancellation tokens of live tasks and the suggestions of finished ones.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tokens: Arc<DashMap<Uuid, CancellationToken>>,
    results: Arc<DashMap<Uuid, StoredResults>>,
    retention: ResultRetention,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: ResultRetention) -> Self {
        Self {
            retention: ResultRetention {
                per_tenant: retention.per_tenant.max(1),
                ..retention
            },
            ..Self::default()
        }
    }

    /// Token for a task, created on first use.
    pub fn token(&self, task_id: Uuid) -> CancellationToken {
        self.tokens
            .entry(task_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Signals a live task. Returns false when no worker holds the task.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        match self.tokens.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn release(&self, task_id: Uuid) {
        self.tokens.remove(&task_id);
    }

    /// Keeps a task's suggestions, evicting expired entries and the tenant's
    /// oldest results beyond `per_tenant`.
    pub fn store_results(&self, tenant_id: Uuid, task_id: Uuid, results: Vec<TargetSuggestions>) {
        let now = Instant::now();
        self.results.insert(
            task_id,
            StoredResults {
                tenant_id,
                stored_at: now,
                results: Arc::new(results),
            },
        );

        let ttl = self.retention.ttl;
        self.results
            .retain(|_, stored| now.duration_since(stored.stored_at) <= ttl);

        let mut owned: Vec<(Instant, Uuid)> = self
            .results
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| (entry.stored_at, *entry.key()))
            .collect();
        if owned.len() > self.retention.per_tenant {
            owned.sort_unstable();
            let excess = owned.len() - self.retention.per_tenant;
            for (_, id) in owned.into_iter().take(excess) {
                self.results.remove(&id);
            }
            tracing::debug!(%tenant_id, evicted = excess, "Evicted old task results");
        }
    }

    pub fn results(&self, task_id: Uuid) -> Option<Arc<Vec<TargetSuggestions>>> {
        let (stored_at, results) = self
            .results
            .get(&task_id)
            .map(|stored| (stored.stored_at, stored.results.clone()))?;
        if stored_at.elapsed() <= self.retention.ttl {
            return Some(results);
        }
        self.results.remove(&task_id);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_issued_tokens() {
        let registry = TaskRegistry::new();
        let id = Uuid::new_v4();
        let token = registry.token(id);

        assert!(registry.cancel(id));
        assert!(token.is_cancelled());

        registry.release(id);
        assert!(!registry.cancel(id));
    }

    #[test]
    fn oldest_results_of_a_tenant_are_evicted() {
        let registry = TaskRegistry::with_retention(ResultRetention {
            per_tenant: 2,
            ttl: Duration::from_secs(60),
        });
        let (tenant, other) = (Uuid::new_v4(), Uuid::new_v4());
        let tasks: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let foreign = Uuid::new_v4();

        registry.store_results(other, foreign, Vec::new());
        for id in &tasks {
            registry.store_results(tenant, *id, Vec::new());
            std::thread::sleep(Duration::from_millis(2));
        }

        assert!(registry.results(tasks[0]).is_none());
        assert!(registry.results(tasks[1]).is_some());
        assert!(registry.results(tasks[2]).is_some());
        assert!(registry.results(foreign).is_some());
    }

    #[test]
    fn expired_results_are_dropped() {
        let registry = TaskRegistry::with_retention(ResultRetention {
            per_tenant: 10,
            ttl: Duration::ZERO,
        });
        let id = Uuid::new_v4();
        registry.store_results(Uuid::new_v4(), id, Vec::new());
        std::thread::sleep(Duration::from_millis(2));
        assert!(registry.results(id).is_none());
    }
}
