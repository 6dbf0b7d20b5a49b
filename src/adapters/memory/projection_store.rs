//! In-memory keyed projection store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

use crate::domain::foundation::DomainError;
use crate::ports::ProjectionStore;

/// Projection store backed by an in-process map.
pub struct InMemoryProjectionStore {
    values: RwLock<HashMap<String, JsonValue>>,
    fail_gets: AtomicUsize,
    fail_puts: AtomicUsize,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            fail_gets: AtomicUsize::new(0),
            fail_puts: AtomicUsize::new(0),
        }
    }

    /// Makes the next `n` reads fail transiently.
    pub fn fail_next_gets(&self, n: usize) {
        self.fail_gets.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` writes fail transiently.
    pub fn fail_next_puts(&self, n: usize) {
        self.fail_puts.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryProjectionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, DomainError> {
        if Self::take(&self.fail_gets) {
            return Err(DomainError::transient("injected get failure"));
        }
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: JsonValue) -> Result<(), DomainError> {
        if Self::take(&self.fail_puts) {
            return Err(DomainError::transient("injected put failure"));
        }
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
