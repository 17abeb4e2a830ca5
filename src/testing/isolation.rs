//! Transactional isolation
//!
//! Every store is put into a transaction right before dispatch and rolled
//! back right after. [`IsolationScope`] owns that window: it is released on
//! `close` or on drop, so an early return or panic between open and close
//! still rolls back.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::common::logging::Diagnostics;
use crate::common::DispatchError;

/// A store whose writes can be discarded
pub trait TransactionalStore: Send + Sync {
    /// Connection name used in diagnostics
    fn name(&self) -> &str {
        "default"
    }

    fn begin(&self) -> Result<(), String>;

    fn rollback(&self);

    fn disconnect(&self);

    fn enable_query_log(&self) {}

    fn query_log(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Open transactions on a set of stores
pub struct IsolationScope<'a> {
    stores: Vec<&'a dyn TransactionalStore>,
    log_queries: bool,
    diagnostics: Diagnostics,
    released: bool,
}

impl<'a> IsolationScope<'a> {
    /// Begin a transaction on every store
    ///
    /// If any store fails to begin, the stores already opened are rolled back
    /// before the error is returned.
    pub fn open(
        stores: &'a [Arc<dyn TransactionalStore>],
        log_queries: bool,
        diagnostics: Diagnostics,
    ) -> Result<Self, DispatchError> {
        let mut scope = Self {
            stores: Vec::with_capacity(stores.len()),
            log_queries,
            diagnostics,
            released: false,
        };

        for store in stores {
            store
                .begin()
                .map_err(|e| DispatchError::Isolation(format!("{}: {}", store.name(), e)))?;
            if log_queries {
                store.enable_query_log();
            }
            scope.stores.push(store.as_ref());
        }

        Ok(scope)
    }

    /// Roll back and disconnect every store
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        for store in self.stores.iter().rev() {
            if self.log_queries {
                let log = store.query_log();
                self.diagnostics
                    .dump(0, &format!("Query log ({})", store.name()), &log);
            }
            store.rollback();
            store.disconnect();
        }
    }
}

impl Drop for IsolationScope<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    data: BTreeMap<String, Value>,
    snapshot: Option<BTreeMap<String, Value>>,
    connected: bool,
    log_enabled: bool,
    log: Vec<String>,
}

/// In-memory key/value store with snapshot transactions
///
/// Handles are cheap clones sharing the same data, so a kernel and the
/// executor can both hold one.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state();
        if state.log_enabled {
            state.log.push(format!("get {}", key));
        }
        state.data.get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: Value) {
        let mut state = self.state();
        if state.log_enabled {
            state.log.push(format!("insert {}", key));
        }
        state.data.insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.state();
        if state.log_enabled {
            state.log.push(format!("remove {}", key));
        }
        state.data.remove(key)
    }

    pub fn len(&self) -> usize {
        self.state().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_transaction(&self) -> bool {
        self.state().snapshot.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }
}

impl TransactionalStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn begin(&self) -> Result<(), String> {
        let mut state = self.state();
        if state.snapshot.is_some() {
            return Err("transaction already open".to_string());
        }
        state.snapshot = Some(state.data.clone());
        state.connected = true;
        Ok(())
    }

    fn rollback(&self) {
        let mut state = self.state();
        if let Some(snapshot) = state.snapshot.take() {
            state.data = snapshot;
        }
    }

    fn disconnect(&self) {
        let mut state = self.state();
        state.connected = false;
        state.log_enabled = false;
    }

    fn enable_query_log(&self) {
        let mut state = self.state();
        state.log_enabled = true;
        state.log.clear();
    }

    fn query_log(&self) -> Vec<String> {
        self.state().log.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_close_rolls_back() {
        let store = MemoryStore::new();
        store.insert("users.1", json!("alice"));
        let stores: Vec<Arc<dyn TransactionalStore>> = vec![Arc::new(store.clone())];

        let scope = IsolationScope::open(&stores, false, Diagnostics::default()).unwrap();
        assert!(store.in_transaction());
        store.insert("users.2", json!("bob"));
        store.remove("users.1");
        scope.close();

        assert!(!store.in_transaction());
        assert!(!store.is_connected());
        assert_eq!(store.get("users.1"), Some(json!("alice")));
        assert_eq!(store.get("users.2"), None);
    }

    #[test]
    fn test_drop_rolls_back() {
        let store = MemoryStore::new();
        let stores: Vec<Arc<dyn TransactionalStore>> = vec![Arc::new(store.clone())];
        {
            let _scope = IsolationScope::open(&stores, false, Diagnostics::default()).unwrap();
            store.insert("k", json!(1));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_open_releases_opened_stores() {
        let first = MemoryStore::new();
        let second = MemoryStore::new();
        second.begin().unwrap();

        let stores: Vec<Arc<dyn TransactionalStore>> =
            vec![Arc::new(first.clone()), Arc::new(second.clone())];
        let err = IsolationScope::open(&stores, false, Diagnostics::default())
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::Isolation(_)));
        assert!(!first.in_transaction());
        assert!(second.in_transaction());
    }

    #[test]
    fn test_query_log() {
        let store = MemoryStore::new();
        let stores: Vec<Arc<dyn TransactionalStore>> = vec![Arc::new(store.clone())];
        let scope = IsolationScope::open(&stores, true, Diagnostics::default()).unwrap();
        store.insert("k", json!(1));
        assert_eq!(store.query_log(), vec!["insert k".to_string()]);
        scope.close();
    }
}
