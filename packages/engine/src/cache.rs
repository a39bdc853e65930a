//! Local Cache
//!
//! Two-layer memo of fetched transactions: an in-memory map in front of a
//! [`PersistentStore`]. Entries are append-only; a key, once written, is never
//! overwritten. `clear()` is the only operation that removes entries and it is
//! serialized against in-flight reads and writes, so no caller can observe one layer
//! cleared while the other still holds data.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::store::{CacheError, MemoryStore, PersistentStore};
use crate::types::{RawTransaction, TxIdentity};

pub struct LocalCache {
    memory: RwLock<HashMap<String, Arc<RawTransaction>>>,
    store: Arc<dyn PersistentStore>,
    /// Shared by loads and puts, exclusive for clear
    gate: tokio::sync::RwLock<()>,
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalCache {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            store,
            gate: tokio::sync::RwLock::new(()),
        }
    }

    /// Cache without a durable layer
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Synchronous lookup against the memory layer only
    pub fn get(&self, identity: &TxIdentity) -> Option<Arc<RawTransaction>> {
        self.memory
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&identity.storage_key())
            .cloned()
    }

    /// Memory first, then the persistent layer; a persistent hit is promoted to memory
    pub async fn load(&self, identity: &TxIdentity) -> Result<Option<Arc<RawTransaction>>, CacheError> {
        let _gate = self.gate.read().await;

        if let Some(tx) = self.get(identity) {
            return Ok(Some(tx));
        }

        let key = identity.storage_key();
        match self.store.load(&key).await? {
            Some(tx) => {
                debug!(key = %key, "Promoted cache entry from persistent store");
                let tx = Arc::new(tx);
                let mut memory = self.memory.write().unwrap_or_else(|poisoned| poisoned.into_inner());
                Ok(Some(memory.entry(key).or_insert(tx).clone()))
            }
            None => Ok(None),
        }
    }

    /// Write through to both layers; an existing entry is kept as is
    pub async fn put(&self, identity: &TxIdentity, tx: RawTransaction) -> Result<Arc<RawTransaction>, CacheError> {
        let _gate = self.gate.read().await;

        let key = identity.storage_key();
        if let Some(existing) = self.get(identity) {
            return Ok(existing);
        }

        self.store.store(&key, &tx).await?;

        let mut memory = self.memory.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(memory.entry(key).or_insert_with(|| Arc::new(tx)).clone())
    }

    /// Drop every entry from both layers
    ///
    /// Waits for in-flight loads and puts to finish and blocks new ones until done. The
    /// persistent layer is cleared first; memory is only dropped once the store is
    /// confirmed empty, so a failed clear leaves both layers untouched.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let _gate = self.gate.write().await;

        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Persistent clear failed, memory layer kept");
            return Err(e);
        }

        if !self.store.is_empty().await? {
            return Err(CacheError::Inconsistent(
                "persistent layer still holds entries after clear".to_string(),
            ));
        }

        let count = std::mem::take(&mut *self.memory.write().unwrap_or_else(|poisoned| poisoned.into_inner())).len();
        info!(entries = count, "Cleared local cache");
        Ok(())
    }

    /// Number of entries resident in memory
    pub fn len(&self) -> usize {
        self.memory.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::types::LogicalKey;
    use alloy::primitives::Address;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn sample(n: u64) -> RawTransaction {
        raw_tx(n, 100, Address::repeat_byte(0x11), post_input("cached"), vec![])
    }

    /// Store whose clear can be made to fail or to leave entries behind
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        fail_clear: AtomicBool,
        ignore_clear: AtomicBool,
        slow_clear: AtomicBool,
    }

    #[async_trait]
    impl PersistentStore for FaultyStore {
        async fn load(&self, key: &str) -> Result<Option<RawTransaction>, CacheError> {
            self.inner.load(key).await
        }

        async fn store(&self, key: &str, tx: &RawTransaction) -> Result<(), CacheError> {
            self.inner.store(key, tx).await
        }

        async fn clear(&self) -> Result<(), CacheError> {
            if self.slow_clear.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            if self.fail_clear.load(Ordering::SeqCst) {
                return Err(CacheError::Storage("disk full".to_string()));
            }
            if self.ignore_clear.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.inner.clear().await
        }

        async fn is_empty(&self) -> Result<bool, CacheError> {
            self.inner.is_empty().await
        }
    }

    // ==================== get / put tests ====================

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = LocalCache::in_memory();
        let identity = TxIdentity::Hash(tx_hash(1));
        assert!(cache.get(&identity).is_none());

        cache.put(&identity, sample(1)).await.unwrap();
        assert_eq!(cache.get(&identity).unwrap().hash, tx_hash(1));
    }

    #[tokio::test]
    async fn test_put_is_append_only() {
        let cache = LocalCache::in_memory();
        let identity = TxIdentity::position(100, LogicalKey::topic("rust"));
        cache.put(&identity, sample(1)).await.unwrap();
        let kept = cache.put(&identity, sample(2)).await.unwrap();
        assert_eq!(kept.hash, tx_hash(1));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_hash_and_position_identities_are_distinct() {
        let cache = LocalCache::in_memory();
        cache.put(&TxIdentity::Hash(tx_hash(1)), sample(1)).await.unwrap();
        let position = TxIdentity::position(100, LogicalKey::user(Address::repeat_byte(0x11)));
        assert!(cache.get(&position).is_none());
    }

    #[tokio::test]
    async fn test_load_promotes_persistent_entries() {
        let store = Arc::new(MemoryStore::new());
        let identity = TxIdentity::Hash(tx_hash(3));
        store.store(&identity.storage_key(), &sample(3)).await.unwrap();

        let cache = LocalCache::new(store);
        assert!(cache.get(&identity).is_none());
        assert_eq!(cache.load(&identity).await.unwrap().unwrap().hash, tx_hash(3));
        assert!(cache.get(&identity).is_some());
    }

    // ==================== clear tests ====================

    #[tokio::test]
    async fn test_clear_then_get_is_absent() {
        let store = Arc::new(MemoryStore::new());
        let cache = LocalCache::new(store.clone());
        let identity = TxIdentity::Hash(tx_hash(1));
        cache.put(&identity, sample(1)).await.unwrap();

        cache.clear().await.unwrap();

        assert!(cache.get(&identity).is_none());
        assert!(cache.load(&identity).await.unwrap().is_none());
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_clear_keeps_memory() {
        let store = Arc::new(FaultyStore::default());
        let cache = LocalCache::new(store.clone());
        let identity = TxIdentity::Hash(tx_hash(1));
        cache.put(&identity, sample(1)).await.unwrap();

        store.fail_clear.store(true, Ordering::SeqCst);
        assert!(matches!(cache.clear().await, Err(CacheError::Storage(_))));
        assert!(cache.get(&identity).is_some());
        assert!(!store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_get_during_slow_failed_clear_matches_store() {
        let store = Arc::new(FaultyStore::default());
        let cache = Arc::new(LocalCache::new(store.clone()));
        let identity = TxIdentity::Hash(tx_hash(1));
        cache.put(&identity, sample(1)).await.unwrap();

        store.slow_clear.store(true, Ordering::SeqCst);
        store.fail_clear.store(true, Ordering::SeqCst);
        let clearer = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.clear().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let in_memory = cache.get(&identity).is_some();
        let persisted = store.load(&identity.storage_key()).await.unwrap().is_some();
        assert_eq!(in_memory, persisted);

        assert!(clearer.await.unwrap().is_err());
        assert!(cache.get(&identity).is_some());
        assert!(store.load(&identity.storage_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_partial_clear_is_inconsistent() {
        let store = Arc::new(FaultyStore::default());
        let cache = LocalCache::new(store.clone());
        cache.put(&TxIdentity::Hash(tx_hash(1)), sample(1)).await.unwrap();

        store.ignore_clear.store(true, Ordering::SeqCst);
        let err = cache.clear().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_concurrent_puts_and_clear_leave_layers_in_agreement() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(LocalCache::new(store.clone()));

        let mut handles = Vec::new();
        for n in 0..16u64 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.put(&TxIdentity::Hash(tx_hash(n)), sample(n)).await.unwrap();
            }));
        }
        let clearer = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.clear().await.unwrap() })
        };
        for handle in handles {
            handle.await.unwrap();
        }
        clearer.await.unwrap();

        for n in 0..16u64 {
            let key = TxIdentity::Hash(tx_hash(n));
            let in_memory = cache.get(&key).is_some();
            let persisted = store.load(&key.storage_key()).await.unwrap().is_some();
            assert_eq!(in_memory, persisted);
        }
    }
}
