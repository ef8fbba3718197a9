mod common;

#[cfg(test)]
mod tests {
    use super::*;

    use common::*;
    use dynamo_sessions::SessionManager;
    use dynamo_sessions::cache::SessionCache;
    use dynamo_sessions::cache::memory::MemoryCache;
    use dynamo_sessions::store::cached::CachedStore;
    use dynamo_sessions::store::memory::MemoryStore;
    use dynamo_sessions::store::{SessionMap, SessionStore};
    use std::time::Duration;

    type Store = CachedStore<MemoryStore, MemoryCache>;

    fn cached_manager(ttl: Duration) -> SessionManager<Store> {
        build_manager(CachedStore::new(MemoryStore::new(), MemoryCache::new()).with_ttl(ttl))
    }

    #[tokio::test]
    async fn test_create_populates_cache() {
        let manager = cached_manager(Duration::from_secs(60));
        let session = manager.session(None);

        session.create().await.unwrap();

        let key = session.key().unwrap();
        assert!(manager.store().cache().get(&key).await.unwrap().is_some());
        assert!(manager.store().store().exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_coherent_after_save() {
        let manager = cached_manager(Duration::from_secs(60));
        let session = manager.session(None);
        session.insert("user", &create_test_session()).await.unwrap();
        session.save(false).await.unwrap();
        let key = session.key().unwrap();

        let mut updated = create_test_session();
        updated.preferences.theme = "light".to_string();
        session.insert("user", &updated).await.unwrap();
        session.save(false).await.unwrap();

        // Both layers hold the latest data.
        let from_cache = manager.store().get(&key).await.unwrap().unwrap();
        let from_store = manager.store().store().get(&key).await.unwrap().unwrap();
        assert_eq!(from_cache, from_store);

        let map = SessionMap::decode(&from_cache.data).unwrap();
        assert_eq!(map.get::<TestSession>("user").unwrap(), Some(updated.clone()));

        // A fresh session sees the saved data straight away.
        let fresh = manager.session(Some(key.as_str()));
        assert_eq!(fresh.load().await.unwrap(), map);
        assert_eq!(fresh.get::<TestSession>("user").await.unwrap(), Some(updated));
        assert_eq!(fresh.key(), Some(key));
    }

    #[tokio::test]
    async fn test_huge_ttl_is_accepted() {
        let manager = cached_manager(Duration::from_secs(u64::MAX));
        let session = manager.session(None);

        session.create().await.unwrap();
        session.insert("visits", &1_u32).await.unwrap();
        session.save(false).await.unwrap();
        let key = session.key().unwrap();

        assert!(manager.store().cache().get(&key).await.unwrap().is_some());
        let again = manager.session(Some(key.as_str()));
        assert_eq!(again.get::<u32>("visits").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_load_served_from_cache() {
        let manager = cached_manager(Duration::from_secs(60));
        let session = manager.session(None);
        session.insert("visits", &1_u32).await.unwrap();
        session.save(false).await.unwrap();
        let key = session.key().unwrap();

        // Drop the record from the backing store only.
        manager.store().store().delete(&key).await.unwrap();

        let again = manager.session(Some(key.as_str()));
        assert_eq!(again.get::<u32>("visits").await.unwrap(), Some(1));
        assert_eq!(again.key(), Some(key));
    }

    #[tokio::test]
    async fn test_delete_invalidates_cache() {
        let manager = cached_manager(Duration::from_secs(60));
        let session = manager.session(None);
        session.insert("visits", &1_u32).await.unwrap();
        session.save(false).await.unwrap();
        let key = session.key().unwrap();

        session.delete(None).await.unwrap();

        assert!(manager.store().cache().get(&key).await.unwrap().is_none());
        assert!(!session.exists(key.as_str()).await.unwrap());

        let revisit = manager.session(Some(key.as_str()));
        assert!(revisit.load().await.unwrap().is_empty());
        assert_ne!(revisit.key(), Some(key));
    }

    #[tokio::test]
    async fn test_expired_cache_falls_back_to_store() {
        let manager = cached_manager(Duration::from_secs(1));
        let session = manager.session(None);
        session.insert("visits", &5_u32).await.unwrap();
        session.save(false).await.unwrap();
        let key = session.key().unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(manager.store().cache().get(&key).await.unwrap().is_none());

        // A miss reads the store and warms the cache again.
        let again = manager.session(Some(key.as_str()));
        assert_eq!(again.get::<u32>("visits").await.unwrap(), Some(5));
        assert!(manager.store().cache().get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cycle_key_through_cache() {
        let manager = cached_manager(Duration::from_secs(60));
        let session = manager.session(None);
        session.insert("user", &create_test_session()).await.unwrap();
        session.save(false).await.unwrap();
        let old_key = session.key().unwrap();

        let new_key = session.cycle_key().await.unwrap();

        assert!(manager.store().cache().get(&old_key).await.unwrap().is_none());
        assert!(!session.exists(old_key.as_str()).await.unwrap());
        assert!(session.exists(new_key.as_str()).await.unwrap());
    }
}
