//! Comprehensive tests for the storage abstraction layer

#[cfg(test)]
mod integration_tests {
    use crate::storage::config::BackendConfig;
    use crate::storage::{chunk_key, Backend};
    use bytes::Bytes;
    use std::sync::Arc;

    fn both_backends(dir: &tempfile::TempDir) -> Vec<(String, Arc<dyn Backend>)> {
        let local = dir.path().join("local");
        vec![
            ("mock".to_string(), BackendConfig::mock("mock").create_backend().unwrap()),
            (
                "local".to_string(),
                BackendConfig::local("local", local.to_str().unwrap()).create_backend().unwrap(),
            ),
        ]
    }

    #[tokio::test]
    async fn test_storage_abstraction_end_to_end() {
        let dir = tempfile::tempdir().unwrap();

        for (name, store) in both_backends(&dir) {
            let key = chunk_key(&format!("e2e{}", name), 0);
            let data = Bytes::from(format!("End-to-end test data for {}", name));

            assert!(!store.exists(&key).await.unwrap(), "{}", name);
            store.put(&key, data.clone()).await.expect("Put failed");
            assert!(store.exists(&key).await.unwrap(), "{}", name);
            assert_eq!(store.get(&key).await.expect("Get failed"), data);

            store.delete(&key).await.expect("Delete failed");
            assert!(store.get(&key).await.unwrap_err().is_not_found(), "{}", name);
            // A second delete reports NotFound instead of succeeding silently
            assert!(store.delete(&key).await.unwrap_err().is_not_found(), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_empty_and_large_objects() {
        let dir = tempfile::tempdir().unwrap();
        let large: Bytes = (0..1024 * 1024).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into();

        for (name, store) in both_backends(&dir) {
            store.put("empty_chunk_0", Bytes::new()).await.unwrap();
            assert!(store.get("empty_chunk_0").await.unwrap().is_empty(), "{}", name);

            store.put("large_chunk_0", large.clone()).await.unwrap();
            assert_eq!(store.get("large_chunk_0").await.unwrap(), large, "{}", name);
        }
    }

    #[tokio::test]
    async fn test_concurrent_operations() {
        let dir = tempfile::tempdir().unwrap();

        for (_, store) in both_backends(&dir) {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = Arc::clone(&store);
                    tokio::spawn(async move {
                        let key = chunk_key("concurrent", i);
                        let data = Bytes::from(format!("Concurrent test data {}", i));
                        store.put(&key, data.clone()).await.unwrap();
                        assert_eq!(store.get(&key).await.unwrap(), data);
                        store.delete(&key).await.unwrap();
                    })
                })
                .collect();

            for handle in handles {
                handle.await.unwrap();
            }
        }
    }
}
