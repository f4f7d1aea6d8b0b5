// src/storage/tests/mod.rs

mod memory_tests;

// Contract checks that every fast backend must pass
pub(crate) mod common {
    use std::time::Duration;

    use crate::error::Result;
    use crate::storage::{FastBackend, WindowRequest};

    pub async fn test_basic_operations(storage: &dyn FastBackend, prefix: &str) -> Result<()> {
        let key = format!("{}:basic", prefix);

        storage.set(&key, "value", None).await?;
        assert_eq!(storage.get(&key).await?.as_deref(), Some("value"));
        assert!(storage.exists(&key).await?);

        // overwrite
        storage.set(&key, "other", None).await?;
        assert_eq!(storage.get(&key).await?.as_deref(), Some("other"));

        assert!(storage.delete(&key).await?);
        assert!(!storage.delete(&key).await?);
        assert!(!storage.exists(&key).await?);
        assert_eq!(storage.get(&key).await?, None);

        Ok(())
    }

    pub async fn test_admission_log(
        storage: &dyn FastBackend,
        prefix: &str,
        now_millis: i64,
    ) -> Result<()> {
        let key = format!("{}:window", prefix);
        let _ = storage.delete(&key).await;

        let request = |offset: i64, n: u32| WindowRequest {
            now_millis: now_millis + offset,
            window: Duration::from_secs(60),
            capacity: 2,
            member: format!("{}-{}", now_millis + offset, n),
        };

        assert!(storage.admit(&key, &request(0, 1)).await?);
        assert!(storage.admit(&key, &request(1, 2)).await?);
        assert!(!storage.admit(&key, &request(2, 3)).await?);

        // both entries have aged out 60s after the first
        assert!(storage.admit(&key, &request(60_001, 4)).await?);
        assert!(storage.exists(&key).await?);

        storage.delete(&key).await?;
        Ok(())
    }
}
