#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::clock::{Clock, ManualClock};
    use crate::error::ErrorKind;
    use crate::storage::{FastBackend, MemoryStorage, WindowRequest};

    use super::super::common;

    fn create_test_memory() -> (MemoryStorage, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        (MemoryStorage::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_memory_basic_operations() {
        let (memory, _) = create_test_memory();
        common::test_basic_operations(&memory, "mem").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_admission_log() {
        let (memory, clock) = create_test_memory();
        common::test_admission_log(&memory, "mem", clock.now_millis())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ttl_expiry_follows_clock() {
        let (memory, clock) = create_test_memory();

        memory
            .set("token", "abc", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        memory.set("forever", "xyz", None).await.unwrap();

        clock.advance(Duration::from_millis(4_999));
        assert!(memory.exists("token").await.unwrap());

        clock.advance(Duration::from_millis(1));
        assert!(!memory.exists("token").await.unwrap());
        assert_eq!(memory.get("token").await.unwrap(), None);
        assert!(memory.exists("forever").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (memory, clock) = create_test_memory();

        for i in 0..10 {
            memory
                .set(&format!("k{}", i), "v", Some(Duration::from_secs(1)))
                .await
                .unwrap();
        }
        memory.set("keep", "v", None).await.unwrap();

        assert_eq!(memory.purge_expired(), 0);
        clock.advance(Duration::from_secs(2));
        assert_eq!(memory.purge_expired(), 10);
        assert!(memory.exists("keep").await.unwrap());
    }

    #[tokio::test]
    async fn test_unbounded_window_does_not_overflow() {
        let (memory, clock) = create_test_memory();
        let request = |n: u32| WindowRequest {
            now_millis: clock.now_millis(),
            window: Duration::from_secs(u64::MAX),
            capacity: 2,
            member: format!("m{}", n),
        };

        assert!(memory.admit("ratelimit:forever", &request(1)).await.unwrap());
        assert!(memory.admit("ratelimit:forever", &request(2)).await.unwrap());
        assert!(!memory.admit("ratelimit:forever", &request(3)).await.unwrap());
        assert_eq!(request(4).window_start_millis(), clock.now_millis() - i64::MAX);

        memory
            .set("forever", "v", Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(86_400));
        assert!(memory.exists("forever").await.unwrap());
        assert!(memory.exists("ratelimit:forever").await.unwrap());
    }

    #[tokio::test]
    async fn test_idle_log_expires_after_window() {
        let (memory, clock) = create_test_memory();
        let request = WindowRequest {
            now_millis: clock.now_millis(),
            window: Duration::from_secs(30),
            capacity: 1,
            member: "m".to_string(),
        };

        assert!(memory.admit("ratelimit:idle", &request).await.unwrap());
        clock.advance(Duration::from_secs(30));
        assert!(!memory.exists("ratelimit:idle").await.unwrap());
        assert_eq!(memory.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let (memory, clock) = create_test_memory();
        memory.set("plain", "text", None).await.unwrap();

        let request = WindowRequest {
            now_millis: clock.now_millis(),
            window: Duration::from_secs(60),
            capacity: 5,
            member: "m".to_string(),
        };
        let err = memory.admit("plain", &request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
