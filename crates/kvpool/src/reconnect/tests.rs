//! Tests for the reconnect module

use super::*;
use std::time::Duration;

mod backoff_tests {
    use super::*;

    #[test]
    fn test_backoff_exponential_growth() {
        let backoff = BackoffStrategy::new(100, 30_000);

        assert_eq!(backoff.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(backoff.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(backoff.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(backoff.calculate_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_max_limit() {
        let backoff = BackoffStrategy::new(100, 1000);

        assert_eq!(backoff.calculate_delay(10), Duration::from_millis(1000));
        assert_eq!(backoff.calculate_delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_custom_multiplier() {
        let backoff = BackoffStrategy::new(100, 30_000).with_multiplier(3.0);

        assert_eq!(backoff.calculate_delay(1), Duration::from_millis(300));
        assert_eq!(backoff.calculate_delay(2), Duration::from_millis(900));
    }

    #[test]
    fn test_backoff_with_jitter() {
        let backoff = BackoffStrategy::new(1000, 30_000).with_jitter(true);

        // ±25% around 1000ms
        for _ in 0..50 {
            let delay = backoff.calculate_delay(0);
            assert!(
                delay >= Duration::from_millis(750) && delay <= Duration::from_millis(1250),
                "Delay {:?} should be between 750ms and 1250ms",
                delay
            );
        }
    }

    #[test]
    fn test_backoff_bounds_are_normalized() {
        let backoff = BackoffStrategy::new(0, 1000);
        assert_eq!(backoff.initial_delay(), Duration::from_millis(1));

        let backoff = BackoffStrategy::new(1000, 100);
        assert_eq!(backoff.max_delay(), Duration::from_millis(1000));

        let backoff = BackoffStrategy::new(100, 1000).with_multiplier(0.5);
        assert_eq!(backoff.multiplier(), 1.0);
    }

    #[test]
    fn test_backoff_default() {
        let backoff = BackoffStrategy::default();
        assert_eq!(backoff.initial_delay(), Duration::from_millis(100));
        assert_eq!(backoff.max_delay(), Duration::from_millis(3_000));
        assert!(!backoff.has_jitter());
    }
}

mod policy_tests {
    use super::*;
    use kvpool_core::PoolError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_policy_default() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.connect_timeout(), Duration::from_secs(10));
        assert_eq!(policy.backoff(), &BackoffStrategy::default());
    }

    #[test]
    fn test_policy_deserializes_partial_table() {
        let policy: ReconnectPolicy =
            serde_json::from_str(r#"{"max_retries": 5, "connect_timeout_ms": 250}"#)
                .expect("deserialize");
        assert_eq!(policy.max_retries(), 5);
        assert_eq!(policy.connect_timeout(), Duration::from_millis(250));
        assert_eq!(policy.backoff(), &BackoffStrategy::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_succeeds_after_failures() {
        let policy = ReconnectPolicy::new(3, BackoffStrategy::new(100, 1000));
        let calls = Arc::new(AtomicU32::new(0));

        let started = tokio::time::Instant::now();
        let result = policy
            .run("test connect", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PoolError::Connection("refused".into()))
                    } else {
                        Ok("session")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("third attempt succeeds"), "session");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(310),
            "expected ~300ms of backoff, got {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_gives_up_after_max_retries() {
        let policy = ReconnectPolicy::new(2, BackoffStrategy::new(10, 100));
        let calls = Arc::new(AtomicU32::new(0));

        let result: kvpool_core::Result<()> = policy
            .run("test connect", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PoolError::Connection("refused".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(PoolError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_times_out_slow_attempts() {
        let policy = ReconnectPolicy::new(0, BackoffStrategy::default())
            .with_connect_timeout(Duration::from_millis(50));

        let result: kvpool_core::Result<()> = policy
            .run("slow connect", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(PoolError::Timeout(_))));
    }
}
