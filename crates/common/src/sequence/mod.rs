//! Named monotonic counters
//!
//! Every call to [`SequenceAllocator::next`] returns a value strictly greater
//! than any value previously issued for the same namespace. Gaps are allowed,
//! duplicates never are. The first call on an unknown namespace returns 1.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::{AppError, Result};

/// Namespace backing clipping identifiers
pub const CLIP_SEQUENCE: &str = "clip";

#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    /// Atomically increment and return the new value
    async fn next(&self, namespace: &str) -> Result<i64>;

    /// Last value handed out, or 0 when nothing has been issued
    async fn last_issued(&self, namespace: &str) -> Result<i64>;

    /// Maintenance: move the counter forward to `value`.
    /// Moving it backwards would re-issue identifiers and is rejected.
    async fn reseed(&self, namespace: &str, value: i64) -> Result<()>;
}

/// Process-local counters
#[derive(Default)]
pub struct MemorySequence {
    counters: Mutex<HashMap<String, i64>>,
}

impl MemorySequence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceAllocator for MemorySequence {
    async fn next(&self, namespace: &str) -> Result<i64> {
        let mut counters = self.counters.lock().await;
        let value = counters.entry(namespace.to_string()).or_insert(0);
        *value = value.checked_add(1).ok_or_else(|| AppError::AllocatorUnavailable {
            message: format!("sequence {} exhausted", namespace),
        })?;
        Ok(*value)
    }

    async fn last_issued(&self, namespace: &str) -> Result<i64> {
        let counters = self.counters.lock().await;
        Ok(counters.get(namespace).copied().unwrap_or(0))
    }

    async fn reseed(&self, namespace: &str, value: i64) -> Result<()> {
        let mut counters = self.counters.lock().await;
        let current = counters.entry(namespace.to_string()).or_insert(0);
        check_reseed(namespace, *current, value)?;
        *current = value;
        Ok(())
    }
}

/// Shared guard for every allocator backend
pub(crate) fn check_reseed(namespace: &str, current: i64, value: i64) -> Result<()> {
    if value < current {
        return Err(AppError::Validation {
            message: format!(
                "cannot reseed {} to {}: {} has already been issued",
                namespace, value, current
            ),
            field: Some("value".to_string()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_first_value_is_one() {
        let seq = MemorySequence::new();
        assert_eq!(seq.last_issued(CLIP_SEQUENCE).await.unwrap(), 0);
        assert_eq!(seq.next(CLIP_SEQUENCE).await.unwrap(), 1);
        assert_eq!(seq.next(CLIP_SEQUENCE).await.unwrap(), 2);
        assert_eq!(seq.last_issued(CLIP_SEQUENCE).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let seq = MemorySequence::new();
        seq.next("a").await.unwrap();
        seq.next("a").await.unwrap();
        assert_eq!(seq.next("b").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_never_collide() {
        let seq = Arc::new(MemorySequence::new());
        let handles: Vec<_> = (0..200)
            .map(|_| {
                let seq = seq.clone();
                tokio::spawn(async move { seq.next(CLIP_SEQUENCE).await.unwrap() })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        assert_eq!(seen.len(), 200);
        assert_eq!(seq.last_issued(CLIP_SEQUENCE).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_reseed_only_moves_forward() {
        let seq = MemorySequence::new();
        seq.next(CLIP_SEQUENCE).await.unwrap();
        assert_ok!(seq.reseed(CLIP_SEQUENCE, 1000).await);
        assert_eq!(seq.next(CLIP_SEQUENCE).await.unwrap(), 1001);

        let err = assert_err!(seq.reseed(CLIP_SEQUENCE, 5).await);
        assert!(err.is_validation());
        assert_eq!(seq.last_issued(CLIP_SEQUENCE).await.unwrap(), 1001);
    }
}
