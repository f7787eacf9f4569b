//! Lazily-established connection shared by every caller of a gateway

use crate::error::BrokerResult;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Slot holding at most one live connection.
///
/// The lock is held across connection establishment, so concurrent callers
/// queue behind the single in-flight attempt and then share its result.
pub struct SharedConnection<T: ?Sized> {
    slot: Mutex<Option<Arc<T>>>,
    established: AtomicU64,
}

impl<T: ?Sized> Default for SharedConnection<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            established: AtomicU64::new(0),
        }
    }
}

impl<T: ?Sized + Send + Sync> SharedConnection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live connection, establishing it with `connect` if absent.
    /// A failed attempt leaves the slot empty.
    pub async fn get_or_connect<F, Fut>(&self, connect: F) -> BrokerResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BrokerResult<Arc<T>>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = connect().await?;
        self.established.fetch_add(1, Ordering::Relaxed);
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Drop `stale` from the slot if it is still the cached connection.
    /// Returns whether it was removed; a connection another caller already
    /// replaced it with is left alone.
    pub async fn invalidate(&self, stale: &Arc<T>) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(current) if same_connection(current, stale) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Empty the slot, handing back whatever was cached
    pub async fn take(&self) -> Option<Arc<T>> {
        self.slot.lock().await.take()
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// How many connections have been established over the slot's lifetime
    pub fn established(&self) -> u64 {
        self.established.load(Ordering::Relaxed)
    }
}

fn same_connection<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_connect() {
        let shared: Arc<SharedConnection<String>> = Arc::new(SharedConnection::new());
        let connects = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shared = shared.clone();
            let connects = connects.clone();
            handles.push(tokio::spawn(async move {
                shared
                    .get_or_connect(|| async move {
                        connects.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Arc::new("conn".to_string()))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().as_str(), "conn");
        }
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(shared.established(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_slot_empty() {
        let shared: SharedConnection<String> = SharedConnection::new();
        let result = shared
            .get_or_connect(|| async { Err(BrokerError::Connect("refused".to_string())) })
            .await;
        assert!(result.is_err());
        assert!(!shared.is_connected().await);

        let conn = shared
            .get_or_connect(|| async { Ok(Arc::new("second".to_string())) })
            .await
            .unwrap();
        assert_eq!(conn.as_str(), "second");
    }

    #[tokio::test]
    async fn test_invalidate_only_removes_matching_connection() {
        let shared: SharedConnection<String> = SharedConnection::new();
        let first = shared
            .get_or_connect(|| async { Ok(Arc::new("first".to_string())) })
            .await
            .unwrap();

        assert!(shared.invalidate(&first).await);
        let second = shared
            .get_or_connect(|| async { Ok(Arc::new("second".to_string())) })
            .await
            .unwrap();

        assert!(!shared.invalidate(&first).await);
        assert!(shared.is_connected().await);
        assert!(shared.invalidate(&second).await);
    }
}
