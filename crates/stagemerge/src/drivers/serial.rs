//! A connection that runs one request at a time and never abandons one.
//!
//! Wire protocols such as TDS keep a request's response on the stream until
//! it is fully read. Dropping a request future part way leaves those bytes
//! behind for the next request. Here every request runs on its own task that
//! owns the connection lock, so a caller that stops waiting only stops
//! waiting: the request still runs to completion before anything else uses
//! the connection.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use crate::error::{Result, TransferError};

pub(crate) struct SerialConnection<C> {
    conn: Arc<Mutex<C>>,
    /// Set once the session starts finishing; queued requests are skipped.
    finishing: Arc<AtomicBool>,
}

impl<C: Send + 'static> SerialConnection<C> {
    pub(crate) fn new(conn: C) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            finishing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run `request` with exclusive use of the connection.
    ///
    /// Returns `Cancelled` without touching the connection if the session
    /// started finishing while the request was queued.
    pub(crate) async fn run<T, F, Fut>(&self, request: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(OwnedMutexGuard<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let conn = self.conn.clone();
        let finishing = self.finishing.clone();
        let task = tokio::spawn(async move {
            let guard = conn.lock_owned().await;
            if finishing.load(Ordering::SeqCst) {
                return Err(TransferError::Cancelled);
            }
            request(guard).await
        });

        task.await
            .map_err(|e| TransferError::pool(e, "running statement task"))?
    }

    /// Refuse queued requests and wait for the one in progress, if any.
    pub(crate) async fn finish(&self) -> MutexGuard<'_, C> {
        self.finishing.store(true, Ordering::SeqCst);
        self.conn.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn slow_request(wire: &SerialConnection<Vec<&'static str>>) -> Result<()> {
        wire.run(|mut log| async move {
            log.push("request sent");
            tokio::time::sleep(Duration::from_millis(50)).await;
            log.push("response read");
            Ok::<_, TransferError>(())
        })
        .await
    }

    #[tokio::test]
    async fn test_abandoned_request_completes_before_finish() {
        let wire = SerialConnection::new(Vec::new());

        let abandoned = tokio::time::timeout(Duration::from_millis(5), slow_request(&wire)).await;
        assert!(abandoned.is_err());

        let mut log = wire.finish().await;
        log.push("rollback");
        assert_eq!(*log, vec!["request sent", "response read", "rollback"]);
    }

    #[tokio::test]
    async fn test_requests_after_finish_are_refused() {
        let wire = SerialConnection::new(Vec::<&'static str>::new());
        drop(wire.finish().await);

        let err = slow_request(&wire).await.unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        assert!(wire.finish().await.is_empty());
    }

    #[tokio::test]
    async fn test_requests_are_serialized() {
        let wire = Arc::new(SerialConnection::new(Vec::new()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let wire = wire.clone();
                tokio::spawn(async move { slow_request(&wire).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let log = wire.finish().await;
        assert_eq!(log.len(), 8);
        for pair in log.chunks(2) {
            assert_eq!(pair, ["request sent", "response read"]);
        }
    }
}
