//! Per-entry chunk completion tracking for parallel chunked downloads
//! (§4.7), following the rest of the crate's Mutex-guarded-state style.

use std::sync::Mutex;

use tokio::sync::Notify;

/// Tracks which fixed-size chunks of a cache entry have finished
/// downloading. A reader waiting on a chunk that hasn't arrived yet
/// suspends on [`ChunkBitmap::wait_for`] until the chunk completes.
pub struct ChunkBitmap {
    done: Mutex<Vec<bool>>,
    notify: Notify,
}

impl ChunkBitmap {
    pub fn new(num_chunks: usize) -> Self {
        Self {
            done: Mutex::new(vec![false; num_chunks]),
            notify: Notify::new(),
        }
    }

    pub fn mark_complete(&self, chunk_index: usize) {
        {
            let mut done = self.done.lock().unwrap();
            if chunk_index < done.len() {
                done[chunk_index] = true;
            }
        }
        self.notify.notify_waiters();
    }

    pub fn is_complete(&self, chunk_index: usize) -> bool {
        self.done.lock().unwrap().get(chunk_index).copied().unwrap_or(false)
    }

    pub fn is_fully_complete(&self) -> bool {
        self.done.lock().unwrap().iter().all(|&b| b)
    }

    /// Suspends until `chunk_index` is marked complete.
    pub async fn wait_for(&self, chunk_index: usize) {
        loop {
            if self.is_complete(chunk_index) {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after registering the waiter to avoid a missed wakeup
            // between the first check and the subscribe.
            if self.is_complete(chunk_index) {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_for_returns_once_marked_complete() {
        let bitmap = Arc::new(ChunkBitmap::new(4));
        assert!(!bitmap.is_complete(2));

        let waiter = {
            let bitmap = bitmap.clone();
            tokio::spawn(async move {
                bitmap.wait_for(2).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        bitmap.mark_complete(2);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should have been woken")
            .unwrap();
    }

    #[test]
    fn fully_complete_requires_every_chunk() {
        let bitmap = ChunkBitmap::new(3);
        bitmap.mark_complete(0);
        bitmap.mark_complete(1);
        assert!(!bitmap.is_fully_complete());
        bitmap.mark_complete(2);
        assert!(bitmap.is_fully_complete());
    }
}
