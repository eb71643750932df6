//! Render progress reporting.
//!
//! The pipeline writes checkpoints to an mpsc channel and the coordinator
//! drains them, decoupling render execution from persistence timing. Stage
//! checkpoints are delivered reliably; per-scene ticks within a stage may
//! be coalesced under backpressure.

use tokio::sync::mpsc;
use tracing::debug;

/// One progress observation for a render.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Percent complete, 0..=100.
    pub percent: f64,
    /// Human-readable step label.
    pub step: String,
}

/// Sending half of a render's progress channel.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressSender {
    pub fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { tx }
    }

    /// Create a connected sender/receiver pair.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sender whose updates go nowhere; for callers without an observer.
    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self::new(tx)
    }

    /// Deliver a stage checkpoint. Stage checkpoints are never skipped
    /// while the receiver lives; a closed receiver is not an error.
    pub async fn checkpoint(&self, percent: f64, step: impl Into<String>) {
        let update = ProgressUpdate {
            percent,
            step: step.into(),
        };
        if self.tx.send(update).await.is_err() {
            debug!("progress receiver dropped; checkpoint discarded");
        }
    }

    /// Deliver an intermediate tick. Dropped under backpressure.
    pub fn tick(&self, percent: f64, step: impl Into<String>) {
        let update = ProgressUpdate {
            percent,
            step: step.into(),
        };
        let _ = self.tx.try_send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checkpoints_arrive_in_order() {
        let (sender, mut rx) = ProgressSender::channel(8);
        sender.checkpoint(10.0, "a").await;
        sender.checkpoint(70.0, "b").await;
        drop(sender);

        assert_eq!(rx.recv().await.unwrap().percent, 10.0);
        assert_eq!(rx.recv().await.unwrap().percent, 70.0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_ticks_coalesce_under_backpressure() {
        let (sender, mut rx) = ProgressSender::channel(1);
        sender.tick(11.0, "scene 1");
        sender.tick(12.0, "scene 2");
        sender.tick(13.0, "scene 3");
        drop(sender);

        // Only the first tick fit; the rest were coalesced away.
        assert_eq!(rx.recv().await.unwrap().percent, 11.0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_noop_sender_does_not_block() {
        let sender = ProgressSender::noop();
        sender.checkpoint(100.0, "done").await;
        sender.tick(50.0, "half");
    }
}
