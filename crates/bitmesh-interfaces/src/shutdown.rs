//! Stop signal shared by background tasks.
//!
//! Relay connections and the node's control loop each hold a
//! `watch::Receiver<bool>` from a [`ShutdownToken`] and leave their
//! `tokio::select!` loops once it flips to `true`. The token also keeps the
//! spawned `JoinHandle`s so the owner can wait for a clean exit.

use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct ShutdownToken {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            stop_tx,
            stop_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A receiver for one background task.
    ///
    /// ```ignore
    /// tokio::select! {
    ///     frame = ws.next() => { /* handle */ }
    ///     _ = stop_rx.changed() => break,
    /// }
    /// ```
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Keep `handle` so [`join_all`](Self::join_all) can await it.
    pub fn add_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    pub fn task_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Idempotent.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Await every registered task. Panicked or cancelled tasks are ignored.
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn stop_and_join(&self) {
        self.signal_stop();
        self.join_all().await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_not_stopped() {
        let token = ShutdownToken::new();
        assert!(!token.is_stopped());
        assert_eq!(token.task_count(), 0);
    }

    #[test]
    fn signal_stop_reaches_every_subscriber() {
        let token = ShutdownToken::new();
        let rx1 = token.subscribe();
        let rx2 = token.subscribe();
        token.signal_stop();
        token.signal_stop();
        assert!(*rx1.borrow());
        assert!(*rx2.borrow());
        assert!(*token.subscribe().borrow());
    }

    #[tokio::test]
    async fn stop_and_join_waits_for_tasks() {
        let token = ShutdownToken::new();
        let mut rx = token.subscribe();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        token.add_task(tokio::spawn(async move {
            let _ = rx.changed().await;
            let _ = done_tx.send(());
        }));

        token.stop_and_join().await;
        assert!(done_rx.await.is_ok());
        assert_eq!(token.task_count(), 0);
    }

    #[tokio::test]
    async fn add_task_drops_finished_handles() {
        let token = ShutdownToken::new();
        let finished = tokio::spawn(async {});
        while !finished.is_finished() {
            tokio::task::yield_now().await;
        }
        token.add_task(finished);
        token.add_task(tokio::spawn(async {}));
        assert_eq!(token.task_count(), 1);
        token.join_all().await;
        assert_eq!(token.task_count(), 0);
    }
}
