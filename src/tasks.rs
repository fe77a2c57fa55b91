use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Background work owned by the current screen. Everything spawned through
/// a scope is aborted when the scope is cancelled or dropped, so requests
/// and timers never outlive the screen that started them.
#[derive(Debug, Default)]
pub struct TaskScope {
    handles: Vec<AbortHandle>,
}

impl TaskScope {
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.retain(|h| !h.is_finished());
        let handle = tokio::spawn(fut);
        self.handles.push(handle.abort_handle());
    }

    /// Run `f` once `delay` has elapsed, unless the scope is cancelled first.
    pub fn spawn_after<F>(&mut self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
    }

    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    pub fn active(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scope = TaskScope::default();
        scope.spawn_after(Duration::from_millis(800), move || {
            let _ = tx.send("done");
        });

        tokio::time::sleep(Duration::from_millis(799)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.recv().await, Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_late_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scope = TaskScope::default();
        scope.spawn_after(Duration::from_secs(2), move || {
            let _ = tx.send(());
        });
        assert_eq!(scope.active(), 1);

        scope.cancel_all();
        tokio::time::sleep(Duration::from_secs(5)).await;
        // Sender was dropped with the aborted task.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        {
            let mut scope = TaskScope::default();
            scope.spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let _ = tx.send(());
            });
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, None);
    }
}
