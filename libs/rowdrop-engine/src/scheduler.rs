use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One-shot delayed task that can be cancelled and re-armed.
///
/// At most one job is pending: arming cancels the previous one. Dropping the
/// owner cancels too.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    pending: Option<(CancellationToken, JoinHandle<()>)>,
}

impl ScheduledTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: None,
        }
    }

    /// Run `job` after `delay`, replacing any pending job.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&mut self, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let token = CancellationToken::new();
        let child = token.clone();
        let name = self.name;
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    tracing::trace!(task = name, "firing");
                    job.await;
                }
                _ = child.cancelled() => {
                    tracing::trace!(task = name, "cancelled");
                }
            }
        });
        self.pending = Some((token, handle));
    }

    /// Cancel the pending job. Returns whether one was still waiting.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some((token, handle)) => {
                let waiting = !handle.is_finished();
                token.cancel();
                waiting
            }
            None => false,
        }
    }

    /// A job is armed and hasn't run yet.
    pub fn is_armed(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_job(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut task = ScheduledTask::new("test");
        task.arm(Duration::from_millis(3000), counter_job(&fired));
        assert!(task.is_armed());

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!task.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_pending_job() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut task = ScheduledTask::new("test");
        task.arm(Duration::from_millis(100), counter_job(&fired));
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.arm(Duration::from_millis(100), counter_job(&fired));

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_stop_the_job() {
        let fired = Arc::new(AtomicUsize::new(0));

        let mut task = ScheduledTask::new("test");
        task.arm(Duration::from_millis(10), counter_job(&fired));
        assert!(task.cancel());
        assert!(!task.cancel());

        {
            let mut dropped = ScheduledTask::new("dropped");
            dropped.arm(Duration::from_millis(10), counter_job(&fired));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
