//! Cancellable scheduled tasks.
//!
//! A [`ScheduledTask`] owns a spawned tokio task. Dropping it (or calling
//! [`ScheduledTask::cancel`]) aborts the task, so a timer's lifetime is tied
//! to whoever holds the handle.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    handle: AbortHandle,
}

impl ScheduledTask {
    /// Run `job` once after `delay`.
    pub fn after<F>(name: &'static str, delay: Duration, job: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            job.await;
        })
        .abort_handle();
        trace!(task = name, ?delay, "one-shot task scheduled");
        Self { name, handle }
    }

    /// Run `tick` every `period`, first firing one period from now. A tick
    /// that overruns delays the next one rather than bursting.
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        })
        .abort_handle();
        trace!(task = name, ?period, "periodic task scheduled");
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the task. Equivalent to dropping the handle.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
        trace!(task = self.name, "scheduled task cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn periodic_task_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = ScheduledTask::every("test-tick", Duration::from_secs(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_millis(10_200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        task.cancel();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once_and_can_be_dropped_early() {
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let task = ScheduledTask::after("test-once", Duration::from_millis(300), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());

        let counter = Arc::clone(&fired);
        let early = ScheduledTask::after("test-dropped", Duration::from_millis(300), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(early);
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
