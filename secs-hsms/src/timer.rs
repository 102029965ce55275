//! Cancellable one-shot and repeating timers

use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A named timer backed by a tokio task
///
/// Starting a running timer restarts it. Cancelling is idempotent, and
/// dropping the timer cancels it.
#[derive(Debug)]
pub struct Timer {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `action` once after `delay`
    pub fn start<F>(&mut self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = spawn(self.name, async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
    }

    /// Run `action` every `interval`, first time after one interval
    pub fn start_repeating<F, Fut>(&mut self, interval: Duration, mut action: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        if interval.is_zero() {
            return;
        }
        self.handle = spawn(self.name, async move {
            loop {
                tokio::time::sleep(interval).await;
                action().await;
            }
        });
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn spawn<F>(name: &'static str, future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(e) => {
            log::error!("timer {}: can't start outside a tokio runtime: {}", name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_one_shot_fires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new("t");
        let counter = hits.clone();
        timer.start(Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new("t");
        let counter = hits.clone();
        timer.start(Duration::from_millis(50), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_running());
        timer.cancel();
        timer.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeating() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new("linktest");
        let counter = hits.clone();
        timer.start_repeating(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(105)).await;
        drop(timer);
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 3, "only {seen} ticks");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_start_outside_runtime() {
        let mut timer = Timer::new("t");
        timer.start(Duration::from_millis(1), async {});
        assert!(!timer.is_running());
    }
}
