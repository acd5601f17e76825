/// Maintenance scheduler: named periodic tasks with an error boundary.
///
/// Each task runs on its own tokio interval. Every iteration executes in a
/// child task, so an error or a panic is logged and reported as
/// [`CoordEvent::TaskFailed`] while the loop keeps ticking. Tasks are
/// cancelled individually by name or all at once.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::CoordError;
use crate::events::{CoordEvent, Outlets};

pub const TASK_ANNOUNCE: &str = "announce";
pub const TASK_REFRESH_PEERS: &str = "refresh-peers";
pub const TASK_RELAY_MAINTENANCE: &str = "relay-maintenance";
pub const TASK_RELAY_DISCOVERY: &str = "relay-discovery";
pub const TASK_ACCESS_CONTROL: &str = "access-control";

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), CoordError>> + Send>>;

/// Produces one iteration of a periodic task.
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Aborts the wrapped iteration if the owning loop is cancelled mid-run.
struct AbortOnDrop(JoinHandle<Result<(), CoordError>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone, Default)]
pub struct Scheduler {
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    outlets: Outlets,
}

impl Scheduler {
    pub fn new(outlets: Outlets) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            outlets,
        }
    }

    /// Run `task` every `period`, first run one period from now.
    ///
    /// Replaces (and cancels) a task already registered under `name`.
    pub fn spawn_task(&self, name: &str, period: Duration, task: TaskFn) {
        let task_name = name.to_string();
        let outlets = self.outlets.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut run = AbortOnDrop(tokio::spawn(task()));
                let description = match (&mut run.0).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => {
                        tracing::warn!(task = %task_name, error = %e, "maintenance task failed");
                        e.to_string()
                    }
                    Err(e) if e.is_panic() => {
                        tracing::warn!(task = %task_name, "maintenance task panicked");
                        "panicked".to_string()
                    }
                    Err(_) => break,
                };
                outlets.emit(CoordEvent::TaskFailed {
                    task: task_name.clone(),
                    description,
                });
            }
        });
        if let Some(previous) = lock(&self.tasks).insert(name.to_string(), handle) {
            previous.abort();
        }
        tracing::debug!(task = %name, period_ms = period.as_millis() as u64, "scheduled task");
    }

    /// Stop the task registered under `name`. `false` if there is none.
    pub fn cancel(&self, name: &str) -> bool {
        match lock(&self.tasks).remove(name) {
            Some(handle) => {
                handle.abort();
                tracing::debug!(task = %name, "cancelled task");
                true
            }
            None => false,
        }
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.tasks).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn shutdown(&self) {
        let tasks: Vec<(String, JoinHandle<()>)> = lock(&self.tasks).drain().collect();
        for (_, handle) in tasks {
            handle.abort();
        }
    }
}

/// Box an async closure into a [`TaskFn`].
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CoordError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as TaskFuture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn counting(counter: Arc<AtomicUsize>) -> TaskFn {
        task_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn runs_every_period_after_the_first() {
        let scheduler = Scheduler::default();
        let hits = Arc::new(AtomicUsize::new(0));
        scheduler.spawn_task("tick", Duration::from_secs(10), counting(hits.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0, "no run at time zero");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn errors_and_panics_do_not_stop_the_loop() {
        let (ev_tx, mut ev_rx) = mpsc::channel(16);
        let (msg_tx, _msg_rx) = mpsc::channel(1);
        let scheduler = Scheduler::new(Outlets::new(msg_tx, ev_tx));
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        scheduler.spawn_task(
            "flaky",
            Duration::from_secs(1),
            task_fn(move || {
                let n = r.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => Err(CoordError::Transport("boom".into())),
                        1 => panic!("maintenance bug"),
                        _ => Ok(()),
                    }
                }
            }),
        );

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);

        let first = ev_rx.recv().await.unwrap();
        assert!(
            matches!(&first, CoordEvent::TaskFailed { task, description } if task == "flaky" && description.contains("boom")),
            "{first:?}"
        );
        let second = ev_rx.recv().await.unwrap();
        assert!(
            matches!(&second, CoordEvent::TaskFailed { description, .. } if description == "panicked"),
            "{second:?}"
        );
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_only_the_named_task() {
        let scheduler = Scheduler::default();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        scheduler.spawn_task("a", Duration::from_secs(1), counting(a.clone()));
        scheduler.spawn_task("b", Duration::from_secs(1), counting(b.clone()));
        assert_eq!(scheduler.task_names(), vec!["a", "b"]);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(scheduler.cancel("a"));
        assert!(!scheduler.cancel("a"));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 4);
        scheduler.shutdown();
        assert!(scheduler.task_names().is_empty());
    }
}
