//! Bounded-concurrency task executor
//!
//! A single worker loop owns a FIFO of submitted jobs and a `JoinSet` of
//! running ones, starting jobs while fewer than `limit` are active. Every
//! submission gets its own [`TaskHandle`]; [`BoundedExecutor::drained`]
//! resolves whenever everything submitted so far has finished and can be
//! awaited again after further submissions.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

use crate::core::error::Error;
use crate::core::types::Result;

type Job = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Callback invoked after every task completion
pub type ProgressFn = Arc<dyn Fn(ExecutorProgress) + Send + Sync>;

/// Completion counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutorProgress {
    pub submitted: usize,
    pub completed: usize,
    /// Completed tasks that returned an error or panicked
    pub failed: usize,
}

impl ExecutorProgress {
    /// Completed / submitted, 1.0 when nothing was submitted
    pub fn fraction(&self) -> f64 {
        if self.submitted == 0 {
            1.0
        } else {
            self.completed as f64 / self.submitted as f64
        }
    }

    pub fn is_drained(&self) -> bool {
        self.completed >= self.submitted
    }
}

/// Completion signal for one submitted task
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the task. A panicked or dropped task yields `TaskFailed`.
    pub async fn wait(self) -> Result<T> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(Error::TaskFailed(format!("task {} did not complete", self.id))))
    }
}

/// Runs at most `limit` tasks at once on the current tokio runtime
pub struct BoundedExecutor {
    name: &'static str,
    limit: usize,
    job_tx: mpsc::UnboundedSender<Job>,
    progress: Arc<watch::Sender<ExecutorProgress>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl BoundedExecutor {
    /// Create an executor and spawn its worker loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: &'static str, limit: usize) -> Self {
        Self::with_progress(name, limit, None)
    }

    pub fn with_progress(name: &'static str, limit: usize, on_progress: Option<ProgressFn>) -> Self {
        let limit = limit.max(1);
        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
        let (progress, _) = watch::channel(ExecutorProgress::default());
        let progress = Arc::new(progress);

        let worker_progress = progress.clone();
        tokio::spawn(async move {
            Self::worker_loop(name, limit, job_rx, worker_progress, on_progress).await;
        });

        Self {
            name,
            limit,
            job_tx,
            progress,
            next_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn progress(&self) -> ExecutorProgress {
        *self.progress.borrow()
    }

    /// Queue a task. Tasks start in submission order.
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let name = self.name;

        let job: Job = Box::pin(async move {
            let result = task.await;
            let ok = result.is_ok();
            if let Err(e) = &result {
                log::error!("{} task {} failed: {}", name, id, e);
            }
            // receiver may have been dropped; the task still counts
            let _ = tx.send(result);
            ok
        });

        self.progress.send_modify(|p| p.submitted += 1);
        if self.job_tx.send(job).is_err() {
            // worker gone: the dropped job closes the handle with TaskFailed
            log::error!("{} executor worker stopped; task {} dropped", self.name, id);
            self.progress.send_modify(|p| {
                p.completed += 1;
                p.failed += 1;
            });
        }
        TaskHandle { id, rx }
    }

    /// Resolve once every task submitted so far has completed
    pub async fn drained(&self) -> ExecutorProgress {
        let mut rx = self.progress.subscribe();
        match rx.wait_for(ExecutorProgress::is_drained).await {
            Ok(progress) => *progress,
            Err(_) => self.progress(),
        }
    }

    async fn worker_loop(
        name: &'static str,
        limit: usize,
        mut job_rx: mpsc::UnboundedReceiver<Job>,
        progress: Arc<watch::Sender<ExecutorProgress>>,
        on_progress: Option<ProgressFn>,
    ) {
        let mut active_tasks: JoinSet<bool> = JoinSet::new();
        let mut pending: VecDeque<Job> = VecDeque::new();

        loop {
            tokio::select! {
                Some(job) = job_rx.recv() => {
                    pending.push_back(job);
                }

                Some(joined) = active_tasks.join_next(), if !active_tasks.is_empty() => {
                    let ok = match joined {
                        Ok(ok) => ok,
                        Err(e) => {
                            log::error!("{} task panicked: {}", name, e);
                            false
                        }
                    };
                    progress.send_modify(|p| {
                        p.completed += 1;
                        if !ok {
                            p.failed += 1;
                        }
                    });
                    if let Some(callback) = &on_progress {
                        callback(*progress.borrow());
                    }
                }

                else => {
                    if pending.is_empty() && active_tasks.is_empty() {
                        break;
                    }
                }
            }

            while active_tasks.len() < limit {
                let Some(job) = pending.pop_front() else { break };
                active_tasks.spawn(job);
            }
        }
        log::debug!("{} executor worker stopped", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Event {
        Start(usize),
        End(usize),
    }

    #[tokio::test]
    async fn test_limit_never_exceeded() {
        let executor = BoundedExecutor::new("test", 4);
        let events = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let events = events.clone();
                executor.submit(async move {
                    events.lock().unwrap().push(Event::Start(i));
                    tokio::time::sleep(Duration::from_millis(5 + (i as u64 % 3) * 5)).await;
                    events.lock().unwrap().push(Event::End(i));
                    Ok(i)
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.wait().await.unwrap(), i);
        }

        let events = events.lock().unwrap();
        let mut running = 0usize;
        let mut peak = 0usize;
        for event in events.iter() {
            match event {
                Event::Start(_) => running += 1,
                Event::End(_) => running -= 1,
            }
            peak = peak.max(running);
        }
        assert_eq!(peak, 4);

        // FIFO start order
        let starts: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                Event::Start(i) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(starts, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let executor = BoundedExecutor::new("test", 2);
        let bad = executor.submit(async { Err::<(), _>(Error::Backend("boom".into())) });
        let good = executor.submit(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(7)
        });

        assert!(matches!(bad.wait().await, Err(Error::Backend(_))));
        assert_eq!(good.wait().await.unwrap(), 7);

        let progress = executor.drained().await;
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.failed, 1);
    }

    #[tokio::test]
    async fn test_panic_surfaces_as_task_failed() {
        let executor = BoundedExecutor::new("test", 1);
        let handle = executor.submit(async {
            if true {
                panic!("decode task exploded");
            }
            Ok(())
        });
        assert!(matches!(handle.wait().await, Err(Error::TaskFailed(_))));
        assert_eq!(executor.drained().await.failed, 1);
    }

    #[tokio::test]
    async fn test_drained_rearms() {
        let executor = BoundedExecutor::new("test", 4);
        assert!(executor.drained().await.is_drained());

        executor.submit(async { Ok(()) });
        executor.submit(async { Ok(()) });
        assert_eq!(executor.drained().await.completed, 2);

        executor.submit(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        });
        let progress = executor.drained().await;
        assert_eq!(progress.submitted, 3);
        assert_eq!(progress.completed, 3);
    }

    #[tokio::test]
    async fn test_progress_callback_fractions() {
        let fractions = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let callback: ProgressFn = {
            let fractions = fractions.clone();
            let calls = calls.clone();
            Arc::new(move |p: ExecutorProgress| {
                calls.fetch_add(1, Ordering::SeqCst);
                fractions.lock().unwrap().push(p.completed);
            })
        };
        let executor = BoundedExecutor::with_progress("test", 1, Some(callback));
        for _ in 0..4 {
            executor.submit(async { Ok(()) });
        }
        let progress = executor.drained().await;
        assert_eq!(progress.fraction(), 1.0);
        // the callback for the last completion runs right after the counter update
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(*fractions.lock().unwrap(), vec![1, 2, 3, 4]);
    }
}
