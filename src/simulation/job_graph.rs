//! A job graph processed by a worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A set of independent jobs to run on the worker pool.
///
/// Jobs receive the index of the worker thread running them and the pool's
/// cancellation flag; long-running jobs poll the flag at loop-carried points
/// and return early when it is raised. Jobs may borrow from the enclosing
/// scope; they are guaranteed to finish before
/// [`ThreadPool::process`] returns.
#[derive(Default)]
pub struct JobGraph<'a> {
    jobs: Vec<Box<dyn FnOnce(usize, &AtomicBool) + Send + 'a>>,
}

impl<'a> JobGraph<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job<F>(&mut self, job: F)
    where
        F: FnOnce(usize, &AtomicBool) + Send + 'a,
    {
        self.jobs.push(Box::new(job));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl std::fmt::Debug for JobGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobGraph")
            .field("num_jobs", &self.jobs.len())
            .finish()
    }
}

/// A pool of worker threads that drains job graphs.
///
/// Cancellation is cooperative: [`ThreadPool::cancel`] raises a flag, running
/// jobs poll it and return, and queued jobs are skipped.
#[derive(Debug)]
pub struct ThreadPool {
    pool: rayon::ThreadPool,
    cancel: Arc<AtomicBool>,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .build()
            .expect("worker pool creation");

        Self {
            pool,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// The pool's cancellation flag, for sharing with long-running
    /// simulations.
    pub fn cancel_flag(&self) -> &Arc<AtomicBool> {
        &self.cancel
    }

    /// Raises the cancellation flag. Jobs drain cooperatively; the next
    /// [`ThreadPool::process`] call clears the flag.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Runs all jobs in the graph to completion (or cancellation), blocking
    /// the caller.
    pub fn process(&self, graph: JobGraph<'_>) {
        self.cancel.store(false, Ordering::Relaxed);

        let cancel = &self.cancel;
        self.pool.scope(|scope| {
            for job in graph.jobs {
                scope.spawn(move |_| {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }

                    let thread_index = rayon::current_thread_index().unwrap_or(0);
                    job(thread_index, cancel);
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_all_jobs_run() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut graph = JobGraph::new();
        for _ in 0..64 {
            let counter = counter.clone();
            graph.add_job(move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        pool.process(graph);
        assert_eq!(counter.load(Ordering::Relaxed), 64);
    }

    #[test]
    fn test_cancelled_jobs_are_skipped() {
        let pool = ThreadPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        pool.cancel();

        // The flag is cleared when processing starts, so jobs still run.
        let mut graph = JobGraph::new();
        let inner = counter.clone();
        graph.add_job(move |_, _| {
            inner.fetch_add(1, Ordering::Relaxed);
        });
        pool.process(graph);

        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
