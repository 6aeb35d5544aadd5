//! Background work dispatcher — blocking calls off the control task,
//! completions marshaled back onto it.
//!
//! The relay's control task must never block, but saving a message may.
//! [`Dispatcher`] bridges the two worlds: [`submit`](Dispatcher::submit)
//! hands a blocking closure to a bounded pool of worker threads and
//! returns immediately; when the work finishes, its `on_done` callback is
//! shipped back over a single-consumer channel as a boxed [`Completion`]
//! and runs on whichever task drains that channel — in the relay, the
//! control task. Because there is exactly one consumer, completions never
//! run concurrently with each other or with other control-task logic.
//!
//! ## Ordering
//!
//! Completions are delivered in the order the workers *finish*, which is
//! not submission order: workers run in parallel, and a later-submitted
//! fast job can overtake an earlier slow one. Callers must not assume
//! FIFO.
//!
//! ## Backpressure
//!
//! There is none. When every worker is busy, submissions queue without
//! bound. This is a deliberate, known limitation of the design, kept
//! rather than silently fixed with admission control.

use std::io;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error};

/// Default number of worker threads in the pool.
pub const DEFAULT_WORKERS: usize = 10;

/// A completion callback, ready to run against the control state `S`.
///
/// Produced by the worker that ran the submitted work; consumed exactly
/// once by the task draining the dispatcher's completion channel.
pub type Completion<S> = Box<dyn FnOnce(&mut S) + Send>;

// A queued unit of work: runs the blocking closure, then packages its
// result into the completion that will run on the control task.
type Job<S> = Box<dyn FnOnce() -> Completion<S> + Send>;

/// A bounded pool of worker threads for blocking work, with completions
/// funneled back to a single consumer.
///
/// Generic over the control-state type `S` that completions mutate, so
/// the relay (and tests) plug in their own state without the dispatcher
/// knowing anything about it.
///
/// Dropping the dispatcher closes the job queue; workers finish whatever
/// is queued and exit.
pub struct Dispatcher<S> {
    jobs: std_mpsc::Sender<Job<S>>,
    // Detached on drop; held so the pool size is visible in debuggers.
    _workers: Vec<thread::JoinHandle<()>>,
}

impl<S: 'static> Dispatcher<S> {
    /// Spawns `workers` named worker threads and returns the dispatcher
    /// together with the completion receiver.
    ///
    /// The caller owns the receiver and must drain it from exactly one
    /// task; that task is where every `on_done` runs.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] if a worker thread cannot be spawned.
    pub fn spawn(workers: usize) -> io::Result<(Self, mpsc::UnboundedReceiver<Completion<S>>)> {
        let (job_tx, job_rx) = std_mpsc::channel::<Job<S>>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let jobs = Arc::clone(&job_rx);
            let done = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("relay-worker-{index}"))
                .spawn(move || worker_loop(&jobs, &done))?;
            handles.push(handle);
        }
        debug!(workers, "background pool started");

        Ok((
            Self {
                jobs: job_tx,
                _workers: handles,
            },
            done_rx,
        ))
    }

    /// Enqueues blocking `work` and returns immediately.
    ///
    /// A worker thread runs `work` to completion — success or failure is
    /// captured in its `Result` — and the dispatcher then schedules
    /// `on_done(state, result)` on the completion channel. `on_done` runs
    /// on the draining task, serialized with all other completions.
    ///
    /// Work is never cancelled: a submission outlives whatever connection
    /// prompted it.
    pub fn submit<W, T, E, F>(&self, work: W, on_done: F)
    where
        W: FnOnce() -> Result<T, E> + Send + 'static,
        F: FnOnce(&mut S, Result<T, E>) + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let job: Job<S> = Box::new(move || {
            let result = work();
            Box::new(move |state: &mut S| on_done(state, result)) as Completion<S>
        });

        if self.jobs.send(job).is_err() {
            // Every worker has exited — nothing can run this job.
            error!("background pool is gone — dropping submitted work");
        }
    }
}

// One worker: pull a job, run it (this is where the blocking happens),
// forward the completion. Exits when the job queue closes or the
// completion consumer goes away.
fn worker_loop<S>(
    jobs: &Mutex<std_mpsc::Receiver<Job<S>>>,
    done: &mpsc::UnboundedSender<Completion<S>>,
) {
    loop {
        // Hold the lock only for the receive, never while running the job.
        let job = {
            let queue = jobs.lock().unwrap_or_else(PoisonError::into_inner);
            queue.recv()
        };
        let Ok(job) = job else {
            break; // queue closed: dispatcher dropped
        };

        let completion = job();
        if done.send(completion).is_err() {
            break; // control loop stopped draining
        }
    }
}
