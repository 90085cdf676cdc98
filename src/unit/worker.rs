use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_utils::sync::{Parker, Unparker};

use super::oneshot;
use super::queue::TaskQueue;
use super::UnitId;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::trace::debug_event;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Task(Job),
    Terminate(oneshot::Sender<Result<usize, WorkerError>>),
}

struct Shared {
    queue: TaskQueue<Message>,
    closed: AtomicBool,
    unparker: Unparker,
}

static WORKER_SEQ: AtomicUsize = AtomicUsize::new(0);

/// A dedicated execution unit that runs submitted tasks to completion, in order.
///
/// Payloads are moved into the worker, so anything `Send` (including a
/// [`SharedRef`](crate::SharedRef)) can be handed over. Objects the worker
/// allocates are owned by [`Worker::id`].
///
/// ```
/// use anchored::unit::Worker;
///
/// let worker = Worker::start().unwrap();
/// let doubled = worker.execute(21, |n| n * 2).result().unwrap();
/// assert_eq!(doubled, 42);
/// ```
pub struct Worker {
    id: UnitId,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Starts a worker with the default [`WorkerConfig`].
    pub fn start() -> Result<Worker, WorkerError> {
        Self::start_with(&WorkerConfig::default())
    }

    /// Starts a worker thread and waits until it has registered its unit id.
    pub fn start_with(config: &WorkerConfig) -> Result<Worker, WorkerError> {
        config.validate().map_err(|err| {
            WorkerError::Spawn(io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))
        })?;

        let parker = Parker::new();
        let shared = Arc::new(Shared {
            queue: TaskQueue::new(),
            closed: AtomicBool::new(false),
            unparker: parker.unparker().clone(),
        });

        let seq = WORKER_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("{}-{seq}", config.name_prefix));
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        let (id_tx, id_rx) = oneshot::channel();
        let thread_shared = Arc::clone(&shared);
        let thread = builder
            .spawn(move || {
                let _ = id_tx.send(UnitId::current());
                run(&thread_shared, &parker);
            })
            .map_err(WorkerError::Spawn)?;

        let id = id_rx.recv().map_err(|_| WorkerError::Terminated)?;
        debug_event!(unit = %id, "worker started");

        Ok(Worker {
            id,
            shared,
            thread: Some(thread),
        })
    }

    /// The unit id of the worker thread.
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Returns `true` once the worker has stopped accepting tasks.
    pub fn is_terminated(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Moves `payload` to the worker and runs `task(payload)` there.
    ///
    /// Tasks submitted after termination resolve to [`WorkerError::Terminated`].
    pub fn execute<P, R, F>(&self, payload: P, task: F) -> TaskFuture<R>
    where
        P: Send + 'static,
        R: Send + 'static,
        F: FnOnce(P) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(move || task(payload)))
                .map_err(|_| {
                    debug_event!(unit = %UnitId::current(), "task panicked");
                    WorkerError::TaskPanicked
                });
            let _ = tx.send(outcome);
        });

        self.submit(Message::Task(job));
        TaskFuture { rx }
    }

    /// Asks the worker to stop after every task submitted so far has run.
    ///
    /// The future resolves to the number of tasks that were queued behind the
    /// termination request and discarded; their futures report
    /// [`WorkerError::Terminated`].
    pub fn request_termination(&self) -> TaskFuture<usize> {
        let (tx, rx) = oneshot::channel();
        self.submit(Message::Terminate(tx));
        TaskFuture { rx }
    }

    fn submit(&self, message: Message) {
        if self.shared.closed.load(Ordering::SeqCst) {
            // Dropping the message drops its result sender.
            return;
        }

        self.shared.queue.push(message);
        self.shared.unparker.unpark();

        // Termination raced with the push and the worker's final drain may have
        // missed our node.
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.queue.drain();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            drop(self.request_termination());
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

fn run(shared: &Shared, parker: &Parker) {
    loop {
        match shared.queue.pop() {
            Some(Message::Task(job)) => job(),
            Some(Message::Terminate(done)) => {
                shared.closed.store(true, Ordering::SeqCst);
                let dropped = shared.queue.drain();
                debug_event!(unit = %UnitId::current(), dropped, "worker terminated");
                let _ = done.send(Ok(dropped));
                return;
            }
            None => parker.park(),
        }
    }
}

/// Pending outcome of a task submitted to a [`Worker`].
#[must_use = "a task's outcome is only observable through its future"]
pub struct TaskFuture<R> {
    rx: oneshot::Receiver<Result<R, WorkerError>>,
}

impl<R> TaskFuture<R> {
    /// Blocks until the task has run and returns its result.
    pub fn result(self) -> Result<R, WorkerError> {
        match self.rx.recv() {
            Ok(outcome) => outcome,
            Err(oneshot::RecvError) => Err(WorkerError::Terminated),
        }
    }

    /// Returns `true` once [`result`](Self::result) would not block.
    pub fn is_ready(&self) -> bool {
        self.rx.is_ready()
    }
}

impl<R> std::fmt::Debug for TaskFuture<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}
