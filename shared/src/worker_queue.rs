use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use log::{debug, info, warn};
use thiserror::Error;

/// Errors that can occur when driving a WorkerQueue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue has been stopped and accepts no more items
    #[error("Worker queue '{name}' is stopped")]
    Stopped { name: String },

    /// The consumer thread could not be spawned
    #[error("Failed to spawn consumer thread for worker queue '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueueStatus {
    Idle,
    Running,
    Stopping,
    Stopped,
}

struct QueueState<T> {
    items: VecDeque<T>,
    status: QueueStatus,
}

struct QueueShared<T> {
    state: Mutex<QueueState<T>>,
    wake: Condvar,
}

impl<T> QueueShared<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Handler<T> = Box<dyn FnMut(T) + Send>;

/// Single-consumer FIFO task runner.
///
/// Any thread may enqueue; one dedicated thread drains items in order and
/// hands each to the handler. Dropping an item is its destructor, so items
/// left over at [`WorkerQueue::destroy`] are released there.
pub struct WorkerQueue<T: Send + 'static> {
    name: String,
    shared: Arc<QueueShared<T>>,
    handler: Mutex<Option<Handler<T>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> WorkerQueue<T> {
    pub fn new(name: impl Into<String>, handler: impl FnMut(T) + Send + 'static) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    status: QueueStatus::Idle,
                }),
                wake: Condvar::new(),
            }),
            handler: Mutex::new(Some(Box::new(handler))),
            thread: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the consumer thread. Calling it on a running queue does nothing.
    pub fn start(&self) -> Result<(), QueueError> {
        let mut state = self.shared.lock();
        match state.status {
            QueueStatus::Running => return Ok(()),
            QueueStatus::Stopping | QueueStatus::Stopped => {
                return Err(QueueError::Stopped {
                    name: self.name.clone(),
                })
            }
            QueueStatus::Idle => {}
        }

        let Some(mut handler) = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Err(QueueError::Stopped {
                name: self.name.clone(),
            });
        };

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                while let Some(item) = next_item(&shared) {
                    handler(item);
                }
            });

        match spawned {
            Ok(join_handle) => {
                state.status = QueueStatus::Running;
                *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(join_handle);
                info!("Worker queue '{}' started", self.name);
                Ok(())
            }
            Err(error) => Err(QueueError::SpawnFailed {
                name: self.name.clone(),
                reason: error.to_string(),
            }),
        }
    }

    /// Appends an item and wakes the consumer. Never waits for the item to be
    /// processed. Items enqueued before `start()` are held until it runs.
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.shared.lock();
        match state.status {
            QueueStatus::Stopping | QueueStatus::Stopped => Err(QueueError::Stopped {
                name: self.name.clone(),
            }),
            QueueStatus::Idle | QueueStatus::Running => {
                state.items.push_back(item);
                self.shared.wake.notify_one();
                Ok(())
            }
        }
    }

    /// Pops one item on the calling thread. Used when no consumer thread runs.
    pub fn poll(&self) -> Option<T> {
        self.shared.lock().items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().status == QueueStatus::Running
    }

    /// Lets the consumer drain what is queued, then joins it.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            match state.status {
                QueueStatus::Running => {
                    state.status = QueueStatus::Stopping;
                    self.shared.wake.notify_all();
                }
                QueueStatus::Idle => {
                    state.status = QueueStatus::Stopped;
                    return;
                }
                QueueStatus::Stopping | QueueStatus::Stopped => {}
            }
        }

        let join_handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(join_handle) = join_handle {
            if join_handle.thread().id() == thread::current().id() {
                warn!("Worker queue '{}' stopped from its own consumer thread", self.name);
            } else if join_handle.join().is_err() {
                warn!("Worker queue '{}' consumer thread panicked", self.name);
            }
        }

        self.shared.lock().status = QueueStatus::Stopped;
        debug!("Worker queue '{}' stopped", self.name);
    }

    /// Releases the queue, dropping any items that were never consumed.
    /// Returns how many were dropped.
    pub fn destroy(self) -> usize {
        self.stop();
        let leftover = std::mem::take(&mut self.shared.lock().items);
        if !leftover.is_empty() {
            debug!(
                "Worker queue '{}' destroyed with {} pending items",
                self.name,
                leftover.len()
            );
        }
        leftover.len()
    }
}

impl<T: Send + 'static> Drop for WorkerQueue<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn next_item<T>(shared: &QueueShared<T>) -> Option<T> {
    let mut state = shared.lock();
    loop {
        if let Some(item) = state.items.pop_front() {
            return Some(item);
        }
        if state.status != QueueStatus::Running {
            return None;
        }
        state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
    }
}
