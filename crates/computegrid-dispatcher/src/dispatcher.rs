//! Task dispatch: a bounded queue drained by a fixed pool of worker loops.
//!
//! Submission only enqueues. Each worker decodes the task envelope, resolves
//! the provider and runs the kernel on the blocking pool; any failure is
//! recorded against that task alone.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use computegrid_core::{
    DispatchRecord, DispatchStatus, ProviderRegistry, TaskEnvelope, TaskError, TaskId,
};

use crate::config::Config;
use crate::error::DispatchError;
use crate::identity::Principal;

struct Job {
    task_id: TaskId,
    payload: Vec<u8>,
}

/// Per-status counters.
#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    queued: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub submitted: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
}

struct StoreInner {
    entries: HashMap<TaskId, watch::Sender<DispatchRecord>>,
    /// Terminal task ids, oldest first.
    finished: VecDeque<TaskId>,
}

/// Dispatch records with change notification.
///
/// Keeps at most `capacity` terminal records; the oldest are evicted first.
/// Records still queued or running are never evicted.
pub struct ResultStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
}

impl ResultStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                entries: HashMap::new(),
                finished: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Insert a new record. A rejected record with the same id is replaced.
    pub async fn insert(&self, record: DispatchRecord) -> Result<(), DispatchError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.entries.get(&record.task_id) {
            if existing.borrow().status != DispatchStatus::Rejected {
                return Err(DispatchError::DuplicateTask(record.task_id));
            }
            let id = record.task_id.clone();
            inner.finished.retain(|f| f != &id);
        }
        let (tx, _rx) = watch::channel(record.clone());
        inner.entries.insert(record.task_id, tx);
        Ok(())
    }

    /// Apply `f` to a record and notify subscribers.
    pub async fn update(
        &self,
        task_id: &TaskId,
        f: impl FnOnce(&mut DispatchRecord),
    ) -> Option<DispatchRecord> {
        let mut inner = self.inner.write().await;
        let tx = inner.entries.get(task_id)?;
        let was_terminal = tx.borrow().is_terminal();
        tx.send_modify(f);
        let record = tx.borrow().clone();

        if record.is_terminal() && !was_terminal {
            inner.finished.push_back(task_id.clone());
            while inner.finished.len() > self.capacity {
                if let Some(oldest) = inner.finished.pop_front() {
                    inner.entries.remove(&oldest);
                }
            }
        }
        Some(record)
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<DispatchRecord> {
        let inner = self.inner.read().await;
        inner.entries.get(task_id).map(|tx| tx.borrow().clone())
    }

    /// Watch a record for changes.
    pub async fn subscribe(&self, task_id: &TaskId) -> Option<watch::Receiver<DispatchRecord>> {
        let inner = self.inner.read().await;
        inner.entries.get(task_id).map(|tx| tx.subscribe())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Owns the task queue and the worker pool.
pub struct Dispatcher {
    registry: ProviderRegistry,
    tx: mpsc::Sender<Job>,
    rx: StdMutex<Option<mpsc::Receiver<Job>>>,
    results: ResultStore,
    counters: Counters,
    worker_count: usize,
    queue_capacity: usize,
}

impl Dispatcher {
    /// Create a dispatcher. No task runs until [`Dispatcher::start`].
    pub fn new(registry: ProviderRegistry, config: &Config) -> Arc<Self> {
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity);
        Arc::new(Self {
            registry,
            tx,
            rx: StdMutex::new(Some(rx)),
            results: ResultStore::new(config.result_capacity),
            counters: Counters::default(),
            worker_count: config.worker_count.max(1),
            queue_capacity,
        })
    }

    /// Spawn the worker loops. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let Some(rx) = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            warn!("Dispatcher already started");
            return Vec::new();
        };

        let rx = Arc::new(Mutex::new(rx));
        info!(
            workers = self.worker_count,
            queue_capacity = self.queue_capacity,
            "Starting dispatch workers"
        );
        (0..self.worker_count)
            .map(|worker| tokio::spawn(self.clone().worker_loop(worker, rx.clone())))
            .collect()
    }

    /// Queue a serialized task and return its id.
    ///
    /// Returns as soon as the task is queued; the outcome is recorded in the
    /// result store.
    pub async fn submit(
        &self,
        task_id: Option<TaskId>,
        payload: Vec<u8>,
        principal: &Principal,
    ) -> Result<TaskId, DispatchError> {
        if payload.is_empty() {
            return Err(DispatchError::EmptyPayload);
        }
        let task_id = task_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(TaskId::generate);

        self.results
            .insert(DispatchRecord::queued(task_id.clone(), &principal.username))
            .await?;

        // Count before sending so a fast worker never decrements first.
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            task_id: task_id.clone(),
            payload,
        };
        match self.tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                info!(task_id = %task_id, submitted_by = %principal.username, "Task queued");
                Ok(task_id)
            }
            Err(e) => {
                self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                let err = match e {
                    TrySendError::Full(_) => DispatchError::QueueFull {
                        capacity: self.queue_capacity,
                    },
                    TrySendError::Closed(_) => DispatchError::ShuttingDown,
                };
                warn!(task_id = %task_id, error = %err, "Task rejected");
                let reason = err.to_string();
                self.results.update(&task_id, |r| r.reject(reason)).await;
                Err(err)
            }
        }
    }

    pub async fn result(&self, task_id: &TaskId) -> Option<DispatchRecord> {
        self.results.get(task_id).await
    }

    pub async fn subscribe(&self, task_id: &TaskId) -> Option<watch::Receiver<DispatchRecord>> {
        self.results.subscribe(task_id).await
    }

    /// Number of records currently held by the result store.
    pub async fn stored_results(&self) -> usize {
        self.results.len().await
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn counters(&self) -> CounterSnapshot {
        let c = &self.counters;
        CounterSnapshot {
            submitted: c.submitted.load(Ordering::Relaxed),
            queued: c.queued.load(Ordering::SeqCst),
            running: c.running.load(Ordering::SeqCst),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }

    async fn worker_loop(self: Arc<Self>, worker: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
        loop {
            let job = rx.lock().await.recv().await;
            let Some(job) = job else {
                break;
            };
            self.run_job(worker, job).await;
        }
        info!(worker, "Dispatch worker stopped");
    }

    async fn run_job(&self, worker: usize, job: Job) {
        self.counters.queued.fetch_sub(1, Ordering::SeqCst);
        self.counters.running.fetch_add(1, Ordering::SeqCst);
        self.results.update(&job.task_id, |r| r.start()).await;

        let outcome = self.execute(&job).await;
        self.counters.running.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(output) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                let record = self
                    .results
                    .update(&job.task_id, |r| r.complete(output))
                    .await;
                let task_type = record
                    .as_ref()
                    .and_then(|r| r.task_type.clone())
                    .unwrap_or_default();
                let duration_ms = record
                    .as_ref()
                    .and_then(DispatchRecord::duration_ms)
                    .unwrap_or_default();
                info!(
                    worker,
                    task_id = %job.task_id,
                    task_type = %task_type,
                    duration_ms,
                    "Task completed"
                );
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(worker, task_id = %job.task_id, error = %e, "Task failed");
                let message = e.to_string();
                self.results.update(&job.task_id, |r| r.fail(message)).await;
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<Value, TaskError> {
        let envelope = TaskEnvelope::decode(&job.payload)?;
        let task_type = envelope.task_type.clone();
        self.results
            .update(&job.task_id, |r| r.task_type = Some(task_type))
            .await;

        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || envelope.run(&registry))
            .await
            .map_err(|e| TaskError::Execution(format!("worker aborted: {}", e)))?
    }
}
