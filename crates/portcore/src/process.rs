//! Execution contexts that travel alongside packets.
//!
//! A [`Process`] is the scope every reader and writer is opened against. It
//! forms a tree through [`Process::fork`], carries a cancellation token and
//! process-local storage, and runs its exit hooks exactly once.

use crate::transaction::Transaction;
use crate::FlowError;
use chrono::{DateTime, Utc};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

pub type ProcessId = Uuid;

pub type ExitHook = Box<dyn FnOnce(Option<&FlowError>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Terminated,
}

#[derive(Clone)]
pub struct Process {
    inner: Arc<ProcessInner>,
}

struct ProcessInner {
    id: ProcessId,
    parent: Option<Weak<ProcessInner>>,
    state: Mutex<ProcessState>,
    children: Mutex<Vec<Process>>,
    data: Data,
    transaction: Mutex<Option<Transaction>>,
    token: CancellationToken,
    tracker: TaskTracker,
    done: watch::Sender<bool>,
    started_at: DateTime<Utc>,
}

struct ProcessState {
    status: Status,
    err: Option<Arc<FlowError>>,
    ended_at: Option<DateTime<Utc>>,
    exit_hooks: Vec<ExitHook>,
}

impl Process {
    pub fn new() -> Self {
        Self::build(None, CancellationToken::new())
    }

    fn build(parent: Option<Weak<ProcessInner>>, token: CancellationToken) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(ProcessInner {
                id: Uuid::new_v4(),
                parent,
                state: Mutex::new(ProcessState {
                    status: Status::Running,
                    err: None,
                    ended_at: None,
                    exit_hooks: Vec::new(),
                }),
                children: Mutex::new(Vec::new()),
                data: Data::default(),
                transaction: Mutex::new(None),
                token,
                tracker: TaskTracker::new(),
                done,
                started_at: Utc::now(),
            }),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.inner.id
    }

    pub fn status(&self) -> Status {
        self.inner.state.lock().status
    }

    pub fn is_terminated(&self) -> bool {
        self.status() == Status::Terminated
    }

    /// The error the process exited with; `Cancelled` for a clean exit.
    /// `None` while running.
    pub fn err(&self) -> Option<Arc<FlowError>> {
        let state = self.inner.state.lock();
        match state.status {
            Status::Running => None,
            Status::Terminated => Some(
                state
                    .err
                    .clone()
                    .unwrap_or_else(|| Arc::new(FlowError::Cancelled)),
            ),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().ended_at
    }

    pub fn parent(&self) -> Option<Process> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Process { inner })
    }

    pub fn data(&self) -> &Data {
        &self.inner.data
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Resolves once the process, or any ancestor, has exited.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Creates a child whose cancellation follows this process but whose
    /// exit is independent.
    pub fn fork(&self) -> Result<Process, FlowError> {
        let state = self.inner.state.lock();
        if state.status == Status::Terminated {
            return Err(FlowError::ProcessTerminated);
        }
        let child = Process::build(
            Some(Arc::downgrade(&self.inner)),
            self.inner.token.child_token(),
        );
        self.inner.children.lock().push(child.clone());
        Ok(child)
    }

    /// Runs `task` as part of this process; [`Process::done`] waits for it.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(task)
    }

    /// Registers a hook run on exit. Runs it immediately if already terminated.
    pub fn add_exit_hook<F>(&self, hook: F)
    where
        F: FnOnce(Option<&FlowError>) + Send + 'static,
    {
        if let Err(hook) = self.try_add_exit_hook(Box::new(hook)) {
            let err = self.inner.state.lock().err.clone();
            hook(err.as_deref());
        }
    }

    /// Hands the hook back instead of running it when already terminated.
    pub(crate) fn try_add_exit_hook(&self, hook: ExitHook) -> Result<(), ExitHook> {
        let mut state = self.inner.state.lock();
        if state.status == Status::Terminated {
            return Err(hook);
        }
        state.exit_hooks.push(hook);
        Ok(())
    }

    /// Terminates the process. Only the first call has any effect; it returns
    /// `true` for that call.
    pub fn exit(&self, err: Option<FlowError>) -> bool {
        let (hooks, err) = {
            let mut state = self.inner.state.lock();
            if state.status == Status::Terminated {
                return false;
            }
            state.status = Status::Terminated;
            state.err = err.map(Arc::new);
            state.ended_at = Some(Utc::now());
            (std::mem::take(&mut state.exit_hooks), state.err.clone())
        };

        tracing::debug!(process = %self.inner.id, error = ?err, "process exiting");

        self.inner.token.cancel();
        for hook in hooks {
            hook(err.as_deref());
        }
        self.inner.tracker.close();

        if let Some(parent) = self.parent() {
            parent
                .inner
                .children
                .lock()
                .retain(|child| child.id() != self.inner.id);
        }
        self.inner.done.send_replace(true);
        true
    }

    /// Waits for every child alive at call time, and transitively their
    /// children, to finish. Children forked afterwards are not awaited.
    pub fn join(&self) -> BoxFuture<'_, ()> {
        let children: Vec<Process> = self.inner.children.lock().clone();
        async move {
            join_all(children.iter().map(|child| async move {
                child.join().await;
                child.done().await;
            }))
            .await;
        }
        .boxed()
    }

    /// Waits until this process has exited and every task it spawned has
    /// finished. Must not be awaited from one of those tasks.
    pub async fn done(&self) {
        let mut done = self.inner.done.subscribe();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
        self.inner.tracker.wait().await;
    }

    /// The transaction scoped to this process, created on first use. It is
    /// committed when the process exits cleanly and rolled back otherwise.
    pub fn transaction(&self) -> Transaction {
        let tx = {
            let mut slot = self.inner.transaction.lock();
            if let Some(tx) = slot.as_ref() {
                return tx.clone();
            }
            let tx = Transaction::new();
            *slot = Some(tx.clone());
            tx
        };

        let scoped = tx.clone();
        let id = self.inner.id;
        self.add_exit_hook(move |err| match err {
            None => {
                if let Err(e) = scoped.commit() {
                    tracing::warn!(process = %id, "transaction commit failed: {}", e);
                }
            }
            Some(_) => {
                if let Err(e) = scoped.rollback() {
                    tracing::warn!(process = %id, "transaction rollback failed: {}", e);
                }
            }
        });
        tx
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

/// Untyped process-local key/value storage.
#[derive(Default)]
pub struct Data {
    values: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Data {
    pub fn store<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.values.lock().insert(key.into(), Arc::new(value));
    }

    /// `None` when the key is missing or holds another type.
    pub fn load<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.values.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn delete(&self, key: &str) -> bool {
        self.values.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }
}

/// Process-scoped typed storage. Entries are dropped when their process exits.
pub struct Local<T> {
    values: Arc<Mutex<HashMap<ProcessId, T>>>,
}

impl<T> Clone for Local<T> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
        }
    }
}

impl<T> Default for Local<T> {
    fn default() -> Self {
        Self {
            values: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Local<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, proc: &Process) -> Option<T> {
        self.values.lock().get(&proc.id()).cloned()
    }

    /// Stores `value` for `proc`. Ignored if `proc` already exited.
    pub fn store(&self, proc: &Process, value: T) {
        let mut values = self.values.lock();
        if values.contains_key(&proc.id()) || self.register_cleanup(proc) {
            values.insert(proc.id(), value);
        }
    }

    pub fn delete(&self, proc: &Process) -> bool {
        self.values.lock().remove(&proc.id()).is_some()
    }

    pub fn load_or_store<F>(&self, proc: &Process, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let mut values = self.values.lock();
        if let Some(value) = values.get(&proc.id()) {
            return value.clone();
        }
        let value = f();
        if self.register_cleanup(proc) {
            values.insert(proc.id(), value.clone());
        }
        value
    }

    fn register_cleanup(&self, proc: &Process) -> bool {
        let id = proc.id();
        let values = Arc::downgrade(&self.values);
        proc.try_add_exit_hook(Box::new(move |_| {
            if let Some(values) = values.upgrade() {
                values.lock().remove(&id);
            }
        }))
        .is_ok()
    }
}
