//! Commit/rollback hook scopes with transaction-local storage.

use crate::{FlowError, TransactionError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use uuid::Uuid;

pub type CommitHook = Box<dyn FnOnce() -> Result<(), FlowError> + Send>;
pub type RollbackHook = Box<dyn FnOnce() -> Result<(), FlowError> + Send>;

/// Single-use unit of work.
///
/// Commit hooks run in registration order, rollback hooks in reverse. Both
/// `commit` and `rollback` drain the hook lists; once either has run the
/// transaction is finished and refuses new hooks.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

struct TransactionInner {
    id: Uuid,
    hooks: Mutex<Hooks>,
}

#[derive(Default)]
struct Hooks {
    commit: Vec<CommitHook>,
    rollback: Vec<RollbackHook>,
    finished: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id: Uuid::new_v4(),
                hooks: Mutex::new(Hooks::default()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn is_finished(&self) -> bool {
        self.inner.hooks.lock().finished
    }

    /// Returns `false` if the transaction already finished.
    pub fn add_commit_hook<F>(&self, hook: F) -> bool
    where
        F: FnOnce() -> Result<(), FlowError> + Send + 'static,
    {
        let mut hooks = self.inner.hooks.lock();
        if hooks.finished {
            return false;
        }
        hooks.commit.push(Box::new(hook));
        true
    }

    /// Returns `false` if the transaction already finished.
    pub fn add_rollback_hook<F>(&self, hook: F) -> bool
    where
        F: FnOnce() -> Result<(), FlowError> + Send + 'static,
    {
        let mut hooks = self.inner.hooks.lock();
        if hooks.finished {
            return false;
        }
        hooks.rollback.push(Box::new(hook));
        true
    }

    /// Runs the commit hooks. The first failing hook stops the commit, every
    /// rollback hook runs in reverse order, and the commit error is returned.
    pub fn commit(&self) -> Result<(), FlowError> {
        let (commits, rollbacks) = self.take_hooks();

        for hook in commits {
            if let Err(err) = hook() {
                if let Err(rollback_err) = run_rollbacks(rollbacks) {
                    tracing::debug!(transaction = %self.inner.id, "compensating rollback failed: {}", rollback_err);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Runs every rollback hook in reverse order, collecting failures.
    pub fn rollback(&self) -> Result<(), TransactionError> {
        let (_, rollbacks) = self.take_hooks();
        run_rollbacks(rollbacks)
    }

    fn take_hooks(&self) -> (Vec<CommitHook>, Vec<RollbackHook>) {
        let mut hooks = self.inner.hooks.lock();
        hooks.finished = true;
        (
            std::mem::take(&mut hooks.commit),
            std::mem::take(&mut hooks.rollback),
        )
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn run_rollbacks(rollbacks: Vec<RollbackHook>) -> Result<(), TransactionError> {
    let errors: Vec<FlowError> = rollbacks
        .into_iter()
        .rev()
        .filter_map(|hook| hook().err())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TransactionError::Rollback(errors))
    }
}

/// Transaction-scoped typed storage.
///
/// The first value stored for a transaction registers commit and rollback
/// hooks that delete it, so entries never outlive their transaction.
pub struct Local<T> {
    values: Arc<Mutex<HashMap<Uuid, T>>>,
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

    pub fn load(&self, tx: &Transaction) -> Option<T> {
        self.values.lock().get(&tx.id()).cloned()
    }

    /// Stores `value` for `tx`. Ignored if `tx` already finished.
    pub fn store(&self, tx: &Transaction, value: T) {
        let mut values = self.values.lock();
        if values.contains_key(&tx.id()) || self.register_cleanup(tx) {
            values.insert(tx.id(), value);
        }
    }

    pub fn delete(&self, tx: &Transaction) -> bool {
        self.values.lock().remove(&tx.id()).is_some()
    }

    /// Returns the stored value, or runs `f` under the map lock and stores its
    /// result. Concurrent callers for one transaction see a single value.
    pub fn load_or_store<F>(&self, tx: &Transaction, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        match self.load_or_try_store(tx, || Ok::<T, std::convert::Infallible>(f())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Fallible `load_or_store`. Nothing is stored when `f` fails.
    pub fn load_or_try_store<F, E>(&self, tx: &Transaction, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut values = self.values.lock();
        if let Some(value) = values.get(&tx.id()) {
            return Ok(value.clone());
        }

        let value = f()?;
        if self.register_cleanup(tx) {
            values.insert(tx.id(), value.clone());
        }
        Ok(value)
    }

    fn register_cleanup(&self, tx: &Transaction) -> bool {
        let id = tx.id();
        let on_commit = Arc::downgrade(&self.values);
        let on_rollback = on_commit.clone();
        tx.add_commit_hook(move || {
            evict(&on_commit, id);
            Ok(())
        }) && tx.add_rollback_hook(move || {
            evict(&on_rollback, id);
            Ok(())
        })
    }
}

fn evict<T>(values: &Weak<Mutex<HashMap<Uuid, T>>>, id: Uuid) {
    if let Some(values) = values.upgrade() {
        values.lock().remove(&id);
    }
}
