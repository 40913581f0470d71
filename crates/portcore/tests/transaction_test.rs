use parking_lot::Mutex;
use portcore::transaction::Local;
use portcore::{FlowError, Transaction, TransactionError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce() -> Result<(), FlowError> + Send>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let hook = move |name: &'static str| -> Box<dyn FnOnce() -> Result<(), FlowError> + Send> {
        let sink = sink.clone();
        Box::new(move || {
            sink.lock().push(name);
            Ok(())
        })
    };
    (log, hook)
}

#[test]
fn test_local_is_cleared_by_commit() {
    let local: Local<i32> = Local::new();
    let tx = Transaction::new();

    local.store(&tx, 7);
    assert_eq!(local.load(&tx), Some(7));

    tx.commit().unwrap();
    assert_eq!(local.load(&tx), None);
}

#[test]
fn test_local_is_cleared_by_rollback() {
    let local: Local<i32> = Local::new();
    let tx = Transaction::new();

    local.store(&tx, 7);
    local.store(&tx, 8);
    assert_eq!(local.load(&tx), Some(8));

    tx.rollback().unwrap();
    assert_eq!(local.load(&tx), None);
}

#[test]
fn test_local_values_are_isolated_per_transaction() {
    let local: Local<&'static str> = Local::new();
    let t1 = Transaction::new();
    let t2 = Transaction::new();

    local.store(&t1, "one");
    assert_eq!(local.load(&t2), None);
    assert!(local.delete(&t1));
    assert!(!local.delete(&t1));
}

#[test]
fn test_finished_transaction_refuses_hooks_and_values() {
    let local: Local<i32> = Local::new();
    let tx = Transaction::new();
    tx.commit().unwrap();

    assert!(tx.is_finished());
    assert!(!tx.add_commit_hook(|| Ok(())));
    assert!(!tx.add_rollback_hook(|| Ok(())));

    local.store(&tx, 1);
    assert_eq!(local.load(&tx), None);
}

#[test]
fn test_commit_runs_hooks_in_order() {
    let (log, hook) = recorder();
    let tx = Transaction::new();
    tx.add_commit_hook(hook("c1"));
    tx.add_commit_hook(hook("c2"));
    tx.add_rollback_hook(hook("r1"));

    tx.commit().unwrap();
    assert_eq!(*log.lock(), vec!["c1", "c2"]);
}

#[test]
fn test_failed_commit_rolls_back_in_reverse() {
    let (log, hook) = recorder();
    let tx = Transaction::new();
    tx.add_commit_hook(hook("c1"));
    tx.add_commit_hook(|| Err(FlowError::Execution("disk full".to_string())));
    tx.add_commit_hook(hook("c3"));
    tx.add_rollback_hook(hook("r1"));
    tx.add_rollback_hook(hook("r2"));

    let err = tx.commit().unwrap_err();
    assert!(matches!(err, FlowError::Execution(ref msg) if msg == "disk full"));
    assert_eq!(*log.lock(), vec!["c1", "r2", "r1"]);
}

#[test]
fn test_rollback_aggregates_errors() {
    let (log, hook) = recorder();
    let tx = Transaction::new();
    tx.add_rollback_hook(|| Err(FlowError::Execution("a".to_string())));
    tx.add_rollback_hook(hook("ok"));
    tx.add_rollback_hook(|| Err(FlowError::Execution("b".to_string())));

    match tx.rollback() {
        Err(TransactionError::Rollback(errors)) => {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            assert_eq!(messages, vec!["Execution error: b", "Execution error: a"]);
        }
        Ok(()) => panic!("rollback should fail"),
    }
    assert_eq!(*log.lock(), vec!["ok"]);
}

#[test]
fn test_load_or_store_computes_once() {
    let local: Local<usize> = Local::new();
    let tx = Transaction::new();
    let calls = AtomicUsize::new(0);

    let first = local.load_or_store(&tx, || calls.fetch_add(1, Ordering::SeqCst) + 10);
    let second = local.load_or_store(&tx, || calls.fetch_add(1, Ordering::SeqCst) + 10);

    assert_eq!(first, 10);
    assert_eq!(second, 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_load_or_store_builds_one_value() {
    let local: Local<usize> = Local::new();
    let tx = Transaction::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let local = local.clone();
            let tx = tx.clone();
            let calls = calls.clone();
            std::thread::spawn(move || {
                local.load_or_store(&tx, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    100 + i
                })
            })
        })
        .collect();
    let values: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| *v == values[0]));
    assert_eq!(local.load(&tx), Some(values[0]));
}

#[test]
fn test_load_or_try_store_keeps_nothing_on_error() {
    let local: Local<usize> = Local::new();
    let tx = Transaction::new();

    let result: Result<usize, &str> = local.load_or_try_store(&tx, || Err("nope"));
    assert_eq!(result, Err("nope"));
    assert_eq!(local.load(&tx), None);

    let result: Result<usize, &str> = local.load_or_try_store(&tx, || Ok(5));
    assert_eq!(result, Ok(5));
    assert_eq!(local.load(&tx), Some(5));
}
