use portcore::process::Local;
use portcore::{FlowError, Process, Status};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(1);

#[tokio::test]
async fn test_exit_is_idempotent() {
    let proc = Process::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    proc.add_exit_hook(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(proc.status(), Status::Running);
    assert!(proc.err().is_none());

    assert!(proc.exit(Some(FlowError::Execution("first".to_string()))));
    assert!(!proc.exit(Some(FlowError::Execution("second".to_string()))));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(proc.status(), Status::Terminated);
    assert!(proc.ended_at().is_some());
    match proc.err().as_deref() {
        Some(FlowError::Execution(msg)) => assert_eq!(msg, "first"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_clean_exit_reports_cancelled() {
    let proc = Process::new();
    proc.exit(None);
    assert!(matches!(proc.err().as_deref(), Some(FlowError::Cancelled)));
}

#[tokio::test]
async fn test_exit_hooks_run_in_registration_order() {
    let proc = Process::new();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for i in 0..3 {
        let order = order.clone();
        proc.add_exit_hook(move |_| order.lock().push(i));
    }
    proc.exit(None);
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_exit_hook_added_after_exit_runs_immediately() {
    let proc = Process::new();
    proc.exit(None);

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    proc.add_exit_hook(move |_| flag.store(true, Ordering::SeqCst));
    assert!(ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_fork_follows_parent_cancellation() {
    let parent = Process::new();
    let child = parent.fork().unwrap();
    assert_eq!(child.parent().map(|p| p.id()), Some(parent.id()));

    parent.exit(None);
    timeout(WAIT, child.cancelled()).await.unwrap();
    assert_eq!(child.status(), Status::Running, "child exit is independent");
    assert!(matches!(parent.fork(), Err(FlowError::ProcessTerminated)));
}

#[tokio::test]
async fn test_join_waits_for_children() {
    let parent = Process::new();
    let child = parent.fork().unwrap();
    let grandchild = child.fork().unwrap();

    let exiting = grandchild.clone();
    let exiting_child = child.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        exiting.exit(None);
        exiting_child.exit(None);
    });

    timeout(WAIT, parent.join()).await.unwrap();
    assert!(child.is_terminated());
    assert!(grandchild.is_terminated());
    assert_eq!(parent.status(), Status::Running);
}

#[tokio::test]
async fn test_join_ignores_children_forked_after_it_started() {
    let parent = Process::new();
    let early = parent.fork().unwrap();

    let join = parent.join();
    let late = parent.fork().unwrap();
    early.exit(None);

    timeout(WAIT, join)
        .await
        .expect("join should not wait for the late child");
    assert_eq!(late.status(), Status::Running);

    late.exit(None);
    timeout(WAIT, parent.join()).await.unwrap();
}

#[tokio::test]
async fn test_done_waits_for_spawned_tasks() {
    let proc = Process::new();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let task_proc = proc.clone();
    proc.spawn(async move {
        task_proc.cancelled().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.store(true, Ordering::SeqCst);
    });

    proc.exit(None);
    timeout(WAIT, proc.done()).await.unwrap();
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_process_data() {
    let proc = Process::new();
    proc.data().store("count", 3usize);

    assert_eq!(proc.data().load::<usize>("count").as_deref(), Some(&3));
    assert!(proc.data().load::<String>("count").is_none());
    assert!(proc.data().contains("count"));
    assert!(proc.data().delete("count"));
    assert!(!proc.data().contains("count"));
}

#[tokio::test]
async fn test_process_local_is_dropped_on_exit() {
    let local: Local<String> = Local::new();
    let p1 = Process::new();
    let p2 = Process::new();

    local.store(&p1, "one".to_string());
    assert_eq!(local.load(&p1).as_deref(), Some("one"));
    assert_eq!(local.load(&p2), None);
    assert_eq!(local.load_or_store(&p2, || "two".to_string()), "two");
    assert_eq!(local.load_or_store(&p2, || "ignored".to_string()), "two");

    p1.exit(None);
    assert_eq!(local.load(&p1), None);

    local.store(&p1, "late".to_string());
    assert_eq!(local.load(&p1), None, "exited processes store nothing");
}

#[tokio::test]
async fn test_transaction_commits_on_clean_exit() {
    let proc = Process::new();
    let committed = Arc::new(AtomicBool::new(false));
    let flag = committed.clone();
    proc.transaction().add_commit_hook(move || {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    assert_eq!(proc.transaction().id(), proc.transaction().id());

    proc.exit(None);
    assert!(committed.load(Ordering::SeqCst));
    assert!(proc.transaction().is_finished());
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error_exit() {
    let proc = Process::new();
    let committed = Arc::new(AtomicBool::new(false));
    let rolled_back = Arc::new(AtomicBool::new(false));
    let commit_flag = committed.clone();
    let rollback_flag = rolled_back.clone();

    let tx = proc.transaction();
    tx.add_commit_hook(move || {
        commit_flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    tx.add_rollback_hook(move || {
        rollback_flag.store(true, Ordering::SeqCst);
        Ok(())
    });

    proc.exit(Some(FlowError::Execution("failed".to_string())));
    assert!(!committed.load(Ordering::SeqCst));
    assert!(rolled_back.load(Ordering::SeqCst));
}
