use kovan_txnkv::mockstore::WriteKind;
use kovan_txnkv::{
    Key, KillSignal, KvConfig, KvError, LockCtx, LockWait, MockStore, Transaction, TxnKv,
    TxnOption,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Start timestamp used for locks planted directly in the store.
const FOREIGN_TS: u64 = 1_000_000;

fn setup() -> (Arc<MockStore>, TxnKv) {
    let store = Arc::new(MockStore::new());
    let config = KvConfig {
        lock_wait_poll_ms: 5,
        ..KvConfig::default()
    };
    let kv = TxnKv::new(store.clone(), config);
    (store, kv)
}

fn pessimistic(kv: &TxnKv) -> Transaction {
    let mut txn = kv.begin();
    txn.set_option(TxnOption::Pessimistic(true)).unwrap();
    txn
}

fn ctx(txn: &Transaction, wait: LockWait) -> LockCtx {
    LockCtx::new(txn.start_ts(), wait)
}

#[test]
fn test_no_wait_contention_does_not_block() {
    let (store, kv) = setup();
    store.lock_as("k", FOREIGN_TS);

    let mut txn = pessimistic(&kv);
    let mut lctx = ctx(&txn, LockWait::from_millis(-1));
    let started = Instant::now();
    let err = txn.lock_keys(&mut lctx, &[Key::from("k")]).unwrap_err();

    assert!(
        matches!(err, KvError::LockContention { holder_start_ts: FOREIGN_TS, .. }),
        "got {:?}",
        err
    );
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(lctx.stats.attempts, 1, "no-wait sends exactly one request");
    assert!(lctx.stats.waited);
}

#[test]
fn test_bounded_wait_times_out() {
    let (store, kv) = setup();
    store.lock_as("k", FOREIGN_TS);

    let mut txn = pessimistic(&kv);
    let mut lctx = ctx(&txn, LockWait::from_millis(60));
    let started = Instant::now();
    let err = txn.lock_keys(&mut lctx, &[Key::from("k")]).unwrap_err();

    assert!(matches!(err, KvError::LockWaitTimeout { .. }), "got {:?}", err);
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(lctx.stats.attempts > 1);
    assert!(lctx.stats.total_wait >= Duration::from_millis(50));
}

#[test]
fn test_kill_signal_cancels_wait() {
    let (store, kv) = setup();
    store.lock_as("k", FOREIGN_TS);

    let killed = KillSignal::new();
    let killer = killed.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        killer.kill();
    });

    let mut txn = pessimistic(&kv);
    let mut lctx = ctx(&txn, LockWait::AlwaysWait).with_kill_signal(killed);
    let started = Instant::now();
    let err = txn.lock_keys(&mut lctx, &[Key::from("k")]).unwrap_err();
    handle.join().unwrap();

    assert!(
        matches!(err, KvError::LockWaitCancelled { .. }),
        "expected cancellation, not timeout: {:?}",
        err
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_session_kill_cancels_wait() {
    let (store, kv) = setup();
    store.lock_as("k", FOREIGN_TS);

    let mut txn = pessimistic(&kv);
    let vars = Arc::new(kovan_txnkv::Variables::default());
    txn.set_vars(vars.clone());
    vars.killed.kill();

    let mut lctx = ctx(&txn, LockWait::AlwaysWait);
    let err = txn.lock_keys(&mut lctx, &[Key::from("k")]).unwrap_err();
    assert!(matches!(err, KvError::LockWaitCancelled { .. }));
}

#[test]
fn test_relock_is_idempotent() {
    let (store, kv) = setup();
    let mut txn = pessimistic(&kv);

    let mut first = ctx(&txn, LockWait::NoWait);
    txn.lock_keys(&mut first, &[Key::from("k")]).unwrap();
    assert!(!first.already_locked(&Key::from("k")));
    assert_eq!(store.lock_info(&Key::from("k")).unwrap().start_ts, txn.start_ts());

    let mut again = ctx(&txn, LockWait::NoWait);
    txn.lock_keys(&mut again, &[Key::from("k")]).unwrap();
    assert!(again.already_locked(&Key::from("k")));
    assert_eq!(again.stats.attempts, 0, "no remote round trip for a held lock");
    assert_eq!(again.stats.lock_keys_count, 0);
    assert!(!again.stats.waited);
}

#[test]
fn test_relock_with_return_values_reports_current_value() {
    let (_store, kv) = setup();
    let mut writer = kv.begin();
    writer.set("k", "v").unwrap();
    writer.commit().unwrap();

    let mut txn = pessimistic(&kv);
    let keys = [Key::from("k"), Key::from("absent"), Key::from("written")];
    let mut first = ctx(&txn, LockWait::NoWait);
    txn.lock_keys(&mut first, &keys).unwrap();
    txn.set("written", "mine").unwrap();

    let mut again = ctx(&txn, LockWait::NoWait).with_return_values();
    txn.lock_keys(&mut again, &keys).unwrap();
    assert_eq!(again.stats.attempts, 0);

    let k = &again.values[&Key::from("k")];
    assert!(k.already_locked);
    assert_eq!(k.value.as_deref(), Some(&b"v"[..]));
    assert_eq!(again.values[&Key::from("absent")].value, None);
    assert_eq!(
        again.values[&Key::from("written")].value.as_deref(),
        Some(&b"mine"[..])
    );
}

#[test]
fn test_duplicate_keys_locked_once() {
    let (_store, kv) = setup();
    let mut txn = pessimistic(&kv);
    let mut lctx = ctx(&txn, LockWait::NoWait);
    let k = Key::from("k");
    txn.lock_keys(&mut lctx, &[k.clone(), k.clone(), k.clone()])
        .unwrap();
    assert_eq!(lctx.stats.lock_keys_count, 1);
    assert_eq!(lctx.values.len(), 1);
}

#[test]
fn test_return_values() {
    let (_store, kv) = setup();
    let mut writer = kv.begin();
    writer.set("present", "v").unwrap();
    writer.commit().unwrap();

    let mut txn = pessimistic(&kv);
    let mut lctx = ctx(&txn, LockWait::NoWait).with_return_values();
    txn.lock_keys(&mut lctx, &[Key::from("present"), Key::from("absent")])
        .unwrap();

    assert_eq!(lctx.values[&Key::from("present")].value.as_deref(), Some(&b"v"[..]));
    assert_eq!(lctx.values[&Key::from("absent")].value, None);

    let present = txn.mem_buffer().get_flags(&Key::from("present")).unwrap();
    assert!(present.has_locked());
    assert!(present.has_locked_value_exists());
    let absent = txn.mem_buffer().get_flags(&Key::from("absent")).unwrap();
    assert!(absent.has_locked());
    assert!(!absent.has_locked_value_exists());
}

#[test]
fn test_partial_failure_keeps_acquired_locks() {
    let (store, kv) = setup();
    store.lock_as("b", FOREIGN_TS);

    let mut txn = pessimistic(&kv);
    let mut lctx = ctx(&txn, LockWait::NoWait);
    let err = txn
        .lock_keys(&mut lctx, &[Key::from("a"), Key::from("b"), Key::from("c")])
        .unwrap_err();
    assert!(matches!(err, KvError::LockContention { ref key, .. } if key == &Key::from("b")));

    assert_eq!(store.lock_info(&Key::from("a")).unwrap().start_ts, txn.start_ts());
    assert!(txn.mem_buffer().get_flags(&Key::from("a")).unwrap().has_locked());
    assert!(store.lock_info(&Key::from("c")).is_none());
    assert_eq!(lctx.stats.lock_keys_count, 3);

    // Rollback releases what was taken
    txn.rollback().unwrap();
    assert!(store.lock_info(&Key::from("a")).is_none());
    assert_eq!(store.lock_info(&Key::from("b")).unwrap().start_ts, FOREIGN_TS);
}

#[test]
fn test_write_conflict_on_newer_commit() {
    let (_store, kv) = setup();
    let mut txn = pessimistic(&kv);

    let mut writer = kv.begin();
    writer.set("k", "newer").unwrap();
    writer.commit().unwrap();

    let mut stale = ctx(&txn, LockWait::NoWait);
    let err = txn.lock_keys(&mut stale, &[Key::from("k")]).unwrap_err();
    assert!(matches!(err, KvError::WriteConflict { .. }), "got {:?}", err);
    assert!(err.is_retryable());

    // Retry with a fresh for_update_ts
    let mut fresh = LockCtx::new(kv.current_version(), LockWait::NoWait);
    txn.lock_keys(&mut fresh, &[Key::from("k")]).unwrap();
    assert!(txn.mem_buffer().get_flags(&Key::from("k")).unwrap().has_locked());
}

#[test]
fn test_waiter_wakes_on_release() {
    let (store, kv) = setup();
    store.lock_as("k", FOREIGN_TS);

    let releaser = store.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        releaser.release(&Key::from("k"));
    });

    let mut txn = pessimistic(&kv);
    let mut lctx = ctx(&txn, LockWait::Timeout(Duration::from_secs(5)));
    txn.lock_keys(&mut lctx, &[Key::from("k")]).unwrap();
    handle.join().unwrap();

    assert!(lctx.stats.waited);
    assert!(lctx.stats.total_wait >= Duration::from_millis(20));
    assert_eq!(store.lock_info(&Key::from("k")).unwrap().start_ts, txn.start_ts());
}

#[test]
fn test_waiter_wakes_on_holder_commit() {
    let (store, kv) = setup();
    let barrier = Arc::new(Barrier::new(2));

    let mut holder = pessimistic(&kv);
    let mut hctx = ctx(&holder, LockWait::NoWait);
    holder.lock_keys(&mut hctx, &[Key::from("k")]).unwrap();
    holder.set("k", "from-holder").unwrap();

    let b = barrier.clone();
    let handle = thread::spawn(move || {
        b.wait();
        thread::sleep(Duration::from_millis(30));
        holder.commit().unwrap()
    });

    let mut waiter = pessimistic(&kv);
    barrier.wait();
    let mut wctx = LockCtx::new(u64::MAX, LockWait::Timeout(Duration::from_secs(5)));
    waiter.lock_keys(&mut wctx, &[Key::from("k")]).unwrap();
    let commit_ts = handle.join().unwrap();

    assert!(wctx.stats.waited);
    assert_eq!(store.latest_commit(&Key::from("k")).unwrap().0, commit_ts);
    assert_eq!(store.lock_info(&Key::from("k")).unwrap().start_ts, waiter.start_ts());
}

#[test]
fn test_deadlock_detected_for_one_side() {
    let (_store, kv) = setup();
    let barrier = Arc::new(Barrier::new(2));

    let spawn = |own: &'static str, other: &'static str| {
        let mut txn = pessimistic(&kv);
        let mut first = ctx(&txn, LockWait::NoWait);
        txn.lock_keys(&mut first, &[Key::from(own)]).unwrap();
        let b = barrier.clone();
        thread::spawn(move || {
            b.wait();
            let mut lctx = LockCtx::new(u64::MAX, LockWait::Timeout(Duration::from_secs(10)));
            let res = txn.lock_keys(&mut lctx, &[Key::from(other)]);
            // Losing side rolls back so the other can proceed
            if res.is_err() {
                txn.rollback().unwrap();
            } else {
                txn.commit().unwrap();
            }
            res
        })
    };

    let h1 = spawn("a", "b");
    let h2 = spawn("b", "a");
    let results = [h1.join().unwrap(), h2.join().unwrap()];

    let deadlocks = results
        .iter()
        .filter(|r| matches!(r, Err(KvError::Deadlock { .. })))
        .count();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(deadlocks, 1, "exactly one side is chosen as victim: {:?}", results);
    assert_eq!(successes, 1);
}

#[test]
fn test_optimistic_lock_keys_stays_local() {
    let (store, kv) = setup();
    let mut txn = kv.begin();
    let mut lctx = ctx(&txn, LockWait::NoWait);
    txn.lock_keys(&mut lctx, &[Key::from("k")]).unwrap();

    assert!(store.lock_info(&Key::from("k")).is_none());
    assert!(txn.mem_buffer().get_flags(&Key::from("k")).unwrap().has_lock_only());
    assert_eq!(lctx.stats.attempts, 0);

    txn.commit().unwrap();
    let (_, info) = store.latest_commit(&Key::from("k")).unwrap();
    assert_eq!(info.kind, WriteKind::Lock);
}

#[test]
fn test_optimistic_lock_only_conflicts_at_commit() {
    let (_store, kv) = setup();
    let mut txn = kv.begin();
    let mut lctx = ctx(&txn, LockWait::NoWait);
    txn.lock_keys(&mut lctx, &[Key::from("k")]).unwrap();

    let mut other = kv.begin();
    other.set("k", "v").unwrap();
    other.commit().unwrap();

    let err = txn.commit().unwrap_err();
    assert!(matches!(err, KvError::WriteConflict { .. }), "got {:?}", err);
}

#[test]
fn test_pessimistic_commit_releases_locks() {
    let (store, kv) = setup();
    let mut txn = pessimistic(&kv);
    let mut lctx = ctx(&txn, LockWait::NoWait);
    txn.lock_keys(&mut lctx, &[Key::from("written"), Key::from("only-locked")])
        .unwrap();
    txn.set("written", "v").unwrap();
    txn.commit().unwrap();

    assert!(store.lock_info(&Key::from("written")).is_none());
    assert!(store.lock_info(&Key::from("only-locked")).is_none());
    assert_eq!(
        store.latest_commit(&Key::from("only-locked")).unwrap().1.kind,
        WriteKind::Lock
    );

    let reader = kv.begin();
    assert_eq!(reader.get(&Key::from("written")).unwrap(), "v");
}

#[test]
fn test_failed_pessimistic_commit_releases_locks() {
    let (store, kv) = setup();
    store.lock_as("b", FOREIGN_TS);

    let mut txn = pessimistic(&kv);
    let mut lctx = ctx(&txn, LockWait::NoWait);
    txn.lock_keys(&mut lctx, &[Key::from("a")]).unwrap();
    txn.set("a", "1").unwrap();
    txn.set("b", "2").unwrap();

    let err = txn.commit().unwrap_err();
    assert!(matches!(err, KvError::LockContention { .. }), "got {:?}", err);
    assert!(store.lock_info(&Key::from("a")).is_none());
    assert_eq!(store.lock_info(&Key::from("b")).unwrap().start_ts, FOREIGN_TS);
    assert!(matches!(txn.rollback(), Err(KvError::InvalidTxn { .. })));
}

#[test]
fn test_lock_on_finished_txn_is_invalid() {
    let (_store, kv) = setup();
    let mut txn = pessimistic(&kv);
    txn.rollback().unwrap();
    let mut lctx = ctx(&txn, LockWait::NoWait);
    let err = txn.lock_keys(&mut lctx, &[Key::from("k")]).unwrap_err();
    assert!(matches!(err, KvError::InvalidTxn { .. }));
}
