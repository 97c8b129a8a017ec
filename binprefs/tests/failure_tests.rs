//! Failure paths: disk errors, lock timeouts and how they reach callers and
//! failure handlers.

use binprefs::{ErrorKind, Preferences, PrefsError, StoreConfig, StoreName, StoreRegistry};
use binprefs_test_utils::fixtures::{new_process, test_config, TempStore};
use binprefs_test_utils::{assertions, FaultInjectingAdapter};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Failures = Arc<Mutex<Vec<(String, ErrorKind)>>>;

fn open_faulty(
    store: &TempStore,
    config: StoreConfig,
) -> (Preferences, Arc<FaultInjectingAdapter>, Failures) {
    open_faulty_in(store, config, new_process())
}

fn open_faulty_in(
    store: &TempStore,
    config: StoreConfig,
    registry: Arc<StoreRegistry>,
) -> (Preferences, Arc<FaultInjectingAdapter>, Failures) {
    let dir = store.dir_for("settings");
    let adapter = Arc::new(FaultInjectingAdapter::on_directory(&dir).unwrap());
    let failures: Failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    let prefs = Preferences::builder()
        .name("settings")
        .directory(&dir)
        .file_adapter(adapter.clone())
        .config(config)
        .registry(registry)
        .failure_handler(Arc::new(
            move |_: &StoreName, task: &str, err: &PrefsError| {
                sink.lock().push((task.to_string(), err.kind()));
            },
        ))
        .open()
        .unwrap();
    (prefs, adapter, failures)
}

#[test]
fn test_rename_failure_fails_commit_and_reaches_handler() {
    let store = TempStore::new();
    let (prefs, adapter, failures) = open_faulty(&store, test_config());
    assert!(prefs.edit().put_i32("b", 1).commit());

    adapter.fail_promote_for("b");
    let committed = prefs
        .edit()
        .put_i32("a", 10)
        .put_i32("b", 20)
        .put_i32("c", 30)
        .commit();

    assert!(!committed);
    assert_eq!(*failures.lock(), vec![("commit".to_string(), ErrorKind::IoFailure)]);
    // Keys before the failure landed, the failed key kept its old value and
    // nothing after it was written.
    assert_eq!(prefs.get_i32("a", 0).unwrap(), 10);
    assert_eq!(prefs.get_i32("b", 0).unwrap(), 1);
    assert!(!prefs.contains("c").unwrap());
    assert!(store.temp_files("settings").is_empty());
}

#[test]
fn test_partial_commit_makes_sibling_reread_disk() {
    let store = TempStore::new();
    let registry = new_process();
    let (prefs, adapter, _failures) = open_faulty_in(&store, test_config(), Arc::clone(&registry));
    let sibling = Preferences::builder()
        .name("settings")
        .directory(store.dir_for("settings"))
        .config(test_config())
        .registry(registry)
        .open()
        .unwrap();
    assert!(prefs.edit().put_i32("a", 1).commit());
    assert_eq!(sibling.get_i32("a", 0).unwrap(), 1);

    adapter.fail_promote_for("b");
    assert!(!prefs.edit().put_i32("a", 10).put_i32("b", 20).commit());

    assert_eq!(sibling.get_i32("a", 0).unwrap(), 10);
    assert!(!sibling.contains("b").unwrap());
}

#[test]
fn test_staging_failure_commits_nothing() {
    let store = TempStore::new();
    let (prefs, adapter, _failures) = open_faulty(&store, test_config());

    adapter.fail_stage_for("c");
    let err = prefs
        .edit()
        .put_i32("a", 1)
        .put_i32("c", 3)
        .try_commit()
        .unwrap_err();

    assertions::assert_io_failure(&err);
    assert_eq!(adapter.promotes(), 0);
    assert!(!prefs.contains("a").unwrap());
    assert!(store.key_files("settings").is_empty());
}

#[test]
fn test_store_recovers_after_fault_clears() {
    let store = TempStore::new();
    let (prefs, adapter, failures) = open_faulty(&store, test_config());

    adapter.fail_promote_for("retries");
    assert!(!prefs.edit().put_i32("retries", 3).commit());
    adapter.heal();
    assert!(prefs.edit().put_i32("retries", 3).commit());

    assert_eq!(prefs.get_i32("retries", 0).unwrap(), 3);
    assert_eq!(failures.lock().len(), 1);
}

#[test]
fn test_apply_failure_goes_to_handler_and_handle() {
    let store = TempStore::new();
    let (prefs, adapter, failures) = open_faulty(&store, test_config());

    adapter.fail_promote_for("retries");
    let handle = prefs.edit().put_i32("retries", 3).apply();

    let err = handle.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
    assert_eq!(*failures.lock(), vec![("apply".to_string(), ErrorKind::IoFailure)]);
}

#[test]
fn test_read_failure_is_reported_not_absent() {
    let store = TempStore::new();
    let (prefs, adapter, _failures) = open_faulty(&store, test_config().with_warm_up(false));
    assert!(prefs.edit().put_i32("retries", 3).commit());
    prefs.reload().unwrap();

    adapter.fail_reads(true);
    let err = prefs.get_value("retries").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);

    adapter.fail_reads(false);
    assert_eq!(prefs.get_i32("retries", 0).unwrap(), 3);
}

#[test]
fn test_commit_times_out_while_another_process_holds_the_lock() {
    use binprefs_test_utils::{StoreId, LOCK_FILE_NAME};

    let store = TempStore::new();
    let config = test_config().with_lock_timeout(Duration::from_millis(100));
    let (prefs, _adapter, failures) = open_faulty(&store, config.clone());

    let other = new_process();
    let dir = store.dir_for("settings");
    let id = StoreId::new(StoreName::new("settings").unwrap(), &dir);
    let lock = other.lock(&id, dir.join(LOCK_FILE_NAME), &config);
    let guard = lock.lock().unwrap();

    let err = prefs.edit().put_i32("retries", 3).try_commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockTimeout);
    assert_eq!(failures.lock()[0].1, ErrorKind::LockTimeout);

    drop(guard);
    assert!(prefs.edit().put_i32("retries", 3).commit());
}
