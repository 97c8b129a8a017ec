//! End-to-end tests for a single store instance: reads, writes, restarts,
//! clear semantics, listeners and custom types.

use binprefs::{Preferences, PrefValue, StoreRegistry};
use binprefs_test_utils::fixtures::{new_process, test_config, TempStore};
use binprefs_test_utils::{assertions, XorEncryption};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

fn open(store: &TempStore, name: &str, registry: Arc<StoreRegistry>) -> Preferences {
    Preferences::builder()
        .name(name)
        .directory(store.dir_for(name))
        .config(test_config())
        .registry(registry)
        .open()
        .unwrap()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WindowState {
    width: u32,
    height: u32,
    maximized: bool,
}

impl binprefs::Persistable for WindowState {
    const TOKEN: &'static str = "window-state";
}

// ============================================================================
// READS AND WRITES
// ============================================================================

#[test]
fn test_commit_then_read_every_builtin_type() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());

    let committed = prefs
        .edit()
        .put_bool("onboarded", true)
        .put_i32("retries", 3)
        .put_i64("installed_at", 1_700_000_000_000)
        .put_f32("scale", 1.25)
        .put_f64("ratio", 0.618)
        .put_string("theme", "dark")
        .put_string_set("tags", ["a", "b"])
        .put_bytes("blob", vec![0u8, 1, 2, 255])
        .put("initial", 'q')
        .commit();
    assert!(committed);

    assert!(prefs.get_bool("onboarded", false).unwrap());
    assert_eq!(prefs.get_i32("retries", 0).unwrap(), 3);
    assert_eq!(prefs.get_i64("installed_at", 0).unwrap(), 1_700_000_000_000);
    assert_eq!(prefs.get_f32("scale", 0.0).unwrap(), 1.25);
    assert_eq!(prefs.get_f64("ratio", 0.0).unwrap(), 0.618);
    assert_eq!(prefs.get_string("theme", "light").unwrap(), "dark");
    assert_eq!(
        prefs.get_string_set("tags").unwrap(),
        BTreeSet::from(["a".to_string(), "b".to_string()])
    );
    assert_eq!(prefs.get_bytes("blob").unwrap(), Some(vec![0u8, 1, 2, 255]));
    assert_eq!(prefs.get_value("initial").unwrap(), Some(PrefValue::Char('q')));
}

#[test]
fn test_missing_key_yields_default() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());

    assert_eq!(prefs.get_i32("retries", 7).unwrap(), 7);
    assert_eq!(prefs.get_value("retries").unwrap(), None);
    assert!(!prefs.contains("retries").unwrap());
    assert!(prefs.get_string_set("tags").unwrap().is_empty());
}

#[test]
fn test_values_survive_restart() {
    let store = TempStore::new();
    {
        let prefs = open(&store, "settings", new_process());
        assert!(prefs.edit().put_i32("retries", 3).commit());
    }

    let reopened = open(&store, "settings", new_process());
    assert_eq!(reopened.get_i32("retries", 0).unwrap(), 3);
    assert_eq!(reopened.keys().unwrap(), vec!["retries".to_string()]);
}

#[test]
fn test_reads_without_warm_up_go_to_disk() {
    let store = TempStore::new();
    {
        let prefs = open(&store, "settings", new_process());
        assert!(prefs.edit().put_string("theme", "dark").commit());
    }

    let prefs = Preferences::builder()
        .name("settings")
        .directory(store.dir_for("settings"))
        .config(test_config().with_warm_up(false))
        .registry(new_process())
        .open()
        .unwrap();
    assert_eq!(prefs.get_string("theme", "").unwrap(), "dark");
    assert_eq!(prefs.cache_stats().misses, 1);
    assert_eq!(prefs.get_string("theme", "").unwrap(), "dark");
    assert_eq!(prefs.cache_stats().hits, 1);
}

#[test]
fn test_put_then_remove_in_one_editor_leaves_nothing() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());

    assert!(prefs.edit().put_i32("k", 1).remove("k").commit());

    assert!(!prefs.contains("k").unwrap());
    assert!(store.key_files("settings").is_empty());
}

#[test]
fn test_later_commit_wins() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());

    assert!(prefs.edit().put_string("mode", "m1").commit());
    assert!(prefs.edit().put_string("mode", "m2").commit());

    assert_eq!(prefs.get_string("mode", "").unwrap(), "m2");
    let reopened = open(&store, "settings", new_process());
    assert_eq!(reopened.get_string("mode", "").unwrap(), "m2");
}

#[test]
fn test_repeated_commit_is_idempotent() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());

    assert!(prefs.edit().put_i32("retries", 3).commit());
    let files = store.key_files("settings");
    assert!(prefs.edit().put_i32("retries", 3).commit());

    assert_eq!(store.key_files("settings"), files);
    assert_eq!(prefs.get_i32("retries", 0).unwrap(), 3);
}

#[test]
fn test_empty_commit_succeeds() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());
    let mut editor = prefs.edit();
    assert!(editor.is_empty());
    assert!(editor.commit());
}

#[test]
fn test_no_temp_files_after_commits() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());
    for i in 0..10 {
        assert!(prefs.edit().put_i32("counter", i).put_i32("other", -i).commit());
    }
    assert!(store.temp_files("settings").is_empty());
    assert_eq!(store.key_files("settings").len(), 2);
}

#[test]
fn test_keys_with_path_characters_are_safe() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());

    assert!(prefs
        .edit()
        .put_i32("../escape", 1)
        .put_i32("a/b:c", 2)
        .commit());

    assert_eq!(prefs.get_i32("../escape", 0).unwrap(), 1);
    assert_eq!(prefs.get_i32("a/b:c", 0).unwrap(), 2);
    assert_eq!(store.key_files("settings").len(), 2);
    assert!(!store.path().join("escape").exists());
}

// ============================================================================
// ASYNC APPLY
// ============================================================================

#[test]
fn test_apply_returns_before_completion_and_lands() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());

    let handle = prefs.edit().put_i32("retries", 5).apply();
    handle.wait().unwrap();

    assert_eq!(prefs.get_i32("retries", 0).unwrap(), 5);
}

#[test]
fn test_apply_batches_run_in_submission_order() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());

    for i in 0..50 {
        prefs.edit().put_i32("counter", i).apply();
    }
    prefs.flush().unwrap();

    assert_eq!(prefs.get_i32("counter", -1).unwrap(), 49);
}

// ============================================================================
// CLEAR
// ============================================================================

#[test]
fn test_clear_removes_existing_keys_but_keeps_batch_puts() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());
    assert!(prefs.edit().put_i32("a", 1).put_i32("b", 2).commit());

    assert!(prefs.edit().put_i32("c", 3).clear().commit());

    assert!(!prefs.contains("a").unwrap());
    assert!(!prefs.contains("b").unwrap());
    assert_eq!(prefs.get_i32("c", 0).unwrap(), 3);
    assert_eq!(prefs.keys().unwrap(), vec!["c".to_string()]);
}

#[test]
fn test_clear_overrides_nothing_written_in_same_batch() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());
    assert!(prefs.edit().put_i32("a", 1).commit());

    assert!(prefs.edit().clear().put_i32("a", 9).commit());

    assert_eq!(prefs.get_i32("a", 0).unwrap(), 9);
}

// ============================================================================
// DECODE FAILURES AND TYPES
// ============================================================================

#[test]
fn test_corrupted_file_is_a_decode_failure_not_absent() {
    let store = TempStore::new();
    {
        let prefs = open(&store, "settings", new_process());
        assert!(prefs.edit().put_i32("retries", 3).commit());
    }
    let file = store.dir_for("settings").join(&store.key_files("settings")[0]);
    std::fs::write(&file, [3u8, b'i', b'n', b't', 0xff]).unwrap();

    let prefs = open(&store, "settings", new_process());
    let err = prefs.get_value("retries").unwrap_err();
    assertions::assert_decode_failure(&err);
    assert!(prefs.contains("retries").unwrap());
    assert!(prefs.get_i32("retries", 0).is_err());
}

#[test]
fn test_reading_wrong_type_is_a_mismatch() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());
    assert!(prefs.edit().put_string("retries", "three").commit());

    let err = prefs.get_i32("retries", 0).unwrap_err();
    assert_eq!(err.kind(), binprefs::ErrorKind::InvalidInput);
    assert_eq!(prefs.get_string("retries", "").unwrap(), "three");
}

#[test]
fn test_encrypted_values_are_opaque_on_disk() {
    let store = TempStore::new();
    let dir = store.dir_for("secret");
    {
        let prefs = Preferences::builder()
            .name("secret")
            .directory(&dir)
            .config(test_config())
            .registry(new_process())
            .encryption(Arc::new(XorEncryption::new(b"right".to_vec())))
            .open()
            .unwrap();
        assert!(prefs.edit().put_string("token", "hunter2").commit());
    }

    let raw = std::fs::read(dir.join(&store.key_files("secret")[0])).unwrap();
    assert!(!raw.windows(7).any(|w| w == b"hunter2"));

    let prefs = Preferences::builder()
        .name("secret")
        .directory(&dir)
        .config(test_config())
        .registry(new_process())
        .encryption(Arc::new(XorEncryption::new(b"right".to_vec())))
        .open()
        .unwrap();
    assert_eq!(prefs.get_string("token", "").unwrap(), "hunter2");
}

#[test]
fn test_persistable_round_trip() {
    let store = TempStore::new();
    let builder = || {
        Preferences::builder()
            .name("ui")
            .directory(store.dir_for("ui"))
            .config(test_config())
            .registry(new_process())
            .register_persistable::<WindowState>()
    };
    let state = WindowState {
        width: 1280,
        height: 720,
        maximized: false,
    };
    {
        let prefs = builder().open().unwrap();
        assert!(prefs.edit().put_persistable("window", state.clone()).commit());
        assert_eq!(prefs.get_persistable::<WindowState>("window").unwrap(), Some(state.clone()));
    }

    let prefs = builder().open().unwrap();
    assert_eq!(prefs.get_persistable::<WindowState>("window").unwrap(), Some(state));
}

#[test]
fn test_unregistered_persistable_fails_commit() {
    let store = TempStore::new();
    let prefs = open(&store, "ui", new_process());
    let state = WindowState {
        width: 1,
        height: 1,
        maximized: true,
    };

    let err = prefs
        .edit()
        .put_persistable("window", state)
        .try_commit()
        .unwrap_err();
    assert!(matches!(
        err,
        binprefs::PrefsError::Codec(binprefs::CodecError::UnknownToken { .. })
    ));
    assert!(store.key_files("ui").is_empty());
}

#[test]
fn test_invalid_key_fails_whole_batch() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());

    let long = "k".repeat(500);
    let err = prefs
        .edit()
        .put_i32("fine", 1)
        .put_i32(&long, 2)
        .try_commit()
        .unwrap_err();

    assert_eq!(err.kind(), binprefs::ErrorKind::InvalidInput);
    assert!(!prefs.contains("fine").unwrap());
}

#[test]
fn test_open_without_directory_is_rejected() {
    let err = Preferences::builder()
        .name("settings")
        .config(test_config())
        .open()
        .unwrap_err();
    assert_eq!(err.kind(), binprefs::ErrorKind::InvalidInput);
}

// ============================================================================
// LISTENERS
// ============================================================================

#[test]
fn test_listener_sees_local_changes_until_unregistered() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = prefs.register_listener(Arc::new(
        move |_: &binprefs::StoreName, key: &binprefs::PrefKey| {
            sink.lock().push(key.as_str().to_string());
        },
    ));

    assert!(prefs.edit().put_i32("a", 1).remove("b").commit());
    assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);

    assert!(prefs.unregister_listener(id));
    assert!(prefs.edit().put_i32("a", 2).commit());
    assert_eq!(seen.lock().len(), 2);
}

// ============================================================================
// CONCURRENCY WITHIN ONE PROCESS
// ============================================================================

#[test]
fn test_concurrent_readers_see_whole_values() {
    let store = TempStore::new();
    let prefs = Arc::new(open(&store, "settings", new_process()));
    let small = "s".repeat(16);
    let large = "L".repeat(64 * 1024);
    assert!(prefs.edit().put_string("payload", small.clone()).commit());

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let prefs = Arc::clone(&prefs);
            let (small, large) = (small.clone(), large.clone());
            thread::spawn(move || {
                for _ in 0..200 {
                    let value = prefs.get_string("payload", "").unwrap();
                    assert!(value == small || value == large);
                }
            })
        })
        .collect();

    for i in 0..40 {
        let value = if i % 2 == 0 { &large } else { &small };
        assert!(prefs.edit().put_string("payload", value.clone()).commit());
    }
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn test_instances_in_one_process_share_the_worker() {
    let store = TempStore::new();
    let registry = new_process();
    let first = open(&store, "settings", Arc::clone(&registry));
    let second = open(&store, "settings", Arc::clone(&registry));

    assert_eq!(registry.executors().live_executors(), 1);
    assert!(first.edit().put_i32("a", 1).commit());
    assert!(second.edit().put_i32("b", 2).commit());

    assert_eq!(second.get_i32("a", 0).unwrap(), 1);
    assert_eq!(first.get_i32("b", 0).unwrap(), 2);
    let reopened = open(&store, "settings", new_process());
    assert_eq!(reopened.get_i32("a", 0).unwrap(), 1);
    assert_eq!(reopened.get_i32("b", 0).unwrap(), 2);
}

#[test]
fn test_sibling_instance_sees_commit_when_it_returns() {
    let store = TempStore::new();
    let registry = new_process();
    let first = open(&store, "settings", Arc::clone(&registry));
    let second = open(&store, "settings", Arc::clone(&registry));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    second.register_listener(Arc::new(
        move |_: &binprefs::StoreName, key: &binprefs::PrefKey| {
            sink.lock().push(key.as_str().to_string());
        },
    ));

    assert!(first.edit().put_i32("retries", 3).commit());
    assert_eq!(second.get_i32("retries", 0).unwrap(), 3);
    assert_eq!(*seen.lock(), vec!["retries".to_string()]);

    assert!(first.edit().remove("retries").commit());
    assert!(!second.contains("retries").unwrap());
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn test_sibling_sharing_a_transport_is_notified_once() {
    let store = TempStore::new();
    let registry = new_process();
    let transport: Arc<dyn binprefs::EventTransport> =
        Arc::new(binprefs::BroadcastTransport::default());
    let linked = |registry: Arc<StoreRegistry>| {
        Preferences::builder()
            .name("settings")
            .directory(store.dir_for("settings"))
            .config(test_config())
            .registry(registry)
            .transport(Arc::clone(&transport))
            .open()
            .unwrap()
    };
    let first = linked(Arc::clone(&registry));
    let second = linked(Arc::clone(&registry));
    let seen = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&seen);
    second.register_listener(Arc::new(
        move |_: &binprefs::StoreName, _: &binprefs::PrefKey| {
            *sink.lock() += 1;
        },
    ));

    assert!(first.edit().put_i32("retries", 3).commit());
    first.flush().unwrap();
    thread::sleep(std::time::Duration::from_millis(50));

    assert_eq!(*seen.lock(), 1);
}

#[test]
fn test_commit_from_listener_reports_success() {
    let store = TempStore::new();
    let prefs = Arc::new(open(&store, "settings", new_process()));
    let outcome = Arc::new(Mutex::new(None));
    let weak = Arc::downgrade(&prefs);
    let sink = Arc::clone(&outcome);
    prefs.register_listener(Arc::new(
        move |_: &binprefs::StoreName, key: &binprefs::PrefKey| {
            if key.as_str() != "trigger" {
                return;
            }
            if let Some(prefs) = weak.upgrade() {
                *sink.lock() = Some(prefs.edit().put_i32("echo", 1).commit());
            }
        },
    ));

    assert!(prefs.edit().put_bool("trigger", true).commit());

    assert_eq!(*outcome.lock(), Some(true));
    assert_eq!(prefs.get_i32("echo", 0).unwrap(), 1);
    let reopened = open(&store, "settings", new_process());
    assert_eq!(reopened.get_i32("echo", 0).unwrap(), 1);
}

#[test]
fn test_stray_uppercase_key_file_is_ignored() {
    let store = TempStore::new();
    let prefs = open(&store, "settings", new_process());
    assert!(prefs.edit().put_i32("J", 1).commit());
    std::fs::write(store.dir_for("settings").join("4A.pref"), b"junk").unwrap();

    assert_eq!(prefs.keys().unwrap(), vec!["J".to_string()]);
    let reopened = open(&store, "settings", new_process());
    assert_eq!(reopened.all().unwrap().len(), 1);
    assert_eq!(reopened.get_i32("J", 0).unwrap(), 1);
}
