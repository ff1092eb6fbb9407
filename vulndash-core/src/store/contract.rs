//! Behavioural contract every [`KeyValueStore`] backend must satisfy.
//!
//! Keys are namespaced with a fresh UUID per run so the suite can target a
//! shared Redis instance without tripping over earlier runs.

use std::time::Duration;

use uuid::Uuid;

use super::KeyValueStore;
use crate::error::VulnError;

const SHORT_TTL: Duration = Duration::from_millis(1_200);
const LONG_TTL: Duration = Duration::from_secs(600);

pub async fn run_all<S: KeyValueStore + ?Sized>(store: &S) {
    let ns = format!("contract:{}:", Uuid::new_v4());

    create_rejects_live_key(store, &ns).await;
    set_overwrites_and_resets_ttl(store, &ns).await;
    get_missing_is_not_found(store, &ns).await;
    list_keys_filters_by_prefix(store, &ns).await;
    expired_keys_disappear(store, &ns).await;
    create_succeeds_after_expiry(store, &ns).await;
    delete_is_idempotent(store, &ns).await;
}

async fn create_rejects_live_key<S: KeyValueStore + ?Sized>(store: &S, ns: &str) {
    let key = format!("{ns}create");
    store
        .create(&key, b"first".to_vec(), LONG_TTL)
        .await
        .expect("first create succeeds");

    let err = store
        .create(&key, b"second".to_vec(), LONG_TTL)
        .await
        .expect_err("second create must fail");
    assert!(matches!(err, VulnError::AlreadyExists(_)), "got {err:?}");

    let stored = store.get(&key).await.expect("get after create");
    assert_eq!(stored.value, b"first".to_vec(), "create must not overwrite");
}

async fn set_overwrites_and_resets_ttl<S: KeyValueStore + ?Sized>(store: &S, ns: &str) {
    let key = format!("{ns}set");
    store
        .set(&key, b"one".to_vec(), SHORT_TTL)
        .await
        .expect("set one");
    store
        .set(&key, b"two".to_vec(), LONG_TTL)
        .await
        .expect("set two");

    let stored = store.get(&key).await.expect("get");
    assert_eq!(stored.value, b"two".to_vec());
    let ttl = stored.ttl.expect("ttl reported");
    assert!(ttl > SHORT_TTL, "ttl should be reset to the new window, got {ttl:?}");
    assert!(ttl <= LONG_TTL);
}

async fn get_missing_is_not_found<S: KeyValueStore + ?Sized>(store: &S, ns: &str) {
    let err = store
        .get(&format!("{ns}missing"))
        .await
        .expect_err("missing key");
    assert!(err.is_not_found(), "got {err:?}");
}

async fn list_keys_filters_by_prefix<S: KeyValueStore + ?Sized>(store: &S, ns: &str) {
    let jobs = format!("{ns}list:job:");
    let other = format!("{ns}list:report:");
    for i in 0..3 {
        store
            .set(&format!("{jobs}{i}"), b"j".to_vec(), LONG_TTL)
            .await
            .expect("set job");
    }
    store
        .set(&format!("{other}alpine"), b"r".to_vec(), LONG_TTL)
        .await
        .expect("set report");
    // Glob metacharacters in the prefix must be matched literally.
    store
        .set(&format!("{ns}list:jobX"), b"x".to_vec(), LONG_TTL)
        .await
        .expect("set lookalike");

    let keys = store.list_keys(&jobs).await.expect("list");
    assert_eq!(keys.len(), 3, "got {keys:?}");
    assert!(keys.iter().all(|k| k.starts_with(&jobs)));

    let star = store
        .list_keys(&format!("{ns}list:job*"))
        .await
        .expect("list with literal star");
    assert!(star.is_empty(), "star must not act as a wildcard: {star:?}");
}

async fn expired_keys_disappear<S: KeyValueStore + ?Sized>(store: &S, ns: &str) {
    let prefix = format!("{ns}expiring:");
    let key = format!("{prefix}k");
    store
        .set(&key, b"v".to_vec(), SHORT_TTL)
        .await
        .expect("set");

    tokio::time::sleep(SHORT_TTL + Duration::from_millis(500)).await;

    let err = store.get(&key).await.expect_err("expired");
    assert!(err.is_not_found(), "got {err:?}");
    let keys = store.list_keys(&prefix).await.expect("list");
    assert!(keys.is_empty(), "expired keys must not be listed: {keys:?}");
}

async fn create_succeeds_after_expiry<S: KeyValueStore + ?Sized>(store: &S, ns: &str) {
    let key = format!("{ns}recreate");
    store
        .create(&key, b"a".to_vec(), SHORT_TTL)
        .await
        .expect("create");

    tokio::time::sleep(SHORT_TTL + Duration::from_millis(500)).await;

    store
        .create(&key, b"b".to_vec(), LONG_TTL)
        .await
        .expect("create after expiry");
    assert_eq!(store.get(&key).await.expect("get").value, b"b".to_vec());
}

async fn delete_is_idempotent<S: KeyValueStore + ?Sized>(store: &S, ns: &str) {
    let key = format!("{ns}delete");
    store
        .set(&key, b"v".to_vec(), LONG_TTL)
        .await
        .expect("set");
    store.delete(&key).await.expect("delete");
    store.delete(&key).await.expect("delete again");
    assert!(store.get(&key).await.expect_err("deleted").is_not_found());
}
