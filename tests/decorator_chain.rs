//! Exercises the full decorator stack - `Spy<Retry<Impatient<Stash<Mock>>>>`
//! - against a scripted mock, the way a caller would compose it over a real
//! `Pool`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pgrelay::testutil::MockExecutor;
use pgrelay::{Executor, Impatient, PgRelayError, ResultFormat, Retry, Spy, Stash, StashConfig};

fn stack(mock: MockExecutor, observed: Arc<AtomicUsize>) -> Spy<Retry<Impatient<Stash<MockExecutor>>>> {
    let stash = Stash::new(mock, StashConfig::default());
    let impatient = Impatient::new(stash, Duration::from_secs(5), vec![]);
    let retry = Retry::new(impatient, 3);
    Spy::new(
        retry,
        Arc::new(move |_sql: &str, _elapsed| {
            observed.fetch_add(1, Ordering::SeqCst);
        }),
    )
}

#[tokio::test]
async fn reads_are_cached_through_the_whole_stack() {
    let mock = MockExecutor::new().with_success(vec![]).with_success(vec![]);
    let observed = Arc::new(AtomicUsize::new(0));
    let db = stack(mock.clone(), Arc::clone(&observed));

    db.exec("SELECT * FROM book".into(), &[], ResultFormat::Binary)
        .await
        .unwrap();
    db.exec("SELECT * FROM book".into(), &[], ResultFormat::Binary)
        .await
        .unwrap();

    // Stash absorbs the second read, so only one statement reaches the mock.
    assert_eq!(mock.call_count(), 1);
    // Spy still reports both calls, including the cache hit.
    assert_eq!(observed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn write_invalidates_cached_read_across_the_whole_stack() {
    let mock = MockExecutor::new()
        .with_success(vec![])
        .with_success(vec![])
        .with_success(vec![]);
    let observed = Arc::new(AtomicUsize::new(0));
    let db = stack(mock.clone(), observed);

    db.exec("SELECT * FROM book".into(), &[], ResultFormat::Binary)
        .await
        .unwrap();
    db.exec(
        "UPDATE book SET title = $1".into(),
        &[pgrelay::PgValue::Text("X".to_string())],
        ResultFormat::Binary,
    )
    .await
    .unwrap();
    db.exec("SELECT * FROM book".into(), &[], ResultFormat::Binary)
        .await
        .unwrap();

    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn retry_still_fires_underneath_stash_and_impatient() {
    let mock = MockExecutor::new()
        .with_failure()
        .with_failure()
        .with_success(vec![]);
    let observed = Arc::new(AtomicUsize::new(0));
    let db = stack(mock.clone(), observed);

    let result = db
        .exec("SELECT * FROM book".into(), &[], ResultFormat::Binary)
        .await;

    assert!(result.is_ok());
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn non_table_read_surfaces_as_cache_error_through_the_stack() {
    let mock = MockExecutor::new().with_success(vec![]);
    let observed = Arc::new(AtomicUsize::new(0));
    let db = stack(mock, observed);

    let err = db
        .exec("SELECT 1".into(), &[], ResultFormat::Binary)
        .await
        .unwrap_err();

    assert!(matches!(err, PgRelayError::Cache(_)));
}
