//! Acquire retry, exhaustion and disposal behavior.

use std::sync::Arc;

use abacus_pool::error::Error;
use abacus_pool::events::PoolEventKind;
use abacus_pool::pool::{ACQUIRE_RETRY_LIMIT, Pool};
use abacus_pool::testing::{CountingFactory, FlakyFactory, ManualClock, RecordingSink};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_now())
}

#[tokio::test]
async fn acquire_retries_through_creation_failures() {
    let clock = clock();
    let sink = Arc::new(RecordingSink::default());
    let pool = Pool::with_collaborators(
        "flaky",
        FlakyFactory::new(Arc::clone(&clock) as _, 3),
        clock,
        Arc::clone(&sink) as _,
    );

    let member = pool
        .acquire()
        .await
        .expect("acquire should succeed once the factory recovers");
    assert_eq!(member.id(), 0);
    assert_eq!(pool.resource_count(), 1);
    assert_eq!(
        sink.reports().len(),
        3,
        "each failed creation is reported to the sink"
    );
}

#[tokio::test]
async fn acquire_gives_up_after_the_retry_ceiling() {
    let clock = clock();
    let sink = Arc::new(RecordingSink::default());
    let pool = Pool::with_collaborators(
        "dead",
        FlakyFactory::new(Arc::clone(&clock) as _, u64::MAX),
        clock,
        Arc::clone(&sink) as _,
    );

    let err = pool.acquire().await.unwrap_err();
    match err {
        Error::MaxRetriesReached {
            attempts, ref pool, ..
        } => {
            assert_eq!(attempts, ACQUIRE_RETRY_LIMIT);
            assert_eq!(pool, "dead");
        }
        other => panic!("expected MaxRetriesReached, got: {other:?}"),
    }
    assert!(err.is_retryable(), "callers may back off and retry");
    assert!(
        std::error::Error::source(&err).is_some(),
        "the last creation failure is surfaced as the cause"
    );
    assert_eq!(sink.reports().len(), ACQUIRE_RETRY_LIMIT as usize);
    assert!(
        err.to_string().contains("after 10 attempts"),
        "retry count must be visible to the caller: {err}"
    );
}

#[tokio::test]
async fn every_empty_round_emits_an_exhausted_event() {
    let clock = clock();
    let pool = Pool::new("exhaust", FlakyFactory::new(clock, 2));
    let mut rx = pool.subscribe();

    let _member = pool.acquire().await.unwrap();

    let mut exhausted = 0;
    let mut added = 0;
    let mut acquired = 0;
    while let Ok(event) = rx.try_recv() {
        match event.kind {
            PoolEventKind::Exhausted => exhausted += 1,
            PoolEventKind::Added => added += 1,
            PoolEventKind::Acquired => acquired += 1,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    // Two failing rounds, one round that creates (and still reports the
    // miss), then the dequeue succeeds.
    assert_eq!(exhausted, 3);
    assert_eq!(added, 1);
    assert_eq!(acquired, 1);
}

#[tokio::test]
async fn disposed_pool_fails_acquire_and_reports_nothing() {
    let clock = clock();
    let sink = Arc::new(RecordingSink::default());
    let pool = Pool::with_collaborators(
        "disposed",
        CountingFactory::new(Arc::clone(&clock) as _),
        clock,
        Arc::clone(&sink) as _,
    );
    pool.add_resource().await.unwrap();
    pool.dispose();

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, Error::Disposed { .. }));
    assert!(!err.is_retryable());
    assert_eq!(pool.resource_count(), 0);
    assert_eq!(pool.usage_count(), 0);
    assert!(sink.reports().is_empty());
}

#[tokio::test]
async fn creation_diagnostics_reflect_pool_shape() {
    let clock = clock();
    let sink = Arc::new(RecordingSink::default());
    let pool = Pool::with_collaborators(
        "diag",
        FlakyFactory::new(Arc::clone(&clock) as _, 1),
        clock,
        Arc::clone(&sink) as _,
    );

    // First acquire: one failed round (reported), then a successful one.
    let member = pool.acquire().await.unwrap();

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    let (context, diagnostics) = &reports[0];
    assert_eq!(context, "add_resource");
    assert_eq!(diagnostics.pool, "diag");
    assert_eq!(diagnostics.resource_count, 0);
    assert_eq!(diagnostics.available_count, 0);
    assert_eq!(diagnostics.usage_count, 0);

    pool.release(member);
}
