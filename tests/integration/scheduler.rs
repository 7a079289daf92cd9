//! Scheduler semantics with real scan jobs

use crate::common::default_rig;
use momentum_scanner::sched::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_triggered_scan_populates_store() {
    let rig = default_rig();
    let mut scheduler = Scheduler::new(Duration::from_secs(5));
    {
        let orchestrator = Arc::clone(&rig.orchestrator);
        scheduler.register(
            "scan.hot",
            Duration::from_secs(900),
            Arc::new(move || {
                let orchestrator = Arc::clone(&orchestrator);
                Box::pin(async move {
                    orchestrator.run(CancellationToken::new()).await.map(|_| ())
                })
            }),
        );
    }

    assert!(rig.store.latest().is_none());
    scheduler.trigger("scan.hot").await.expect("job runs");
    assert!(rig.store.latest().is_some(), "scan persisted via the job");

    let status = &scheduler.statuses()[0];
    assert_eq!(status.runs_ok, 1);
    assert_eq!(status.skipped_overlap, 0);
}

#[tokio::test]
async fn test_single_fire_against_long_scan() {
    let rig = default_rig();
    let mut scheduler = Scheduler::new(Duration::from_secs(5));
    {
        let orchestrator = Arc::clone(&rig.orchestrator);
        scheduler.register(
            "scan.hot",
            Duration::from_secs(900),
            Arc::new(move || {
                let orchestrator = Arc::clone(&orchestrator);
                Box::pin(async move {
                    // Hold the single-fire slot beyond the overlapping trigger
                    let result = orchestrator.run(CancellationToken::new()).await.map(|_| ());
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    result
                })
            }),
        );
    }
    let scheduler = Arc::new(scheduler);

    let first = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.trigger("scan.hot").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let overlapping = scheduler.trigger("scan.hot").await;
    let err = overlapping.expect_err("second trigger refused while running");
    assert_eq!(err.kind(), "SKIPPED_OVERLAP");
    assert_eq!(err.exit_code(), 4);

    first.await.unwrap().expect("first run completes");
}

#[tokio::test]
async fn test_shutdown_drains_before_deadline() {
    let rig = default_rig();
    let mut scheduler = Scheduler::new(Duration::from_secs(5));
    {
        let orchestrator = Arc::clone(&rig.orchestrator);
        scheduler.register(
            "scan.hot",
            Duration::from_secs(900),
            Arc::new(move || {
                let orchestrator = Arc::clone(&orchestrator);
                Box::pin(async move {
                    orchestrator.run(CancellationToken::new()).await.map(|_| ())
                })
            }),
        );
    }
    scheduler.trigger("scan.hot").await.unwrap();
    scheduler.shutdown().await;

    // After shutdown the scheduler refuses work
    let err = scheduler.trigger("scan.hot").await.unwrap_err();
    assert_eq!(err.kind(), "SKIPPED_OVERLAP");
}
