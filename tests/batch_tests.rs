
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use gridjob::error::JobError;
use gridjob::jobs::{JobSpec, JobStatus, MonitorMode};
use test_harness::{test_service, unit, FakeFactory};

#[tokio::test(start_paused = true)]
async fn test_batch_job_success() {
    let factory = Arc::new(FakeFactory::new());
    let service = test_service(factory.clone());

    let values = service
        .batch_job(JobSpec::new("batch-ok", 5.0), unit("render"))
        .await
        .unwrap();

    assert_eq!(values, vec![json!("render")]);
    assert_eq!(service.job_count().await, 0);
    assert_eq!(factory.workload("batch-ok").teardowns(), 1);
    assert_eq!(service.liveness().active_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_job_slow_success() {
    let factory = Arc::new(FakeFactory::new());
    let service = test_service(factory.clone());

    let values = service
        .batch_job(JobSpec::new("batch-slow", 5.0), unit("sleep:1000"))
        .await
        .unwrap();

    assert_eq!(values, vec![json!("slept")]);
    assert_eq!(service.job_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_job_failure() {
    let factory = Arc::new(FakeFactory::new());
    let service = test_service(factory.clone());

    let err = service
        .batch_job(JobSpec::new("batch-err", 5.0), unit("fail:out of memory"))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::ExecutionFailure(_)));
    assert_eq!(err.to_string(), "out of memory");
    assert_eq!(service.job_count().await, 0);
    assert_eq!(factory.workload("batch-err").teardowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_job_timeout() {
    let factory = Arc::new(FakeFactory::new());
    let service = test_service(factory.clone());

    let err = service
        .batch_job(JobSpec::new("batch-slow", 0.1), unit("sleep:1000"))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::TimedOut(_)));
    assert_eq!(service.job_count().await, 0);
    assert_eq!(factory.workload("batch-slow").teardowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_job_renewal_extends_deadline() {
    let factory = Arc::new(FakeFactory::new());
    let service = test_service(factory.clone());

    let renewer = {
        let service = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            service.renew_lease("batch-renewed", 2.0).await
        })
    };

    let values = service
        .batch_job(JobSpec::new("batch-renewed", 0.2), unit("sleep:500"))
        .await
        .unwrap();

    assert_eq!(values, vec![json!("slept")]);
    renewer.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_batch_job_duplicate_id() {
    let factory = Arc::new(FakeFactory::new());
    let service = test_service(factory.clone());
    service
        .create_job(JobSpec::new("taken", 60.0), MonitorMode::EnforceLease)
        .await
        .unwrap();

    let err = service
        .batch_job(JobSpec::new("taken", 5.0), unit("render"))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::AlreadyExists(_)));
    // The existing job is untouched
    assert!(service.find_job("taken").await.is_ok());
    assert_eq!(factory.creations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_job_closed_externally() {
    let factory = Arc::new(FakeFactory::new());
    let service = test_service(factory.clone());

    let closer = {
        let service = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            service.close_job("batch-closed", None).await
        })
    };

    let err = service
        .batch_job(JobSpec::new("batch-closed", 5.0), unit("sleep:1000"))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Closed(_)));
    assert!(closer.await.unwrap().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_batch_job_leaves_reused_id_alone() {
    let factory = Arc::new(FakeFactory::with_teardown_delay(Duration::from_millis(300)));
    let service = test_service(factory.clone());

    let batch = {
        let service = service.clone();
        tokio::spawn(async move { service.batch_job(JobSpec::new("dup", 5.0), unit("ok")).await })
    };

    // Wait until the batch workload is being torn down
    loop {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if factory.creations() == 1 && factory.workload("dup").teardowns() == 1 {
            break;
        }
    }
    let batch_workload = factory.workload("dup");

    // The id is free again while the old teardown is still running
    let fresh = service
        .create_job(JobSpec::new("dup", 60.0), MonitorMode::EnforceLease)
        .await
        .unwrap();

    let values = batch.await.unwrap().unwrap();
    assert_eq!(values, vec![json!("ok")]);
    assert_eq!(batch_workload.teardowns(), 1);

    assert_eq!(fresh.status(), JobStatus::Running);
    assert!(fresh.error().is_none());
    let registered = service.find_job("dup").await.unwrap();
    assert!(Arc::ptr_eq(&registered, &fresh));
    assert_eq!(factory.workload("dup").teardowns(), 0);
}
