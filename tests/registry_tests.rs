
use std::sync::Arc;
use std::time::Duration;

use gridjob::error::JobError;
use gridjob::jobs::{JobRecord, JobRegistry, JobSpec, JobStatus};
use test_harness::FakeWorkload;

fn record(id: &str, lease_secs: f64) -> JobRecord {
    let workload = Arc::new(FakeWorkload::new(id, false, Duration::ZERO));
    JobRecord::new(JobSpec::new(id, lease_secs), workload)
}

#[tokio::test]
async fn test_create_and_find() {
    let mut registry = JobRegistry::new();
    let created = registry.create(record("job-1", 60.0)).unwrap();

    let found = registry.find("job-1").unwrap();
    assert!(Arc::ptr_eq(&created, &found));
    assert_eq!(found.status(), JobStatus::Running);
    assert!(found.error().is_none());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_duplicate_id_rejected() {
    let mut registry = JobRegistry::new();
    registry.create(record("dup", 60.0)).unwrap();

    let err = registry.create(record("dup", 5.0)).unwrap_err();
    assert!(matches!(err, JobError::AlreadyExists(ref id) if id == "dup"));

    // The original record is untouched
    assert!(registry.remaining("dup").unwrap() > 30.0);
}

#[tokio::test]
async fn test_find_missing_job() {
    let registry = JobRegistry::new();
    let err = registry.find("ghost").unwrap_err();
    assert!(err.is_not_found());
    assert!(registry.touch("ghost", 10.0).unwrap_err().is_not_found());
    assert!(registry.remaining("ghost").unwrap_err().is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_touch_resets_lease() {
    let mut registry = JobRegistry::new();
    registry.create(record("job", 2.0)).unwrap();

    tokio::time::advance(Duration::from_millis(1500)).await;
    let before = registry.remaining("job").unwrap();
    assert!(before > 0.4 && before <= 0.5, "remaining was {}", before);

    registry.touch("job", 10.0).unwrap();
    let after = registry.remaining("job").unwrap();
    assert!(after > 9.9 && after <= 10.0, "remaining was {}", after);

    // Shortening is allowed too
    registry.touch("job", 1.0).unwrap();
    assert!(registry.remaining("job").unwrap() <= 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_ids() {
    let mut registry = JobRegistry::new();
    registry.create(record("short", 1.0)).unwrap();
    registry.create(record("long", 10.0)).unwrap();
    assert!(registry.expired_ids().is_empty());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(registry.expired_ids(), vec!["short".to_string()]);
    assert!(registry.remaining("short").unwrap() < 0.0);
}

#[tokio::test]
async fn test_list_all_is_sorted_snapshot() {
    let mut registry = JobRegistry::new();
    for id in ["charlie", "alpha", "bravo"] {
        let spec = JobSpec::new(id, 30.0).with_category(2).with_cores(0.5);
        let workload = Arc::new(FakeWorkload::new(id, false, Duration::ZERO));
        registry.create(JobRecord::new(spec, workload)).unwrap();
    }

    let summaries = registry.list_all();
    let ids: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "bravo", "charlie"]);
    assert!(summaries.iter().all(|s| s.category == 2 && s.cores == 0.5));
    assert!(summaries.iter().all(|s| s.remaining_secs > 29.0));
}

#[tokio::test]
async fn test_remove_if_present() {
    let mut registry = JobRegistry::new();
    registry.create(record("job", 60.0)).unwrap();

    assert!(registry.remove_if_present("job").is_some());
    assert!(registry.remove_if_present("job").is_none());
    assert!(registry.is_empty());
    assert!(!registry.contains("job"));
}

#[tokio::test]
async fn test_remove_record_ignores_reused_id() {
    let mut registry = JobRegistry::new();
    let first = registry.create(record("job", 60.0)).unwrap();
    assert!(registry.remove_record(&first));

    let second = registry.create(record("job", 60.0)).unwrap();
    assert!(!registry.remove_record(&first));
    assert!(Arc::ptr_eq(&registry.find("job").unwrap(), &second));

    assert!(registry.remove_record(&second));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_summary_serializes_wire_names() {
    let mut registry = JobRegistry::new();
    registry.create(record("wire", 5.0)).unwrap();

    let json = serde_json::to_value(registry.list_all()).unwrap();
    let entry = &json[0];
    assert_eq!(entry["id"], "wire");
    assert!(entry["expirationInSeconds"].as_f64().unwrap() > 4.0);
    assert!(entry.get("openedAt").is_some());
}

#[test]
fn test_job_spec_defaults_match_constructor() {
    let parsed: JobSpec =
        serde_json::from_value(serde_json::json!({ "id": "j", "expirationInSeconds": 30.0 })).unwrap();
    assert_eq!(parsed, JobSpec::new("j", 30.0));
    assert_eq!(parsed.cores, 1.0);
}
