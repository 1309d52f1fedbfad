//! Store tests
//!
//! Exercise both store backends directly, and a full restart against the
//! directory store.
mod common;
use chousa::engine::{QueuedRun, RunStatus};
use chousa::error::StoreError;
use chousa::prelude::*;
use chrono::{NaiveDate, TimeDelta};
use common::*;
use std::fs;
use std::sync::Arc;

fn sample_run(flow_uuid: &str) -> Run {
    let mut run = Run::new(
        "org-1",
        flow_uuid,
        2,
        "a1",
        create_contact().with_group("Nurses"),
        start_time(),
    );
    run.field_values
        .insert("name".to_string(), Value::Text("Ama".to_string()));
    run.field_values.insert("age".to_string(), Value::Number(34.5));
    run.field_values.insert(
        "visit".to_string(),
        Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
    );
    run.field_values
        .insert("consent".to_string(), Value::Boolean(true));
    run
}

fn completed_run(flow_uuid: &str, minutes: i64) -> Run {
    let mut run = sample_run(flow_uuid);
    run.status = RunStatus::Completed;
    run.current_node_id = None;
    run.completed_on = Some(start_time() + TimeDelta::minutes(minutes));
    run
}

/// The contract every backend has to honour.
fn check_store_contract(store: &dyn SubmissionStore) {
    let waiting = sample_run("flow-a");
    store.persist(&waiting).unwrap();
    assert_eq!(store.resume(waiting.run_uuid).unwrap(), waiting);

    // Overwrite by uuid.
    let mut moved = waiting.clone();
    moved.current_node_id = Some("rs1".to_string());
    moved.status = RunStatus::WaitingForInput;
    store.persist(&moved).unwrap();
    store.persist(&moved).unwrap();
    assert_eq!(store.resume(waiting.run_uuid).unwrap(), moved);
    assert_eq!(store.runs().unwrap().len(), 1);

    assert!(matches!(
        store.finalize(moved.run_uuid),
        Err(StoreError::NotCompleted { status: RunStatus::WaitingForInput, .. })
    ));

    let late = completed_run("flow-a", 30);
    let early = completed_run("flow-b", 5);
    store.persist(&late).unwrap();
    store.persist(&early).unwrap();
    assert_eq!(store.persist(&late), Ok(()));

    let mut changed = late.clone();
    changed.field_values.remove("age");
    assert_eq!(store.persist(&changed), Err(StoreError::Immutable(late.run_uuid)));

    let first = store.finalize(late.run_uuid).unwrap();
    assert_eq!(store.finalize(late.run_uuid).unwrap(), first);
    assert_eq!(first.field_values.len(), 4);
    assert_eq!(first.contact_uuid.as_deref(), Some("contact-1"));
    store.finalize(early.run_uuid).unwrap();

    let pending = store.list_pending().unwrap();
    let order: Vec<_> = pending.iter().map(|s| s.run_uuid).collect();
    assert_eq!(order, vec![early.run_uuid, late.run_uuid]);
    assert_eq!(store.completed_count("org-1", "flow-a").unwrap(), 1);
    assert_eq!(store.completed_count("org-2", "flow-a").unwrap(), 0);

    store.confirm_uploaded(early.run_uuid).unwrap();
    assert_eq!(
        store.resume(early.run_uuid),
        Err(StoreError::NotFound(early.run_uuid))
    );
    assert_eq!(
        store.confirm_uploaded(early.run_uuid),
        Err(StoreError::NotFound(early.run_uuid))
    );

    store.discard(moved.run_uuid).unwrap();
    assert_eq!(
        store.discard(moved.run_uuid),
        Err(StoreError::NotFound(moved.run_uuid))
    );
    assert_eq!(store.runs().unwrap().len(), 1);

    let lease = store.acquire(late.run_uuid).unwrap();
    assert_eq!(lease.run_uuid(), late.run_uuid);
    assert!(matches!(
        store.acquire(late.run_uuid),
        Err(StoreError::Busy(_))
    ));
    drop(lease);
    assert!(store.acquire(late.run_uuid).is_ok());

    // Child run requests: keyed by request uuid, listed in request order.
    let second = QueuedRun::new(&late, "flow-c", 1, start_time());
    let first = QueuedRun::new(&late, "flow-b", 0, start_time());
    assert_ne!(first.request_uuid, second.request_uuid);
    assert_eq!(QueuedRun::new(&late, "flow-b", 0, start_time()), first);
    store.enqueue(&second).unwrap();
    store.enqueue(&first).unwrap();
    store.enqueue(&first).unwrap();
    assert_eq!(store.queued().unwrap(), vec![first.clone(), second.clone()]);
    store.dequeue(first.request_uuid).unwrap();
    store.dequeue(first.request_uuid).unwrap();
    assert_eq!(store.queued().unwrap(), vec![second]);
}

#[cfg(test)]
mod backend_tests {
    use super::*;

    #[test]
    fn test_memory_store_contract() {
        check_store_contract(&MemoryStore::new());
    }

    #[test]
    fn test_file_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        check_store_contract(&store);
    }

    #[test]
    fn test_file_store_layout_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let run = completed_run("flow-a", 1);
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.persist(&run).unwrap();
            store.finalize(run.run_uuid).unwrap();
        }

        let record = dir.path().join("runs").join(format!("{}.bin", run.run_uuid));
        assert!(record.is_file());
        assert!(
            dir.path()
                .join("submissions")
                .join(format!("{}.bin", run.run_uuid))
                .is_file()
        );
        // No temporary files are left behind.
        let leftovers = fs::read_dir(dir.path().join("runs"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .count();
        assert_eq!(leftovers, 0);

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.resume(run.run_uuid).unwrap(), run);
        assert_eq!(reopened.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_reports_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let run = sample_run("flow-a");
        store.persist(&run).unwrap();

        let record = dir.path().join("runs").join(format!("{}.bin", run.run_uuid));
        fs::write(&record, b"\xff\xff\xff").unwrap();
        assert!(matches!(
            store.resume(run.run_uuid),
            Err(StoreError::Decode { .. })
        ));
    }
}

#[cfg(test)]
mod restart_tests {
    use super::*;

    #[test]
    fn test_run_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_source();
        let clock = Arc::new(ManualClock::new(start_time()));

        let before_restart = {
            let store = Arc::new(FileStore::open(dir.path()).unwrap());
            let engine = Engine::builder(create_org(), store, source.clone())
                .clock(clock.clone())
                .build();
            let run = engine.start_run("registration", create_contact()).unwrap();
            let run = engine.advance(run.run_uuid).unwrap();
            clock.advance(TimeDelta::seconds(20));
            let run = engine.resume(run.run_uuid, "Kofi").unwrap();
            engine.advance(run.run_uuid).unwrap()
        };
        assert_eq!(before_restart.status, RunStatus::WaitingForInput);

        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let engine = Engine::builder(create_org(), store.clone(), source)
            .clock(clock.clone())
            .build();

        let resumed = store.resume(before_restart.run_uuid).unwrap();
        assert_eq!(resumed, before_restart);
        assert_eq!(
            resumed.field_values.get("full_name"),
            Some(&Value::Text("Kofi".to_string()))
        );

        clock.advance(TimeDelta::seconds(20));
        let run = engine.resume(resumed.run_uuid, "Southern").unwrap();
        assert_eq!(run.steps[3].category.as_deref(), Some("Other"));
        let run = engine.advance(run.run_uuid).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.completed_on, Some(start_time() + TimeDelta::seconds(40)));

        let pending = engine.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].steps, run.steps);

        // The child run queued on the last step is still there after another restart.
        drop(engine);
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let engine = Engine::builder(create_org(), store, create_source())
            .clock(clock)
            .build();
        assert_eq!(engine.queued().unwrap(), 1);
        let child = engine.start_queued().unwrap().remove(0).unwrap();
        assert_eq!(child.flow_uuid, "age-flow");
        assert_eq!(child.parent_run, Some(run.run_uuid));
        assert_eq!(engine.queued().unwrap(), 0);
    }
}
