//! Legacy archive tests
mod common;
use chousa::error::LegacyError;
use chousa::prelude::*;
use common::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const FINISHED: &str = r#"{
    "flow": "age-flow",
    "revision": 1,
    "contact": "contact-9",
    "started": "2023-11-02T08:00:00Z",
    "completed": "2023-11-02T08:03:00Z",
    "steps": [
        {"node": "a1", "arrived_on": "2023-11-02T08:00:00Z", "left_on": "2023-11-02T08:00:00Z",
         "actions": ["How old are you?"]},
        {"node": "rs1", "arrived_on": "2023-11-02T08:00:00Z", "left_on": "2023-11-02T08:03:00Z",
         "text": "15", "value": 15, "category": "Minor", "rule": "r-minor"}
    ],
    "values": {"age": 15}
}"#;

const EARLIER: &str = r#"{
    "run": "6f1c2d1e-8c43-4b8e-9d5b-3d1f0e2a7b10",
    "flow": "age-flow",
    "started": "2023-10-01T08:00:00Z",
    "completed": "2023-10-01T08:01:00Z"
}"#;

const UNFINISHED: &str = r#"{
    "flow": "age-flow",
    "started": "2023-11-03T08:00:00Z",
    "steps": []
}"#;

fn write_archive(root: &Path) {
    let dir = root.join("org-1").join("age-flow");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("finished.json"), FINISHED).unwrap();
    fs::write(dir.join("earlier.json"), EARLIER).unwrap();
    fs::write(dir.join("unfinished.json"), UNFINISHED).unwrap();
    fs::write(dir.join("notes.txt"), "not a submission").unwrap();
}

#[cfg(test)]
mod legacy_tests {
    use super::*;

    #[test]
    fn test_reads_completed_submissions_only() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path());
        let archive = LegacyArchive::new(dir.path());

        let submissions = archive.completed("org-1", "age-flow").unwrap();
        assert_eq!(submissions.len(), 2);
        assert!(submissions.iter().all(|s| s.legacy));

        // Oldest completion first.
        let earlier = &submissions[0];
        assert_eq!(
            earlier.run_uuid.to_string(),
            "6f1c2d1e-8c43-4b8e-9d5b-3d1f0e2a7b10"
        );
        assert_eq!(earlier.flow_revision, 1);
        assert!(earlier.steps.is_empty());

        let finished = &submissions[1];
        assert_eq!(finished.org_uuid, "org-1");
        assert_eq!(finished.contact_uuid.as_deref(), Some("contact-9"));
        assert_eq!(finished.steps.len(), 2);
        assert_eq!(finished.steps[0].messages, vec!["How old are you?"]);
        assert_eq!(finished.steps[1].value, Some(Value::Number(15.0)));
        assert_eq!(finished.steps[1].category.as_deref(), Some("Minor"));
        assert_eq!(finished.field_values.get("age"), Some(&Value::Number(15.0)));

        assert_eq!(archive.completed_count("org-1", "age-flow").unwrap(), 2);
    }

    #[test]
    fn test_generated_ids_are_stable() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path());
        let archive = LegacyArchive::new(dir.path());

        let first = archive.completed("org-1", "age-flow").unwrap();
        let second = archive.completed("org-1", "age-flow").unwrap();
        assert_eq!(first[1].run_uuid, second[1].run_uuid);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LegacyArchive::new(dir.path());
        assert!(archive.completed("org-1", "other").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path());
        let flow_dir = dir.path().join("org-1").join("age-flow");
        fs::write(flow_dir.join("broken.json"), "{\"flow\": ").unwrap();
        fs::write(flow_dir.join("no-start.json"), r#"{"flow": "age-flow"}"#).unwrap();

        let archive = LegacyArchive::new(dir.path());
        let submissions = archive.completed("org-1", "age-flow").unwrap();
        assert_eq!(submissions.len(), 2);
        assert_eq!(archive.completed_count("org-1", "age-flow").unwrap(), 2);
    }

    #[test]
    fn test_unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path());
        let flow_dir = dir.path().join("org-1").join("age-flow");
        fs::create_dir_all(flow_dir.join("folder.json")).unwrap();

        let archive = LegacyArchive::new(dir.path());
        assert!(matches!(
            archive.completed("org-1", "age-flow"),
            Err(LegacyError::Io { .. })
        ));
    }

    #[test]
    fn test_summary_counts_legacy_submissions() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path());
        let engine = Engine::builder(create_org(), Arc::new(MemoryStore::new()), create_source())
            .legacy_archive(LegacyArchive::new(dir.path()))
            .build();

        let summary = engine.summary("age-flow").unwrap();
        assert_eq!(summary.completed_count, 2);
        assert_eq!(engine.legacy_submissions("age-flow").unwrap().len(), 2);
        assert!(engine.list_pending().unwrap().is_empty());
    }
}
