use super::{
    LeaseTable, RunLease, Submission, SubmissionStore, check_mutable, sort_pending, sort_queued,
};
use crate::engine::{QueuedRun, Run};
use crate::error::StoreError;
use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RUNS_DIR: &str = "runs";
const SUBMISSIONS_DIR: &str = "submissions";
const QUEUE_DIR: &str = "queue";
const EXTENSION: &str = "bin";

/// Stores one bincode record per run, submission and queued child run under a
/// root directory:
///
/// ```text
/// <root>/runs/<run_uuid>.bin
/// <root>/submissions/<run_uuid>.bin
/// <root>/queue/<request_uuid>.bin
/// ```
///
/// Records are written to a temporary file, synced and renamed into place, so a
/// crash leaves either the old record or the new one, never a torn write.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    leases: LeaseTable,
}

impl FileStore {
    /// Opens (and creates, if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        for dir in [RUNS_DIR, SUBMISSIONS_DIR, QUEUE_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| io_error(&path, e))?;
        }
        Ok(Self {
            root,
            leases: LeaseTable::default(),
        })
    }

    fn record_path(&self, dir: &str, uuid: Uuid) -> PathBuf {
        self.root
            .join(dir)
            .join(format!("{}.{}", uuid, EXTENSION))
    }

    fn write_record<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), StoreError> {
        let bytes = encode_to_vec(record, standard())
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
            file.write_all(&bytes).map_err(|e| io_error(&tmp, e))?;
            file.sync_all().map_err(|e| io_error(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| io_error(path, e))
    }

    fn read_record<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(path, e)),
        };
        decode_from_slice(&bytes, standard())
            .map(|(record, _)| Some(record)) // bincode 2 returns a tuple (data, bytes_read)
            .map_err(|e| StoreError::Decode {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    fn read_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>, StoreError> {
        let dir_path = self.root.join(dir);
        let entries = fs::read_dir(&dir_path).map_err(|e| io_error(&dir_path, e))?;
        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&dir_path, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(record) = self.read_record(&path)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Removes a record. Returns whether it existed.
    fn remove_record(&self, path: &Path) -> Result<bool, StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(path, e)),
        }
    }
}

impl SubmissionStore for FileStore {
    fn acquire(&self, run_uuid: Uuid) -> Result<RunLease, StoreError> {
        self.leases.acquire(run_uuid)
    }

    fn persist(&self, run: &Run) -> Result<(), StoreError> {
        let path = self.record_path(RUNS_DIR, run.run_uuid);
        let existing: Option<Run> = self.read_record(&path)?;
        check_mutable(existing.as_ref(), run)?;
        self.write_record(&path, run)
    }

    fn resume(&self, run_uuid: Uuid) -> Result<Run, StoreError> {
        self.read_record(&self.record_path(RUNS_DIR, run_uuid))?
            .ok_or(StoreError::NotFound(run_uuid))
    }

    fn runs(&self) -> Result<Vec<Run>, StoreError> {
        self.read_all(RUNS_DIR)
    }

    fn finalize(&self, run_uuid: Uuid) -> Result<Submission, StoreError> {
        let path = self.record_path(SUBMISSIONS_DIR, run_uuid);
        if let Some(existing) = self.read_record(&path)? {
            return Ok(existing);
        }
        let run = self.resume(run_uuid)?;
        let submission = Submission::from_run(&run)?;
        self.write_record(&path, &submission)?;
        Ok(submission)
    }

    fn list_pending(&self) -> Result<Vec<Submission>, StoreError> {
        let mut pending: Vec<Submission> = self.read_all(SUBMISSIONS_DIR)?;
        sort_pending(&mut pending);
        Ok(pending)
    }

    fn confirm_uploaded(&self, run_uuid: Uuid) -> Result<(), StoreError> {
        if !self.remove_record(&self.record_path(SUBMISSIONS_DIR, run_uuid))? {
            return Err(StoreError::NotFound(run_uuid));
        }
        self.remove_record(&self.record_path(RUNS_DIR, run_uuid))?;
        Ok(())
    }

    fn discard(&self, run_uuid: Uuid) -> Result<(), StoreError> {
        let had_submission = self.remove_record(&self.record_path(SUBMISSIONS_DIR, run_uuid))?;
        let had_run = self.remove_record(&self.record_path(RUNS_DIR, run_uuid))?;
        if had_run || had_submission {
            Ok(())
        } else {
            Err(StoreError::NotFound(run_uuid))
        }
    }

    fn enqueue(&self, request: &QueuedRun) -> Result<(), StoreError> {
        self.write_record(&self.record_path(QUEUE_DIR, request.request_uuid), request)
    }

    fn queued(&self) -> Result<Vec<QueuedRun>, StoreError> {
        let mut requests: Vec<QueuedRun> = self.read_all(QUEUE_DIR)?;
        sort_queued(&mut requests);
        Ok(requests)
    }

    fn dequeue(&self, request_uuid: Uuid) -> Result<(), StoreError> {
        self.remove_record(&self.record_path(QUEUE_DIR, request_uuid))?;
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
