//! Per-stage opaque preservation blob (§6 "Persisted state", §12.3): an
//! optional blob a stage reads at startup and writes at shutdown to carry
//! an in-memory aggregate (a roll-up total, a dedup set, ...) across a
//! restart. This is independent of the disk buffer (§4.6), which preserves
//! undelivered *messages*, not a stage's own internal state.
//!
//! The core never reads or interprets the blob's contents; a stage that
//! wants this holds a [`PreservationStore`] handle and calls
//! [`PreservationStore::load`] from its own `init` and
//! [`PreservationStore::store`] from its own `cleanup`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreservationError {
    #[error("io error persisting stage state: {0}")]
    Io(#[from] io::Error),
}

/// A directory holding one opaque blob per stage instance name.
#[derive(Debug, Clone)]
pub struct PreservationStore {
    dir: PathBuf,
}

impl PreservationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PreservationStore { dir: dir.into() }
    }

    fn path_for(&self, stage_name: &str) -> PathBuf {
        self.dir.join(format!("{stage_name}.blob"))
    }

    /// Read the blob previously written for `stage_name`, if any (§4.7
    /// "read during startup"). `Ok(None)` means no preserved state exists
    /// yet, e.g. on first run.
    pub fn load(&self, stage_name: &str) -> Result<Option<Vec<u8>>, PreservationError> {
        match std::fs::read(self.path_for(stage_name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `blob` for `stage_name`, creating the directory if needed
    /// (§4.7 "written during its drain-based shutdown").
    pub fn store(&self, stage_name: &str, blob: &[u8]) -> Result<(), PreservationError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path_for(stage_name), blob)?;
        Ok(())
    }

    pub fn clear(&self, stage_name: &str) -> Result<(), PreservationError> {
        match std::fs::remove_file(self.path_for(stage_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_blob_through_the_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PreservationStore::new(tmp.path());

        assert_eq!(store.load("agg-1").unwrap(), None);
        store.store("agg-1", b"state-bytes").unwrap();
        assert_eq!(store.load("agg-1").unwrap(), Some(b"state-bytes".to_vec()));

        store.clear("agg-1").unwrap();
        assert_eq!(store.load("agg-1").unwrap(), None);
    }

    #[test]
    fn missing_blob_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PreservationStore::new(tmp.path().join("nested"));
        assert_eq!(store.load("never-written").unwrap(), None);
        assert!(store.clear("never-written").is_ok());
    }
}
