//! File-backed tape persistence.

use super::filename::sanitize;
use super::format::TapeFile;
use super::match_rule::MatchRule;
use super::memory::Tape;
use super::mode::TapeMode;
use crate::error::TapeError;
use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loads and saves tapes as YAML files under a root directory.
pub struct TapeStore {
    root: PathBuf,
    default_mode: TapeMode,
    default_match_rule: MatchRule,
    /// Sanitized key -> tape name, for every name seen by this store
    names: Mutex<HashMap<String, String>>,
}

impl TapeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_mode: TapeMode::default(),
            default_match_rule: MatchRule::default(),
            names: Mutex::new(HashMap::new()),
        }
    }

    /// Mode given to tapes created by [`TapeStore::load_or_create`].
    pub fn with_default_mode(mut self, mode: TapeMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_default_match_rule(mut self, rule: MatchRule) -> Self {
        self.default_match_rule = rule;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<sanitize(name)>.yaml`
    pub fn path_for(&self, name: &str) -> Result<PathBuf, TapeError> {
        Ok(self.root.join(format!("{}.yaml", Self::key_for(name)?)))
    }

    /// Load an existing tape.
    pub fn load(&self, name: &str) -> Result<Tape, TapeError> {
        let key = self.claim(name)?;
        let path = self.root.join(format!("{key}.yaml"));
        if !path.exists() {
            return Err(TapeError::TapeNotFound(name.to_string()));
        }

        let content = fs::read_to_string(&path).map_err(|source| TapeError::Io {
            path: path.clone(),
            source,
        })?;
        let file = TapeFile::from_yaml(&content)?;
        if file.name != name {
            return Err(TapeError::NameCollision {
                requested: name.to_string(),
                existing: file.name,
            });
        }

        info!(
            "Loaded tape '{}' ({} interactions) from {:?}",
            name,
            file.interactions.len(),
            path
        );
        Ok(Tape::from_file(file))
    }

    /// Load a tape, or start an empty one when no file exists yet.
    pub fn load_or_create(&self, name: &str) -> Result<Tape, TapeError> {
        match self.load(name) {
            Err(TapeError::TapeNotFound(_)) => {
                debug!("Tape '{}' does not exist, starting fresh", name);
                Ok(Tape::new(
                    name,
                    self.default_mode,
                    self.default_match_rule.clone(),
                ))
            }
            other => other,
        }
    }

    /// Write the tape if it has unsaved interactions.
    ///
    /// The file is written to `<file>.tmp` first and renamed over the target,
    /// so readers never observe a partial tape. Returns `Ok(false)` when the
    /// tape was clean.
    pub fn save(&self, tape: &Tape) -> Result<bool, TapeError> {
        self.persist(tape, false)
    }

    /// Save the tape one last time and close it to further recording.
    ///
    /// If the write fails the tape stays open and dirty, so it can be saved
    /// again once the problem is fixed.
    pub fn close(&self, tape: &Tape) -> Result<bool, TapeError> {
        self.persist(tape, true)
    }

    fn persist(&self, tape: &Tape, close: bool) -> Result<bool, TapeError> {
        let key = self.claim(tape.name())?;
        let path = self.root.join(format!("{key}.yaml"));
        let tmp = self.root.join(format!("{key}.yaml.tmp"));

        let write = |file: &TapeFile| -> Result<(), TapeError> {
            let yaml = file.to_yaml()?;
            fs::create_dir_all(&self.root).map_err(|source| TapeError::Io {
                path: self.root.clone(),
                source,
            })?;
            fs::write(&tmp, yaml).map_err(|source| TapeError::Io {
                path: tmp.clone(),
                source,
            })?;
            fs::rename(&tmp, &path).map_err(|source| TapeError::Io {
                path: path.clone(),
                source,
            })
        };
        let result = if close {
            tape.close_with(write)
        } else {
            tape.flush_with(write)
        };
        metrics::record_tape_save(match result {
            Ok(true) => "written",
            Ok(false) => "clean",
            Err(_) => "error",
        });

        let written = result?;
        if written {
            info!(
                "Saved tape '{}' ({} interactions) to {:?}",
                tape.name(),
                tape.size(),
                path
            );
        }
        Ok(written)
    }

    fn key_for(name: &str) -> Result<String, TapeError> {
        let key = sanitize(name);
        if key.is_empty() {
            return Err(TapeError::InvalidName(name.to_string()));
        }
        Ok(key)
    }

    /// Map `name` to its key, failing if another name already owns the key.
    fn claim(&self, name: &str) -> Result<String, TapeError> {
        let key = Self::key_for(name)?;
        let mut names = self.names.lock();
        match names.get(&key) {
            Some(existing) if existing != name => Err(TapeError::NameCollision {
                requested: name.to_string(),
                existing: existing.clone(),
            }),
            Some(_) => Ok(key),
            None => {
                names.insert(key.clone(), name.to_string());
                Ok(key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::types::{RecordedRequest, RecordedResponse};
    use tempfile::TempDir;

    fn store() -> (TempDir, TapeStore) {
        let dir = TempDir::new().unwrap();
        let store = TapeStore::new(dir.path());
        (dir, store)
    }

    fn record(tape: &Tape, path: &str, body: &str) {
        tape.record(
            RecordedRequest::new("GET", &format!("http://api.test{path}")),
            RecordedResponse::new(200).with_body(body.to_string()),
        )
        .unwrap();
    }

    #[test]
    fn test_path_for_sanitizes() {
        let (dir, store) = store();
        assert_eq!(
            store.path_for("Café tests/login").unwrap(),
            dir.path().join("Cafe_tests_login.yaml")
        );
        assert!(matches!(
            store.path_for("???"),
            Err(TapeError::InvalidName(_))
        ));
    }

    #[test]
    fn test_load_missing_tape() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load("absent"),
            Err(TapeError::TapeNotFound(_))
        ));
        let tape = store.load_or_create("absent").unwrap();
        assert_eq!(tape.size(), 0);
        assert_eq!(tape.mode(), TapeMode::ReadWrite);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let (dir, store) = store();
        let tape = store.load_or_create("round trip").unwrap();
        record(&tape, "/a", "one");
        record(&tape, "/b", "two");

        assert!(store.save(&tape).unwrap());
        assert!(!tape.is_dirty());
        assert!(!dir.path().join("round_trip.yaml.tmp").exists());

        let loaded = store.load("round trip").unwrap();
        assert_eq!(loaded.interactions(), tape.interactions());
        assert_eq!(loaded.mode(), tape.mode());
        assert_eq!(loaded.match_rule(), tape.match_rule());
    }

    #[test]
    fn test_save_clean_tape_is_noop() {
        let (dir, store) = store();
        let tape = store.load_or_create("clean").unwrap();
        assert!(!store.save(&tape).unwrap());
        assert!(!dir.path().join("clean.yaml").exists());
    }

    #[test]
    fn test_resave_of_loaded_tape_is_byte_identical() {
        let (dir, store) = store();
        let tape = store.load_or_create("stable").unwrap();
        record(&tape, "/a", "one");
        store.save(&tape).unwrap();
        let first = fs::read_to_string(dir.path().join("stable.yaml")).unwrap();

        let loaded = store.load("stable").unwrap();
        let second = loaded.to_file().to_yaml().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_colliding_names_are_rejected() {
        let (_dir, store) = store();
        store.load_or_create("my tape").unwrap();
        let err = store.load_or_create("my-tape").unwrap_err();
        assert!(matches!(err, TapeError::NameCollision { .. }));
    }

    #[test]
    fn test_file_owned_by_other_name_is_collision() {
        let (dir, _) = store();
        let writer = TapeStore::new(dir.path());
        let tape = writer.load_or_create("my tape").unwrap();
        record(&tape, "/a", "one");
        writer.save(&tape).unwrap();

        let reader = TapeStore::new(dir.path());
        let err = reader.load("my.tape").unwrap_err();
        assert!(matches!(err, TapeError::NameCollision { .. }));
    }

    #[test]
    fn test_default_mode_applies_to_new_tapes() {
        let (_dir, store) = store();
        let store = store.with_default_mode(TapeMode::WriteSequential);
        assert_eq!(
            store.load_or_create("fresh").unwrap().mode(),
            TapeMode::WriteSequential
        );
    }

    #[test]
    fn test_close_retries_after_failed_write() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("tapes");
        fs::write(&root, "not a directory").unwrap();
        let store = TapeStore::new(root.clone());
        let tape = store.load_or_create("retry").unwrap();
        record(&tape, "/a", "one");

        assert!(matches!(store.close(&tape), Err(TapeError::Io { .. })));
        assert!(!tape.is_closed());
        assert!(tape.is_dirty());

        fs::remove_file(&root).unwrap();
        assert!(store.close(&tape).unwrap());
        assert!(tape.is_closed());
        assert_eq!(store.load("retry").unwrap().size(), 1);
    }
}
