//! In-memory job store keyed by job id.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::job::{JobDefinition, ParseError, RecordFormat, ValidationError, load_file, validate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a job with id `{0}` already exists")]
    Duplicate(String),
    #[error("no job with id `{0}`")]
    NotFound(String),
    #[error("failed to read job directory {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("job `{id}` is invalid: {source}")]
    Invalid {
        id: String,
        #[source]
        source: ValidationError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Created,
    Superseded,
}

/// What [`JobStore::load_dir`] did. A bad file does not stop the others.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub created: usize,
    pub superseded: usize,
    pub failures: Vec<StoreError>,
}

/// Validated job definitions, shareable between tasks.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<DashMap<String, Arc<JobDefinition>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn checked(def: JobDefinition) -> Result<Arc<JobDefinition>, StoreError> {
        validate(&def).map_err(|source| StoreError::Invalid {
            id: def.id.clone(),
            source,
        })?;
        Ok(Arc::new(def))
    }

    /// Adds a new job. An existing id is an error.
    pub fn create(&self, def: JobDefinition) -> Result<Arc<JobDefinition>, StoreError> {
        let def = Self::checked(def)?;
        match self.jobs.entry(def.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(def.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(def.clone());
                info!(job_id = %def.id, name = %def.name, "Job created.");
                Ok(def)
            }
        }
    }

    /// Adds a job, replacing any job with the same id.
    pub fn import(&self, def: JobDefinition) -> Result<ImportOutcome, StoreError> {
        let def = Self::checked(def)?;
        let id = def.id.clone();
        let outcome = match self.jobs.insert(id.clone(), def) {
            Some(_) => ImportOutcome::Superseded,
            None => ImportOutcome::Created,
        };
        info!(job_id = %id, ?outcome, "Job imported.");
        Ok(outcome)
    }

    pub fn get(&self, id: &str) -> Option<Arc<JobDefinition>> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Result<Arc<JobDefinition>, StoreError> {
        let (_, def) = self
            .jobs
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        info!(job_id = %id, "Job removed.");
        Ok(def)
    }

    /// Every job, ordered by group, then name, then id.
    pub fn list(&self) -> Vec<Arc<JobDefinition>> {
        let mut jobs: Vec<Arc<JobDefinition>> =
            self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by(|a, b| {
            (a.group.as_deref().unwrap_or(""), &a.name, &a.id).cmp(&(
                b.group.as_deref().unwrap_or(""),
                &b.name,
                &b.id,
            ))
        });
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Imports every `.json` and `.toml` file in `dir`, in file name order.
    pub fn load_dir(&self, dir: &Path) -> Result<LoadReport, StoreError> {
        let io_error = |source: std::io::Error| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(io_error)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && RecordFormat::from_path(path).is_some())
            .collect();
        paths.sort();

        let mut report = LoadReport::default();
        for path in paths {
            let defs = match load_file(&path) {
                Ok(defs) => defs,
                Err(source) => {
                    warn!(path = ?path, error = %source, "Skipping unreadable job file.");
                    report.failures.push(StoreError::Parse { path, source });
                    continue;
                }
            };
            for def in defs {
                match self.import(def) {
                    Ok(ImportOutcome::Created) => report.created += 1,
                    Ok(ImportOutcome::Superseded) => report.superseded += 1,
                    Err(e) => {
                        warn!(path = ?path, error = %e, "Skipping invalid job.");
                        report.failures.push(e);
                    }
                }
            }
        }
        info!(
            dir = ?dir,
            created = report.created,
            superseded = report.superseded,
            failed = report.failures.len(),
            "Job directory loaded."
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Command, parse};

    fn job(id: &str, name: &str, group: Option<&str>) -> JobDefinition {
        let mut def = parse(&format!(
            r#"{{ "id": "{id}", "name": "{name}", "sequence": {{ "commands": [{{ "exec": "uptime" }}] }} }}"#
        ))
        .unwrap();
        def.group = group.map(str::to_string);
        def
    }

    #[test]
    fn create_rejects_duplicate_ids() {
        let store = JobStore::new();
        store.create(job("a", "first", None)).unwrap();
        let err = store.create(job("a", "again", None)).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == "a"));
        assert_eq!(store.get("a").unwrap().name, "first");
    }

    #[test]
    fn import_supersedes_existing_job() {
        let store = JobStore::new();
        assert_eq!(store.import(job("a", "first", None)).unwrap(), ImportOutcome::Created);
        assert_eq!(store.import(job("a", "second", None)).unwrap(), ImportOutcome::Superseded);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().name, "second");
    }

    #[test]
    fn invalid_jobs_never_enter_the_store() {
        let store = JobStore::new();
        let mut def = job("a", "first", None);
        def.sequence.commands = Vec::<Command>::new();
        let err = store.create(def).unwrap_err();
        assert!(matches!(err, StoreError::Invalid { source, .. } if source.field == "sequence.commands"));
        assert!(store.is_empty());
    }

    #[test]
    fn remove_and_list() {
        let store = JobStore::new();
        store.create(job("3", "zeta", None)).unwrap();
        store.create(job("1", "beta", Some("ops"))).unwrap();
        store.create(job("2", "alpha", Some("ops"))).unwrap();

        let ids: Vec<String> = store.list().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);

        assert_eq!(store.remove("2").unwrap().name, "alpha");
        assert!(matches!(store.remove("2"), Err(StoreError::NotFound(_))));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn load_dir_collects_failures_without_stopping() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"{ "id": "a", "name": "a", "sequence": { "commands": [{ "exec": "uptime" }] } }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("b.toml"),
            "id = \"b\"\nname = \"b\"\nloglevel = \"VERBOSE\"\n[sequence]\ncommands = [{ exec = \"df\" }]\n",
        )
        .unwrap();
        fs::write(dir.path().join("c.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = JobStore::new();
        let report = store.load_dir(dir.path()).unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(report.failures[0], StoreError::Invalid { .. }));
        assert!(matches!(report.failures[1], StoreError::Parse { .. }));

        let again = store.load_dir(dir.path()).unwrap();
        assert_eq!(again.superseded, 1);

        assert!(matches!(
            store.load_dir(&dir.path().join("missing")),
            Err(StoreError::Io { .. })
        ));
    }
}
