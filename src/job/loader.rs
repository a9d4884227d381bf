use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};

use super::models::JobDefinition;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read job file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON job record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed TOML job record: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported job file extension: {0:?}")]
    UnsupportedFile(PathBuf),
    #[error("document contains no job records")]
    Empty,
    #[error("{path:?} holds {count} job records, select one with `<file>#<id>`")]
    Ambiguous { path: PathBuf, count: usize },
    #[error("{path:?} has no job record with id `{id}`")]
    RecordNotFound { path: PathBuf, id: String },
    #[error("failed to serialize job record: {0}")]
    Serialize(String),
}

/// Text syntaxes a job record can be persisted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Json,
    Toml,
}

impl RecordFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Some(RecordFormat::Json),
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Some(RecordFormat::Toml),
            _ => None,
        }
    }

    /// JSON documents open with an object or an array of objects; anything
    /// else, including a `[table]` header, is read as TOML.
    pub fn detect(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') {
            return RecordFormat::Json;
        }
        if let Some(rest) = trimmed.strip_prefix('[') {
            if rest.trim_start().starts_with(['{', ']']) {
                return RecordFormat::Json;
            }
        }
        RecordFormat::Toml
    }
}

/// TOML form of a multi-record document: `[[jobs]]` tables.
#[derive(Deserialize)]
struct TomlJobDocument {
    jobs: Vec<JobDefinition>,
}

/// Parses a single record, detecting its syntax.
pub fn parse(raw: &str) -> Result<JobDefinition, ParseError> {
    parse_with(raw, RecordFormat::detect(raw))
}

pub fn parse_with(raw: &str, format: RecordFormat) -> Result<JobDefinition, ParseError> {
    let def = match format {
        RecordFormat::Json => serde_json::from_str(raw)?,
        RecordFormat::Toml => toml::from_str(raw)?,
    };
    Ok(def)
}

/// Parses a document holding either one record or a list of records.
pub fn parse_many(raw: &str, format: RecordFormat) -> Result<Vec<JobDefinition>, ParseError> {
    let defs: Vec<JobDefinition> = match format {
        RecordFormat::Json => {
            let value: serde_json::Value = serde_json::from_str(raw)?;
            if value.is_array() {
                serde_json::from_value(value)?
            } else {
                vec![serde_json::from_value(value)?]
            }
        }
        RecordFormat::Toml => {
            let table: toml::Table = toml::from_str(raw)?;
            if matches!(table.get("jobs"), Some(toml::Value::Array(_))) {
                let document: TomlJobDocument = toml::Value::Table(table).try_into()?;
                document.jobs
            } else {
                vec![toml::Value::Table(table).try_into()?]
            }
        }
    };
    if defs.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(defs)
}

/// Reads every record from a `.json` or `.toml` file.
pub fn load_file(path: &Path) -> Result<Vec<JobDefinition>, ParseError> {
    let format =
        RecordFormat::from_path(path).ok_or_else(|| ParseError::UnsupportedFile(path.to_path_buf()))?;
    let raw = fs::read_to_string(path).map_err(|e| {
        error!(path = ?path, error = %e, "Failed to read job file.");
        ParseError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    let defs = parse_many(&raw, format)?;
    debug!(path = ?path, count = defs.len(), "Parsed job file.");
    Ok(defs)
}

/// Reads one record from a file: the one with `id`, or the only one there is.
pub fn load_record(path: &Path, id: Option<&str>) -> Result<JobDefinition, ParseError> {
    let mut defs = load_file(path)?;
    match id {
        Some(id) => defs
            .into_iter()
            .find(|def| def.id == id)
            .ok_or_else(|| ParseError::RecordNotFound {
                path: path.to_path_buf(),
                id: id.to_string(),
            }),
        None if defs.len() == 1 => defs.pop().ok_or(ParseError::Empty),
        None => Err(ParseError::Ambiguous {
            path: path.to_path_buf(),
            count: defs.len(),
        }),
    }
}

pub fn to_json(def: &JobDefinition) -> Result<String, ParseError> {
    serde_json::to_string_pretty(def).map_err(|e| ParseError::Serialize(e.to_string()))
}

pub fn to_toml(def: &JobDefinition) -> Result<String, ParseError> {
    toml::to_string_pretty(def).map_err(|e| ParseError::Serialize(e.to_string()))
}
