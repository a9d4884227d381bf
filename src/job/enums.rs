use serde::{Deserialize, Serialize};
use std::fmt;

use super::validation::ValidationError;

/// A closed set of string values accepted by a job record field.
pub trait ClosedSet: Sized + Copy + 'static {
    const VARIANTS: &'static [Self];

    fn as_str(&self) -> &'static str;

    fn allowed() -> String {
        Self::VARIANTS
            .iter()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// An enum field as it was read from the record.
///
/// Values outside the closed set are kept verbatim so validation can name the
/// offending field instead of failing the whole parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Setting<T> {
    Known(T),
    Unrecognized(String),
}

impl<T: ClosedSet> Setting<T> {
    pub fn known(&self) -> Option<T> {
        match self {
            Setting::Known(value) => Some(*value),
            Setting::Unrecognized(_) => None,
        }
    }

    /// Resolves the setting, reporting `field` when the value is not in the set.
    pub fn require(&self, field: &str) -> Result<T, ValidationError> {
        match self {
            Setting::Known(value) => Ok(*value),
            Setting::Unrecognized(raw) => Err(ValidationError::new(
                field,
                format!("`{raw}` is not one of: {}", T::allowed()),
            )),
        }
    }
}

impl<T> From<T> for Setting<T> {
    fn from(value: T) -> Self {
        Setting::Known(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "DEBUG")]
    Debug,
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERROR")]
    Error,
}

impl ClosedSet for LogLevel {
    const VARIANTS: &'static [Self] = &[
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Iteration order between target nodes and command steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Full command sequence on node 1, then node 2, ...
    #[serde(rename = "node-first")]
    NodeFirst,
    /// Command 1 on every node, then command 2 on every node, ...
    #[serde(rename = "step-first")]
    StepFirst,
}

impl ClosedSet for Strategy {
    const VARIANTS: &'static [Self] = &[Strategy::NodeFirst, Strategy::StepFirst];

    fn as_str(&self) -> &'static str {
        match self {
            Strategy::NodeFirst => "node-first",
            Strategy::StepFirst => "step-first",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankOrder {
    Ascending,
    Descending,
}

impl ClosedSet for RankOrder {
    const VARIANTS: &'static [Self] = &[RankOrder::Ascending, RankOrder::Descending];

    fn as_str(&self) -> &'static str {
        match self {
            RankOrder::Ascending => "ascending",
            RankOrder::Descending => "descending",
        }
    }
}

/// UI hint only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultTab {
    Nodes,
    Output,
    Html,
    Monitor,
}

impl ClosedSet for DefaultTab {
    const VARIANTS: &'static [Self] = &[
        DefaultTab::Nodes,
        DefaultTab::Output,
        DefaultTab::Html,
        DefaultTab::Monitor,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            DefaultTab::Nodes => "nodes",
            DefaultTab::Output => "output",
            DefaultTab::Html => "html",
            DefaultTab::Monitor => "monitor",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for RankOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DefaultTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
