use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::executor::OutputLine;
use crate::job::{JobDefinition, LogLevel, Strategy};
use crate::plan::{ExecutionPlan, PlanStep};
use crate::redact::Redactor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// The node filter matched nothing; nothing ran.
    NoTargets,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A command that exited non-zero, timed out, or could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("command {command_index} failed on node `{node}` with exit code {exit_code}")]
pub struct ExecutionError {
    pub node: String,
    pub command_index: usize,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub node: String,
    pub command_index: usize,
    pub command: String,
    pub exit_code: i32,
    pub timed_out: bool,
    /// Set when the executor could not run the command at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub output: Vec<OutputLine>,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedStep {
    pub node: String,
    pub command_index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub message: String,
}

/// Per-node outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub node: String,
    pub steps: usize,
    pub failures: Vec<ExecutionError>,
    pub not_attempted: usize,
}

impl NodeSummary {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty() && self.not_attempted == 0
    }
}

/// Result of one execution of a job.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub job_id: String,
    pub job_name: String,
    pub strategy: Strategy,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepResult>,
    pub errors: Vec<ExecutionError>,
    pub not_attempted: Vec<SkippedStep>,
    pub halted: bool,
    pub log: Vec<LogEntry>,
    #[serde(skip)]
    log_level: LogLevel,
    #[serde(skip)]
    redactor: Redactor,
}

impl RunRecord {
    pub(super) fn start(def: &JobDefinition, plan: &ExecutionPlan) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job_id: def.id.clone(),
            job_name: def.display_name(),
            strategy: plan.strategy(),
            status: RunStatus::Succeeded,
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            errors: Vec::new(),
            not_attempted: Vec::new(),
            halted: false,
            log: Vec::new(),
            log_level: def.log_level(),
            redactor: plan.options().redactor().clone(),
        }
    }

    /// Appends to the run log when `level` passes the job's `loglevel`, and
    /// mirrors the entry to tracing.
    pub(super) fn log(&mut self, level: LogLevel, node: Option<&str>, message: impl Into<String>) {
        if level < self.log_level {
            return;
        }
        let message: String = message.into();
        let message = self.redactor.redact(&message).into_owned();
        let run_id = self.run_id;
        let job_id = self.job_id.as_str();
        let node_name = node.unwrap_or("-");
        match level {
            LogLevel::Debug => debug!(%run_id, job_id, node = node_name, "{message}"),
            LogLevel::Info => info!(%run_id, job_id, node = node_name, "{message}"),
            LogLevel::Warn => warn!(%run_id, job_id, node = node_name, "{message}"),
            LogLevel::Error => error!(%run_id, job_id, node = node_name, "{message}"),
        }
        self.log.push(LogEntry {
            timestamp: Utc::now(),
            level,
            node: node.map(str::to_string),
            message,
        });
    }

    pub(super) fn push_step(&mut self, mut result: StepResult) {
        if !self.redactor.is_empty() {
            for line in &mut result.output {
                line.text = self.redactor.redact(&line.text).into_owned();
            }
            if let Some(reason) = result.error.as_mut() {
                *reason = self.redactor.redact(reason).into_owned();
            }
        }
        if !result.succeeded() {
            let failure = ExecutionError {
                node: result.node.clone(),
                command_index: result.command_index,
                exit_code: result.exit_code,
            };
            let detail = match &result.error {
                Some(reason) => format!("{failure}: {reason}"),
                None if result.timed_out => format!("{failure} (timed out)"),
                None => failure.to_string(),
            };
            self.log(LogLevel::Error, Some(result.node.as_str()), detail);
            self.errors.push(failure);
        }
        self.steps.push(result);
    }

    pub(super) fn finish(&mut self, plan: &ExecutionPlan, halted: bool, not_attempted: &[PlanStep]) {
        self.halted = halted;
        self.not_attempted = not_attempted
            .iter()
            .map(|&step| SkippedStep {
                node: plan.node(step).nodename.clone(),
                command_index: step.command,
            })
            .collect();
        self.status = if plan.nodes().is_empty() {
            RunStatus::NoTargets
        } else if self.errors.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        self.completed_at = Some(Utc::now());

        if halted {
            self.log(
                LogLevel::Warn,
                None,
                format!("Run halted, {} step(s) not attempted", self.not_attempted.len()),
            );
        }
        let summary = format!(
            "Run finished: {} ({} step(s), {} failure(s))",
            self.status,
            self.steps.len(),
            self.errors.len()
        );
        let level = if self.status == RunStatus::Failed {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        self.log(level, None, summary);
    }

    pub fn succeeded(&self) -> bool {
        self.status != RunStatus::Failed
    }

    /// Everything the node printed, in step order.
    pub fn combined_output(&self, node: &str) -> String {
        self.steps
            .iter()
            .filter(|step| step.node == node)
            .flat_map(|step| step.output.iter().map(|line| line.text.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One entry per node that ran or was skipped, in first-seen order.
    pub fn node_summaries(&self) -> Vec<NodeSummary> {
        let mut summaries: Vec<NodeSummary> = Vec::new();
        let nodes = self
            .steps
            .iter()
            .map(|step| step.node.as_str())
            .chain(self.not_attempted.iter().map(|step| step.node.as_str()));
        for node in nodes {
            if summaries.iter().any(|summary| summary.node == node) {
                continue;
            }
            summaries.push(NodeSummary {
                node: node.to_string(),
                steps: self.steps.iter().filter(|step| step.node == node).count(),
                failures: self
                    .errors
                    .iter()
                    .filter(|failure| failure.node == node)
                    .cloned()
                    .collect(),
                not_attempted: self
                    .not_attempted
                    .iter()
                    .filter(|step| step.node == node)
                    .count(),
            });
        }
        summaries
    }

    /// Node names in the order they first ran.
    pub fn nodes(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !seen.contains(&step.node.as_str()) {
                seen.push(&step.node);
            }
        }
        seen
    }
}
