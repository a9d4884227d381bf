//! Running a single command payload on a single node.

mod encoding;
mod shell;

pub use shell::ShellExecutor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::inventory::Node;
use crate::job::{Command, ResolvedOptions};
use crate::plan::PlanStep;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("command {command_index} has no payload")]
    EmptyPayload { command_index: usize },
    #[error("failed to prepare script file: {0}")]
    ScriptFile(#[source] std::io::Error),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// What a finished command left behind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandOutput {
    /// `-1` when the process was killed or died from a signal.
    pub exit_code: i32,
    pub lines: Vec<OutputLine>,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    pub fn push(&mut self, stream: OutputStream, text: impl Into<String>) {
        self.lines.push(OutputLine {
            stream,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn stdout(&self) -> String {
        self.joined(Some(OutputStream::Stdout))
    }

    pub fn stderr(&self) -> String {
        self.joined(Some(OutputStream::Stderr))
    }

    pub fn combined(&self) -> String {
        self.joined(None)
    }

    fn joined(&self, only: Option<OutputStream>) -> String {
        self.lines
            .iter()
            .filter(|line| only.is_none_or(|stream| line.stream == stream))
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Everything an executor knows about the step it is asked to run.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub run_id: Uuid,
    pub job_id: &'a str,
    pub step: PlanStep,
    pub node: &'a Node,
    pub command: &'a Command,
    pub options: &'a ResolvedOptions,
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs the step's command on the step's node. A non-zero exit code is a
    /// normal result; `Err` means the command could not be run at all.
    async fn execute(&self, ctx: &StepContext<'_>) -> Result<CommandOutput, ExecutorError>;
}
