//! Walking an execution plan through a command executor.

mod record;

pub use record::{ExecutionError, LogEntry, NodeSummary, RunRecord, RunStatus, SkippedStep, StepResult};

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::JobError;
use crate::executor::{CommandExecutor, CommandOutput, StepContext};
use crate::inventory::{NodeInventory, resolve_targets};
use crate::job::{JobDefinition, LogLevel, OptionValues, TriggerKind, validate};
use crate::plan::{ExecutionPlan, plan_with_options};

/// Runs plans one step at a time, in plan order.
#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn CommandExecutor>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Gate, validate, resolve, plan and run a job with its option defaults.
    pub async fn trigger(
        &self,
        def: &JobDefinition,
        inventory: &NodeInventory,
        kind: TriggerKind,
    ) -> Result<RunRecord, JobError> {
        self.trigger_with_options(def, inventory, kind, &OptionValues::new())
            .await
    }

    pub async fn trigger_with_options(
        &self,
        def: &JobDefinition,
        inventory: &NodeInventory,
        kind: TriggerKind,
        options: &OptionValues,
    ) -> Result<RunRecord, JobError> {
        if !def.can_trigger(kind) {
            warn!(job_id = %def.id, %kind, "Trigger refused, job is disabled for it.");
            return Err(JobError::TriggerDisabled {
                job_id: def.id.clone(),
                kind,
            });
        }
        validate(def)?;
        let targets = resolve_targets(def, inventory)?;
        let plan = plan_with_options(def, targets, options)?;
        info!(job_id = %def.id, %kind, steps = plan.steps().len(), "Job triggered.");
        Ok(self.run(def, &plan).await)
    }

    /// Executes `plan` and records every step. Command failures end up in
    /// the returned record, never as an `Err`.
    pub async fn run(&self, def: &JobDefinition, plan: &ExecutionPlan) -> RunRecord {
        let mut record = RunRecord::start(def, plan);
        record.log(
            LogLevel::Info,
            None,
            format!(
                "Starting `{}` on {} node(s), {} command(s), {}",
                record.job_name,
                plan.nodes().len(),
                plan.commands().len(),
                plan.strategy()
            ),
        );

        if plan.nodes().is_empty() {
            record.log(LogLevel::Warn, None, "No nodes matched the node filter");
            record.finish(plan, false, &[]);
            return record;
        }

        let mut cursor = plan.cursor();
        while let Some(step) = cursor.next_step() {
            let node = plan.node(step);
            let command = plan.command(step);
            let label = plan.options().label(command);
            record.log(
                LogLevel::Debug,
                Some(node.nodename.as_str()),
                format!("Running command {}: {label}", step.command),
            );

            let ctx = StepContext {
                run_id: record.run_id,
                job_id: &def.id,
                step,
                node,
                command,
                options: plan.options(),
            };
            let started_at = Utc::now();
            let (output, error) = match self.executor.execute(&ctx).await {
                Ok(output) => (output, None),
                Err(e) => (CommandOutput::with_exit_code(-1), Some(e.to_string())),
            };
            let succeeded = error.is_none() && output.success();
            if succeeded {
                record.log(
                    LogLevel::Debug,
                    Some(node.nodename.as_str()),
                    format!("Command {} succeeded", step.command),
                );
            }

            record.push_step(StepResult {
                node: node.nodename.clone(),
                command_index: step.command,
                command: label,
                exit_code: output.exit_code,
                timed_out: output.timed_out,
                error,
                started_at,
                completed_at: Utc::now(),
                output: output.lines,
            });
            cursor.record(step, succeeded);
        }

        record.finish(plan, cursor.is_halted(), &cursor.not_attempted());
        record
    }
}
