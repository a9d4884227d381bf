//! Execution plans: the ordered (node, command) steps of one run.

mod cursor;

pub use cursor::PlanCursor;

use serde::Serialize;
use tracing::debug;

use crate::inventory::NodeRef;
use crate::job::{Command, JobDefinition, OptionValues, ResolvedOptions, Strategy, ValidationError};

/// One command on one node, by index into the plan's nodes and commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PlanStep {
    pub node: usize,
    pub command: usize,
}

/// The two `keepgoing` scopes of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FailurePolicy {
    /// `nodefilters.dispatch.keepgoing`
    pub node_keepgoing: bool,
    /// `sequence.keepgoing`
    pub sequence_keepgoing: bool,
}

impl FailurePolicy {
    pub fn from_job(def: &JobDefinition) -> Self {
        Self {
            node_keepgoing: def.node_keepgoing(),
            sequence_keepgoing: def.sequence.keepgoing,
        }
    }
}

/// Printable form of a step, for `jobctl plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep<'a> {
    pub node: &'a str,
    pub command_index: usize,
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    job_id: String,
    strategy: Strategy,
    policy: FailurePolicy,
    nodes: Vec<NodeRef>,
    /// With `${option.<name>}` references already expanded.
    commands: Vec<Command>,
    options: ResolvedOptions,
    steps: Vec<PlanStep>,
}

/// Orders the job's commands over the resolved targets, using option defaults.
///
/// `node-first` runs the whole sequence on one node before moving to the
/// next; `step-first` runs each command on every node before the next command.
pub fn plan(def: &JobDefinition, targets: Vec<NodeRef>) -> Result<ExecutionPlan, ValidationError> {
    plan_with_options(def, targets, &OptionValues::new())
}

/// Like [`plan`], with option values supplied for this run.
pub fn plan_with_options(
    def: &JobDefinition,
    targets: Vec<NodeRef>,
    supplied: &OptionValues,
) -> Result<ExecutionPlan, ValidationError> {
    let strategy = def.strategy()?;
    let options = ResolvedOptions::resolve(def, supplied)?;
    let commands: Vec<Command> = def
        .sequence
        .commands
        .iter()
        .map(|command| options.expand_command(command))
        .collect();
    let node_count = targets.len();
    let command_count = commands.len();

    let steps: Vec<PlanStep> = match strategy {
        Strategy::NodeFirst => (0..node_count)
            .flat_map(|node| (0..command_count).map(move |command| PlanStep { node, command }))
            .collect(),
        Strategy::StepFirst => (0..command_count)
            .flat_map(|command| (0..node_count).map(move |node| PlanStep { node, command }))
            .collect(),
    };

    debug!(
        job_id = %def.id,
        strategy = %strategy,
        nodes = node_count,
        commands = command_count,
        steps = steps.len(),
        "Built execution plan."
    );

    Ok(ExecutionPlan {
        job_id: def.id.clone(),
        strategy,
        policy: FailurePolicy::from_job(def),
        nodes: targets,
        commands,
        options,
        steps,
    })
}

impl ExecutionPlan {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn node(&self, step: PlanStep) -> &NodeRef {
        &self.nodes[step.node]
    }

    pub fn command(&self, step: PlanStep) -> &Command {
        &self.commands[step.command]
    }

    pub fn cursor(&self) -> PlanCursor<'_> {
        PlanCursor::new(self)
    }

    pub fn describe(&self) -> Vec<PlannedStep<'_>> {
        self.steps
            .iter()
            .map(|&step| PlannedStep {
                node: &self.node(step).nodename,
                command_index: step.command,
                command: self.options.label(self.command(step)),
            })
            .collect()
    }
}
