use std::collections::BTreeSet;

use super::{ExecutionPlan, PlanStep};
use crate::job::Strategy;

/// Walks a plan while applying the job's failure policy.
///
/// Callers alternate [`PlanCursor::next_step`] and [`PlanCursor::record`].
/// A failed command with `sequence.keepgoing = false` retires its node, so
/// that node's remaining commands are skipped. A failed node with
/// `nodefilters.dispatch.keepgoing = false` halts the run: step-first halts at
/// once, node-first lets the failed node finish its own sequence and stops
/// before the next node.
#[derive(Debug)]
pub struct PlanCursor<'a> {
    plan: &'a ExecutionPlan,
    position: usize,
    failed_nodes: BTreeSet<usize>,
    retired_nodes: BTreeSet<usize>,
    skipped: Vec<PlanStep>,
    halted: bool,
}

impl<'a> PlanCursor<'a> {
    pub(super) fn new(plan: &'a ExecutionPlan) -> Self {
        Self {
            plan,
            position: 0,
            failed_nodes: BTreeSet::new(),
            retired_nodes: BTreeSet::new(),
            skipped: Vec::new(),
            halted: false,
        }
    }

    pub fn next_step(&mut self) -> Option<PlanStep> {
        while !self.halted {
            let step = *self.plan.steps.get(self.position)?;

            if !self.plan.policy.node_keepgoing
                && !self.failed_nodes.is_empty()
                && !self.failed_nodes.contains(&step.node)
            {
                self.halted = true;
                return None;
            }

            self.position += 1;
            if self.retired_nodes.contains(&step.node) {
                self.skipped.push(step);
                continue;
            }
            return Some(step);
        }
        None
    }

    /// Records the outcome of a step returned by [`PlanCursor::next_step`].
    pub fn record(&mut self, step: PlanStep, succeeded: bool) {
        if succeeded {
            return;
        }
        self.failed_nodes.insert(step.node);
        if !self.plan.policy.sequence_keepgoing {
            self.retired_nodes.insert(step.node);
        }
        if !self.plan.policy.node_keepgoing && self.plan.strategy == Strategy::StepFirst {
            self.halted = true;
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.failed_nodes.iter().copied()
    }

    /// Steps skipped so far plus every step the cursor has not reached,
    /// in plan order of discovery.
    pub fn not_attempted(&self) -> Vec<PlanStep> {
        let mut steps = self.skipped.clone();
        steps.extend_from_slice(&self.plan.steps[self.position..]);
        steps
    }
}

#[cfg(test)]
mod tests {
    use crate::inventory::{Node, NodeRef};
    use crate::job::parse;
    use crate::plan::{PlanStep, plan};
    use std::sync::Arc;

    /// Runs the cursor to completion, failing exactly the `(node, command)`
    /// pairs in `failures`.
    fn walk(
        strategy: &str,
        sequence_keepgoing: bool,
        node_keepgoing: bool,
        failures: &[(usize, usize)],
    ) -> (Vec<(usize, usize)>, bool, Vec<PlanStep>) {
        let raw = format!(
            r#"{{
                "id": "walk",
                "name": "walk",
                "nodefilters": {{ "filter": ".*", "dispatch": {{ "keepgoing": {node_keepgoing} }} }},
                "sequence": {{
                    "keepgoing": {sequence_keepgoing},
                    "strategy": "{strategy}",
                    "commands": [{{"exec": "a"}}, {{"exec": "b"}}, {{"exec": "c"}}]
                }}
            }}"#
        );
        let def = parse(&raw).unwrap();
        let targets: Vec<NodeRef> = vec![Arc::new(Node::new("n1")), Arc::new(Node::new("n2"))];
        let plan = plan(&def, targets).unwrap();

        let mut cursor = plan.cursor();
        let mut attempted = Vec::new();
        while let Some(step) = cursor.next_step() {
            attempted.push((step.node, step.command));
            cursor.record(step, !failures.contains(&(step.node, step.command)));
        }
        (attempted, cursor.is_halted(), cursor.not_attempted())
    }

    #[test]
    fn node_first_without_keepgoing_never_reaches_second_node() {
        let (attempted, halted, rest) = walk("node-first", false, false, &[(0, 1)]);
        assert_eq!(attempted, vec![(0, 0), (0, 1)]);
        assert!(halted);
        assert_eq!(rest.len(), 4);
        assert_eq!(rest[0], PlanStep { node: 0, command: 2 });
    }

    #[test]
    fn step_first_with_keepgoing_runs_everything() {
        let (attempted, halted, rest) = walk("step-first", true, true, &[(0, 1)]);
        assert_eq!(
            attempted,
            vec![(0, 0), (1, 0), (0, 1), (1, 1), (0, 2), (1, 2)]
        );
        assert!(!halted);
        assert!(rest.is_empty());
    }

    #[test]
    fn step_first_without_node_keepgoing_halts_immediately() {
        let (attempted, halted, _) = walk("step-first", true, false, &[(0, 1)]);
        assert_eq!(attempted, vec![(0, 0), (1, 0), (0, 1)]);
        assert!(halted);
    }

    #[test]
    fn node_first_sequence_keepgoing_finishes_failed_node_then_halts() {
        let (attempted, halted, _) = walk("node-first", true, false, &[(0, 1)]);
        assert_eq!(attempted, vec![(0, 0), (0, 1), (0, 2)]);
        assert!(halted);
    }

    #[test]
    fn node_keepgoing_skips_rest_of_failed_node_only() {
        let (attempted, halted, rest) = walk("node-first", false, true, &[(0, 1)]);
        assert_eq!(attempted, vec![(0, 0), (0, 1), (1, 0), (1, 1), (1, 2)]);
        assert!(!halted);
        assert_eq!(rest, vec![PlanStep { node: 0, command: 2 }]);

        let (attempted, _, _) = walk("step-first", false, true, &[(0, 1)]);
        assert_eq!(attempted, vec![(0, 0), (1, 0), (0, 1), (1, 1), (1, 2)]);
    }

    #[test]
    fn failure_on_last_node_does_not_halt_anything_further() {
        let (attempted, halted, rest) = walk("node-first", false, false, &[(1, 0)]);
        assert_eq!(attempted, vec![(0, 0), (0, 1), (0, 2), (1, 0)]);
        assert!(!halted);
        assert_eq!(rest.len(), 2);
    }
}
