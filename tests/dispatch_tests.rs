use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use nodenexus_jobs::dispatch::{Dispatcher, ExecutionError, RunStatus};
use nodenexus_jobs::executor::{
    CommandExecutor, CommandOutput, ExecutorError, OutputStream, ShellExecutor, StepContext,
};
use nodenexus_jobs::inventory::{Node, NodeInventory, resolve_targets};
use nodenexus_jobs::job::{TriggerKind, parse};
use nodenexus_jobs::plan::plan;

/// Records every call and fails the listed (node, command index) pairs.
#[derive(Default)]
struct ScriptedExecutor {
    failures: HashSet<(String, usize)>,
    calls: Mutex<Vec<(String, usize)>>,
}

impl ScriptedExecutor {
    fn failing(pairs: &[(&str, usize)]) -> Arc<Self> {
        Arc::new(Self {
            failures: pairs.iter().map(|(n, c)| (n.to_string(), *c)).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, ctx: &StepContext<'_>) -> Result<CommandOutput, ExecutorError> {
        let key = (ctx.node.nodename.clone(), ctx.step.command);
        self.calls.lock().unwrap().push(key.clone());
        let code = if self.failures.contains(&key) { 1 } else { 0 };
        let mut output = CommandOutput::with_exit_code(code);
        output.push(OutputStream::Stdout, ctx.command.payload().unwrap_or_default());
        Ok(output)
    }
}

fn two_by_three(strategy: &str, keepgoing: bool) -> nodenexus_jobs::job::JobDefinition {
    parse(&format!(
        r#"{{
            "id": "rollout",
            "name": "rollout",
            "nodefilters": {{
                "filter": "osFamily:linux",
                "dispatch": {{ "keepgoing": {keepgoing}, "rankOrder": "ascending" }}
            }},
            "sequence": {{
                "keepgoing": {keepgoing},
                "strategy": "{strategy}",
                "commands": [{{ "exec": "one" }}, {{ "exec": "two" }}, {{ "exec": "three" }}]
            }}
        }}"#
    ))
    .unwrap()
}

fn two_linux_nodes() -> NodeInventory {
    NodeInventory::new(vec![
        Node::new("node1").with_attribute("osFamily", "linux"),
        Node::new("node2").with_attribute("osFamily", "linux"),
        Node::new("win").with_attribute("osFamily", "windows"),
    ])
    .unwrap()
}

fn pairs(calls: &[(&str, usize)]) -> Vec<(String, usize)> {
    calls.iter().map(|(n, c)| (n.to_string(), *c)).collect()
}

#[tokio::test]
async fn node_first_failure_halts_before_second_node() {
    let executor = ScriptedExecutor::failing(&[("node1", 1)]);
    let dispatcher = Dispatcher::new(executor.clone());
    let def = two_by_three("node-first", false);

    let record = dispatcher
        .trigger(&def, &two_linux_nodes(), TriggerKind::Manual)
        .await
        .unwrap();

    assert_eq!(executor.calls(), pairs(&[("node1", 0), ("node1", 1)]));
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.halted);
    assert_eq!(
        record.errors,
        vec![ExecutionError {
            node: "node1".to_string(),
            command_index: 1,
            exit_code: 1,
        }]
    );
    assert!(record.not_attempted.iter().any(|s| s.node == "node2"));
}

#[tokio::test]
async fn step_first_keepgoing_runs_every_step() {
    let executor = ScriptedExecutor::failing(&[("node1", 1)]);
    let dispatcher = Dispatcher::new(executor.clone());
    let def = two_by_three("step-first", true);

    let record = dispatcher
        .trigger(&def, &two_linux_nodes(), TriggerKind::Manual)
        .await
        .unwrap();

    assert_eq!(
        executor.calls(),
        pairs(&[
            ("node1", 0),
            ("node2", 0),
            ("node1", 1),
            ("node2", 1),
            ("node1", 2),
            ("node2", 2),
        ])
    );
    assert_eq!(record.status, RunStatus::Failed);
    assert!(!record.halted);
    assert_eq!(record.errors.len(), 1);
    assert!(record.not_attempted.is_empty());
    assert_eq!(record.combined_output("node2"), "one\ntwo\nthree");
}

#[tokio::test]
async fn plan_run_by_hand_matches_trigger() {
    let executor = ScriptedExecutor::failing(&[]);
    let dispatcher = Dispatcher::new(executor.clone());
    let def = two_by_three("step-first", false);
    let inventory = two_linux_nodes();

    let targets = resolve_targets(&def, &inventory).unwrap();
    let plan = plan(&def, targets).unwrap();
    let record = dispatcher.run(&def, &plan).await;

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(executor.calls().len(), plan.steps().len());
    assert!(executor.calls().iter().all(|(node, _)| node != "win"));
}

#[tokio::test]
async fn shell_executor_reports_real_exit_codes() {
    let mut local = Node::new("localhost");
    local.local = true;
    let inventory = NodeInventory::new(vec![local]).unwrap();
    let def = parse(
        r#"{
            "id": "local-check",
            "name": "local-check",
            "sequence": {
                "keepgoing": true,
                "commands": [
                    { "exec": "echo \"running on $NODE_NAME\"" },
                    { "exec": "exit 2" },
                    { "script": "echo after\necho err >&2" }
                ]
            }
        }"#,
    )
    .unwrap();

    let dispatcher = Dispatcher::new(Arc::new(ShellExecutor::new("/bin/sh")));
    let record = dispatcher
        .trigger(&def, &inventory, TriggerKind::Manual)
        .await
        .unwrap();

    assert_eq!(record.steps.len(), 3);
    assert_eq!(record.errors.len(), 1);
    assert_eq!(record.errors[0].command_index, 1);
    assert_eq!(record.errors[0].exit_code, 2);
    let output = record.combined_output("localhost");
    assert!(output.contains("running on localhost"));
    assert!(output.contains("after"));
    assert!(output.contains("err"));
}
