use serde::{Deserialize, Serialize};
use std::fmt;

use super::enums::{DefaultTab, LogLevel, RankOrder, Setting, Strategy};
use super::options::JobOption;
use super::validation::ValidationError;

fn default_true() -> bool {
    true
}

fn default_log_level() -> Setting<LogLevel> {
    Setting::Known(LogLevel::Info)
}

fn default_tab() -> Setting<DefaultTab> {
    Setting::Known(DefaultTab::Nodes)
}

fn default_rank_order() -> Setting<RankOrder> {
    Setting::Known(RankOrder::Ascending)
}

/// A declarative job record: what to run, and on which nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_log_level")]
    pub loglevel: Setting<LogLevel>,
    #[serde(default = "default_true")]
    pub execution_enabled: bool,
    #[serde(default = "default_true")]
    pub schedule_enabled: bool,
    #[serde(default)]
    pub node_filter_editable: bool,
    #[serde(default = "default_tab")]
    pub default_tab: Setting<DefaultTab>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodefilters: Option<NodeFilters>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<JobOption>,
    pub sequence: Sequence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Quartz-style expression, evaluated by the external trigger engine.
    pub crontab: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFilters {
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub dispatch: DispatchOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOptions {
    #[serde(default)]
    pub keepgoing: bool,
    #[serde(default = "default_rank_order")]
    pub rank_order: Setting<RankOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Setting<Strategy>>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            keepgoing: false,
            rank_order: default_rank_order(),
            rank_attribute: None,
            strategy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    #[serde(default)]
    pub keepgoing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Setting<Strategy>>,
    pub commands: Vec<Command>,
}

/// One step of the sequence. The payload is opaque shell text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Command {
    pub fn exec(text: impl Into<String>) -> Self {
        Self {
            exec: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn script(text: impl Into<String>) -> Self {
        Self {
            script: Some(text.into()),
            ..Default::default()
        }
    }

    /// The shell text to run. `exec` wins if a malformed record carries both.
    pub fn payload(&self) -> Option<&str> {
        self.exec.as_deref().or(self.script.as_deref())
    }

    /// Short label for logs: the description, or the first line of the payload.
    pub fn label(&self) -> String {
        if let Some(description) = self.description.as_deref() {
            return description.to_string();
        }
        let first_line = self
            .payload()
            .and_then(|p| p.lines().find(|l| !l.trim().is_empty()))
            .unwrap_or("")
            .trim();
        if first_line.chars().count() > 60 {
            let truncated: String = first_line.chars().take(57).collect();
            format!("{truncated}...")
        } else {
            first_line.to_string()
        }
    }
}

/// What is asking to start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    /// Operator or API request.
    Manual,
    /// The cron trigger engine.
    Scheduled,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl JobDefinition {
    /// `executionEnabled` gates every trigger; `scheduleEnabled` additionally
    /// gates the cron engine, which also needs a schedule to act on.
    pub fn can_trigger(&self, kind: TriggerKind) -> bool {
        match kind {
            TriggerKind::Manual => self.execution_enabled,
            TriggerKind::Scheduled => {
                self.execution_enabled && self.schedule_enabled && self.schedule.is_some()
            }
        }
    }

    pub fn log_level(&self) -> LogLevel {
        self.loglevel.known().unwrap_or(LogLevel::Info)
    }

    /// `sequence.strategy`, then `nodefilters.dispatch.strategy`, then node-first.
    pub fn strategy(&self) -> Result<Strategy, ValidationError> {
        if let Some(setting) = &self.sequence.strategy {
            return setting.require("sequence.strategy");
        }
        if let Some(setting) = self
            .nodefilters
            .as_ref()
            .and_then(|nf| nf.dispatch.strategy.as_ref())
        {
            return setting.require("nodefilters.dispatch.strategy");
        }
        Ok(Strategy::NodeFirst)
    }

    pub fn node_keepgoing(&self) -> bool {
        self.nodefilters
            .as_ref()
            .map(|nf| nf.dispatch.keepgoing)
            .unwrap_or(false)
    }

    pub fn display_name(&self) -> String {
        match self.group.as_deref() {
            Some(group) if !group.is_empty() => format!("{group}/{}", self.name),
            _ => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobDefinition {
        JobDefinition {
            id: "job-1".to_string(),
            uuid: None,
            name: "diagnostics".to_string(),
            group: None,
            description: None,
            loglevel: LogLevel::Info.into(),
            execution_enabled: true,
            schedule_enabled: true,
            node_filter_editable: false,
            default_tab: DefaultTab::Nodes.into(),
            schedule: None,
            nodefilters: None,
            options: Vec::new(),
            sequence: Sequence {
                keepgoing: false,
                strategy: None,
                commands: vec![Command::exec("uptime")],
            },
        }
    }

    #[test]
    fn manual_trigger_follows_execution_enabled() {
        let mut def = job();
        assert!(def.can_trigger(TriggerKind::Manual));
        def.execution_enabled = false;
        assert!(!def.can_trigger(TriggerKind::Manual));
    }

    #[test]
    fn scheduled_trigger_needs_both_flags_and_a_schedule() {
        let mut def = job();
        assert!(!def.can_trigger(TriggerKind::Scheduled));

        def.schedule = Some(Schedule {
            crontab: "0 0/15 * * * ?".to_string(),
        });
        assert!(def.can_trigger(TriggerKind::Scheduled));

        def.schedule_enabled = false;
        assert!(!def.can_trigger(TriggerKind::Scheduled));
        assert!(def.can_trigger(TriggerKind::Manual));

        def.schedule_enabled = true;
        def.execution_enabled = false;
        assert!(!def.can_trigger(TriggerKind::Scheduled));
    }

    #[test]
    fn sequence_strategy_takes_precedence_over_dispatch_strategy() {
        let mut def = job();
        assert_eq!(def.strategy().unwrap(), Strategy::NodeFirst);

        def.nodefilters = Some(NodeFilters {
            filter: "osFamily:linux".to_string(),
            dispatch: DispatchOptions {
                strategy: Some(Strategy::StepFirst.into()),
                ..Default::default()
            },
        });
        assert_eq!(def.strategy().unwrap(), Strategy::StepFirst);

        def.sequence.strategy = Some(Strategy::NodeFirst.into());
        assert_eq!(def.strategy().unwrap(), Strategy::NodeFirst);

        def.sequence.strategy = Some(Setting::Unrecognized("parallel".to_string()));
        assert_eq!(def.strategy().unwrap_err().field, "sequence.strategy");
    }

    #[test]
    fn command_label_prefers_description() {
        let mut cmd = Command::script("\n#!/bin/bash\necho hi\n");
        assert_eq!(cmd.label(), "#!/bin/bash");
        cmd.description = Some("collect stats".to_string());
        assert_eq!(cmd.label(), "collect stats");
    }
}
