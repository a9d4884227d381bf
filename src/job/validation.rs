use std::collections::BTreeSet;
use thiserror::Error;

use super::models::JobDefinition;
use super::options;
use crate::selector::NodeSelector;

/// Minimum and maximum field counts of a Quartz cron expression
/// (seconds through day-of-week, plus an optional year).
const CRONTAB_FIELDS: std::ops::RangeInclusive<usize> = 6..=7;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid `{field}`: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Fails on the first violated invariant, checked in record field order.
pub fn validate(def: &JobDefinition) -> Result<(), ValidationError> {
    match collect_violations(def).into_iter().next() {
        Some(violation) => Err(violation),
        None => Ok(()),
    }
}

/// Same checks as [`validate`], but reports every violation.
pub fn validate_all(def: &JobDefinition) -> Result<(), Vec<ValidationError>> {
    let violations = collect_violations(def);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn collect_violations(def: &JobDefinition) -> Vec<ValidationError> {
    let mut violations = Vec::new();
    let mut check = |result: Result<(), ValidationError>| {
        if let Err(e) = result {
            violations.push(e);
        }
    };

    check(non_blank("id", &def.id));
    if let Some(uuid) = &def.uuid {
        check(non_blank("uuid", uuid));
    }
    check(non_blank("name", &def.name));
    check(def.loglevel.require("loglevel").map(|_| ()));
    check(def.default_tab.require("defaultTab").map(|_| ()));

    if let Some(schedule) = &def.schedule {
        let fields = schedule.crontab.split_whitespace().count();
        if !CRONTAB_FIELDS.contains(&fields) {
            check(Err(ValidationError::new(
                "schedule.crontab",
                format!(
                    "expected {} to {} fields, found {fields}",
                    CRONTAB_FIELDS.start(),
                    CRONTAB_FIELDS.end()
                ),
            )));
        }
    }

    if let Some(nodefilters) = &def.nodefilters {
        check(
            NodeSelector::parse(&nodefilters.filter)
                .map(|_| ())
                .map_err(|e| ValidationError::new("nodefilters.filter", e.to_string())),
        );
        let dispatch = &nodefilters.dispatch;
        check(
            dispatch
                .rank_order
                .require("nodefilters.dispatch.rankOrder")
                .map(|_| ()),
        );
        if let Some(attribute) = &dispatch.rank_attribute {
            check(non_blank("nodefilters.dispatch.rankAttribute", attribute));
        }
        if let Some(strategy) = &dispatch.strategy {
            check(
                strategy
                    .require("nodefilters.dispatch.strategy")
                    .map(|_| ()),
            );
        }
    }

    let mut declared = BTreeSet::new();
    for (index, option) in def.options.iter().enumerate() {
        let field = format!("options[{index}]");
        if !options::is_valid_name(&option.name) {
            check(Err(ValidationError::new(
                format!("{field}.name"),
                format!("`{}` is not a valid option name", option.name),
            )));
        } else if !declared.insert(option.name.as_str()) {
            check(Err(ValidationError::new(
                format!("{field}.name"),
                format!("option `{}` is declared twice", option.name),
            )));
        }
        if option.enforced && option.values.is_empty() {
            check(Err(ValidationError::new(
                format!("{field}.values"),
                "an enforced option needs a list of allowed values",
            )));
        }
        if let Some(value) = &option.value {
            if option.enforced && !option.values.is_empty() && !option.values.contains(value) {
                check(Err(ValidationError::new(
                    format!("{field}.value"),
                    "default is not one of the allowed values",
                )));
            }
        }
    }

    if let Some(strategy) = &def.sequence.strategy {
        check(strategy.require("sequence.strategy").map(|_| ()));
    }

    if def.sequence.commands.is_empty() {
        check(Err(ValidationError::new(
            "sequence.commands",
            "at least one command is required",
        )));
    }
    for (index, command) in def.sequence.commands.iter().enumerate() {
        let field = format!("sequence.commands[{index}]");
        for name in command.payload().into_iter().flat_map(options::references) {
            if !def.options.iter().any(|option| option.name == name) {
                check(Err(ValidationError::new(
                    field.as_str(),
                    format!("references undeclared option `{name}`"),
                )));
            }
        }
        let result = match (command.exec.as_deref(), command.script.as_deref()) {
            (Some(_), Some(_)) => Err(ValidationError::new(
                field,
                "set either `exec` or `script`, not both",
            )),
            (None, None) => Err(ValidationError::new(field, "`exec` or `script` is required")),
            (Some(payload), None) | (None, Some(payload)) if payload.trim().is_empty() => {
                Err(ValidationError::new(field, "command payload is blank"))
            }
            _ => Ok(()),
        };
        check(result);
    }

    violations
}

fn non_blank(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new(field, "must not be empty"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::enums::{LogLevel, Setting};
    use crate::job::loader::parse;
    use crate::job::models::{Command, Schedule};
    use crate::job::options::JobOption;

    const VALID: &str = r#"{
        "id": "5f1c",
        "name": "system-diagnostics",
        "loglevel": "INFO",
        "nodefilters": {
            "filter": "osFamily:linux",
            "dispatch": { "keepgoing": false, "rankOrder": "ascending" }
        },
        "sequence": {
            "keepgoing": false,
            "strategy": "node-first",
            "commands": [ { "exec": "uptime" } ]
        }
    }"#;

    #[test]
    fn accepts_a_well_formed_record() {
        let def = parse(VALID).unwrap();
        assert_eq!(validate(&def), Ok(()));
        assert_eq!(validate_all(&def), Ok(()));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut def = parse(VALID).unwrap();
        def.loglevel = Setting::Unrecognized("VERBOSE".to_string());
        let err = validate(&def).unwrap_err();
        assert_eq!(err.field, "loglevel");
    }

    #[test]
    fn rejects_empty_command_list() {
        let mut def = parse(VALID).unwrap();
        def.sequence.commands.clear();
        let err = validate(&def).unwrap_err();
        assert_eq!(err.field, "sequence.commands");
    }

    #[test]
    fn rejects_malformed_node_filter() {
        let mut def = parse(VALID).unwrap();
        def.nodefilters.as_mut().unwrap().filter = "osFamily:".to_string();
        let err = validate(&def).unwrap_err();
        assert_eq!(err.field, "nodefilters.filter");

        def.nodefilters.as_mut().unwrap().filter = "   ".to_string();
        assert_eq!(validate(&def).unwrap_err().field, "nodefilters.filter");
    }

    #[test]
    fn rejects_ambiguous_or_blank_commands() {
        let mut def = parse(VALID).unwrap();
        def.sequence.commands = vec![
            Command::exec("uptime"),
            Command {
                exec: Some("df -h".to_string()),
                script: Some("free -m".to_string()),
                description: None,
            },
        ];
        assert_eq!(validate(&def).unwrap_err().field, "sequence.commands[1]");

        def.sequence.commands = vec![Command::script("  \n ")];
        assert_eq!(validate(&def).unwrap_err().field, "sequence.commands[0]");

        def.sequence.commands = vec![Command::default()];
        assert_eq!(validate(&def).unwrap_err().field, "sequence.commands[0]");
    }

    #[test]
    fn checks_crontab_shape() {
        let mut def = parse(VALID).unwrap();
        def.schedule = Some(Schedule {
            crontab: "*/5 * * * *".to_string(),
        });
        assert_eq!(validate(&def).unwrap_err().field, "schedule.crontab");

        def.schedule = Some(Schedule {
            crontab: "0 */5 * * * ?".to_string(),
        });
        assert_eq!(validate(&def), Ok(()));
    }

    #[test]
    fn fail_fast_reports_first_field_while_collect_reports_all() {
        let mut def = parse(VALID).unwrap();
        def.name = String::new();
        def.loglevel = Setting::Unrecognized("VERBOSE".to_string());
        def.sequence.commands.clear();

        let first = validate(&def).unwrap_err();
        assert_eq!(first.field, "name");

        let all = validate_all(&def).unwrap_err();
        let fields: Vec<&str> = all.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "loglevel", "sequence.commands"]);
    }

    #[test]
    fn checks_option_declarations_and_references() {
        let mut def = parse(VALID).unwrap();
        def.options = vec![
            JobOption {
                name: "sections".to_string(),
                value: Some("all".to_string()),
                values: vec!["all".to_string(), "summary".to_string()],
                enforced: true,
                ..Default::default()
            },
            JobOption {
                name: "api_key".to_string(),
                secure: true,
                ..Default::default()
            },
        ];
        def.sequence.commands = vec![Command::exec("stats --${option.sections} --key ${option.api_key}")];
        assert_eq!(validate(&def), Ok(()));

        def.sequence.commands = vec![Command::exec("stats ${option.section}")];
        let err = validate(&def).unwrap_err();
        assert_eq!(err.field, "sequence.commands[0]");
        assert!(err.reason.contains("`section`"));

        def.sequence.commands = vec![Command::exec("uptime")];
        def.options[0].value = Some("verbose".to_string());
        def.options[1].name = "sections".to_string();
        let fields: Vec<String> = validate_all(&def)
            .unwrap_err()
            .into_iter()
            .map(|v| v.field)
            .collect();
        assert_eq!(fields, vec!["options[0].value", "options[1].name"]);

        def.options.truncate(1);
        def.options[0].name = "2fast".to_string();
        def.options[0].values.clear();
        let fields: Vec<String> = validate_all(&def)
            .unwrap_err()
            .into_iter()
            .map(|v| v.field)
            .collect();
        assert_eq!(fields, vec!["options[0].name", "options[0].values"]);
    }

    #[test]
    fn blank_uuid_is_rejected_but_missing_uuid_is_fine() {
        let mut def = parse(VALID).unwrap();
        assert!(def.uuid.is_none());
        def.uuid = Some(" ".to_string());
        assert_eq!(validate(&def).unwrap_err().field, "uuid");
        def.uuid = Some("5f1c".to_string());
        def.loglevel = LogLevel::Debug.into();
        assert_eq!(validate(&def), Ok(()));
    }
}
