//! Run parameters declared by a job.
//!
//! Commands see each option as `JOB_OPTION_<NAME>` in their environment, and
//! `${option.<name>}` inside a payload is replaced before the run starts.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

use super::models::{Command, JobDefinition};
use super::validation::ValidationError;
use crate::redact::Redactor;

const ENV_PREFIX: &str = "JOB_OPTION_";

lazy_static! {
    static ref OPTION_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").unwrap();
    static ref OPTION_REFERENCE: Regex = Regex::new(r"\$\{option\.([A-Za-z0-9_.-]+)\}").unwrap();
}

/// Values supplied for one run, by option name.
pub type OptionValues = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOption {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Masked wherever run output, logs or plans are shown.
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    /// Only `values` are accepted.
    #[serde(default)]
    pub enforced: bool,
}

fn env_name(option: &str) -> String {
    let suffix: String = option
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{ENV_PREFIX}{suffix}")
}

pub fn is_valid_name(name: &str) -> bool {
    OPTION_NAME.is_match(name)
}

/// Option names a payload refers to through `${option.<name>}`.
pub fn references(payload: &str) -> impl Iterator<Item = &str> {
    OPTION_REFERENCE
        .captures_iter(payload)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// Option values of one run, after defaults and checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOptions {
    values: BTreeMap<String, String>,
    redactor: Redactor,
}

impl ResolvedOptions {
    pub const fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
            redactor: Redactor::empty(),
        }
    }

    /// Applies `supplied` over the job's defaults. Unknown names, missing
    /// required values and values outside an enforced list are rejected.
    pub fn resolve(def: &JobDefinition, supplied: &OptionValues) -> Result<Self, ValidationError> {
        if let Some(unknown) = supplied
            .keys()
            .find(|name| !def.options.iter().any(|option| &option.name == *name))
        {
            return Err(ValidationError::new(
                format!("options.{unknown}"),
                "not declared by the job",
            ));
        }

        let mut values = BTreeMap::new();
        let mut secrets = Vec::new();
        for option in &def.options {
            let field = format!("options.{}", option.name);
            let Some(value) = supplied.get(&option.name).or(option.value.as_ref()) else {
                if option.required {
                    return Err(ValidationError::new(field, "a value is required"));
                }
                continue;
            };
            if option.required && value.is_empty() {
                return Err(ValidationError::new(field, "a value is required"));
            }
            if option.enforced && !option.values.contains(value) {
                let shown = if option.secure { Cow::Borrowed("value") } else { Cow::Owned(format!("`{value}`")) };
                return Err(ValidationError::new(
                    field,
                    format!("{shown} is not one of: {}", option.values.join(", ")),
                ));
            }
            if option.secure {
                secrets.push(value.clone());
            }
            values.insert(option.name.clone(), value.clone());
        }

        Ok(Self {
            values,
            redactor: Redactor::new(secrets),
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `JOB_OPTION_<NAME>` pairs for the command environment.
    pub fn env_vars(&self) -> impl Iterator<Item = (String, &str)> + '_ {
        self.values
            .iter()
            .map(|(name, value)| (env_name(name), value.as_str()))
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Replaces `${option.<name>}` with the option value; options without a
    /// value expand to nothing.
    pub fn expand<'t>(&self, text: &'t str) -> Cow<'t, str> {
        OPTION_REFERENCE.replace_all(text, |caps: &Captures<'_>| {
            self.get(&caps[1]).unwrap_or_default().to_string()
        })
    }

    /// [`Command::label`] with secure values masked before truncation.
    pub fn label(&self, command: &Command) -> String {
        let mask = |text: &String| self.redactor.redact(text).into_owned();
        Command {
            exec: command.exec.as_ref().map(mask),
            script: command.script.as_ref().map(mask),
            description: command.description.as_ref().map(mask),
        }
        .label()
    }

    pub fn expand_command(&self, command: &Command) -> Command {
        Command {
            exec: command.exec.as_deref().map(|p| self.expand(p).into_owned()),
            script: command.script.as_deref().map(|p| self.expand(p).into_owned()),
            description: command.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::parse;

    const SERVICE_CHECK: &str = r#"{
        "id": "service-check",
        "name": "service-check",
        "options": [
            { "name": "radarr_url", "value": "http://10.0.0.5:7878" },
            { "name": "radarr_api_key", "required": true, "secure": true },
            { "name": "sections", "value": "uptime,disk", "values": ["uptime,disk", "cpu"], "enforced": true },
            { "name": "comment" }
        ],
        "sequence": { "commands": [
            { "exec": "curl -H \"X-Api-Key: ${option.radarr_api_key}\" ${option.radarr_url}/api/v3/system/status" }
        ] }
    }"#;

    fn supplied(pairs: &[(&str, &str)]) -> OptionValues {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_and_supplied_values_merge() {
        let def = parse(SERVICE_CHECK).unwrap();
        let options =
            ResolvedOptions::resolve(&def, &supplied(&[("radarr_api_key", "0123456789abcdef")])).unwrap();

        assert_eq!(options.get("radarr_url"), Some("http://10.0.0.5:7878"));
        assert_eq!(options.get("sections"), Some("uptime,disk"));
        assert_eq!(options.get("comment"), None);

        let env: Vec<(String, &str)> = options.env_vars().collect();
        assert!(env.contains(&("JOB_OPTION_RADARR_API_KEY".to_string(), "0123456789abcdef")));
        assert!(env.contains(&("JOB_OPTION_SECTIONS".to_string(), "uptime,disk")));
    }

    #[test]
    fn rejects_unknown_missing_and_unlisted_values() {
        let def = parse(SERVICE_CHECK).unwrap();

        let err = ResolvedOptions::resolve(&def, &OptionValues::new()).unwrap_err();
        assert_eq!(err.field, "options.radarr_api_key");

        let err = ResolvedOptions::resolve(
            &def,
            &supplied(&[("radarr_api_key", "k"), ("sonarr_url", "http://x")]),
        )
        .unwrap_err();
        assert_eq!(err.field, "options.sonarr_url");

        let err = ResolvedOptions::resolve(
            &def,
            &supplied(&[("radarr_api_key", "k"), ("sections", "memory")]),
        )
        .unwrap_err();
        assert_eq!(err.field, "options.sections");
        assert!(err.reason.contains("`memory`"));
    }

    #[test]
    fn expands_references_and_masks_secrets() {
        let def = parse(SERVICE_CHECK).unwrap();
        let options =
            ResolvedOptions::resolve(&def, &supplied(&[("radarr_api_key", "0123456789abcdef")])).unwrap();

        let command = options.expand_command(&def.sequence.commands[0]);
        let payload = command.payload().unwrap();
        assert_eq!(
            payload,
            "curl -H \"X-Api-Key: 0123456789abcdef\" http://10.0.0.5:7878/api/v3/system/status"
        );
        assert_eq!(
            options.redactor().redact(payload),
            "curl -H \"X-Api-Key: 0123********cdef\" http://10.0.0.5:7878/api/v3/system/status"
        );
        assert_eq!(options.expand("[${option.comment}]"), "[]");
    }

    #[test]
    fn names_and_references() {
        assert!(is_valid_name("radarr_url"));
        assert!(is_valid_name("db.host"));
        assert!(!is_valid_name("1st"));
        assert!(!is_valid_name("with space"));

        let found: Vec<&str> = references("${option.a} $HOME ${option.b.c} ${opt.d}").collect();
        assert_eq!(found, vec!["a", "b.c"]);
        assert_eq!(env_name("db.host-name"), "JOB_OPTION_DB_HOST_NAME");
    }
}
