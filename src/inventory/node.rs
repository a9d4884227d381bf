use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::selector::NodeAttributes;

pub type NodeRef = Arc<Node>;

/// Extra node attribute as written in the inventory file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Flag(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Flag(v) => write!(f, "{v}"),
            AttributeValue::Integer(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Text(v) => f.write_str(v),
        }
    }
}

/// A target host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub nodename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Runs commands in-process instead of over ssh.
    #[serde(default)]
    pub local: bool,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Node {
    pub fn new(nodename: impl Into<String>) -> Self {
        Self {
            nodename: nodename.into(),
            hostname: None,
            username: None,
            tags: Vec::new(),
            local: false,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .insert(key.into(), AttributeValue::Text(value.into()));
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn host(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.nodename)
    }
}

impl NodeAttributes for Node {
    fn attribute(&self, key: &str) -> Option<Cow<'_, str>> {
        match key {
            "nodename" | "name" => Some(Cow::Borrowed(&self.nodename)),
            "hostname" => Some(Cow::Borrowed(self.host())),
            "username" => self.username.as_deref().map(Cow::Borrowed),
            _ => self.attributes.get(key).map(|value| match value {
                AttributeValue::Text(text) => Cow::Borrowed(text.as_str()),
                other => Cow::Owned(other.to_string()),
            }),
        }
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }
}
