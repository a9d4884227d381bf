//! Node inventory and target resolution.

mod node;
mod targets;

pub use node::{AttributeValue, Node, NodeRef};
pub use targets::resolve_targets;

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::job::RecordFormat;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed TOML inventory: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("malformed JSON inventory: {0}")]
    Json(#[from] serde_json::Error),
    #[error("node `{0}` is defined more than once")]
    DuplicateNode(String),
    #[error("node at position {0} has an empty nodename")]
    EmptyNodename(usize),
}

#[derive(Deserialize)]
struct InventoryDocument {
    #[serde(default)]
    nodes: Vec<Node>,
}

/// Nodes known to the dispatcher, in file order.
#[derive(Debug, Clone, Default)]
pub struct NodeInventory {
    nodes: Vec<NodeRef>,
    by_name: HashMap<String, usize>,
}

impl NodeInventory {
    pub fn new(nodes: Vec<Node>) -> Result<Self, InventoryError> {
        let mut inventory = Self::default();
        for (position, node) in nodes.into_iter().enumerate() {
            if node.nodename.trim().is_empty() {
                return Err(InventoryError::EmptyNodename(position));
            }
            if inventory.by_name.contains_key(&node.nodename) {
                return Err(InventoryError::DuplicateNode(node.nodename));
            }
            inventory
                .by_name
                .insert(node.nodename.clone(), inventory.nodes.len());
            inventory.nodes.push(Arc::new(node));
        }
        Ok(inventory)
    }

    /// Parses `[[nodes]]` tables, or JSON as `{"nodes": [...]}` or a bare array.
    pub fn parse(raw: &str) -> Result<Self, InventoryError> {
        let nodes = match RecordFormat::detect(raw) {
            RecordFormat::Json => {
                let value: serde_json::Value = serde_json::from_str(raw)?;
                if value.is_array() {
                    serde_json::from_value(value)?
                } else {
                    serde_json::from_value::<InventoryDocument>(value)?.nodes
                }
            }
            RecordFormat::Toml => toml::from_str::<InventoryDocument>(raw)?.nodes,
        };
        Self::new(nodes)
    }

    pub fn load(path: &Path) -> Result<Self, InventoryError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            error!(path = ?path, error = %e, "Failed to read node inventory.");
            InventoryError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        let inventory = Self::parse(&raw)?;
        info!(path = ?path, nodes = inventory.len(), "Node inventory loaded.");
        Ok(inventory)
    }

    pub fn get(&self, nodename: &str) -> Option<&NodeRef> {
        self.by_name.get(nodename).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn local_nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.iter().filter(|n| n.local)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODES_TOML: &str = r#"
[[nodes]]
nodename = "controller"
local = true
tags = ["ops"]

[[nodes]]
nodename = "web-01"
hostname = "10.0.0.11"
username = "deploy"
tags = ["web", "prod"]
osFamily = "linux"
rank = 2

[[nodes]]
nodename = "win-01"
osFamily = "windows"
rank = 1.5
"#;

    #[test]
    fn parses_toml_inventory() {
        let inventory = NodeInventory::parse(NODES_TOML).unwrap();
        assert_eq!(inventory.len(), 3);

        let web = inventory.get("web-01").unwrap();
        assert_eq!(web.host(), "10.0.0.11");
        assert_eq!(web.username.as_deref(), Some("deploy"));
        assert_eq!(web.attributes["osFamily"], AttributeValue::Text("linux".to_string()));
        assert_eq!(web.attributes["rank"], AttributeValue::Integer(2));
        assert_eq!(inventory.get("win-01").unwrap().attributes["rank"], AttributeValue::Float(1.5));

        let local: Vec<&str> = inventory.local_nodes().map(|n| n.nodename.as_str()).collect();
        assert_eq!(local, vec!["controller"]);
    }

    #[test]
    fn parses_json_inventory() {
        let listed = NodeInventory::parse(r#"[{"nodename": "a"}, {"nodename": "b", "local": true}]"#).unwrap();
        assert_eq!(listed.len(), 2);
        let wrapped = NodeInventory::parse(r#"{"nodes": [{"nodename": "a", "osFamily": "linux"}]}"#).unwrap();
        assert_eq!(wrapped.nodes()[0].attributes["osFamily"].to_string(), "linux");
    }

    #[test]
    fn rejects_duplicate_and_unnamed_nodes() {
        let err = NodeInventory::new(vec![Node::new("a"), Node::new("a")]).unwrap_err();
        assert!(matches!(err, InventoryError::DuplicateNode(name) if name == "a"));

        let err = NodeInventory::new(vec![Node::new("a"), Node::new(" ")]).unwrap_err();
        assert!(matches!(err, InventoryError::EmptyNodename(1)));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.toml");
        assert!(matches!(NodeInventory::load(&path), Err(InventoryError::Io { .. })));

        fs::write(&path, NODES_TOML).unwrap();
        assert_eq!(NodeInventory::load(&path).unwrap().len(), 3);
    }
}
