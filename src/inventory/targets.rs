use std::cmp::Ordering;
use tracing::debug;

use super::{Node, NodeInventory, NodeRef};
use crate::error::JobError;
use crate::job::{JobDefinition, RankOrder};
use crate::selector::{NodeAttributes, NodeSelector};

const DEFAULT_RANK_ATTRIBUTE: &str = "nodename";

/// Evaluates the job's node filter against the inventory and orders the
/// matches by rank. A job without `nodefilters` runs on the local node(s).
/// Zero matches is a valid, empty result.
pub fn resolve_targets(def: &JobDefinition, inventory: &NodeInventory) -> Result<Vec<NodeRef>, JobError> {
    let Some(nodefilters) = &def.nodefilters else {
        let local: Vec<NodeRef> = inventory.local_nodes().cloned().collect();
        debug!(job_id = %def.id, targets = local.len(), "No node filter, targeting local nodes.");
        return Ok(local);
    };

    let selector = NodeSelector::parse(&nodefilters.filter)?;
    let order = nodefilters
        .dispatch
        .rank_order
        .require("nodefilters.dispatch.rankOrder")?;
    let attribute = nodefilters
        .dispatch
        .rank_attribute
        .as_deref()
        .unwrap_or(DEFAULT_RANK_ATTRIBUTE);

    let mut targets: Vec<NodeRef> = inventory
        .nodes()
        .iter()
        .filter(|node| selector.matches::<Node>(node))
        .cloned()
        .collect();
    targets.sort_by(|a, b| compare_rank(a, b, attribute, order));

    debug!(
        job_id = %def.id,
        filter = %selector,
        rank_attribute = attribute,
        rank_order = %order,
        targets = targets.len(),
        "Resolved job targets."
    );
    Ok(targets)
}

/// Nodes lacking the rank attribute go last in either direction; ties fall
/// back to the node name.
fn compare_rank(a: &NodeRef, b: &NodeRef, attribute: &str, order: RankOrder) -> Ordering {
    let by_rank = match (a.attribute(attribute), b.attribute(attribute)) {
        (Some(x), Some(y)) => {
            let ordering = compare_values(&x, &y);
            match order {
                RankOrder::Ascending => ordering,
                RankOrder::Descending => ordering.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_rank.then_with(|| a.nodename.cmp(&b.nodename))
}

/// Finite numbers sort before everything else and compare numerically; the
/// rest (including `NaN` and `inf`) compare as text.
fn compare_values(x: &str, y: &str) -> Ordering {
    match (numeric_rank(x), numeric_rank(y)) {
        (Some(a), Some(b)) => a.total_cmp(&b).then_with(|| x.cmp(y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => x.cmp(y),
    }
}

fn numeric_rank(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}
