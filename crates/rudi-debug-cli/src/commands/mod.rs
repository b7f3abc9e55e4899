//! CLI command implementations.

pub mod config;
pub mod open;
pub mod set;
pub mod show;
pub mod snapshot;
pub mod watch;

use anyhow::Result;
use rudi_debug_core::{NodeId, RuleId, RuleModel};

/// Resolve a rule id (`12`) or a label path (`sub/bye`) to a node.
pub fn resolve_target(model: &RuleModel, target: &str) -> Result<NodeId> {
    if let Ok(id) = target.parse::<i32>() {
        return model
            .rule(RuleId(id))
            .ok_or_else(|| anyhow::anyhow!("No rule with id {id}"));
    }
    let labels: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();
    let labels = match labels.first() {
        Some(first) if *first == model.root_label() => &labels[1..],
        _ => &labels[..],
    };
    model
        .find_by_labels(labels)
        .ok_or_else(|| anyhow::anyhow!("No node at '{target}'"))
}
