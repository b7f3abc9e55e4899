//! State aggregation and change subscriptions.
//!
//! Every node can carry subscriptions. Two kinds exist:
//!
//! - **aggregation** links, wired child → parent by the model builder, which
//!   recompute the parent import's state whenever a child changes;
//! - **observers**, registered by external components (the runtime sync
//!   client), which are told about every change of the nodes they watch.
//!
//! Both live in one table so that attaching and detaching is symmetric and
//! can be counted. Aggregation always completes, bottom-up, before any
//! observer is called.

use std::collections::HashMap;

use crate::error::{ModelError, ModelResult};
use crate::model::{NodeId, RuleId, RuleModel};
use crate::state::LoggingState;

/// A single state change of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub node: NodeId,
    /// Set when the node is a rule.
    pub rule: Option<RuleId>,
    pub old: LoggingState,
    pub new: LoggingState,
}

/// Receives state changes of the nodes it is subscribed to.
pub trait StateObserver: Send {
    fn on_state_changed(&mut self, change: &StateChange);
}

impl<F> StateObserver for F
where
    F: FnMut(&StateChange) + Send,
{
    fn on_state_changed(&mut self, change: &StateChange) {
        self(change)
    }
}

/// Handle returned when an observer is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    Aggregate { parent: NodeId },
    Observer(ObserverId),
}

/// Arena-indexed subscription table of a model.
#[derive(Default)]
pub(crate) struct Subscriptions {
    by_node: HashMap<NodeId, Vec<Subscription>>,
    /// Children registered for aggregation, per parent import.
    members: HashMap<NodeId, Vec<NodeId>>,
    observers: HashMap<ObserverId, Box<dyn StateObserver>>,
    next_observer: u64,
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions")
            .field("nodes", &self.by_node.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl RuleModel {
    /// Recompute `parent` whenever `child` changes.
    pub(crate) fn add_aggregation(&mut self, parent: NodeId, child: NodeId) {
        assert!(
            self.node(parent).is_import(),
            "aggregation parent {parent:?} is not an import"
        );
        self.subscriptions
            .by_node
            .entry(child)
            .or_default()
            .push(Subscription::Aggregate { parent });
        self.subscriptions.members.entry(parent).or_default().push(child);
    }

    /// Aggregated state over every registered child of `parent`.
    ///
    /// `RuleLess` children are ignored; `None` when no child qualifies.
    pub(crate) fn aggregate(&self, parent: NodeId) -> Option<LoggingState> {
        let members = self.subscriptions.members.get(&parent)?;
        let mut result = None;
        for state in members
            .iter()
            .map(|c| self.state(*c))
            .filter(|s| *s != LoggingState::RuleLess)
        {
            match result {
                None => result = Some(state),
                Some(current) if current != state => return Some(LoggingState::Mixed),
                Some(_) => {}
            }
        }
        result
    }

    /// Set the logging state of a node.
    ///
    /// On a rule this changes the rule and re-aggregates its ancestors. On an
    /// import it behaves like [`RuleModel::set_all_children_states`].
    pub fn set_state(&mut self, id: NodeId, state: LoggingState) -> ModelResult<()> {
        if state.is_derived() {
            return Err(ModelError::DerivedState { state });
        }
        if self.node(id).is_import() {
            return self.set_all_children_states(id, state);
        }

        let mut changes = Vec::new();
        self.assign(id, state, &mut changes);
        self.dispatch(&changes);
        Ok(())
    }

    /// Set the logging state of a rule by id.
    pub fn set_rule_state(&mut self, rule: RuleId, state: LoggingState) -> ModelResult<()> {
        let id = self.rule(rule).ok_or(ModelError::RuleNotFound { id: rule })?;
        self.set_state(id, state)
    }

    /// Set every rule below `id` to `state` in one sweep.
    ///
    /// Rules are written directly, the subtree is then re-aggregated once
    /// bottom-up and the change propagated to the ancestors of `id`.
    pub fn set_all_children_states(&mut self, id: NodeId, state: LoggingState) -> ModelResult<()> {
        if state.is_derived() {
            return Err(ModelError::DerivedState { state });
        }
        if self.node(id).is_rule() {
            return self.set_state(id, state);
        }

        let subtree = self.descendants_post_order(id);
        let mut changes = Vec::new();

        let (rules, imports): (Vec<NodeId>, Vec<NodeId>) =
            subtree.into_iter().partition(|n| self.node(*n).is_rule());

        for node in rules {
            self.write(node, state, &mut changes);
        }
        for node in imports {
            if let Some(aggregated) = self.aggregate(node) {
                self.write(node, aggregated, &mut changes);
            }
        }
        for parent in self.aggregation_parents(id) {
            self.recompute(parent, &mut changes);
        }

        self.dispatch(&changes);
        Ok(())
    }

    /// Register `observer` on the given nodes.
    pub fn subscribe<I>(&mut self, nodes: I, observer: Box<dyn StateObserver>) -> ObserverId
    where
        I: IntoIterator<Item = NodeId>,
    {
        let id = ObserverId(self.subscriptions.next_observer);
        self.subscriptions.next_observer += 1;
        for node in nodes {
            self.subscriptions
                .by_node
                .entry(node)
                .or_default()
                .push(Subscription::Observer(id));
        }
        self.subscriptions.observers.insert(id, observer);
        id
    }

    /// Register `observer` on every rule of the model.
    pub fn subscribe_rules(&mut self, observer: Box<dyn StateObserver>) -> ObserverId {
        let rules = self.rule_nodes();
        self.subscribe(rules, observer)
    }

    /// Remove an observer and all of its node subscriptions.
    ///
    /// Returns the number of node subscriptions removed.
    pub fn unsubscribe(&mut self, id: ObserverId) -> usize {
        let mut removed = 0;
        for subs in self.subscriptions.by_node.values_mut() {
            let before = subs.len();
            subs.retain(|s| *s != Subscription::Observer(id));
            removed += before - subs.len();
        }
        self.subscriptions.by_node.retain(|_, subs| !subs.is_empty());
        self.subscriptions.observers.remove(&id);
        removed
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.subscriptions.observers.len()
    }

    /// Number of observer subscriptions across all nodes.
    pub fn observer_subscription_count(&self) -> usize {
        self.subscriptions
            .by_node
            .values()
            .flatten()
            .filter(|s| matches!(s, Subscription::Observer(_)))
            .count()
    }

    /// Number of subscriptions (aggregation and observer) on one node.
    pub fn subscription_count(&self, node: NodeId) -> usize {
        self.subscriptions
            .by_node
            .get(&node)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn aggregation_parents(&self, node: NodeId) -> Vec<NodeId> {
        self.subscriptions
            .by_node
            .get(&node)
            .map(|subs| {
                subs.iter()
                    .filter_map(|s| match s {
                        Subscription::Aggregate { parent } => Some(*parent),
                        Subscription::Observer(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write a state and propagate it through the aggregation links.
    fn assign(&mut self, node: NodeId, state: LoggingState, changes: &mut Vec<StateChange>) {
        if !self.write(node, state, changes) {
            return;
        }
        for parent in self.aggregation_parents(node) {
            self.recompute(parent, changes);
        }
    }

    fn recompute(&mut self, parent: NodeId, changes: &mut Vec<StateChange>) {
        if let Some(state) = self.aggregate(parent) {
            self.assign(parent, state, changes);
        }
    }

    /// Write a state without propagation; returns whether it changed.
    fn write(&mut self, node: NodeId, state: LoggingState, changes: &mut Vec<StateChange>) -> bool {
        let old = self.state(node);
        if old == state {
            return false;
        }
        let rule = self.node(node).rule_id();
        self.set_raw_state(node, state);
        changes.push(StateChange {
            node,
            rule,
            old,
            new: state,
        });
        true
    }

    fn dispatch(&mut self, changes: &[StateChange]) {
        for change in changes {
            let Some(subs) = self.subscriptions.by_node.get(&change.node) else {
                continue;
            };
            let observers: Vec<ObserverId> = subs
                .iter()
                .filter_map(|s| match s {
                    Subscription::Observer(id) => Some(*id),
                    Subscription::Aggregate { .. } => None,
                })
                .collect();
            for id in observers {
                if let Some(observer) = self.subscriptions.observers.get_mut(&id) {
                    observer.on_state_changed(change);
                }
            }
        }
    }
}
