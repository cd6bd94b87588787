// Result Store
// Request-scoped completion slots for every operation and group, backed by watch channels

use crate::execution::graph::DependencyGraph;
use crate::reference::{Lookup, ResultSource};
use crate::request::models::{OpKey, OperationError};

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum OperationState {
    Pending,
    Running,
    Succeeded(Value),
    Failed(OperationError),
    /// Succeeded, then discarded by its group's rollback
    RolledBack,
}

impl OperationState {
    /// Terminal states wake waiters; `RolledBack` only follows `Succeeded`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded(_) | OperationState::Failed(_) | OperationState::RolledBack
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::Running => "running",
            OperationState::Succeeded(_) => "succeeded",
            OperationState::Failed(_) => "failed",
            OperationState::RolledBack => "rolled back",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Pending,
    Running,
    Committed,
    RolledBack,
    Skipped,
}

impl GroupState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GroupState::Committed | GroupState::RolledBack | GroupState::Skipped
        )
    }
}

/// One slot per operation and per group; the slot map never changes after
/// construction, so concurrent tasks only synchronize on slot contents
#[derive(Debug)]
pub struct ResultStore {
    operations: HashMap<OpKey, watch::Sender<OperationState>>,
    groups: HashMap<String, watch::Sender<GroupState>>,
}

impl ResultStore {
    pub fn new(graph: &DependencyGraph) -> Self {
        let operations = graph
            .operations
            .iter()
            .map(|node| (node.key.clone(), watch::Sender::new(OperationState::Pending)))
            .collect();
        let groups = graph
            .groups
            .iter()
            .map(|group| (group.id.clone(), watch::Sender::new(GroupState::Pending)))
            .collect();

        Self { operations, groups }
    }

    pub fn state(&self, key: &OpKey) -> Option<OperationState> {
        self.operations.get(key).map(|slot| slot.borrow().clone())
    }

    pub fn mark_running(&self, key: &OpKey) {
        self.set_state(key, OperationState::Running);
    }

    /// Record an operation outcome; written exactly once per operation
    pub fn record(&self, key: &OpKey, outcome: Result<Value, OperationError>) {
        let state = match outcome {
            Ok(data) => OperationState::Succeeded(data),
            Err(error) => OperationState::Failed(error),
        };
        self.set_state(key, state);
    }

    fn set_state(&self, key: &OpKey, state: OperationState) {
        if let Some(slot) = self.operations.get(key) {
            slot.send_replace(state);
        }
    }

    /// Suspend until the operation reaches a terminal state
    pub async fn wait_for(&self, key: &OpKey) -> Option<OperationState> {
        let mut rx = self.operations.get(key)?.subscribe();
        let result = rx
            .wait_for(OperationState::is_terminal)
            .await
            .map(|state| (*state).clone());
        Some(match result {
            Ok(state) => state,
            Err(_) => rx.borrow().clone(),
        })
    }

    /// Discard the successes of a rolled-back group
    pub fn revoke<'a>(&self, keys: impl IntoIterator<Item = &'a OpKey>) {
        for key in keys {
            if let Some(slot) = self.operations.get(key) {
                slot.send_if_modified(|state| match state {
                    OperationState::Succeeded(_) => {
                        *state = OperationState::RolledBack;
                        true
                    }
                    _ => false,
                });
            }
        }
    }

    pub fn group_state(&self, tx_id: &str) -> Option<GroupState> {
        self.groups.get(tx_id).map(|slot| *slot.borrow())
    }

    pub fn set_group_state(&self, tx_id: &str, state: GroupState) {
        if let Some(slot) = self.groups.get(tx_id) {
            slot.send_replace(state);
        }
    }

    /// Suspend until the group has committed, rolled back or been skipped
    pub async fn wait_for_group(&self, tx_id: &str) -> Option<GroupState> {
        let mut rx = self.groups.get(tx_id)?.subscribe();
        let result = rx.wait_for(GroupState::is_terminal).await.map(|state| *state);
        Some(match result {
            Ok(state) => state,
            Err(_) => *rx.borrow(),
        })
    }
}

impl ResultSource for ResultStore {
    fn lookup(&self, key: &OpKey) -> Lookup {
        match self.operations.get(key) {
            None => Lookup::Unknown,
            Some(slot) => match &*slot.borrow() {
                OperationState::Succeeded(data) => Lookup::Ready(data.clone()),
                other => Lookup::NotSatisfied(other.label()),
            },
        }
    }
}
