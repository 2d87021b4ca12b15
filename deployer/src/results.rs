// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-node outcomes collected from terminated deployments

use crate::grouping::NodeName;
use crate::testbed::Deployment;
use std::collections::BTreeMap;

/// What the installer reported for one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeOutcome {
    /// The image was installed (`OK`).
    Deployed,
    /// The installer gave up on the node (`KO`).
    Failed,
    /// Any other state string, kept verbatim.
    Other(String),
}

impl NodeOutcome {
    pub fn is_deployed(&self) -> bool {
        matches!(self, NodeOutcome::Deployed)
    }
}

impl From<&str> for NodeOutcome {
    fn from(state: &str) -> Self {
        match state {
            "OK" => NodeOutcome::Deployed,
            "KO" => NodeOutcome::Failed,
            other => NodeOutcome::Other(other.to_string()),
        }
    }
}

/// Accumulates node outcomes; a later record for the same node replaces
/// the earlier one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Results {
    outcomes: BTreeMap<NodeName, NodeOutcome>,
}

impl Results {
    pub fn new() -> Results {
        Results::default()
    }

    /// Copies the per-node result map of `deployment`.
    pub fn record(&mut self, deployment: &Deployment) {
        for (node, result) in &deployment.result {
            self.outcomes.insert(
                NodeName::new(node.as_str()),
                NodeOutcome::from(result.state.as_str()),
            );
        }
    }

    /// Folds `other` into `self`, `other` winning on conflicts.
    pub fn merge(&mut self, other: &Results) {
        self.outcomes.extend(
            other.outcomes.iter().map(|(n, o)| (n.clone(), o.clone())),
        );
    }

    /// Number of nodes with any recorded outcome.
    pub fn recorded(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_deployed()).count()
    }

    pub fn get(&self, node: &NodeName) -> Option<&NodeOutcome> {
        self.outcomes.get(node)
    }
}
