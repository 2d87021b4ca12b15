// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Splitting a job's nodes into deployment batches

use crate::testbed::SiteId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of a reservable machine, e.g. `paravance-12.rennes.grid5000.fr`.
///
/// The part before the first `-` names the cluster the node belongs to.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    const CLUSTER_SEPARATOR: char = '-';

    pub fn new(name: impl Into<String>) -> NodeName {
        NodeName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The cluster-of-origin prefix of this node's name.
    pub fn cluster(&self) -> &str {
        self.0
            .split_once(Self::CLUSTER_SEPARATOR)
            .map_or(self.0.as_str(), |(cluster, _)| cluster)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(value: &str) -> Self {
        NodeName::new(value)
    }
}

/// How a job's assigned nodes are batched into deployments.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingStrategy {
    /// A single deployment covering every node of the job.
    WholeJob,
    /// One deployment per cluster the job's nodes come from.
    PerCluster,
}

impl fmt::Display for GroupingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingStrategy::WholeJob => f.write_str("whole-job"),
            GroupingStrategy::PerCluster => f.write_str("per-cluster"),
        }
    }
}

/// One batch of nodes that will become one deployment request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeGroup {
    /// The site for whole-job groups, the cluster for per-cluster groups.
    pub label: String,
    pub nodes: Vec<NodeName>,
}

impl GroupingStrategy {
    /// Partitions `nodes` (assigned to a job at `site`) into batches.
    ///
    /// Every node ends up in exactly one group and no group is empty.
    /// Per-cluster groups are ordered by cluster name and keep the job's
    /// node order within each group.
    pub fn group(&self, site: &SiteId, nodes: &[NodeName]) -> Vec<NodeGroup> {
        if nodes.is_empty() {
            return Vec::new();
        }

        match self {
            GroupingStrategy::WholeJob => vec![NodeGroup {
                label: site.to_string(),
                nodes: nodes.to_vec(),
            }],
            GroupingStrategy::PerCluster => {
                let mut clusters: BTreeMap<&str, Vec<NodeName>> =
                    BTreeMap::new();
                for node in nodes {
                    clusters
                        .entry(node.cluster())
                        .or_default()
                        .push(node.clone());
                }
                clusters
                    .into_iter()
                    .map(|(cluster, nodes)| NodeGroup {
                        label: cluster.to_string(),
                        nodes,
                    })
                    .collect()
            }
        }
    }
}
