// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request and response bodies of the cluster-management API

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wrapper used by every listing endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Collection<T> {
    pub items: Vec<T>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Site {
    pub uid: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub node_uid: Option<String>,
    pub system_state: SystemState,
    pub hardware_state: HardwareState,
}

impl NodeStatus {
    /// A node can be reserved when it is both free and healthy.
    pub fn is_available(&self) -> bool {
        self.system_state == SystemState::Free
            && self.hardware_state == HardwareState::Alive
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    Free,
    Busy,
    Besteffort,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareState {
    Alive,
    Absent,
    Dead,
    Suspected,
    #[serde(other)]
    Unknown,
}

/// Body of a reservation request.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct JobSubmit {
    /// Resource expression, e.g. `nodes=4,walltime=00:30:00`.
    pub resources: String,
    pub command: String,
    pub types: Vec<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Job {
    pub uid: u64,
    pub state: JobState,
    /// Only populated once the job is running.
    #[serde(default)]
    pub assigned_nodes: Vec<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Launching,
    Running,
    Hold,
    Error,
    Terminated,
    #[serde(other)]
    Unknown,
}

/// Body of an image installation request.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct DeploymentSubmit {
    pub environment: String,
    pub nodes: Vec<String>,
    /// Public key material installed for the image's root account.
    pub key: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Deployment {
    pub uid: String,
    #[serde(default)]
    pub site_uid: Option<String>,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Per-node outcome, only populated once the deployment terminated.
    #[serde(default)]
    pub result: BTreeMap<String, NodeResult>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Waiting,
    Processing,
    Terminated,
    Error,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct NodeResult {
    pub state: String,
}
