// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local snapshots of submitted jobs and deployments

use crate::grouping::NodeName;
use crate::poll::Trackable;
use crate::testbed::Deployment;
use crate::testbed::DeploymentHandle;
use crate::testbed::DeploymentStatus;
use crate::testbed::Job;
use crate::testbed::JobHandle;
use crate::testbed::JobState;
use crate::testbed::SiteId;
use crate::testbed::Testbed;
use crate::testbed::TestbedError;
use async_trait::async_trait;

/// A submitted job and the last state fetched for it.
#[derive(Clone, Debug)]
pub struct TrackedJob {
    pub handle: JobHandle,
    pub job: Job,
}

impl TrackedJob {
    pub fn new(site: SiteId, job: Job) -> TrackedJob {
        TrackedJob { handle: JobHandle { site, uid: job.uid }, job }
    }

    pub fn site(&self) -> &SiteId {
        &self.handle.site
    }

    pub fn state(&self) -> JobState {
        self.job.state
    }

    pub fn is_running(&self) -> bool {
        self.job.state == JobState::Running
    }

    /// Whether the job is past running and never will be again.
    pub fn has_ended(&self) -> bool {
        matches!(self.job.state, JobState::Error | JobState::Terminated)
    }

    /// The nodes the job was given; empty until the job is running.
    pub fn assigned_nodes(&self) -> Vec<NodeName> {
        self.job
            .assigned_nodes
            .iter()
            .map(|node| NodeName::new(node.as_str()))
            .collect()
    }
}

#[async_trait]
impl Trackable for TrackedJob {
    fn describe(&self) -> String {
        self.handle.to_string()
    }

    async fn refresh(
        &mut self,
        testbed: &dyn Testbed,
    ) -> Result<(), TestbedError> {
        self.job = testbed.job_view(&self.handle).await?;
        Ok(())
    }
}

/// A submitted deployment and the last state fetched for it.
///
/// The node list is frozen at submission, so the deployment can still be
/// described after its job is gone.
#[derive(Clone, Debug)]
pub struct TrackedDeployment {
    pub handle: DeploymentHandle,
    /// The group label this deployment was submitted for.
    pub label: String,
    pub nodes: Vec<NodeName>,
    pub deployment: Deployment,
}

impl TrackedDeployment {
    pub fn new(
        site: SiteId,
        label: String,
        nodes: Vec<NodeName>,
        deployment: Deployment,
    ) -> TrackedDeployment {
        TrackedDeployment {
            handle: DeploymentHandle { site, uid: deployment.uid.clone() },
            label,
            nodes,
            deployment,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.deployment.status == DeploymentStatus::Terminated
    }
}

#[async_trait]
impl Trackable for TrackedDeployment {
    fn describe(&self) -> String {
        format!("{} ({})", self.handle, self.label)
    }

    async fn refresh(
        &mut self,
        testbed: &dyn Testbed,
    ) -> Result<(), TestbedError> {
        self.deployment = testbed.deployment_view(&self.handle).await?;
        Ok(())
    }
}
