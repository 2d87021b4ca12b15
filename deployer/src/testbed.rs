// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The remote operations the deployer relies on
//!
//! [`Testbed`] is implemented by the HTTP [`testbed_client::Client`] and by
//! the in-memory simulator in [`crate::test_util`].

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub use testbed_client::types::Deployment;
pub use testbed_client::types::DeploymentStatus;
pub use testbed_client::types::DeploymentSubmit;
pub use testbed_client::types::Job;
pub use testbed_client::types::JobState;
pub use testbed_client::types::JobSubmit;
pub use testbed_client::types::NodeStatus;

/// Identifier of an administrative site.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(uid: impl Into<String>) -> SiteId {
        SiteId(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(value: &str) -> Self {
        SiteId::new(value)
    }
}

/// Enough information to refresh or delete a job.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle {
    pub site: SiteId,
    pub uid: u64,
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/jobs/{}", self.site, self.uid)
    }
}

/// Enough information to refresh or delete a deployment.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeploymentHandle {
    pub site: SiteId,
    pub uid: String,
}

impl fmt::Display for DeploymentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/deployments/{}", self.site, self.uid)
    }
}

#[derive(Debug, Error)]
pub enum TestbedError {
    #[error("testbed API request failed")]
    Client(#[from] testbed_client::Error),
    #[error("request rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Testbed: Send + Sync {
    async fn site_list(&self) -> Result<Vec<SiteId>, TestbedError>;

    async fn site_status(
        &self,
        site: &SiteId,
    ) -> Result<Vec<NodeStatus>, TestbedError>;

    async fn job_submit(
        &self,
        site: &SiteId,
        body: &JobSubmit,
    ) -> Result<Job, TestbedError>;

    async fn job_view(&self, job: &JobHandle) -> Result<Job, TestbedError>;

    /// Must succeed for jobs that are already gone.
    async fn job_delete(&self, job: &JobHandle) -> Result<(), TestbedError>;

    async fn deployment_submit(
        &self,
        site: &SiteId,
        body: &DeploymentSubmit,
    ) -> Result<Deployment, TestbedError>;

    async fn deployment_view(
        &self,
        deployment: &DeploymentHandle,
    ) -> Result<Deployment, TestbedError>;

    /// Must succeed for deployments that are already gone.
    async fn deployment_delete(
        &self,
        deployment: &DeploymentHandle,
    ) -> Result<(), TestbedError>;
}

#[async_trait]
impl Testbed for testbed_client::Client {
    async fn site_list(&self) -> Result<Vec<SiteId>, TestbedError> {
        Ok(testbed_client::Client::site_list(self)
            .await?
            .into_iter()
            .map(|site| SiteId::new(site.uid))
            .collect())
    }

    async fn site_status(
        &self,
        site: &SiteId,
    ) -> Result<Vec<NodeStatus>, TestbedError> {
        Ok(testbed_client::Client::site_status(self, site.as_str()).await?)
    }

    async fn job_submit(
        &self,
        site: &SiteId,
        body: &JobSubmit,
    ) -> Result<Job, TestbedError> {
        Ok(testbed_client::Client::job_submit(self, site.as_str(), body)
            .await?)
    }

    async fn job_view(&self, job: &JobHandle) -> Result<Job, TestbedError> {
        Ok(testbed_client::Client::job_view(self, job.site.as_str(), job.uid)
            .await?)
    }

    async fn job_delete(&self, job: &JobHandle) -> Result<(), TestbedError> {
        Ok(testbed_client::Client::job_delete(
            self,
            job.site.as_str(),
            job.uid,
        )
        .await?)
    }

    async fn deployment_submit(
        &self,
        site: &SiteId,
        body: &DeploymentSubmit,
    ) -> Result<Deployment, TestbedError> {
        Ok(testbed_client::Client::deployment_submit(
            self,
            site.as_str(),
            body,
        )
        .await?)
    }

    async fn deployment_view(
        &self,
        deployment: &DeploymentHandle,
    ) -> Result<Deployment, TestbedError> {
        Ok(testbed_client::Client::deployment_view(
            self,
            deployment.site.as_str(),
            &deployment.uid,
        )
        .await?)
    }

    async fn deployment_delete(
        &self,
        deployment: &DeploymentHandle,
    ) -> Result<(), TestbedError> {
        Ok(testbed_client::Client::deployment_delete(
            self,
            deployment.site.as_str(),
            &deployment.uid,
        )
        .await?)
    }
}
