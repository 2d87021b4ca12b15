// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for testing the deployer without a real testbed

use crate::testbed::Deployment;
use crate::testbed::DeploymentHandle;
use crate::testbed::DeploymentStatus;
use crate::testbed::DeploymentSubmit;
use crate::testbed::Job;
use crate::testbed::JobHandle;
use crate::testbed::JobState;
use crate::testbed::JobSubmit;
use crate::testbed::NodeStatus;
use crate::testbed::SiteId;
use crate::testbed::Testbed;
use crate::testbed::TestbedError;
use async_trait::async_trait;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;
use testbed_client::types::HardwareState;
use testbed_client::types::NodeResult;
use testbed_client::types::SystemState;

/// Logger that discards everything, for tests.
pub fn test_log() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

#[derive(Default)]
struct SimSite {
    free: Vec<String>,
    busy: usize,
    fail_status: bool,
    fail_job_submit: bool,
    fail_deployment_submit: bool,
    /// Number of views after which a job becomes running; `None` never.
    job_ticks: Option<u32>,
    /// Number of views after which a deployment terminates; `None` never.
    deployment_ticks: Option<u32>,
}

struct SimJob {
    handle: JobHandle,
    views: u32,
    nodes: Vec<String>,
    deleted: bool,
    /// Ended by the testbed itself, without a delete request.
    expired: bool,
}

struct SimDeployment {
    handle: DeploymentHandle,
    views: u32,
    nodes: Vec<String>,
    deleted: bool,
}

#[derive(Default)]
struct SimState {
    fail_site_list: bool,
    sites: BTreeMap<SiteId, SimSite>,
    failed_nodes: BTreeSet<String>,
    jobs: Vec<SimJob>,
    deployments: Vec<SimDeployment>,
    job_submits: Vec<(SiteId, JobSubmit)>,
    deployment_submits: Vec<(SiteId, DeploymentSubmit)>,
    job_deletes: Vec<JobHandle>,
    deployment_deletes: Vec<DeploymentHandle>,
    fail_next_deletes: u32,
    delete_delay: Duration,
    next_uid: u64,
}

/// An in-memory [`Testbed`] with scripted progress.
///
/// Jobs become running and deployments terminate after a configurable
/// number of views (one by default). Every request is recorded so tests
/// can check what was submitted and released.
#[derive(Default)]
pub struct SimTestbed {
    state: Mutex<SimState>,
}

impl SimTestbed {
    pub fn new() -> SimTestbed {
        SimTestbed::default()
    }

    /// Adds a site whose free, healthy nodes are named `nodes`.
    pub fn with_site(self, site: &str, nodes: &[&str]) -> Self {
        self.state().sites.insert(
            SiteId::from(site),
            SimSite {
                free: nodes.iter().map(|n| n.to_string()).collect(),
                job_ticks: Some(1),
                deployment_ticks: Some(1),
                ..Default::default()
            },
        );
        self
    }

    /// Adds a site with `free` free nodes from a single cluster named like
    /// the site.
    pub fn with_free_nodes(self, site: &str, free: usize) -> Self {
        let nodes: Vec<String> =
            (1..=free).map(|i| format!("{site}-{i}.{site}")).collect();
        let nodes: Vec<&str> = nodes.iter().map(String::as_str).collect();
        self.with_site(site, &nodes)
    }

    /// Listing sites fails.
    pub fn with_site_list_failure(self) -> Self {
        self.state().fail_site_list = true;
        self
    }

    pub fn with_busy_nodes(self, site: &str, busy: usize) -> Self {
        self.site_mut(site, |s| s.busy = busy);
        self
    }

    pub fn with_status_failure(self, site: &str) -> Self {
        self.site_mut(site, |s| s.fail_status = true);
        self
    }

    pub fn with_job_submit_failure(self, site: &str) -> Self {
        self.site_mut(site, |s| s.fail_job_submit = true);
        self
    }

    pub fn with_deployment_submit_failure(self, site: &str) -> Self {
        self.site_mut(site, |s| s.fail_deployment_submit = true);
        self
    }

    /// Jobs at `site` become running after `ticks` views, or never.
    pub fn with_job_ticks(self, site: &str, ticks: Option<u32>) -> Self {
        self.site_mut(site, |s| s.job_ticks = ticks);
        self
    }

    /// Deployments at `site` terminate after `ticks` views, or never.
    pub fn with_deployment_ticks(self, site: &str, ticks: Option<u32>) -> Self {
        self.site_mut(site, |s| s.deployment_ticks = ticks);
        self
    }

    /// The installer reports `KO` for these nodes.
    pub fn with_failed_nodes(self, nodes: &[&str]) -> Self {
        self.state().failed_nodes.extend(nodes.iter().map(|n| n.to_string()));
        self
    }

    /// The next `count` delete requests fail.
    pub fn fail_next_deletes(&self, count: u32) {
        self.state().fail_next_deletes = count;
    }

    /// Every delete request takes `delay` before it is handled.
    pub fn delay_deletes(&self, delay: Duration) {
        self.state().delete_delay = delay;
    }

    /// Ends every job at `site` as if its walltime had run out.
    pub fn expire_jobs(&self, site: &str) {
        let site = SiteId::from(site);
        for job in self.state().jobs.iter_mut() {
            if job.handle.site == site {
                job.expired = true;
            }
        }
    }

    pub fn job_submits(&self) -> Vec<(SiteId, JobSubmit)> {
        self.state().job_submits.clone()
    }

    pub fn deployment_submits(&self) -> Vec<(SiteId, DeploymentSubmit)> {
        self.state().deployment_submits.clone()
    }

    pub fn job_deletes(&self) -> Vec<JobHandle> {
        self.state().job_deletes.clone()
    }

    pub fn deployment_deletes(&self) -> Vec<DeploymentHandle> {
        self.state().deployment_deletes.clone()
    }

    /// Jobs that were created and never deleted.
    pub fn live_jobs(&self) -> Vec<JobHandle> {
        self.state()
            .jobs
            .iter()
            .filter(|j| !j.deleted)
            .map(|j| j.handle.clone())
            .collect()
    }

    /// Deployments that were created and never deleted.
    pub fn live_deployments(&self) -> Vec<DeploymentHandle> {
        self.state()
            .deployments
            .iter()
            .filter(|d| !d.deleted)
            .map(|d| d.handle.clone())
            .collect()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn site_mut(&self, site: &str, f: impl FnOnce(&mut SimSite)) {
        let mut state = self.state();
        let site = state
            .sites
            .get_mut(&SiteId::from(site))
            .unwrap_or_else(|| panic!("unknown simulated site {site}"));
        f(site);
    }

    async fn delete_delay(&self) {
        let delay = self.state().delete_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_delete_failure(state: &mut SimState) -> Result<(), TestbedError> {
        if state.fail_next_deletes > 0 {
            state.fail_next_deletes -= 1;
            return Err(TestbedError::Rejected("delete failed".to_string()));
        }
        Ok(())
    }

    fn job_view_of(site: &SimSite, job: &SimJob) -> Job {
        let ended = job.deleted || job.expired;
        let running =
            !ended && site.job_ticks.is_some_and(|ticks| job.views >= ticks);
        let state = if ended {
            JobState::Terminated
        } else if running {
            JobState::Running
        } else {
            JobState::Waiting
        };
        Job {
            uid: job.handle.uid,
            state,
            assigned_nodes: if running { job.nodes.clone() } else { vec![] },
        }
    }

    fn deployment_view_of(
        site: &SimSite,
        failed: &BTreeSet<String>,
        deployment: &SimDeployment,
    ) -> Deployment {
        let terminated = !deployment.deleted
            && site
                .deployment_ticks
                .is_some_and(|ticks| deployment.views >= ticks);
        let status = if deployment.deleted {
            DeploymentStatus::Canceled
        } else if terminated {
            DeploymentStatus::Terminated
        } else {
            DeploymentStatus::Processing
        };
        let result = if terminated {
            deployment
                .nodes
                .iter()
                .map(|node| {
                    let state =
                        if failed.contains(node) { "KO" } else { "OK" };
                    (node.clone(), NodeResult { state: state.to_string() })
                })
                .collect()
        } else {
            BTreeMap::new()
        };
        Deployment {
            uid: deployment.handle.uid.clone(),
            site_uid: Some(deployment.handle.site.to_string()),
            status,
            nodes: deployment.nodes.clone(),
            result,
        }
    }
}

fn requested_nodes(resources: &str) -> Option<usize> {
    let nodes = resources
        .split(',')
        .find_map(|part| part.strip_prefix("nodes="))?;
    match nodes {
        "BEST" => None,
        n => n.parse().ok(),
    }
}

#[async_trait]
impl Testbed for SimTestbed {
    async fn site_list(&self) -> Result<Vec<SiteId>, TestbedError> {
        let state = self.state();
        if state.fail_site_list {
            return Err(TestbedError::Rejected("site list unavailable".into()));
        }
        Ok(state.sites.keys().cloned().collect())
    }

    async fn site_status(
        &self,
        site: &SiteId,
    ) -> Result<Vec<NodeStatus>, TestbedError> {
        let state = self.state();
        let sim = state
            .sites
            .get(site)
            .ok_or_else(|| TestbedError::Rejected(format!("no site {site}")))?;
        if sim.fail_status {
            return Err(TestbedError::Rejected("status unavailable".into()));
        }
        let free = sim.free.iter().map(|node| NodeStatus {
            node_uid: Some(node.clone()),
            system_state: SystemState::Free,
            hardware_state: HardwareState::Alive,
        });
        let busy = (0..sim.busy).map(|_| NodeStatus {
            node_uid: None,
            system_state: SystemState::Busy,
            hardware_state: HardwareState::Alive,
        });
        Ok(free.chain(busy).collect())
    }

    async fn job_submit(
        &self,
        site: &SiteId,
        body: &JobSubmit,
    ) -> Result<Job, TestbedError> {
        let mut state = self.state();
        state.job_submits.push((site.clone(), body.clone()));
        let sim = state
            .sites
            .get(site)
            .ok_or_else(|| TestbedError::Rejected(format!("no site {site}")))?;
        if sim.fail_job_submit {
            return Err(TestbedError::Rejected("job refused".into()));
        }
        let count = requested_nodes(&body.resources).unwrap_or(sim.free.len());
        let nodes: Vec<String> = sim.free.iter().take(count).cloned().collect();

        state.next_uid += 1;
        let job = SimJob {
            handle: JobHandle { site: site.clone(), uid: state.next_uid },
            views: 0,
            nodes,
            deleted: false,
            expired: false,
        };
        let view = SimTestbed::job_view_of(&state.sites[site], &job);
        state.jobs.push(job);
        Ok(view)
    }

    async fn job_view(&self, job: &JobHandle) -> Result<Job, TestbedError> {
        let mut state = self.state();
        let state = &mut *state;
        let sim = state
            .jobs
            .iter_mut()
            .find(|j| j.handle == *job)
            .ok_or_else(|| TestbedError::Rejected(format!("no job {job}")))?;
        sim.views += 1;
        Ok(SimTestbed::job_view_of(&state.sites[&job.site], sim))
    }

    async fn job_delete(&self, job: &JobHandle) -> Result<(), TestbedError> {
        self.delete_delay().await;
        let mut state = self.state();
        SimTestbed::take_delete_failure(&mut state)?;
        state.job_deletes.push(job.clone());
        if let Some(sim) = state.jobs.iter_mut().find(|j| j.handle == *job) {
            sim.deleted = true;
        }
        Ok(())
    }

    async fn deployment_submit(
        &self,
        site: &SiteId,
        body: &DeploymentSubmit,
    ) -> Result<Deployment, TestbedError> {
        let mut state = self.state();
        state.deployment_submits.push((site.clone(), body.clone()));
        if state.sites[site].fail_deployment_submit {
            return Err(TestbedError::Rejected("deployment refused".into()));
        }
        state.next_uid += 1;
        let deployment = SimDeployment {
            handle: DeploymentHandle {
                site: site.clone(),
                uid: format!("D-{}", state.next_uid),
            },
            views: 0,
            nodes: body.nodes.clone(),
            deleted: false,
        };
        let view = SimTestbed::deployment_view_of(
            &state.sites[site],
            &state.failed_nodes,
            &deployment,
        );
        state.deployments.push(deployment);
        Ok(view)
    }

    async fn deployment_view(
        &self,
        deployment: &DeploymentHandle,
    ) -> Result<Deployment, TestbedError> {
        let mut state = self.state();
        let state = &mut *state;
        let sim = state
            .deployments
            .iter_mut()
            .find(|d| d.handle == *deployment)
            .ok_or_else(|| {
                TestbedError::Rejected(format!("no deployment {deployment}"))
            })?;
        sim.views += 1;
        Ok(SimTestbed::deployment_view_of(
            &state.sites[&deployment.site],
            &state.failed_nodes,
            sim,
        ))
    }

    async fn deployment_delete(
        &self,
        deployment: &DeploymentHandle,
    ) -> Result<(), TestbedError> {
        self.delete_delay().await;
        let mut state = self.state();
        SimTestbed::take_delete_failure(&mut state)?;
        state.deployment_deletes.push(deployment.clone());
        if let Some(sim) =
            state.deployments.iter_mut().find(|d| d.handle == *deployment)
        {
            sim.deleted = true;
        }
        Ok(())
    }
}
