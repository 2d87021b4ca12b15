// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of everything that must be released, and the teardown pass
//! ("extinction") that releases it

use crate::testbed::DeploymentHandle;
use crate::testbed::JobHandle;
use crate::testbed::Testbed;
use slog::Logger;
use slog::{info, warn};
use slog_error_chain::InlineErrorChain;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

#[derive(Debug, Default)]
struct Registry {
    jobs: Vec<JobHandle>,
    deployments: Vec<DeploymentHandle>,
}

/// Handles of every job and deployment submitted and not yet deleted.
///
/// Cloning a `Tracker` yields another handle to the same registry, so the
/// orchestrator and whoever runs the final teardown share one view of what
/// is outstanding. An entity is registered as soon as its submission
/// succeeds and deregistered only once a delete request for it succeeded.
#[derive(Clone, Debug, Default)]
pub struct Tracker {
    inner: Arc<Mutex<Registry>>,
}

/// What an extinction pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtinctionReport {
    pub jobs_deleted: usize,
    pub deployments_deleted: usize,
    /// Delete requests that failed. These entities may have leaked.
    pub failures: usize,
}

impl Tracker {
    pub fn new() -> Tracker {
        Tracker::default()
    }

    // The registry is only touched between awaits, but a panic elsewhere
    // can still poison the lock; teardown must work regardless.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn track_job(&self, job: JobHandle) {
        self.registry().jobs.push(job);
    }

    pub fn track_deployment(&self, deployment: DeploymentHandle) {
        self.registry().deployments.push(deployment);
    }

    pub fn jobs(&self) -> Vec<JobHandle> {
        self.registry().jobs.clone()
    }

    pub fn deployments(&self) -> Vec<DeploymentHandle> {
        self.registry().deployments.clone()
    }

    pub fn is_empty(&self) -> bool {
        let registry = self.registry();
        registry.jobs.is_empty() && registry.deployments.is_empty()
    }

    /// Deletes one job. On failure the job stays registered so that the
    /// extinction pass tries again.
    pub async fn release_job(
        &self,
        log: &Logger,
        testbed: &dyn Testbed,
        job: &JobHandle,
    ) -> bool {
        match testbed.job_delete(job).await {
            Ok(()) => {
                self.registry().jobs.retain(|j| j != job);
                info!(log, "deleted job"; "job" => %job);
                true
            }
            Err(error) => {
                warn!(log, "failed to delete job";
                    "job" => %job,
                    InlineErrorChain::new(&error),
                );
                false
            }
        }
    }

    /// Deletes one deployment. On failure the deployment stays registered
    /// so that the extinction pass tries again.
    pub async fn release_deployment(
        &self,
        log: &Logger,
        testbed: &dyn Testbed,
        deployment: &DeploymentHandle,
    ) -> bool {
        match testbed.deployment_delete(deployment).await {
            Ok(()) => {
                self.registry().deployments.retain(|d| d != deployment);
                info!(log, "deleted deployment"; "deployment" => %deployment);
                true
            }
            Err(error) => {
                warn!(log, "failed to delete deployment";
                    "deployment" => %deployment,
                    InlineErrorChain::new(&error),
                );
                false
            }
        }
    }

    fn first_deployment(&self) -> Option<DeploymentHandle> {
        self.registry().deployments.first().cloned()
    }

    fn first_job(&self) -> Option<JobHandle> {
        self.registry().jobs.first().cloned()
    }

    /// Requests deletion of every registered deployment and job, whatever
    /// state they were last seen in.
    ///
    /// Each entity is deregistered once its delete request has completed,
    /// successfully or not, so each gets exactly one delete from this pass
    /// and calling it again is a no-op. If the pass itself is dropped
    /// midway, whatever it had not reached stays registered for the next
    /// one. Deployments go first so that no installation is left running on
    /// nodes whose reservation already ended. Never fails: delete errors
    /// are logged and counted.
    pub async fn extinguish(
        &self,
        log: &Logger,
        testbed: &dyn Testbed,
    ) -> ExtinctionReport {
        let mut report = ExtinctionReport::default();
        let (jobs, deployments) = {
            let registry = self.registry();
            (registry.jobs.len(), registry.deployments.len())
        };
        if jobs == 0 && deployments == 0 {
            return report;
        }

        info!(log, "killing all jobs and deployments";
            "jobs" => jobs,
            "deployments" => deployments,
        );
        while let Some(deployment) = self.first_deployment() {
            let result = testbed.deployment_delete(&deployment).await;
            self.registry().deployments.retain(|d| *d != deployment);
            match result {
                Ok(()) => report.deployments_deleted += 1,
                Err(error) => {
                    report.failures += 1;
                    warn!(log, "failed to delete deployment during extinction";
                        "deployment" => %deployment,
                        InlineErrorChain::new(&error),
                    );
                }
            }
        }
        while let Some(job) = self.first_job() {
            let result = testbed.job_delete(&job).await;
            self.registry().jobs.retain(|j| *j != job);
            match result {
                Ok(()) => report.jobs_deleted += 1,
                Err(error) => {
                    report.failures += 1;
                    warn!(log, "failed to delete job during extinction";
                        "job" => %job,
                        InlineErrorChain::new(&error),
                    );
                }
            }
        }
        report
    }
}
