// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Submitting reservations and deployments

use crate::cancel::CancelWatch;
use crate::cancel::Cancelled;
use crate::catalog::SiteAvailability;
use crate::config::JobSpec;
use crate::entity::TrackedDeployment;
use crate::entity::TrackedJob;
use crate::grouping::GroupingStrategy;
use crate::sizing::NodeRequest;
use crate::sizing::SizingPolicy;
use crate::sizing::resources;
use crate::testbed::DeploymentSubmit;
use crate::testbed::JobSubmit;
use crate::testbed::SiteId;
use crate::testbed::Testbed;
use crate::tracker::Tracker;
use slog::Logger;
use slog::{debug, info, warn};
use slog_error_chain::InlineErrorChain;

/// What to reserve at one site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteRequest {
    pub site: SiteId,
    pub request: NodeRequest,
}

/// Applies `policy` to every surveyed site, dropping the sites that cannot
/// spare a node.
pub fn plan_reservations(
    log: &Logger,
    policy: &SizingPolicy,
    survey: &[SiteAvailability],
) -> Vec<SiteRequest> {
    survey
        .iter()
        .filter_map(|entry| match policy.request(entry.available) {
            Some(request) => {
                Some(SiteRequest { site: entry.site.clone(), request })
            }
            None => {
                info!(log, "not enough free nodes, skipping site";
                    "site" => %entry.site,
                    "available" => entry.available,
                );
                None
            }
        })
        .collect()
}

/// Submits one reservation per request.
///
/// A rejected submission is logged and dropped; the other sites are still
/// submitted. Every accepted job is registered with `tracker` before the
/// next request is sent.
pub async fn submit_jobs(
    log: &Logger,
    testbed: &dyn Testbed,
    tracker: &Tracker,
    spec: &JobSpec,
    requests: &[SiteRequest],
    cancel: &CancelWatch,
) -> Result<Vec<TrackedJob>, Cancelled> {
    let mut jobs = Vec::with_capacity(requests.len());

    for SiteRequest { site, request } in requests {
        cancel.check()?;

        let body = JobSubmit {
            resources: resources(*request, spec.walltime),
            command: spec.command.clone(),
            types: spec.types.clone(),
            name: spec.name.clone(),
            queue: spec.queue.clone(),
        };
        debug!(log, "submitting job";
            "site" => %site,
            "resources" => &body.resources,
        );
        match testbed.job_submit(site, &body).await {
            Ok(job) => {
                let job = TrackedJob::new(site.clone(), job);
                tracker.track_job(job.handle.clone());
                info!(log, "submitted job";
                    "job" => %job.handle,
                    "nodes" => %request,
                );
                jobs.push(job);
            }
            Err(error) => {
                warn!(log, "job submission failed, dropping site";
                    "site" => %site,
                    InlineErrorChain::new(&error),
                );
            }
        }
    }

    Ok(jobs)
}

/// What to install and with which key.
#[derive(Clone, Debug)]
pub struct DeploymentSpec<'a> {
    pub image: &'a str,
    /// Contents of the public key installed for the node user.
    pub key: &'a str,
    pub grouping: GroupingStrategy,
}

/// Submits deployments for the nodes of every running job in `jobs`, one
/// per group produced by `spec.grouping`.
///
/// Jobs that are not running, or have no nodes, are skipped. A rejected
/// submission is logged and dropped.
pub async fn submit_deployments(
    log: &Logger,
    testbed: &dyn Testbed,
    tracker: &Tracker,
    spec: &DeploymentSpec<'_>,
    jobs: &[TrackedJob],
    cancel: &CancelWatch,
) -> Result<Vec<TrackedDeployment>, Cancelled> {
    let mut deployments = Vec::new();

    for job in jobs {
        if !job.is_running() {
            debug!(log, "skipping job that is not running";
                "job" => %job.handle,
                "state" => ?job.state(),
            );
            continue;
        }

        let nodes = job.assigned_nodes();
        for group in spec.grouping.group(job.site(), &nodes) {
            cancel.check()?;

            let body = DeploymentSubmit {
                environment: spec.image.to_string(),
                nodes: group.nodes.iter().map(|n| n.to_string()).collect(),
                key: spec.key.to_string(),
            };
            match testbed.deployment_submit(job.site(), &body).await {
                Ok(deployment) => {
                    let deployment = TrackedDeployment::new(
                        job.site().clone(),
                        group.label,
                        group.nodes,
                        deployment,
                    );
                    tracker.track_deployment(deployment.handle.clone());
                    info!(log, "submitted deployment";
                        "deployment" => %deployment.handle,
                        "group" => &deployment.label,
                        "nodes" => deployment.nodes.len(),
                    );
                    deployments.push(deployment);
                }
                Err(error) => {
                    warn!(log, "deployment submission failed, dropping group";
                        "job" => %job.handle,
                        "group" => &group.label,
                        InlineErrorChain::new(&error),
                    );
                }
            }
        }
    }

    Ok(deployments)
}
