// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driving a run from the site survey to the release of the last wave

use crate::cancel::CancelWatch;
use crate::cancel::Cancelled;
use crate::catalog;
use crate::config::JobPolicy;
use crate::config::RunConfig;
use crate::config::WaveConfig;
use crate::entity::TrackedDeployment;
use crate::entity::TrackedJob;
use crate::grouping::GroupingStrategy;
use crate::poll::PollOutcome;
use crate::poll::refresh_all;
use crate::poll::wait_for_all;
use crate::probe::ReachabilityProbe;
use crate::results::Results;
use crate::submit::DeploymentSpec;
use crate::submit::SiteRequest;
use crate::submit::plan_reservations;
use crate::submit::submit_deployments;
use crate::submit::submit_jobs;
use crate::testbed::SiteId;
use crate::testbed::Testbed;
use crate::testbed::TestbedError;
use crate::tracker::Tracker;
use slog::Logger;
use slog::{info, o, warn};
use slog_error_chain::InlineErrorChain;
use slog_error_chain::SlogInlineError;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// How long a single reachability check may take.
pub const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Failures that end a run early.
///
/// Rejected submissions, refresh failures, and timeouts are handled where
/// they happen and never show up here.
#[derive(Debug, Error, SlogInlineError)]
pub enum RunError {
    #[error("interrupted")]
    Interrupted,
    #[error("{context}")]
    Testbed {
        context: &'static str,
        #[source]
        err: TestbedError,
    },
}

impl From<Cancelled> for RunError {
    fn from(_: Cancelled) -> Self {
        RunError::Interrupted
    }
}

/// How a run that was not interrupted ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every configured wave ran.
    Completed,
    /// No reservation was accepted.
    NoJobs,
    /// A wave had nothing to deploy onto, or every deployment was refused.
    NoDeployments,
}

/// What one deployment wave achieved.
#[derive(Clone, Debug)]
pub struct WaveReport {
    /// Zero-based position of the wave in the run.
    pub index: usize,
    pub grouping: GroupingStrategy,
    /// Nodes covered by the deployments that were accepted.
    pub requested: usize,
    pub results: Results,
    /// Time from the start of the wave until each deployment was first
    /// seen terminated, keyed by deployment label.
    pub completion_times: BTreeMap<String, Duration>,
}

impl WaveReport {
    pub fn recorded(&self) -> usize {
        self.results.recorded()
    }

    pub fn succeeded(&self) -> usize {
        self.results.succeeded()
    }
}

impl fmt::Display for WaveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wave {} ({}): {} nodes deployed over {} requested, {} OK",
            self.index + 1,
            self.grouping,
            self.recorded(),
            self.requested,
            self.succeeded(),
        )?;
        for (label, elapsed) in &self.completion_times {
            write!(
                f,
                "\n  {label}: terminated after {}",
                humantime::format_duration(*elapsed)
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub waves: Vec<WaveReport>,
    /// Outcomes of every wave, later waves overriding earlier ones.
    pub results: Results,
}

impl RunReport {
    fn new(outcome: RunOutcome) -> RunReport {
        RunReport { outcome, waves: Vec::new(), results: Results::new() }
    }
}

/// Runs one configured reservation and deployment cycle.
///
/// Every job and deployment is registered with the [`Tracker`] as soon as
/// it is accepted, so whoever holds another handle to it can release
/// everything if the run is interrupted or fails.
pub struct Orchestrator {
    log: Logger,
    testbed: Arc<dyn Testbed>,
    tracker: Tracker,
    config: RunConfig,
    installer_key: String,
    cancel: CancelWatch,
    probe: Option<Arc<dyn ReachabilityProbe>>,
}

impl Orchestrator {
    pub fn new(
        log: &Logger,
        testbed: Arc<dyn Testbed>,
        tracker: Tracker,
        config: RunConfig,
        installer_key: String,
        cancel: CancelWatch,
    ) -> Orchestrator {
        Orchestrator {
            log: log.new(o!("component" => "Orchestrator")),
            testbed,
            tracker,
            config,
            installer_key,
            cancel,
            probe: None,
        }
    }

    /// Checks reachability of deployed nodes after the last wave, if the
    /// run configuration asks for it.
    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub async fn run(self) -> Result<RunReport, RunError> {
        let log = &self.log;
        info!(log, "starting run";
            "sizing" => %self.config.sizing,
            "waves" => self.config.waves.len(),
            "image" => &self.config.image,
        );

        let survey = catalog::survey(
            &log.new(o!("component" => "Catalog")),
            self.testbed.as_ref(),
            &self.config.excluded_sites,
        )
        .await
        .map_err(|err| RunError::Testbed { context: "listing sites", err })?;
        self.cancel.check()?;
        let requests = plan_reservations(log, &self.config.sizing, &survey);

        let jobs = self.reserve(&requests).await?;
        if jobs.is_empty() {
            warn!(log, "no jobs, exiting");
            self.tracker.extinguish(log, self.testbed.as_ref()).await;
            return Ok(RunReport::new(RunOutcome::NoJobs));
        }
        let mut jobs = self.await_running(jobs).await?;

        let mut report = RunReport::new(RunOutcome::Completed);
        let last = self.config.waves.len().saturating_sub(1);
        for (index, wave) in self.config.waves.iter().enumerate() {
            if index > 0 {
                let cooldown = self.config.cooldown();
                if !cooldown.is_zero() {
                    info!(log, "pausing before next wave";
                        "duration" => %humantime::format_duration(cooldown),
                    );
                    self.cancel.clone().sleep(cooldown).await?;
                }
                jobs = self.jobs_for_wave(wave.jobs, jobs, &requests).await?;
            }

            let probe = index == last && self.config.probe;
            match self.run_wave(index, wave, &jobs, probe).await? {
                Some(wave_report) => {
                    report.results.merge(&wave_report.results);
                    report.waves.push(wave_report);
                }
                None => {
                    warn!(log, "no deployments, exiting"; "wave" => index + 1);
                    self.tracker.extinguish(log, self.testbed.as_ref()).await;
                    report.outcome = RunOutcome::NoDeployments;
                    return Ok(report);
                }
            }
        }

        self.release_jobs(&jobs).await;
        info!(log, "run complete";
            "nodes_recorded" => report.results.recorded(),
            "nodes_deployed" => report.results.succeeded(),
        );
        Ok(report)
    }

    async fn reserve(
        &self,
        requests: &[SiteRequest],
    ) -> Result<Vec<TrackedJob>, RunError> {
        Ok(submit_jobs(
            &self.log,
            self.testbed.as_ref(),
            &self.tracker,
            &self.config.job,
            requests,
            &self.cancel,
        )
        .await?)
    }

    /// Waits for `jobs` to be running, then deletes and drops the ones
    /// that are not. Jobs that already ended are not waited for.
    async fn await_running(
        &self,
        mut jobs: Vec<TrackedJob>,
    ) -> Result<Vec<TrackedJob>, RunError> {
        let log = &self.log;
        let outcome = wait_for_all(
            log,
            self.testbed.as_ref(),
            &mut jobs,
            &self.config.job_wait,
            &mut self.cancel.clone(),
            |job: &TrackedJob| job.is_running() || job.has_ended(),
            |_| {},
        )
        .await?;
        if let PollOutcome::TimedOut { pending } = outcome {
            warn!(log, "some jobs are still not running, deleting them";
                "pending" => pending,
            );
        }

        let (running, stalled): (Vec<_>, Vec<_>) =
            jobs.into_iter().partition(TrackedJob::is_running);
        for job in &stalled {
            self.tracker
                .release_job(log, self.testbed.as_ref(), &job.handle)
                .await;
        }
        Ok(running)
    }

    async fn jobs_for_wave(
        &self,
        policy: JobPolicy,
        jobs: Vec<TrackedJob>,
        requests: &[SiteRequest],
    ) -> Result<Vec<TrackedJob>, RunError> {
        info!(self.log, "selecting jobs for next wave";
            "policy" => ?policy,
            "jobs" => jobs.len(),
        );
        match policy {
            JobPolicy::Reuse => Ok(jobs),
            JobPolicy::Reconfirm => {
                // The snapshots date from before the previous wave.
                let mut jobs = jobs;
                refresh_all(
                    &self.log,
                    self.testbed.as_ref(),
                    &mut jobs,
                    &self.cancel,
                    |_| {},
                )
                .await?;
                self.await_running(jobs).await
            }
            JobPolicy::Resubmit => {
                let sites: BTreeSet<&SiteId> =
                    jobs.iter().map(TrackedJob::site).collect();
                let requests: Vec<SiteRequest> = requests
                    .iter()
                    .filter(|r| sites.contains(&r.site))
                    .cloned()
                    .collect();
                self.release_jobs(&jobs).await;
                let fresh = self.reserve(&requests).await?;
                self.await_running(fresh).await
            }
        }
    }

    async fn release_jobs(&self, jobs: &[TrackedJob]) {
        for job in jobs {
            self.tracker
                .release_job(&self.log, self.testbed.as_ref(), &job.handle)
                .await;
        }
    }

    /// Submits, awaits, and releases one wave of deployments. Returns
    /// `None` if no deployment was accepted.
    async fn run_wave(
        &self,
        index: usize,
        wave: &WaveConfig,
        jobs: &[TrackedJob],
        probe: bool,
    ) -> Result<Option<WaveReport>, RunError> {
        let log = self.log.new(o!(
            "wave" => index + 1,
            "grouping" => wave.grouping.to_string(),
        ));
        let testbed = self.testbed.as_ref();
        let started = Instant::now();

        let spec = DeploymentSpec {
            image: &self.config.image,
            key: &self.installer_key,
            grouping: wave.grouping,
        };
        let mut deployments = submit_deployments(
            &log,
            testbed,
            &self.tracker,
            &spec,
            jobs,
            &self.cancel,
        )
        .await?;
        if deployments.is_empty() {
            return Ok(None);
        }
        let requested = deployments.iter().map(|d| d.nodes.len()).sum();
        info!(log, "nodes booked for deployment"; "nodes" => requested);

        let mut results = Results::new();
        let mut completion_times = BTreeMap::new();
        let mut observe = |deployment: &TrackedDeployment| {
            if !deployment.is_terminated() {
                return;
            }
            results.record(&deployment.deployment);
            completion_times
                .entry(deployment.label.clone())
                .or_insert_with(|| {
                    info!(log, "deployment terminated";
                        "deployment" => %deployment.handle,
                        "group" => &deployment.label,
                        "nodes" => deployment.nodes.len(),
                    );
                    started.elapsed()
                });
        };
        deployments.iter().for_each(&mut observe);
        let outcome = wait_for_all(
            &log,
            testbed,
            &mut deployments,
            &wave.deployment_wait,
            &mut self.cancel.clone(),
            TrackedDeployment::is_terminated,
            &mut observe,
        )
        .await?;
        if let PollOutcome::TimedOut { pending } = outcome {
            warn!(log, "some deployments are still not terminated, \
                        deleting them";
                "pending" => pending,
            );
        }

        if probe {
            self.probe_deployments(&log, &deployments).await?;
        }

        for deployment in &deployments {
            self.tracker
                .release_deployment(&log, testbed, &deployment.handle)
                .await;
        }

        let report = WaveReport {
            index,
            grouping: wave.grouping,
            requested,
            results,
            completion_times,
        };
        info!(log, "wave complete";
            "nodes_recorded" => report.recorded(),
            "nodes_requested" => report.requested,
            "nodes_deployed" => report.succeeded(),
        );
        Ok(Some(report))
    }

    /// Runs the reachability probe against the first node of every
    /// terminated deployment. Failures are only logged.
    async fn probe_deployments(
        &self,
        log: &Logger,
        deployments: &[TrackedDeployment],
    ) -> Result<(), Cancelled> {
        let Some(probe) = &self.probe else {
            warn!(log, "reachability check requested but not configured");
            return Ok(());
        };

        for deployment in deployments.iter().filter(|d| d.is_terminated()) {
            let Some(node) = deployment.nodes.first() else {
                continue;
            };
            self.cancel.check()?;
            let mut cancel = self.cancel.clone();
            let result = tokio::select! {
                result = tokio::time::timeout(
                    REACHABILITY_TIMEOUT,
                    probe.probe(node),
                ) => result,
                _ = cancel.cancelled() => return Err(Cancelled),
            };
            let Ok(result) = result else {
                warn!(log, "node is not reachable";
                    "node" => %node,
                    "error" => "timed out",
                    "timeout" => ?REACHABILITY_TIMEOUT,
                );
                continue;
            };
            match result {
                Ok(output) => {
                    info!(log, "node is reachable";
                        "node" => %node,
                        "output" => output,
                    );
                }
                Err(error) => {
                    warn!(log, "node is not reachable";
                        "node" => %node,
                        InlineErrorChain::new(&error),
                    );
                }
            }
        }
        Ok(())
    }
}
