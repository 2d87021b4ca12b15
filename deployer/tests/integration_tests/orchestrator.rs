// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Whole runs against the simulated testbed

use super::INSTALLER_KEY;
use super::new_orchestrator;
use super::poll;
use super::run_config;
use super::wave;
use assert_matches::assert_matches;
use async_trait::async_trait;
use grid_deployer::cancel::CancelWatch;
use grid_deployer::cancel::cancel_pair;
use grid_deployer::config::JobPolicy;
use grid_deployer::grouping::GroupingStrategy;
use grid_deployer::grouping::NodeName;
use grid_deployer::orchestrator::REACHABILITY_TIMEOUT;
use grid_deployer::orchestrator::RunError;
use grid_deployer::orchestrator::RunOutcome;
use grid_deployer::probe::ProbeError;
use grid_deployer::probe::ReachabilityProbe;
use grid_deployer::results::NodeOutcome;
use grid_deployer::sizing::SizingPolicy;
use grid_deployer::test_util::SimTestbed;
use grid_deployer::test_util::test_log;
use grid_deployer::tracker::ExtinctionReport;
use grid_deployer::tracker::Tracker;
use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

fn whole_job_once() -> Vec<grid_deployer::config::WaveConfig> {
    vec![wave(GroupingStrategy::WholeJob, JobPolicy::Reuse)]
}

fn assert_nothing_left(testbed: &SimTestbed, tracker: &Tracker) {
    assert!(tracker.is_empty(), "tracker still holds entities");
    assert!(testbed.live_jobs().is_empty(), "jobs left behind");
    assert!(
        testbed.live_deployments().is_empty(),
        "deployments left behind"
    );
}

#[tokio::test(start_paused = true)]
async fn single_site_deploys_half_of_free_nodes() {
    let testbed = Arc::new(SimTestbed::new().with_free_nodes("lille", 4));
    let tracker = Tracker::new();
    let config = run_config(SizingPolicy::Half, whole_job_once());

    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await
            .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let submits = testbed.job_submits();
    assert_eq!(submits.len(), 1);
    assert_eq!(submits[0].1.resources, "nodes=2,walltime=00:30:00");

    let deployments = testbed.deployment_submits();
    assert_eq!(deployments.len(), 1);
    let (site, body) = &deployments[0];
    assert_eq!(site.as_str(), "lille");
    assert_eq!(body.nodes, vec!["lille-1.lille", "lille-2.lille"]);
    assert_eq!(body.environment, "lenny-x64-base");
    assert_eq!(body.key, INSTALLER_KEY);

    assert_eq!(report.waves.len(), 1);
    let wave = &report.waves[0];
    assert_eq!(wave.requested, 2);
    assert_eq!(wave.recorded(), 2);
    assert_eq!(wave.succeeded(), 2);
    assert_eq!(
        wave.completion_times.get("lille"),
        Some(&Duration::from_secs(10))
    );
    assert_eq!(report.results.succeeded(), 2);

    assert_eq!(testbed.job_deletes().len(), 1);
    assert_eq!(testbed.deployment_deletes().len(), 1);
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn job_that_never_runs_is_deleted_and_not_deployed() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 4)
            .with_job_ticks("lille", None),
    );
    let tracker = Tracker::new();
    let config = run_config(SizingPolicy::Half, whole_job_once());

    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await
            .unwrap();

    assert_eq!(report.outcome, RunOutcome::NoDeployments);
    assert!(report.waves.is_empty());
    assert_eq!(testbed.job_submits().len(), 1);
    assert_eq!(testbed.job_deletes().len(), 1);
    assert!(testbed.deployment_submits().is_empty());
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn sites_without_spare_nodes_are_never_reserved() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 1)
            .with_busy_nodes("lille", 10)
            .with_free_nodes("nancy", 0)
            .with_free_nodes("rennes", 4),
    );
    let tracker = Tracker::new();
    let config = run_config(SizingPolicy::Half, whole_job_once());

    new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
        .run()
        .await
        .unwrap();

    let sites: Vec<String> = testbed
        .job_submits()
        .into_iter()
        .map(|(site, _)| site.to_string())
        .collect();
    assert_eq!(sites, vec!["rennes"]);
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn nothing_to_reserve_is_a_clean_no_op() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 1)
            .with_free_nodes("nancy", 4)
            .with_job_submit_failure("nancy"),
    );
    let tracker = Tracker::new();
    let config = run_config(SizingPolicy::BestEffort, whole_job_once());

    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await
            .unwrap();

    assert_eq!(report.outcome, RunOutcome::NoJobs);
    let submits = testbed.job_submits();
    assert_eq!(submits.len(), 1);
    assert_eq!(submits[0].1.resources, "nodes=BEST,walltime=00:30:00");
    assert!(testbed.deployment_submits().is_empty());
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn excluded_sites_are_skipped_ignoring_case() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 4)
            .with_free_nodes("nancy", 4),
    );
    let tracker = Tracker::new();
    let mut config = run_config(SizingPolicy::Half, whole_job_once());
    config.excluded_sites = BTreeSet::from(["LILLE".to_string()]);

    new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
        .run()
        .await
        .unwrap();

    let submits = testbed.job_submits();
    assert_eq!(submits.len(), 1);
    assert_eq!(submits[0].0.as_str(), "nancy");
}

#[tokio::test(start_paused = true)]
async fn per_cluster_wave_deploys_each_cluster_separately() {
    let testbed = Arc::new(SimTestbed::new().with_site(
        "lille",
        &["a-1.lille", "b-1.lille", "a-2.lille", "b-2.lille"],
    ));
    let tracker = Tracker::new();
    let config = run_config(
        SizingPolicy::Fixed { nodes: NonZeroU32::new(3).unwrap() },
        vec![wave(GroupingStrategy::PerCluster, JobPolicy::Reuse)],
    );

    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await
            .unwrap();

    let groups: Vec<Vec<String>> = testbed
        .deployment_submits()
        .into_iter()
        .map(|(_, body)| body.nodes)
        .collect();
    assert_eq!(
        groups,
        vec![
            vec!["a-1.lille".to_string(), "a-2.lille".to_string()],
            vec!["b-1.lille".to_string()],
        ]
    );

    let wave = &report.waves[0];
    assert_eq!(wave.requested, 3);
    assert_eq!(wave.recorded(), 3);
    let labels: Vec<&str> =
        wave.completion_times.keys().map(String::as_str).collect();
    assert_eq!(labels, vec!["a", "b"]);
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn failures_at_one_site_do_not_affect_others() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 4)
            .with_free_nodes("nancy", 4)
            .with_job_submit_failure("nancy")
            .with_free_nodes("rennes", 4)
            .with_deployment_submit_failure("rennes")
            .with_failed_nodes(&["lille-2.lille"]),
    );
    let tracker = Tracker::new();
    let config = run_config(SizingPolicy::Half, whole_job_once());

    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await
            .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(testbed.job_submits().len(), 3);
    assert_eq!(testbed.deployment_submits().len(), 2);

    let wave = &report.waves[0];
    assert_eq!(wave.requested, 2);
    assert_eq!(wave.recorded(), 2);
    assert_eq!(wave.succeeded(), 1);
    assert_eq!(
        report.results.get(&NodeName::from("lille-2.lille")),
        Some(&NodeOutcome::Failed)
    );
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn stuck_deployments_are_deleted_after_deadline() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 4)
            .with_deployment_ticks("lille", None),
    );
    let tracker = Tracker::new();
    let config = run_config(SizingPolicy::Half, whole_job_once());

    let start = tokio::time::Instant::now();
    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await
            .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(300));
    assert_eq!(report.outcome, RunOutcome::Completed);
    let wave = &report.waves[0];
    assert_eq!(wave.requested, 2);
    assert_eq!(wave.recorded(), 0);
    assert!(wave.completion_times.is_empty());
    assert_eq!(testbed.deployment_deletes().len(), 1);
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn second_wave_reuses_jobs_after_cooldown() {
    let testbed = Arc::new(SimTestbed::new().with_free_nodes("lille", 4));
    let tracker = Tracker::new();
    let mut config = run_config(
        SizingPolicy::Half,
        vec![
            wave(GroupingStrategy::WholeJob, JobPolicy::Reuse),
            wave(GroupingStrategy::PerCluster, JobPolicy::Reuse),
        ],
    );
    config.cooldown_secs = 120;

    let start = tokio::time::Instant::now();
    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await
            .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(120));
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.waves.len(), 2);
    assert_eq!(report.waves[1].index, 1);
    assert_eq!(report.waves[1].grouping, GroupingStrategy::PerCluster);
    assert_eq!(testbed.job_submits().len(), 1);
    assert_eq!(testbed.deployment_submits().len(), 2);
    // The same two nodes were deployed twice; the merged map has them once.
    assert_eq!(report.results.recorded(), 2);
    assert_eq!(testbed.job_deletes().len(), 1);
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn second_wave_can_reconfirm_jobs() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 4)
            .with_free_nodes("nancy", 6),
    );
    let tracker = Tracker::new();
    let config = run_config(
        SizingPolicy::Half,
        vec![
            wave(GroupingStrategy::WholeJob, JobPolicy::Reuse),
            wave(GroupingStrategy::PerCluster, JobPolicy::Reconfirm),
        ],
    );

    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await
            .unwrap();

    assert_eq!(report.waves.len(), 2);
    assert_eq!(report.waves[1].requested, 5);
    assert_eq!(testbed.job_submits().len(), 2);
    assert_eq!(testbed.deployment_submits().len(), 4);
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn reconfirmed_wave_drops_jobs_that_ended_during_cooldown() {
    let testbed = Arc::new(SimTestbed::new().with_free_nodes("lille", 4));
    let tracker = Tracker::new();
    let mut config = run_config(
        SizingPolicy::Half,
        vec![
            wave(GroupingStrategy::WholeJob, JobPolicy::Reuse),
            wave(GroupingStrategy::WholeJob, JobPolicy::Reconfirm),
        ],
    );
    config.cooldown_secs = 120;

    let start = tokio::time::Instant::now();
    let orchestrator =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never());
    let task = tokio::spawn(orchestrator.run());
    // The first wave is over by now and the cooldown has begun.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(testbed.deployment_submits().len(), 1);
    testbed.expire_jobs("lille");

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::NoDeployments);
    assert_eq!(report.waves.len(), 1);
    assert_eq!(testbed.deployment_submits().len(), 1);
    // An ended job is dropped at once rather than waited on.
    assert!(start.elapsed() < Duration::from_secs(140));
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn second_wave_can_resubmit_jobs() {
    let testbed = Arc::new(SimTestbed::new().with_free_nodes("lille", 4));
    let tracker = Tracker::new();
    let config = run_config(
        SizingPolicy::Half,
        vec![
            wave(GroupingStrategy::WholeJob, JobPolicy::Reuse),
            wave(GroupingStrategy::WholeJob, JobPolicy::Resubmit),
        ],
    );

    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await
            .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let submits = testbed.job_submits();
    assert_eq!(submits.len(), 2);
    assert_eq!(submits[0].1, submits[1].1);

    let deletes = testbed.job_deletes();
    assert_eq!(deletes.len(), 2);
    assert_ne!(deletes[0], deletes[1]);
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn resubmission_is_limited_to_sites_that_kept_their_jobs() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 4)
            .with_free_nodes("nancy", 4)
            .with_job_ticks("nancy", None)
            .with_free_nodes("rennes", 4)
            .with_job_submit_failure("rennes"),
    );
    let tracker = Tracker::new();
    let config = run_config(
        SizingPolicy::Half,
        vec![
            wave(GroupingStrategy::WholeJob, JobPolicy::Reuse),
            wave(GroupingStrategy::WholeJob, JobPolicy::Resubmit),
        ],
    );

    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await
            .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let sites: Vec<String> = testbed
        .job_submits()
        .into_iter()
        .map(|(site, _)| site.to_string())
        .collect();
    assert_eq!(sites, vec!["lille", "nancy", "rennes", "lille"]);
    assert_eq!(testbed.deployment_submits().len(), 2);
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn interrupted_run_leaves_everything_to_extinction() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 4)
            .with_free_nodes("nancy", 4)
            .with_job_ticks("nancy", None),
    );
    let tracker = Tracker::new();
    let (trigger, cancel) = cancel_pair();
    let config = run_config(SizingPolicy::Half, whole_job_once());

    let task = tokio::spawn(
        new_orchestrator(&testbed, &tracker, config, cancel).run(),
    );
    tokio::time::sleep(Duration::from_secs(12)).await;
    trigger.cancel();

    let result = task.await.unwrap();
    assert_matches!(result, Err(RunError::Interrupted));
    assert_eq!(tracker.jobs().len(), 2);
    assert!(testbed.deployment_submits().is_empty());

    let log = test_log();
    let first = tracker.extinguish(&log, testbed.as_ref()).await;
    assert_eq!(first.jobs_deleted, 2);
    assert_eq!(first.failures, 0);
    let second = tracker.extinguish(&log, testbed.as_ref()).await;
    assert_eq!(second, ExtinctionReport::default());
    assert_eq!(testbed.job_deletes().len(), 2);
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn failure_to_list_sites_ends_the_run() {
    let testbed = Arc::new(
        SimTestbed::new().with_free_nodes("lille", 4).with_site_list_failure(),
    );
    let tracker = Tracker::new();
    let config = run_config(SizingPolicy::Half, whole_job_once());

    let result =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .run()
            .await;
    assert_matches!(
        result,
        Err(RunError::Testbed { context: "listing sites", .. })
    );
    assert!(testbed.job_submits().is_empty());
}

/// Records the nodes it is asked about.
struct RecordingProbe {
    probed: Mutex<Vec<String>>,
    reachable: bool,
}

#[async_trait]
impl ReachabilityProbe for RecordingProbe {
    async fn probe(&self, node: &NodeName) -> Result<String, ProbeError> {
        self.probed.lock().unwrap().push(node.to_string());
        if self.reachable {
            Ok(node.cluster().to_string())
        } else {
            Err(ProbeError::CommandFailed {
                node: node.to_string(),
                command: "hostname".to_string(),
                status: 255,
            })
        }
    }
}

#[tokio::test(start_paused = true)]
async fn last_wave_probes_first_node_of_each_deployment() {
    for reachable in [true, false] {
        let testbed = Arc::new(
            SimTestbed::new()
                .with_free_nodes("lille", 4)
                .with_free_nodes("nancy", 4)
                .with_free_nodes("rennes", 4)
                .with_deployment_ticks("rennes", None),
        );
        let tracker = Tracker::new();
        let probe =
            Arc::new(RecordingProbe { probed: Mutex::new(vec![]), reachable });
        let mut config = run_config(SizingPolicy::Half, whole_job_once());
        config.probe = true;

        let report =
            new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
                .with_probe(probe.clone())
                .run()
                .await
                .unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(
            *probe.probed.lock().unwrap(),
            vec!["lille-1.lille".to_string(), "nancy-1.nancy".to_string()]
        );
        assert_nothing_left(&testbed, &tracker);
    }
}

#[tokio::test(start_paused = true)]
async fn probe_is_not_run_unless_enabled() {
    let testbed = Arc::new(SimTestbed::new().with_free_nodes("lille", 4));
    let tracker = Tracker::new();
    let probe = Arc::new(RecordingProbe {
        probed: Mutex::new(vec![]),
        reachable: true,
    });
    let config = run_config(SizingPolicy::Half, whole_job_once());

    new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
        .with_probe(probe.clone())
        .run()
        .await
        .unwrap();
    assert!(probe.probed.lock().unwrap().is_empty());
}

/// Never answers.
struct HangingCheck;

#[async_trait]
impl ReachabilityProbe for HangingCheck {
    async fn probe(&self, _node: &NodeName) -> Result<String, ProbeError> {
        futures::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn hanging_reachability_check_gives_up_after_timeout() {
    let testbed = Arc::new(SimTestbed::new().with_free_nodes("lille", 4));
    let tracker = Tracker::new();
    let mut config = run_config(SizingPolicy::Half, whole_job_once());
    config.probe = true;

    let start = tokio::time::Instant::now();
    let report =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never())
            .with_probe(Arc::new(HangingCheck))
            .run()
            .await
            .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(start.elapsed() >= REACHABILITY_TIMEOUT);
    assert_nothing_left(&testbed, &tracker);
}

#[tokio::test(start_paused = true)]
async fn interrupt_cuts_a_hanging_reachability_check_short() {
    let testbed = Arc::new(SimTestbed::new().with_free_nodes("lille", 4));
    let tracker = Tracker::new();
    let (trigger, cancel) = cancel_pair();
    let mut config = run_config(SizingPolicy::Half, whole_job_once());
    config.probe = true;

    let start = tokio::time::Instant::now();
    let task = tokio::spawn(
        new_orchestrator(&testbed, &tracker, config, cancel)
            .with_probe(Arc::new(HangingCheck))
            .run(),
    );
    // Deployed at 15 s, then stuck in the check.
    tokio::time::sleep(Duration::from_secs(30)).await;
    trigger.cancel();

    assert_matches!(task.await.unwrap(), Err(RunError::Interrupted));
    assert!(start.elapsed() < REACHABILITY_TIMEOUT);
    assert_eq!(tracker.jobs().len(), 1);
    assert_eq!(tracker.deployments().len(), 1);

    tracker.extinguish(&test_log(), testbed.as_ref()).await;
    assert_nothing_left(&testbed, &tracker);
}

#[test]
fn poll_helper_matches_policy_units() {
    let policy = poll(10, 300);
    assert_eq!(policy.interval(), Duration::from_secs(10));
    assert_eq!(policy.deadline(), Duration::from_secs(300));
}
