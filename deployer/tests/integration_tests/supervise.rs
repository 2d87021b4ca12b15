// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ending a spawned run: signals, release, and how the end is classified

use super::new_orchestrator;
use super::run_config;
use super::wave;
use assert_matches::assert_matches;
use futures::channel::mpsc;
use grid_deployer::cancel::CancelWatch;
use grid_deployer::cancel::cancel_pair;
use grid_deployer::config::JobPolicy;
use grid_deployer::grouping::GroupingStrategy;
use grid_deployer::orchestrator::RunError;
use grid_deployer::orchestrator::RunOutcome;
use grid_deployer::orchestrator::RunReport;
use grid_deployer::sizing::SizingPolicy;
use grid_deployer::supervise::RunFailure;
use grid_deployer::supervise::supervise;
use grid_deployer::test_util::SimTestbed;
use grid_deployer::test_util::test_log;
use grid_deployer::testbed::JobHandle;
use grid_deployer::testbed::JobSubmit;
use grid_deployer::testbed::SiteId;
use grid_deployer::testbed::Testbed;
use grid_deployer::tracker::Tracker;
use signal_hook::consts::signal::SIGINT;
use signal_hook::consts::signal::SIGTERM;
use std::sync::Arc;
use std::time::Duration;

fn no_signals() -> futures::stream::Pending<i32> {
    futures::stream::pending()
}

/// Sends each of `signals` after its delay, measured from the start.
fn signals_at(signals: Vec<(u64, i32)>) -> mpsc::UnboundedReceiver<i32> {
    let (tx, rx) = mpsc::unbounded();
    tokio::spawn(async move {
        let start = tokio::time::Instant::now();
        for (secs, signal) in signals {
            tokio::time::sleep_until(start + Duration::from_secs(secs)).await;
            let _ = tx.unbounded_send(signal);
        }
        // Keep the stream open, like a real signal stream.
        futures::future::pending::<()>().await;
    });
    rx
}

fn left_behind(testbed: &SimTestbed, tracker: &Tracker) -> usize {
    tracker.jobs().len()
        + tracker.deployments().len()
        + testbed.live_jobs().len()
        + testbed.live_deployments().len()
}

#[tokio::test(start_paused = true)]
async fn completed_run_is_a_success() {
    let testbed = Arc::new(SimTestbed::new().with_free_nodes("lille", 4));
    let tracker = Tracker::new();
    let (trigger, cancel) = cancel_pair();
    let config = run_config(
        SizingPolicy::Half,
        vec![wave(GroupingStrategy::WholeJob, JobPolicy::Reuse)],
    );

    let orchestrator = new_orchestrator(&testbed, &tracker, config, cancel);
    let task = tokio::spawn(orchestrator.run());
    let result = supervise(
        &test_log(),
        task,
        no_signals(),
        trigger,
        &tracker,
        testbed.as_ref(),
    )
    .await;

    let report = result.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(left_behind(&testbed, &tracker), 0);
}

#[tokio::test(start_paused = true)]
async fn run_without_jobs_is_a_success() {
    let testbed = Arc::new(SimTestbed::new().with_free_nodes("lille", 1));
    let tracker = Tracker::new();
    let (trigger, cancel) = cancel_pair();
    let config = run_config(
        SizingPolicy::Half,
        vec![wave(GroupingStrategy::WholeJob, JobPolicy::Reuse)],
    );

    let orchestrator = new_orchestrator(&testbed, &tracker, config, cancel);
    let task = tokio::spawn(orchestrator.run());
    let result = supervise(
        &test_log(),
        task,
        no_signals(),
        trigger,
        &tracker,
        testbed.as_ref(),
    )
    .await;

    assert_matches!(result, Ok(RunReport { outcome: RunOutcome::NoJobs, .. }));
    assert!(testbed.job_submits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn signal_stops_the_run_and_releases_everything() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 4)
            .with_free_nodes("nancy", 4)
            .with_job_ticks("nancy", None),
    );
    let tracker = Tracker::new();
    let (trigger, cancel) = cancel_pair();
    let config = run_config(
        SizingPolicy::Half,
        vec![wave(GroupingStrategy::WholeJob, JobPolicy::Reuse)],
    );

    let orchestrator = new_orchestrator(&testbed, &tracker, config, cancel);
    let task = tokio::spawn(orchestrator.run());
    let result = supervise(
        &test_log(),
        task,
        signals_at(vec![(12, SIGINT)]),
        trigger,
        &tracker,
        testbed.as_ref(),
    )
    .await;

    assert_matches!(result, Err(RunFailure::Run(RunError::Interrupted)));
    assert_eq!(testbed.job_submits().len(), 2);
    assert_eq!(testbed.job_deletes().len(), 2);
    assert!(testbed.deployment_submits().is_empty());
    assert_eq!(left_behind(&testbed, &tracker), 0);
}

#[tokio::test(start_paused = true)]
async fn second_signal_abandons_a_run_that_does_not_stop() {
    let testbed = Arc::new(
        SimTestbed::new()
            .with_free_nodes("lille", 4)
            .with_job_ticks("lille", None),
    );
    let tracker = Tracker::new();
    let (trigger, _) = cancel_pair();
    let config = run_config(
        SizingPolicy::Half,
        vec![wave(GroupingStrategy::WholeJob, JobPolicy::Reuse)],
    );

    // This run never looks at the trigger, so only the abort ends it.
    let orchestrator =
        new_orchestrator(&testbed, &tracker, config, CancelWatch::never());
    let task = tokio::spawn(orchestrator.run());
    let result = supervise(
        &test_log(),
        task,
        signals_at(vec![(12, SIGTERM), (13, SIGTERM)]),
        trigger,
        &tracker,
        testbed.as_ref(),
    )
    .await;

    assert_matches!(result, Err(RunFailure::Abandoned));
    assert_eq!(testbed.job_deletes().len(), 1);
    assert_eq!(left_behind(&testbed, &tracker), 0);
}

async fn exploding_run() -> Result<RunReport, RunError> {
    panic!("run exploded")
}

#[tokio::test(start_paused = true)]
async fn panicking_run_is_a_failure_and_still_releases() {
    let testbed = Arc::new(SimTestbed::new().with_free_nodes("lille", 4));
    let tracker = Tracker::new();
    let (trigger, _) = cancel_pair();

    let site = SiteId::from("lille");
    let job = testbed
        .job_submit(
            &site,
            &JobSubmit {
                resources: "nodes=2,walltime=00:30:00".to_string(),
                command: "sleep 1800".to_string(),
                types: vec!["deploy".to_string()],
                name: "test".to_string(),
                queue: None,
            },
        )
        .await
        .unwrap();
    let handle = JobHandle { site, uid: job.uid };
    tracker.track_job(handle.clone());

    let task = tokio::spawn(exploding_run());
    let result = supervise(
        &test_log(),
        task,
        no_signals(),
        trigger,
        &tracker,
        testbed.as_ref(),
    )
    .await;

    assert_matches!(result, Err(RunFailure::Panicked(_)));
    assert_eq!(testbed.job_deletes(), vec![handle]);
    assert_eq!(left_behind(&testbed, &tracker), 0);
}
