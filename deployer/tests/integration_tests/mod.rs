// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use grid_deployer::cancel::CancelWatch;
use grid_deployer::config::JobPolicy;
use grid_deployer::config::JobSpec;
use grid_deployer::config::RunConfig;
use grid_deployer::config::WaveConfig;
use grid_deployer::grouping::GroupingStrategy;
use grid_deployer::orchestrator::Orchestrator;
use grid_deployer::poll::PollPolicy;
use grid_deployer::sizing::SizingPolicy;
use grid_deployer::sizing::Walltime;
use grid_deployer::test_util::SimTestbed;
use grid_deployer::test_util::test_log;
use grid_deployer::testbed::Testbed;
use grid_deployer::tracker::Tracker;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

mod orchestrator;
mod supervise;

pub const INSTALLER_KEY: &str = "ssh-ed25519 AAAAC3Nza test@example";

pub fn poll(interval_secs: u64, deadline_secs: u64) -> PollPolicy {
    PollPolicy::new(
        Duration::from_secs(interval_secs),
        Duration::from_secs(deadline_secs),
    )
}

pub fn wave(grouping: GroupingStrategy, jobs: JobPolicy) -> WaveConfig {
    WaveConfig { grouping, jobs, deployment_wait: poll(10, 300) }
}

pub fn run_config(sizing: SizingPolicy, waves: Vec<WaveConfig>) -> RunConfig {
    RunConfig {
        sizing,
        excluded_sites: BTreeSet::new(),
        job: JobSpec::new("integration test", Walltime::from_secs(30 * 60)),
        image: "lenny-x64-base".to_string(),
        job_wait: poll(5, 300),
        waves,
        cooldown_secs: 0,
        probe: false,
    }
}

pub fn new_orchestrator(
    testbed: &Arc<SimTestbed>,
    tracker: &Tracker,
    config: RunConfig,
    cancel: CancelWatch,
) -> Orchestrator {
    let testbed: Arc<dyn Testbed> = testbed.clone();
    Orchestrator::new(
        &test_log(),
        testbed,
        tracker.clone(),
        config,
        INSTALLER_KEY.to_string(),
        cancel,
    )
}
