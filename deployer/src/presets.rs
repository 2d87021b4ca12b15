// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in run configurations

use crate::config::JobPolicy;
use crate::config::JobSpec;
use crate::config::RunConfig;
use crate::config::WaveConfig;
use crate::grouping::GroupingStrategy;
use crate::poll::PollPolicy;
use crate::sizing::SizingPolicy;
use crate::sizing::Walltime;
use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::time::Duration;

/// Preset used when neither a `[run]` section nor `--preset` is given.
pub const DEFAULT_PRESET: &str = "persite";

/// Image installed by every preset.
pub const BASE_IMAGE: &str = "lenny-x64-base";

const LARGE_SCALE_NAME: &str = "Grid Large Scale experiment";

/// Sites left out of the runs restricted to the testing queue.
const TESTING_EXCLUSIONS: &[&str] = &[
    "bordeaux", "grenoble", "lille", "lyon", "nancy", "orsay", "rennes",
    "sophia", "toulouse",
];

const TWIN_COOLDOWN: Duration = Duration::from_secs(120);

const PRACTICAL_NODES: NonZeroU32 = NonZeroU32::MIN.saturating_add(1);

const fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

const fn poll(deadline: Duration, interval_secs: u64) -> PollPolicy {
    PollPolicy::new(Duration::from_secs(interval_secs), deadline)
}

struct Preset {
    name: &'static str,
    summary: &'static str,
    build: fn() -> RunConfig,
}

const PRESETS: &[Preset] = &[
    Preset {
        name: "practical",
        summary: "2 nodes per site, one whole-job deployment, probe",
        build: practical,
    },
    Preset {
        name: "persite",
        summary: "half of free nodes, one whole-job deployment per site",
        build: persite,
    },
    Preset {
        name: "twin",
        summary: "half of free nodes, whole-job then per-cluster waves",
        build: twin,
    },
    Preset {
        name: "twin-testing",
        summary: "80% of free nodes on the testing queue, two waves",
        build: twin_testing,
    },
    Preset {
        name: "best-effort",
        summary: "best-effort reservations, one per-cluster wave",
        build: best_effort,
    },
];

/// Looks up a preset by name.
pub fn by_name(name: &str) -> Option<RunConfig> {
    PRESETS.iter().find(|p| p.name == name).map(|p| (p.build)())
}

/// Names and one-line summaries of every preset.
pub fn list() -> impl Iterator<Item = (&'static str, &'static str)> {
    PRESETS.iter().map(|p| (p.name, p.summary))
}

fn sites(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn practical() -> RunConfig {
    RunConfig {
        sizing: SizingPolicy::Fixed { nodes: PRACTICAL_NODES },
        excluded_sites: BTreeSet::new(),
        job: JobSpec::new("API Main Practical", Walltime::from_secs(20 * 60)),
        image: BASE_IMAGE.to_string(),
        job_wait: poll(minutes(5), 10),
        waves: vec![WaveConfig {
            grouping: GroupingStrategy::WholeJob,
            jobs: JobPolicy::Reuse,
            deployment_wait: poll(minutes(5), 100),
        }],
        cooldown_secs: 0,
        probe: true,
    }
}

fn persite() -> RunConfig {
    RunConfig {
        sizing: SizingPolicy::Half,
        excluded_sites: sites(&["sophia"]),
        job: JobSpec::new(LARGE_SCALE_NAME, Walltime::from_secs(30 * 60)),
        image: BASE_IMAGE.to_string(),
        job_wait: poll(minutes(15), 10),
        waves: vec![WaveConfig {
            grouping: GroupingStrategy::WholeJob,
            jobs: JobPolicy::Reuse,
            deployment_wait: poll(minutes(15), 50),
        }],
        cooldown_secs: 0,
        probe: true,
    }
}

fn twin() -> RunConfig {
    RunConfig {
        sizing: SizingPolicy::Half,
        excluded_sites: BTreeSet::new(),
        job: JobSpec::new(LARGE_SCALE_NAME, Walltime::from_secs(60 * 60)),
        image: BASE_IMAGE.to_string(),
        job_wait: poll(minutes(15), 10),
        waves: vec![
            WaveConfig {
                grouping: GroupingStrategy::WholeJob,
                jobs: JobPolicy::Reuse,
                deployment_wait: poll(minutes(15), 30),
            },
            WaveConfig {
                grouping: GroupingStrategy::PerCluster,
                jobs: JobPolicy::Reconfirm,
                deployment_wait: poll(minutes(15), 30),
            },
        ],
        cooldown_secs: TWIN_COOLDOWN.as_secs(),
        probe: false,
    }
}

fn twin_testing() -> RunConfig {
    let mut job = JobSpec::new(LARGE_SCALE_NAME, Walltime::from_secs(30 * 60));
    job.queue = Some("testing".to_string());
    RunConfig {
        sizing: SizingPolicy::Percent { percent: 80 },
        excluded_sites: sites(TESTING_EXCLUSIONS),
        job,
        image: BASE_IMAGE.to_string(),
        job_wait: poll(minutes(15), 5),
        waves: vec![
            WaveConfig {
                grouping: GroupingStrategy::WholeJob,
                jobs: JobPolicy::Reuse,
                deployment_wait: poll(minutes(15), 10),
            },
            WaveConfig {
                grouping: GroupingStrategy::PerCluster,
                jobs: JobPolicy::Reuse,
                deployment_wait: poll(minutes(15), 10),
            },
        ],
        cooldown_secs: TWIN_COOLDOWN.as_secs(),
        probe: false,
    }
}

fn best_effort() -> RunConfig {
    RunConfig {
        sizing: SizingPolicy::BestEffort,
        excluded_sites: sites(TESTING_EXCLUSIONS),
        job: JobSpec::new(LARGE_SCALE_NAME, Walltime::from_secs(30 * 60)),
        image: BASE_IMAGE.to_string(),
        job_wait: poll(minutes(10), 5),
        waves: vec![WaveConfig {
            grouping: GroupingStrategy::PerCluster,
            jobs: JobPolicy::Reuse,
            deployment_wait: poll(minutes(15), 10),
        }],
        cooldown_secs: 0,
        probe: false,
    }
}
