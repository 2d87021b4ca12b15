// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and describing a run

use crate::grouping::GroupingStrategy;
use crate::logging::LogConfig;
use crate::poll::PollPolicy;
use crate::sizing::SizingPolicy;
use crate::sizing::Walltime;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use slog_error_chain::SlogInlineError;
use std::collections::BTreeSet;
use std::time::Duration;
use testbed_client::Credentials;
use thiserror::Error;

/// Configuration for the deployer
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Where the cluster-management API lives and how to log in.
    pub testbed: TestbedConfig,
    /// Key discovery and the post-deployment reachability check.
    #[serde(default)]
    pub ssh: SshConfig,
    /// Process-wide logging configuration.
    #[serde(default)]
    pub log: LogConfig,
    /// What to do; when absent a built-in preset is used.
    #[serde(default)]
    pub run: Option<RunConfig>,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        if let Some(run) = &config_parsed.run {
            run.validate().map_err(|reason| LoadError::Invalid {
                path: path.into(),
                reason,
            })?;
        }
        Ok(config_parsed)
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum LoadError {
    #[error("error reading \"{path}\"")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\"")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("invalid configuration in \"{path}\": {reason}")]
    Invalid { path: Utf8PathBuf, reason: String },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TestbedConfig {
    /// Root of the API, e.g. `https://api.grid5000.fr/sid/grid5000`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl TestbedConfig {
    /// Basic-auth credentials, if both halves are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    /// Directory searched for the key pair. A leading `~/` is expanded.
    #[serde(default = "SshConfig::default_key_dir")]
    pub key_dir: Utf8PathBuf,
    /// Bastion through which nodes are reached. Without one, the
    /// reachability check is skipped.
    #[serde(default)]
    pub gateway: Option<String>,
    /// Defaults to the testbed username.
    #[serde(default)]
    pub gateway_user: Option<String>,
    #[serde(default = "SshConfig::default_node_user")]
    pub node_user: String,
    #[serde(default = "SshConfig::default_probe_command")]
    pub probe_command: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        SshConfig {
            key_dir: SshConfig::default_key_dir(),
            gateway: None,
            gateway_user: None,
            node_user: SshConfig::default_node_user(),
            probe_command: SshConfig::default_probe_command(),
        }
    }
}

impl SshConfig {
    fn default_key_dir() -> Utf8PathBuf {
        "~/.ssh".into()
    }

    fn default_node_user() -> String {
        "root".to_string()
    }

    fn default_probe_command() -> String {
        "hostname".to_string()
    }

    /// `key_dir` with a leading `~/` replaced by `$HOME`.
    pub fn expanded_key_dir(&self) -> Utf8PathBuf {
        match (self.key_dir.strip_prefix("~"), std::env::var("HOME")) {
            (Ok(rest), Ok(home)) => Utf8PathBuf::from(home).join(rest),
            _ => self.key_dir.clone(),
        }
    }
}

/// What a job is asked to run while it holds its nodes.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub walltime: Walltime,
    #[serde(default = "JobSpec::default_command")]
    pub command: String,
    #[serde(default = "JobSpec::default_types")]
    pub types: Vec<String>,
    pub name: String,
    #[serde(default)]
    pub queue: Option<String>,
}

impl JobSpec {
    /// Keeps the reservation alive; the nodes are reinstalled anyway.
    pub const KEEPALIVE_COMMAND: &'static str = "sleep 1800";
    /// Jobs must carry this type to be allowed to deploy images.
    pub const DEPLOY_TYPE: &'static str = "deploy";

    fn default_command() -> String {
        Self::KEEPALIVE_COMMAND.to_string()
    }

    fn default_types() -> Vec<String> {
        vec![Self::DEPLOY_TYPE.to_string()]
    }

    pub fn new(name: &str, walltime: Walltime) -> JobSpec {
        JobSpec {
            walltime,
            command: Self::default_command(),
            types: Self::default_types(),
            name: name.to_string(),
            queue: None,
        }
    }
}

/// Which jobs a wave deploys onto.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobPolicy {
    /// The jobs left over from the previous phase, as they are.
    #[default]
    Reuse,
    /// The jobs left over from the previous phase, after waiting again for
    /// them to be running.
    Reconfirm,
    /// Fresh reservations at the same sites with the same requests.
    Resubmit,
}

/// One submit, await, release cycle of deployments.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WaveConfig {
    pub grouping: GroupingStrategy,
    /// Ignored for the first wave.
    #[serde(default)]
    pub jobs: JobPolicy,
    pub deployment_wait: PollPolicy,
}

/// Everything that distinguishes one kind of run from another.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub sizing: SizingPolicy,
    /// Sites never reserved at, compared case-insensitively.
    #[serde(default)]
    pub excluded_sites: BTreeSet<String>,
    pub job: JobSpec,
    /// Identifier of the image deployed onto the nodes.
    pub image: String,
    pub job_wait: PollPolicy,
    pub waves: Vec<WaveConfig>,
    /// Pause between the release of a wave and the start of the next.
    #[serde(default)]
    pub cooldown_secs: u64,
    /// Run the reachability check after the last wave.
    #[serde(default)]
    pub probe: bool,
}

impl RunConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.sizing.validate()?;
        if self.image.is_empty() {
            return Err("image must not be empty".to_string());
        }
        if self.waves.is_empty() {
            return Err("at least one wave is required".to_string());
        }
        self.job_wait.validate()?;
        for wave in &self.waves {
            wave.deployment_wait.validate()?;
        }
        Ok(())
    }
}
