// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Choosing how many nodes to reserve at a site

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// How many of a site's free nodes to ask for.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum SizingPolicy {
    /// Half of the free nodes, rounded down.
    Half,
    /// The given percentage of the free nodes, rounded down.
    Percent { percent: u8 },
    /// Let the server pick as many nodes as it can.
    BestEffort,
    /// Always the same number of nodes.
    Fixed { nodes: NonZeroU32 },
}

impl SizingPolicy {
    /// Sites with at most this many free nodes are never sized.
    pub const MIN_EXCLUSIVE_AVAILABLE: usize = 1;

    /// Returns what to request from a site that currently has `available`
    /// free, healthy nodes, or `None` if the site should be skipped.
    pub fn request(&self, available: usize) -> Option<NodeRequest> {
        if available <= Self::MIN_EXCLUSIVE_AVAILABLE {
            return None;
        }

        let count = match self {
            SizingPolicy::BestEffort => {
                return Some(NodeRequest::BestEffort);
            }
            SizingPolicy::Fixed { nodes } => {
                return Some(NodeRequest::Count(*nodes));
            }
            SizingPolicy::Half => available / 2,
            SizingPolicy::Percent { percent } => {
                available * usize::from(*percent) / 100
            }
        };

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let count = NonZeroU32::new(count).unwrap_or(NonZeroU32::MIN);
        Some(NodeRequest::Count(count))
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            SizingPolicy::Percent { percent }
                if !(1..=100).contains(percent) =>
            {
                Err(format!(
                    "sizing percentage must be between 1 and 100 \
                     (got {percent})"
                ))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SizingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingPolicy::Half => write!(f, "half of free nodes"),
            SizingPolicy::Percent { percent } => {
                write!(f, "{percent}% of free nodes")
            }
            SizingPolicy::BestEffort => write!(f, "best effort"),
            SizingPolicy::Fixed { nodes } => write!(f, "{nodes} nodes"),
        }
    }
}

/// The node count part of a reservation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRequest {
    Count(NonZeroU32),
    /// Passed through to the server verbatim; the server decides.
    BestEffort,
}

impl fmt::Display for NodeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRequest::Count(n) => write!(f, "{n}"),
            NodeRequest::BestEffort => write!(f, "BEST"),
        }
    }
}

/// Wall-time limit of a reservation, written `HH:MM:SS` on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Walltime(Duration);

#[derive(Debug, Error)]
#[error("invalid walltime {input:?}: expected HH:MM:SS")]
pub struct WalltimeParseError {
    input: String,
}

impl Walltime {
    pub fn from_secs(secs: u64) -> Walltime {
        Walltime(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for Walltime {
    type Err = WalltimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || WalltimeParseError { input: s.to_string() };
        let parts = s
            .split(':')
            .map(|p| p.parse::<u64>().map_err(|_| err()))
            .collect::<Result<Vec<_>, _>>()?;
        let [hours, minutes, seconds] = parts[..] else {
            return Err(err());
        };
        if minutes >= 60 || seconds >= 60 {
            return Err(err());
        }
        let total = hours
            .checked_mul(3600)
            .and_then(|h| h.checked_add(minutes * 60 + seconds))
            .filter(|total| *total > 0)
            .ok_or_else(err)?;
        Ok(Walltime::from_secs(total))
    }
}

impl TryFrom<String> for Walltime {
    type Error = WalltimeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Walltime> for String {
    fn from(value: Walltime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Walltime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        write!(
            f,
            "{:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        )
    }
}

/// Builds the resource expression of a reservation request.
pub fn resources(request: NodeRequest, walltime: Walltime) -> String {
    format!("nodes={request},walltime={walltime}")
}
