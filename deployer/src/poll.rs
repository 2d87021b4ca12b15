// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded waiting for remote entities to reach a state

use crate::cancel::CancelWatch;
use crate::cancel::Cancelled;
use crate::testbed::Testbed;
use crate::testbed::TestbedError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slog::Logger;
use slog::{debug, info, warn};
use slog_error_chain::InlineErrorChain;
use std::time::Duration;
use tokio::time::Instant;

/// How often to refresh and how long to keep trying.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct PollPolicy {
    pub interval_secs: u64,
    pub deadline_secs: u64,
}

impl PollPolicy {
    pub const fn new(interval: Duration, deadline: Duration) -> PollPolicy {
        PollPolicy {
            interval_secs: interval.as_secs(),
            deadline_secs: deadline.as_secs(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("poll interval must be at least one second".into());
        }
        Ok(())
    }
}

/// A deadline as both its starting time and its duration.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    duration: Duration,
}

impl Deadline {
    /// Create a new `Deadline` with the given duration starting from
    /// [`Instant::now()`].
    pub fn from_now(duration: Duration) -> Self {
        Self { start: Instant::now(), duration }
    }

    /// Get the [`Instant`] when this deadline expires.
    pub fn end(&self) -> Instant {
        self.start + self.duration
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.end()
    }
}

/// Something whose state can be re-fetched from the testbed.
#[async_trait]
pub trait Trackable: Send {
    /// Short description used in log messages.
    fn describe(&self) -> String;

    async fn refresh(
        &mut self,
        testbed: &dyn Testbed,
    ) -> Result<(), TestbedError>;
}

/// How a wait ended, short of being interrupted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Every entity satisfied the predicate.
    Complete,
    /// The deadline elapsed with `pending` entities still incomplete.
    TimedOut { pending: usize },
}

/// Refresh `entities` every `policy.interval()` until all of them satisfy
/// `is_complete` or `policy.deadline()` elapses.
///
/// Entities are refreshed in slice order on every tick, and `observe` is
/// called after each successful refresh. A failed refresh keeps the last
/// known state. An elapsed deadline is not an error: the caller decides
/// what to do with the entities that are still pending.
pub async fn wait_for_all<T, C, O>(
    log: &Logger,
    testbed: &dyn Testbed,
    entities: &mut [T],
    policy: &PollPolicy,
    cancel: &mut CancelWatch,
    is_complete: C,
    mut observe: O,
) -> Result<PollOutcome, Cancelled>
where
    T: Trackable,
    C: Fn(&T) -> bool,
    O: FnMut(&T),
{
    let deadline = Deadline::from_now(policy.deadline());
    let interval = policy.interval();

    loop {
        cancel.check()?;

        let pending = entities.iter().filter(|e| !is_complete(e)).count();
        if pending == 0 {
            debug!(log, "all entities complete";
                "count" => entities.len(),
                "elapsed" => ?deadline.elapsed(),
            );
            return Ok(PollOutcome::Complete);
        }
        if deadline.is_expired() {
            warn!(log, "gave up waiting";
                "pending" => pending,
                "deadline" => %humantime::format_duration(policy.deadline()),
            );
            return Ok(PollOutcome::TimedOut { pending });
        }

        info!(log, "some entities are not ready, waiting before checking again";
            "pending" => pending,
            "interval" => %humantime::format_duration(interval),
        );
        let wake = std::cmp::min(Instant::now() + interval, deadline.end());
        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = cancel.cancelled() => return Err(Cancelled),
        }
        if deadline.is_expired() {
            continue;
        }

        refresh_all(log, testbed, entities, cancel, &mut observe).await?;
    }
}

/// Refresh every entity once, in slice order, calling `observe` after each
/// successful refresh. A failed refresh keeps the last known state.
pub async fn refresh_all<T, O>(
    log: &Logger,
    testbed: &dyn Testbed,
    entities: &mut [T],
    cancel: &CancelWatch,
    mut observe: O,
) -> Result<(), Cancelled>
where
    T: Trackable,
    O: FnMut(&T),
{
    for entity in entities.iter_mut() {
        cancel.check()?;
        match entity.refresh(testbed).await {
            Ok(()) => observe(entity),
            Err(error) => {
                warn!(log, "failed to refresh";
                    "entity" => entity.describe(),
                    InlineErrorChain::new(&error),
                );
            }
        }
    }
    Ok(())
}
