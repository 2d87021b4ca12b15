// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Seeing a spawned run through to the end, whatever the end is

use crate::cancel::CancelTrigger;
use crate::orchestrator::RunError;
use crate::orchestrator::RunReport;
use crate::testbed::Testbed;
use crate::tracker::Tracker;
use futures::Stream;
use futures::StreamExt;
use slog::Logger;
use slog::{error, warn};
use slog_error_chain::InlineErrorChain;
use slog_error_chain::SlogInlineError;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Ways a supervised run can end other than with a report.
#[derive(Debug, Error, SlogInlineError)]
pub enum RunFailure {
    #[error("run failed")]
    Run(#[source] RunError),
    #[error("run abandoned after a second signal")]
    Abandoned,
    #[error("run panicked: {0}")]
    Panicked(String),
}

/// Waits for the run in `task`, relaying `signals` to it, then releases
/// everything still registered with `tracker`.
///
/// The first signal asks the run to stop at its next suspension point; a
/// second one aborts the task. The extinction pass runs exactly once on
/// every path, including a panic inside the run. Only a run that produced
/// a report counts as a success.
pub async fn supervise<S>(
    log: &Logger,
    mut task: JoinHandle<Result<RunReport, RunError>>,
    signals: S,
    trigger: CancelTrigger,
    tracker: &Tracker,
    testbed: &dyn Testbed,
) -> Result<RunReport, RunFailure>
where
    S: Stream<Item = i32> + Unpin,
{
    let mut signals = signals.fuse();
    let mut interrupted = false;
    let joined = loop {
        tokio::select! {
            joined = &mut task => break joined,
            Some(signal) = signals.next() => {
                if interrupted {
                    warn!(log, "caught another signal, abandoning run";
                        "signal" => signal,
                    );
                    task.abort();
                } else {
                    warn!(log, "caught signal, stopping run";
                        "signal" => signal,
                    );
                    interrupted = true;
                    trigger.cancel();
                }
            }
        }
    };

    let extinction = tracker.extinguish(log, testbed).await;
    if extinction.failures > 0 {
        warn!(log, "some entities could not be deleted";
            "failures" => extinction.failures,
        );
    }

    match joined {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(error @ RunError::Interrupted)) => {
            error!(log, "run interrupted");
            Err(RunFailure::Run(error))
        }
        Ok(Err(error)) => {
            error!(log, "run failed"; InlineErrorChain::new(&error));
            Err(RunFailure::Run(error))
        }
        Err(join_error) if join_error.is_cancelled() => {
            error!(log, "run abandoned");
            Err(RunFailure::Abandoned)
        }
        Err(join_error) => {
            error!(log, "run panicked"; "error" => %join_error);
            Err(RunFailure::Panicked(join_error.to_string()))
        }
    }
}
