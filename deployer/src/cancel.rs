// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delivering an interrupt request to the orchestrator

use thiserror::Error;
use tokio::sync::watch;

/// Returned by any wait that observed the interrupt request.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("interrupted")]
pub struct Cancelled;

/// Requests cancellation of every [`CancelWatch`] created with it.
#[derive(Debug)]
pub struct CancelTrigger(watch::Sender<bool>);

impl CancelTrigger {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Clone, Debug)]
pub struct CancelWatch(watch::Receiver<bool>);

pub fn cancel_pair() -> (CancelTrigger, CancelWatch) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger(tx), CancelWatch(rx))
}

impl CancelWatch {
    /// A watch that is never cancelled.
    pub fn never() -> CancelWatch {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Fails with [`Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }

    /// Completes once cancellation is requested.
    ///
    /// If the trigger is dropped without cancelling, this never completes.
    pub async fn cancelled(&mut self) {
        if self.0.wait_for(|cancelled| *cancelled).await.is_err() {
            futures::future::pending::<()>().await;
        }
    }

    /// Sleeps for `duration` unless cancelled first.
    pub async fn sleep(
        &mut self,
        duration: std::time::Duration,
    ) -> Result<(), Cancelled> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(Cancelled),
        }
    }
}
