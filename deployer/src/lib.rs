// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reserve nodes on a cluster testbed, deploy an image onto them, and
//! release everything that was reserved, however the run ends.
//!
//! The [`orchestrator::Orchestrator`] drives one run against anything that
//! implements [`testbed::Testbed`]. Every accepted job and deployment is
//! registered with a [`tracker::Tracker`], whose extinction pass deletes
//! whatever is left when the run finishes, fails, or is interrupted.

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod entity;
pub mod grouping;
pub mod keys;
pub mod logging;
pub mod orchestrator;
pub mod poll;
pub mod presets;
pub mod probe;
pub mod results;
pub mod sizing;
pub mod submit;
pub mod supervise;
pub mod test_util;
pub mod testbed;
pub mod tracker;
