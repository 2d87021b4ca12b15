// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Surveying how many nodes each site can offer

use crate::testbed::NodeStatus;
use crate::testbed::SiteId;
use crate::testbed::Testbed;
use crate::testbed::TestbedError;
use slog::Logger;
use slog::{debug, info, warn};
use slog_error_chain::InlineErrorChain;
use std::collections::BTreeSet;

/// Snapshot of one site's free, healthy node count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteAvailability {
    pub site: SiteId,
    pub available: usize,
}

pub fn count_available(statuses: &[NodeStatus]) -> usize {
    statuses.iter().filter(|status| status.is_available()).count()
}

/// Returns true if `site` is in `excluded`, ignoring ASCII case.
pub fn is_excluded(excluded: &BTreeSet<String>, site: &SiteId) -> bool {
    excluded.iter().any(|e| e.eq_ignore_ascii_case(site.as_str()))
}

/// Fetches the availability of every site not in `excluded`.
///
/// Failing to list sites is an error. Failing to fetch one site's status
/// only drops that site from the survey.
pub async fn survey(
    log: &Logger,
    testbed: &dyn Testbed,
    excluded: &BTreeSet<String>,
) -> Result<Vec<SiteAvailability>, TestbedError> {
    let sites = testbed.site_list().await?;
    let mut survey = Vec::with_capacity(sites.len());

    for site in sites {
        if is_excluded(excluded, &site) {
            debug!(log, "site excluded"; "site" => %site);
            continue;
        }

        match testbed.site_status(&site).await {
            Ok(statuses) => {
                let available = count_available(&statuses);
                info!(log, "surveyed site";
                    "site" => %site,
                    "available" => available,
                    "total" => statuses.len(),
                );
                survey.push(SiteAvailability { site, available });
            }
            Err(error) => {
                warn!(log, "failed to fetch site status, skipping site";
                    "site" => %site,
                    InlineErrorChain::new(&error),
                );
            }
        }
    }

    Ok(survey)
}
