// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Trial outcomes and the verdict they add up to.

use crate::trial::Trial;
use net::ip::IpVersion;
use std::collections::BTreeMap;
use std::fmt::Display;
use topology::Asn;
use tracing::warn;

/// Why a trial, or every trial of an IP version, did not take place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The candidate has no provider at all
    NoProviders,
    /// No provider announces anything for the IP version
    NoAnnouncedNetworks,
    /// This provider originates nothing for the IP version
    ProviderHasNoNetworks,
    /// None of the provider's networks has enough host addresses
    NoSuitableProviderNetwork,
    /// The candidate advertises nothing to this provider
    NothingAdvertised,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            SkipReason::NoProviders => "the candidate has no providers",
            SkipReason::NoAnnouncedNetworks => "no provider announces any network",
            SkipReason::ProviderHasNoNetworks => "the provider has no local networks",
            SkipReason::NoSuitableProviderNetwork => {
                "none of the provider's networks has enough hosts"
            }
            SkipReason::NothingAdvertised => "the candidate advertises nothing to the provider",
        };
        write!(f, "{reason}")
    }
}

/// A skipped trial, or set of trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Skip {
    pub reason: SkipReason,
    pub version: Option<IpVersion>,
    pub provider: Option<Asn>,
}

impl Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.version, self.provider) {
            (Some(version), Some(provider)) => {
                write!(f, "{version} trial with AS{provider}: {}", self.reason)
            }
            (Some(version), None) => write!(f, "{version} trials: {}", self.reason),
            (None, Some(provider)) => write!(f, "trials with AS{provider}: {}", self.reason),
            (None, None) => write!(f, "all trials: {}", self.reason),
        }
    }
}

/// Folds trial results into a verdict.
///
/// The verdict is the conjunction of the results. Skips are recorded but do not count: with no
/// result at all, the verdict is a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultAggregator {
    results: Vec<bool>,
    skips: Vec<Skip>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, passed: bool) {
        self.results.push(passed);
    }

    pub fn skip(&mut self, skip: Skip) {
        warn!("Skipping {skip}");
        self.skips.push(skip);
    }

    #[must_use]
    pub fn results(&self) -> &[bool] {
        &self.results
    }

    #[must_use]
    pub fn skips(&self) -> &[Skip] {
        &self.skips
    }

    #[must_use]
    pub fn verdict(&self) -> bool {
        self.results.iter().all(|passed| *passed)
    }
}

/// Everything that happened during one verification.
#[derive(Debug, Default)]
pub struct VerificationRun {
    trials: BTreeMap<IpVersion, Vec<Trial>>,
    aggregator: ResultAggregator,
}

impl VerificationRun {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a trial. Only trials with a result count towards the verdict.
    pub fn record(&mut self, trial: Trial) {
        if let Some(passed) = trial.result() {
            self.aggregator.record(passed);
        }
        self.trials.entry(trial.version()).or_default().push(trial);
    }

    pub fn skip(&mut self, reason: SkipReason, version: Option<IpVersion>, provider: Option<Asn>) {
        self.aggregator.skip(Skip {
            reason,
            version,
            provider,
        });
    }

    /// Trials of `version`, in the order they ran.
    #[must_use]
    pub fn trials(&self, version: IpVersion) -> &[Trial] {
        self.trials.get(&version).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn skips(&self) -> &[Skip] {
        self.aggregator.skips()
    }

    #[must_use]
    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    #[must_use]
    pub fn verdict(&self) -> bool {
        self.aggregator.verdict()
    }
}
