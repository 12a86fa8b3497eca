// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Verification that a candidate BGP router filters spoofed source addresses.
//!
//! Against an emulated lab, the verifier picks an address range nobody announces, wires
//! point-to-point addressing from the Internet vantage point, through each provider, down to the
//! candidate's client, and has the client send spoofed packets. The candidate passes if every
//! spoofed packet is dropped.

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod alloc;
pub mod check;
pub mod config;
pub mod error;
pub mod select;
pub mod trial;
pub mod verdict;

pub use config::{PrefixBounds, VerifyConfig, VerifyConfigBuilder};
pub use error::{AllocError, CheckError, ConfigurationError, SelectError, VerifyError};
pub use verdict::{ResultAggregator, Skip, SkipReason, VerificationRun};

use crate::alloc::AllocationLedger;
use crate::trial::TrialRunner;
use device::{Lab, VendorConfiguration};
use net::ip::IpVersion;
use net::prefix::{Network, aggregate_by_version};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use topology::Topology;
use tracing::{debug, info};

/// One verification of a candidate.
pub struct Verifier<'a, L: Lab + ?Sized> {
    vendor: &'a dyn VendorConfiguration,
    topology: &'a Topology,
    lab: &'a L,
    config: VerifyConfig,
    rng: StdRng,
}

impl<'a, L: Lab + ?Sized> Verifier<'a, L> {
    /// Prepare the verification of the candidate `vendor` describes.
    ///
    /// # Errors
    ///
    /// Fails if `config` is inconsistent.
    pub fn new(
        vendor: &'a dyn VendorConfiguration,
        topology: &'a Topology,
        lab: &'a L,
        config: VerifyConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(|| rand::rng().next_u64());
        debug!("random seed is {seed}");
        Ok(Self {
            vendor,
            topology,
            lab,
            config,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Run every trial and return what happened.
    ///
    /// # Errors
    ///
    /// See [`VerifyError`]. The lab is left as it was found, errors included.
    #[tracing::instrument(level = "info", skip_all, fields(candidate = self.vendor.local_as()))]
    pub async fn run(&mut self) -> Result<VerificationRun, VerifyError> {
        let candidate = self.topology.get(self.vendor.local_as())?;
        let client = candidate.client_name();
        if let Some(content) = &self.config.check_script_content {
            info!("Copying spoofing check script into candidate client {client}");
            self.lab
                .copy(&client, &self.config.check_script, content.clone())
                .await?;
        }

        let mut run = VerificationRun::new();
        let providers: Vec<_> = self.topology.providers().collect();
        if providers.is_empty() {
            run.skip(SkipReason::NoProviders, None, None);
            return Ok(run);
        }

        let mut announced: BTreeMap<IpVersion, BTreeSet<Network>> = IpVersion::ALL
            .into_iter()
            .map(|version| (version, BTreeSet::new()))
            .collect();
        for provider in &providers {
            info!("Reading networks from provider {provider}");
            for (version, networks) in self.lab.announced_networks(provider.name()).await? {
                announced.entry(version).or_default().extend(networks);
            }
        }
        info!("Aggregating networks");
        aggregate_by_version(&mut announced);
        debug!("Resulting networks are {announced:?}");

        let mut ledger = AllocationLedger::seeded(&self.vendor.assigned_addresses());
        let runner = TrialRunner::new(self.lab, self.vendor, self.topology, &self.config);
        for (version, networks) in &announced {
            info!("Performing check on {version}");
            if networks.is_empty() {
                run.skip(SkipReason::NoAnnouncedNetworks, Some(*version), None);
                continue;
            }
            let spoofed = select::select(
                *version,
                networks,
                self.config.bounds(*version),
                self.config.selector_attempts,
                &mut self.rng,
            )?;
            info!("Chosen network to spoof is {spoofed}");
            runner
                .run(*version, spoofed, &mut ledger, &mut self.rng, &mut run)
                .await?;
        }
        info!(
            "Verification complete: {} trials, {} skips, verdict {}",
            run.aggregator().results().len(),
            run.skips().len(),
            run.verdict()
        );
        Ok(run)
    }
}

/// Verify that the candidate `vendor` describes filters spoofed traffic coming from its providers.
///
/// Returns the verdict: true if every trial passed, including when no trial could run.
///
/// # Errors
///
/// See [`VerifyError`].
pub async fn verify<L: Lab + ?Sized>(
    vendor: &dyn VendorConfiguration,
    topology: &Topology,
    lab: &L,
    config: VerifyConfig,
) -> Result<bool, VerifyError> {
    let mut verifier = Verifier::new(vendor, topology, lab, config)?;
    Ok(verifier.run().await?.verdict())
}
