// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Trials: provisioning a spoofing scenario across the lab, checking it, and tearing it down.
//!
//! For each IP version, the Internet vantage point gets addresses out of the spoofed range. Then,
//! one provider at a time, the provider and the candidate get addresses out of their own networks
//! and the candidate's client sends a packet with a spoofed source towards the provider's client.

use crate::alloc::{AllocationLedger, allocate, allocate_pair};
use crate::check::{CheckRequest, run_check};
use crate::config::VerifyConfig;
use crate::error::{CheckError, ConfigurationError, VerifyError};
use crate::verdict::{SkipReason, VerificationRun};
use device::command::{ip_address_add, ip_address_del, ip_route_add, ip_route_del};
use device::{Command, DeviceExecutor, ExecError, Lab, VendorConfiguration};
use net::interface::InterfaceAddress;
use net::ip::IpVersion;
use net::prefix::{Network, aggregate};
use rand::Rng;
use rand::seq::IteratorRandom;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::net::IpAddr;
use topology::{AsNode, Asn, InterfaceIndex, Topology};
use tracing::{debug, error, info, warn};

/// Client hosts are attached to their router through `eth0`.
pub const CLIENT_IFACE: InterfaceIndex = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrialState {
    Idle,
    ProvisionInternet,
    ProvisionProvider,
    ProvisionCandidate,
    Settle,
    Check,
    Deprovision,
}

impl TrialState {
    /// True if a trial in this state may move on to `next`.
    ///
    /// Teardown is reachable from every state where something may have been provisioned.
    #[must_use]
    pub fn can_advance(self, next: TrialState) -> bool {
        use TrialState::{
            Check, Deprovision, Idle, ProvisionCandidate, ProvisionInternet, ProvisionProvider,
            Settle,
        };
        matches!(
            (self, next),
            (Idle, ProvisionInternet)
                | (ProvisionInternet, ProvisionProvider)
                | (ProvisionProvider, ProvisionCandidate)
                | (ProvisionCandidate, Settle)
                | (Settle, Check)
                | (
                    ProvisionInternet | ProvisionProvider | ProvisionCandidate | Settle | Check,
                    Deprovision
                )
                | (Deprovision, Idle)
        )
    }
}

impl Display for TrialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            TrialState::Idle => "idle",
            TrialState::ProvisionInternet => "provisioning internet",
            TrialState::ProvisionProvider => "provisioning provider",
            TrialState::ProvisionCandidate => "provisioning candidate",
            TrialState::Settle => "settling",
            TrialState::Check => "checking",
            TrialState::Deprovision => "deprovisioning",
        };
        write!(f, "{state}")
    }
}

/// One spoofing check through one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial {
    version: IpVersion,
    provider: Asn,
    spoofed: Network,
    provider_network: Option<Network>,
    candidate_network: Option<Network>,
    addresses: Vec<(String, InterfaceAddress)>,
    state: TrialState,
    result: Option<bool>,
}

impl Trial {
    #[must_use]
    pub fn new(version: IpVersion, provider: Asn, spoofed: Network) -> Self {
        Self {
            version,
            provider,
            spoofed,
            provider_network: None,
            candidate_network: None,
            addresses: Vec::new(),
            state: TrialState::Idle,
            result: None,
        }
    }

    #[must_use]
    pub fn version(&self) -> IpVersion {
        self.version
    }

    #[must_use]
    pub fn provider(&self) -> Asn {
        self.provider
    }

    /// The range spoofed source addresses are taken from.
    #[must_use]
    pub fn spoofed(&self) -> Network {
        self.spoofed
    }

    #[must_use]
    pub fn provider_network(&self) -> Option<Network> {
        self.provider_network
    }

    #[must_use]
    pub fn candidate_network(&self) -> Option<Network> {
        self.candidate_network
    }

    /// Addresses provisioned for this trial, with the device they were set on.
    #[must_use]
    pub fn addresses(&self) -> &[(String, InterfaceAddress)] {
        &self.addresses
    }

    #[must_use]
    pub fn state(&self) -> TrialState {
        self.state
    }

    /// `Some(true)` if the spoofed packet was filtered, `None` if the check never ran.
    #[must_use]
    pub fn result(&self) -> Option<bool> {
        self.result
    }

    pub fn advance(&mut self, next: TrialState) {
        debug_assert!(
            self.state.can_advance(next),
            "illegal trial transition {} -> {next}",
            self.state
        );
        debug!("AS{} {} trial: {} -> {next}", self.provider, self.version, self.state);
        self.state = next;
    }
}

/// Commands applied to the lab, together with the commands undoing them.
///
/// [`Provisioning::release`] must be called once the provisioned state is no longer needed.
/// Dropping an unreleased `Provisioning` leaves the lab dirty and is logged as an error.
pub struct Provisioning<'a, E: DeviceExecutor + ?Sized> {
    executor: &'a E,
    undo: Vec<(String, Command)>,
}

impl<'a, E: DeviceExecutor + ?Sized> Provisioning<'a, E> {
    pub fn new(executor: &'a E) -> Self {
        Self {
            executor,
            undo: Vec::new(),
        }
    }

    /// Run `command` on `device`, remembering `undo` if it succeeds.
    ///
    /// # Errors
    ///
    /// Fails if `command` fails, in which case there is nothing to undo.
    pub async fn apply(
        &mut self,
        device: &str,
        command: Command,
        undo: Command,
    ) -> Result<(), ExecError> {
        debug!("{device}: {command}");
        self.executor.exec(device, &command).await?;
        self.undo.push((device.to_string(), undo));
        Ok(())
    }

    /// Number of commands waiting to be undone.
    #[must_use]
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Undo every applied command, most recent first.
    ///
    /// All undo commands are attempted even if some fail.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub async fn release(mut self) -> Result<(), ExecError> {
        let mut first_error = None;
        while let Some((device, undo)) = self.undo.pop() {
            debug!("{device}: {undo}");
            if let Err(e) = self.executor.exec(&device, &undo).await {
                warn!("Failed to undo provisioning on {device}: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<E: DeviceExecutor + ?Sized> Drop for Provisioning<'_, E> {
    fn drop(&mut self) {
        for (device, undo) in self.undo.iter().rev() {
            error!("Provisioning leaked on {device}, never ran: {undo}");
        }
    }
}

/// What became of a trial that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    Completed(bool),
    Skipped(SkipReason),
}

// Addresses of the Internet vantage point out of the spoofed range.
#[derive(Debug, Clone)]
struct InternetLeg {
    spoofed: Network,
    router: (String, InterfaceAddress),
    client: (String, InterfaceAddress),
}

/// Runs the trials of one IP version.
pub struct TrialRunner<'a, L: Lab + ?Sized> {
    lab: &'a L,
    vendor: &'a dyn VendorConfiguration,
    topology: &'a Topology,
    config: &'a VerifyConfig,
}

impl<'a, L: Lab + ?Sized> TrialRunner<'a, L> {
    pub fn new(
        lab: &'a L,
        vendor: &'a dyn VendorConfiguration,
        topology: &'a Topology,
        config: &'a VerifyConfig,
    ) -> Self {
        Self {
            lab,
            vendor,
            topology,
            config,
        }
    }

    /// Run one trial per provider of the candidate, with source addresses spoofed out of
    /// `spoofed`.
    ///
    /// Everything provisioned is torn down before returning, errors included.
    ///
    /// # Errors
    ///
    /// Fails on inconsistent topologies, exhausted address ranges, lab failures and check scripts
    /// printing garbage. A check which does not complete in time is a failed trial, not an error.
    #[tracing::instrument(level = "info", skip_all, fields(%version, %spoofed))]
    pub async fn run<R: Rng + ?Sized>(
        &self,
        version: IpVersion,
        spoofed: Network,
        ledger: &mut AllocationLedger,
        rng: &mut R,
        run: &mut VerificationRun,
    ) -> Result<(), VerifyError> {
        let internet = self.topology.internet()?;
        info!("Setting {version} addresses on {internet}");
        let mut provisioning = Provisioning::new(self.lab);
        let result = match self
            .provision_internet(internet, spoofed, ledger, &mut provisioning)
            .await
        {
            Ok(leg) => self.run_providers(version, &leg, ledger, rng, run).await,
            Err(e) => Err(e),
        };
        info!("Removing {version} addresses from {internet}");
        let released = provisioning.release().await;
        result?;
        Ok(released?)
    }

    async fn provision_internet(
        &self,
        internet: &AsNode,
        spoofed: Network,
        ledger: &mut AllocationLedger,
        provisioning: &mut Provisioning<'_, L>,
    ) -> Result<InternetLeg, VerifyError> {
        let (router, client) = allocate_pair(&spoofed, ledger)?;
        let iface = internet.client_interface()?;
        self.provision_client_leg(internet, iface, router, client, provisioning)
            .await?;
        Ok(InternetLeg {
            spoofed,
            router: (internet.name().to_string(), router),
            client: (internet.client_name(), client),
        })
    }

    // Router address on `iface` of the router of `node`, client address and default route through
    // the router on its client.
    async fn provision_client_leg(
        &self,
        node: &AsNode,
        iface: InterfaceIndex,
        router: InterfaceAddress,
        client: InterfaceAddress,
        provisioning: &mut Provisioning<'_, L>,
    ) -> Result<(), ExecError> {
        let client_name = node.client_name();
        let default = Network::root(client.version());
        provisioning
            .apply(
                node.name(),
                ip_address_add(iface, &router),
                ip_address_del(iface, &router),
            )
            .await?;
        provisioning
            .apply(
                &client_name,
                ip_address_add(CLIENT_IFACE, &client),
                ip_address_del(CLIENT_IFACE, &client),
            )
            .await?;
        provisioning
            .apply(
                &client_name,
                ip_route_add(&default, router.address(), CLIENT_IFACE),
                ip_route_del(&default, router.address(), CLIENT_IFACE),
            )
            .await
    }

    async fn run_providers<R: Rng + ?Sized>(
        &self,
        version: IpVersion,
        internet: &InternetLeg,
        ledger: &mut AllocationLedger,
        rng: &mut R,
        run: &mut VerificationRun,
    ) -> Result<(), VerifyError> {
        let candidate = self.topology.get(self.vendor.local_as())?;
        for provider in self.topology.providers() {
            let networks = provider.local_networks(version);
            if networks.is_empty() {
                run.skip(
                    SkipReason::ProviderHasNoNetworks,
                    Some(version),
                    Some(provider.asn()),
                );
                continue;
            }
            let Some(provider_network) =
                pick_provider_network(networks, self.config.min_provider_hosts, rng)
            else {
                run.skip(
                    SkipReason::NoSuitableProviderNetwork,
                    Some(version),
                    Some(provider.asn()),
                );
                continue;
            };
            info!("Selected network {provider_network} on {provider}");

            // the Internet leg is shared by all trials of the version and is already up
            let mut trial = Trial::new(version, provider.asn(), internet.spoofed);
            trial.advance(TrialState::ProvisionInternet);
            trial
                .addresses
                .extend([internet.router.clone(), internet.client.clone()]);

            let mut provisioning = Provisioning::new(self.lab);
            let outcome = self
                .provision_and_check(
                    &mut trial,
                    candidate,
                    provider,
                    provider_network,
                    internet,
                    ledger,
                    rng,
                    &mut provisioning,
                )
                .await;
            trial.advance(TrialState::Deprovision);
            let released = provisioning.release().await;
            trial.advance(TrialState::Idle);

            match outcome? {
                TrialOutcome::Completed(passed) => {
                    if passed {
                        info!("Check passed on {version} with provider {provider}");
                    } else {
                        warn!("Check not passed on {version} with provider {provider}");
                    }
                    trial.result = Some(passed);
                }
                TrialOutcome::Skipped(reason) => {
                    run.skip(reason, Some(version), Some(provider.asn()));
                }
            }
            run.record(trial);
            released?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn provision_and_check<R: Rng + ?Sized>(
        &self,
        trial: &mut Trial,
        candidate: &AsNode,
        provider: &AsNode,
        provider_network: Network,
        internet: &InternetLeg,
        ledger: &mut AllocationLedger,
        rng: &mut R,
        provisioning: &mut Provisioning<'_, L>,
    ) -> Result<TrialOutcome, VerifyError> {
        let version = trial.version;

        trial.advance(TrialState::ProvisionProvider);
        trial.provider_network = Some(provider_network);
        // candidates may advertise space out of their provider's block
        let (provider_router, provider_client) = allocate_pair(&provider_network, ledger)?;
        self.provision_client_leg(
            provider,
            provider.client_interface()?,
            provider_router,
            provider_client,
            provisioning,
        )
        .await?;
        trial.addresses.extend([
            (provider.name().to_string(), provider_router),
            (provider.client_name(), provider_client),
        ]);

        let peering = peering_address(provider, candidate, version)?;
        let advertised = self.lab.advertised_networks(provider.name(), peering).await?;
        let advertised: BTreeSet<Network> = aggregate(&advertised)
            .into_iter()
            .filter(|network| network.version() == version)
            .collect();
        let Some(candidate_network) = advertised.into_iter().choose(rng) else {
            return Ok(TrialOutcome::Skipped(SkipReason::NothingAdvertised));
        };
        info!("Selected network {candidate_network} on candidate {candidate}");
        trial.candidate_network = Some(candidate_network);

        // candidate leg
        trial.advance(TrialState::ProvisionCandidate);
        let candidate_client = allocate(&candidate_network, ledger)?;
        ledger.record(&candidate_client);
        let candidate_router = allocate(&candidate_network, ledger)?;
        ledger.record(&candidate_router);
        let client_name = candidate.client_name();
        let default = Network::root(version);
        provisioning
            .apply(
                &client_name,
                ip_address_add(CLIENT_IFACE, &candidate_client),
                ip_address_del(CLIENT_IFACE, &candidate_client),
            )
            .await?;
        provisioning
            .apply(
                &client_name,
                ip_route_add(&default, candidate_router.address(), CLIENT_IFACE),
                ip_route_del(&default, candidate_router.address(), CLIENT_IFACE),
            )
            .await?;
        let iface = candidate.client_interface()?;
        provisioning
            .apply(
                candidate.name(),
                self.vendor.set_interface_address(iface, &candidate_router),
                self.vendor.unset_interface_address(iface, &candidate_router),
            )
            .await?;
        trial.addresses.extend([
            (client_name.clone(), candidate_client),
            (candidate.name().to_string(), candidate_router),
        ]);

        trial.advance(TrialState::Settle);
        let settle = self.config.settle_delay();
        info!("Waiting {settle:?} before performing check");
        tokio::time::sleep(settle).await;

        trial.advance(TrialState::Check);
        let request = CheckRequest {
            candidate_source: candidate_client.address(),
            spoofed_source: internet.client.1.address(),
            destination: provider_client.address(),
            version,
        };
        let command = request.command(
            &self.config.check_interpreter,
            &self.config.check_script,
            self.config.check_timeout(),
        );
        match run_check(
            self.lab,
            &client_name,
            &command,
            self.config.poll_interval(),
            self.config.check_timeout(),
        )
        .await
        {
            Ok(passed) => Ok(TrialOutcome::Completed(passed)),
            Err(CheckError::Timeout(timeout)) => {
                warn!("Check on {client_name} timed out after {timeout:?}, counting it as failed");
                Ok(TrialOutcome::Completed(false))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A random network out of `networks` with strictly more than `min_hosts` host addresses.
pub fn pick_provider_network<R: Rng + ?Sized>(
    networks: &BTreeSet<Network>,
    min_hosts: u32,
    rng: &mut R,
) -> Option<Network> {
    networks
        .iter()
        .filter(|network| network.host_count() > u128::from(min_hosts))
        .choose(rng)
        .copied()
}

/// The address of the candidate on its peering with `provider`, as seen by the provider.
///
/// # Errors
///
/// Fails unless the provider knows exactly one such address for `version`.
pub fn peering_address(
    provider: &AsNode,
    candidate: &AsNode,
    version: IpVersion,
) -> Result<IpAddr, ConfigurationError> {
    let iface = provider.find_interface_index(candidate.name())?;
    let addresses = provider.neighbour_public_addresses(iface, version)?;
    match addresses.iter().collect::<Vec<_>>().as_slice() {
        [address] => Ok(address.address()),
        others => Err(ConfigurationError::PeeringAddress {
            provider: provider.name().to_string(),
            version,
            count: others.len(),
        }),
    }
}
