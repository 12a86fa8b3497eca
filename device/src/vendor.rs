// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Vendor specific configuration of the candidate router.
//!
//! The candidate is the one device whose control syntax is not generic: interface addresses are
//! set through its own management plane so that the routing daemon sees them.

use crate::command::{self, Command};
use derive_builder::Builder;
use net::interface::InterfaceAddress;
use net::ip::IpVersion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use topology::{Asn, InterfaceIndex};

/// Generates the commands configuring the candidate router.
pub trait VendorConfiguration: Send + Sync {
    /// AS number of the candidate.
    fn local_as(&self) -> Asn;

    /// Addresses configured on the candidate's interfaces before verification starts.
    fn assigned_addresses(&self) -> Vec<InterfaceAddress>;

    /// Command assigning `address` to interface `eth<iface>`.
    fn set_interface_address(&self, iface: InterfaceIndex, address: &InterfaceAddress) -> Command;

    /// Command removing `address` from interface `eth<iface>`.
    fn unset_interface_address(&self, iface: InterfaceIndex, address: &InterfaceAddress)
    -> Command;
}

/// What verification needs to know of the candidate's own configuration.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateConfig {
    local_as: Asn,

    /// Addresses per interface index.
    #[builder(default)]
    #[serde(default)]
    interfaces: BTreeMap<InterfaceIndex, BTreeSet<InterfaceAddress>>,
}

impl CandidateConfigBuilder {
    /// Record an address configured on interface `eth<iface>`.
    pub fn interface_address(
        &mut self,
        iface: InterfaceIndex,
        address: InterfaceAddress,
    ) -> &mut Self {
        self.interfaces
            .get_or_insert_with(BTreeMap::new)
            .entry(iface)
            .or_default()
            .insert(address);
        self
    }
}

impl CandidateConfig {
    #[must_use]
    pub fn local_as(&self) -> Asn {
        self.local_as
    }

    /// All configured addresses, across interfaces.
    #[must_use]
    pub fn assigned_addresses(&self) -> Vec<InterfaceAddress> {
        self.interfaces.values().flatten().copied().collect()
    }
}

/// FRR managed candidate: addresses go through `vtysh` so that zebra owns them.
#[derive(Debug, Clone)]
pub struct Frr {
    config: CandidateConfig,
}

impl Frr {
    #[must_use]
    pub fn new(config: CandidateConfig) -> Self {
        Self { config }
    }

    fn vtysh(iface: InterfaceIndex, statement: String) -> Command {
        Command::new("vtysh")
            .args(["-c", "configure terminal", "-c"])
            .arg(format!("interface eth{iface}"))
            .arg("-c")
            .arg(statement)
    }

    fn keyword(address: &InterfaceAddress) -> &'static str {
        match address.version() {
            IpVersion::V4 => "ip",
            IpVersion::V6 => "ipv6",
        }
    }
}

impl VendorConfiguration for Frr {
    fn local_as(&self) -> Asn {
        self.config.local_as()
    }

    fn assigned_addresses(&self) -> Vec<InterfaceAddress> {
        self.config.assigned_addresses()
    }

    fn set_interface_address(&self, iface: InterfaceIndex, address: &InterfaceAddress) -> Command {
        Frr::vtysh(iface, format!("{} address {address}", Frr::keyword(address)))
    }

    fn unset_interface_address(
        &self,
        iface: InterfaceIndex,
        address: &InterfaceAddress,
    ) -> Command {
        Frr::vtysh(iface, format!("no {} address {address}", Frr::keyword(address)))
    }
}

/// Candidate whose interfaces are plain kernel interfaces (e.g. BIRD based routers).
#[derive(Debug, Clone)]
pub struct Iproute2 {
    config: CandidateConfig,
}

impl Iproute2 {
    #[must_use]
    pub fn new(config: CandidateConfig) -> Self {
        Self { config }
    }
}

impl VendorConfiguration for Iproute2 {
    fn local_as(&self) -> Asn {
        self.config.local_as()
    }

    fn assigned_addresses(&self) -> Vec<InterfaceAddress> {
        self.config.assigned_addresses()
    }

    fn set_interface_address(&self, iface: InterfaceIndex, address: &InterfaceAddress) -> Command {
        command::ip_address_add(iface, address)
    }

    fn unset_interface_address(
        &self,
        iface: InterfaceIndex,
        address: &InterfaceAddress,
    ) -> Command {
        command::ip_address_del(iface, address)
    }
}
