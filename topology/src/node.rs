// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Autonomous systems of the emulated topology and their neighbours.

use crate::TopologyError;
use derive_builder::Builder;
use net::interface::InterfaceAddress;
use net::ip::IpVersion;
use net::prefix::Network;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

/// An autonomous system number.
pub type Asn = u32;

/// Index `i` of interface `eth<i>` on a device.
pub type InterfaceIndex = u32;

static NO_NETWORKS: BTreeSet<Network> = BTreeSet::new();
static NO_ADDRESSES: BTreeSet<InterfaceAddress> = BTreeSet::new();

/// The relationship of an AS with the candidate under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Upstream of the candidate
    Provider,
    /// Downstream of the candidate
    Customer,
    /// Settlement-free peer of the candidate
    Peer,
    /// The AS under test
    Candidate,
    /// Vantage point standing in for the rest of the Internet
    Internet,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match self {
            Role::Provider => "provider",
            Role::Customer => "customer",
            Role::Peer => "peer",
            Role::Candidate => "candidate",
            Role::Internet => "internet",
        };
        write!(f, "{role}")
    }
}

/// The device at the other end of one of an AS's interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbour {
    name: String,
    #[serde(default)]
    public_addresses: BTreeMap<IpVersion, BTreeSet<InterfaceAddress>>,
}

impl Neighbour {
    /// A neighbour with no recorded public address.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            public_addresses: BTreeMap::new(),
        }
    }

    /// Record a public address of the neighbour on the shared link.
    #[must_use]
    pub fn with_public_address(mut self, address: InterfaceAddress) -> Self {
        self.public_addresses
            .entry(address.version())
            .or_default()
            .insert(address);
        self
    }

    /// Device name of the neighbour.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The public addresses of the neighbour for `version`.
    #[must_use]
    pub fn public_addresses(&self, version: IpVersion) -> &BTreeSet<InterfaceAddress> {
        self.public_addresses.get(&version).unwrap_or(&NO_ADDRESSES)
    }
}

/// One AS of the topology, reduced to its router.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsNode {
    asn: Asn,

    #[builder(setter(into))]
    name: String,

    role: Role,

    #[builder(default)]
    #[serde(default)]
    local_networks: BTreeMap<IpVersion, BTreeSet<Network>>,

    #[builder(default)]
    #[serde(default)]
    neighbours: BTreeMap<InterfaceIndex, Neighbour>,
}

impl AsNodeBuilder {
    /// Add a locally originated network.
    pub fn local_network(&mut self, network: Network) -> &mut Self {
        self.local_networks
            .get_or_insert_with(BTreeMap::new)
            .entry(network.version())
            .or_default()
            .insert(network);
        self
    }

    /// Attach `neighbour` to interface `eth<iface>`.
    pub fn neighbour(&mut self, iface: InterfaceIndex, neighbour: Neighbour) -> &mut Self {
        self.neighbours
            .get_or_insert_with(BTreeMap::new)
            .insert(iface, neighbour);
        self
    }
}

impl AsNode {
    #[must_use]
    pub fn asn(&self) -> Asn {
        self.asn
    }

    /// Device name of the router.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn is_provider(&self) -> bool {
        self.role == Role::Provider
    }

    /// Device name of the client host hanging off this AS's router.
    #[must_use]
    pub fn client_name(&self) -> String {
        format!("as{}_client", self.asn)
    }

    /// The networks this AS originates for `version`.
    #[must_use]
    pub fn local_networks(&self, version: IpVersion) -> &BTreeSet<Network> {
        self.local_networks.get(&version).unwrap_or(&NO_NETWORKS)
    }

    /// All neighbours, by interface index.
    #[must_use]
    pub fn neighbours(&self) -> &BTreeMap<InterfaceIndex, Neighbour> {
        &self.neighbours
    }

    /// The interface which leads to the device named `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::NoSuchNeighbour`] if no interface leads there.
    pub fn find_interface_index(&self, peer: &str) -> Result<InterfaceIndex, TopologyError> {
        self.neighbours
            .iter()
            .find(|(_, neighbour)| neighbour.name() == peer)
            .map(|(iface, _)| *iface)
            .ok_or_else(|| TopologyError::NoSuchNeighbour {
                node: self.name.clone(),
                peer: peer.to_string(),
            })
    }

    /// The interface which leads to this AS's client host.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::NoSuchNeighbour`] if the client is not attached.
    pub fn client_interface(&self) -> Result<InterfaceIndex, TopologyError> {
        self.find_interface_index(&self.client_name())
    }

    /// Public addresses of the neighbour behind `iface`, for `version`.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::NoSuchInterface`] if `iface` has no neighbour.
    pub fn neighbour_public_addresses(
        &self,
        iface: InterfaceIndex,
        version: IpVersion,
    ) -> Result<&BTreeSet<InterfaceAddress>, TopologyError> {
        self.neighbours
            .get(&iface)
            .map(|neighbour| neighbour.public_addresses(version))
            .ok_or_else(|| TopologyError::NoSuchInterface {
                node: self.name.clone(),
                iface,
            })
    }
}

impl Display for AsNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AS{} ({}, {})", self.asn, self.name, self.role)
    }
}
