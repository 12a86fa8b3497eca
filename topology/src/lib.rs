// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The emulated multi-AS topology a candidate router is verified against.
//!
//! The topology is read-only input: it is built (or deserialized) by the embedding program and
//! only queried afterwards.

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::missing_errors_doc)]

mod node;

pub use node::{AsNode, AsNodeBuilder, AsNodeBuilderError, Asn, InterfaceIndex, Neighbour, Role};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("AS{0} is not part of the topology")]
    NoSuchNode(Asn),
    #[error("AS{0} appears more than once in the topology")]
    DuplicateNode(Asn),
    #[error("topology has no {0} node")]
    MissingRole(Role),
    #[error("topology has more than one {0} node")]
    AmbiguousRole(Role),
    #[error("device {node} has no interface towards {peer}")]
    NoSuchNeighbour { node: String, peer: String },
    #[error("device {node} has no neighbour on eth{iface}")]
    NoSuchInterface { node: String, iface: InterfaceIndex },
}

/// Collection of AS nodes keyed by AS number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AsNode>", into = "Vec<AsNode>")]
pub struct Topology {
    nodes: BTreeMap<Asn, AsNode>,
}

impl Topology {
    /// Build a topology out of its nodes.
    ///
    /// # Errors
    ///
    /// Fails if two nodes share an AS number.
    pub fn new(nodes: impl IntoIterator<Item = AsNode>) -> Result<Self, TopologyError> {
        let mut topology = Topology::default();
        for node in nodes {
            topology.add(node)?;
        }
        Ok(topology)
    }

    /// Add a node to the topology.
    ///
    /// # Errors
    ///
    /// Fails if the AS number is already taken.
    pub fn add(&mut self, node: AsNode) -> Result<(), TopologyError> {
        let asn = node.asn();
        if self.nodes.contains_key(&asn) {
            return Err(TopologyError::DuplicateNode(asn));
        }
        debug!("Adding {node} to topology");
        self.nodes.insert(asn, node);
        Ok(())
    }

    pub fn get(&self, asn: Asn) -> Result<&AsNode, TopologyError> {
        self.nodes.get(&asn).ok_or(TopologyError::NoSuchNode(asn))
    }

    /// All nodes, in ascending AS number order.
    pub fn all(&self) -> impl Iterator<Item = &AsNode> {
        self.nodes.values()
    }

    /// Providers of the candidate, in ascending AS number order.
    pub fn providers(&self) -> impl Iterator<Item = &AsNode> {
        self.with_role(Role::Provider)
    }

    /// The AS under test.
    pub fn candidate(&self) -> Result<&AsNode, TopologyError> {
        self.unique(Role::Candidate)
    }

    /// The vantage point spoofed traffic originates from.
    pub fn internet(&self) -> Result<&AsNode, TopologyError> {
        self.unique(Role::Internet)
    }

    fn with_role(&self, role: Role) -> impl Iterator<Item = &AsNode> {
        self.nodes.values().filter(move |node| node.role() == role)
    }

    fn unique(&self, role: Role) -> Result<&AsNode, TopologyError> {
        let mut nodes = self.with_role(role);
        let node = nodes.next().ok_or(TopologyError::MissingRole(role))?;
        if nodes.next().is_some() {
            return Err(TopologyError::AmbiguousRole(role));
        }
        Ok(node)
    }
}

impl TryFrom<Vec<AsNode>> for Topology {
    type Error = TopologyError;

    fn try_from(nodes: Vec<AsNode>) -> Result<Self, Self::Error> {
        Topology::new(nodes)
    }
}

impl From<Topology> for Vec<AsNode> {
    fn from(topology: Topology) -> Self {
        topology.nodes.into_values().collect()
    }
}
