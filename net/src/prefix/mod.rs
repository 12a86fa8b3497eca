// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Networks in CIDR notation, and the host ranges they carry.

mod aggregate;

pub use aggregate::{aggregate, aggregate_by_version, exclude};
#[cfg(any(test, feature = "bolero"))]
#[allow(unused_imports)] // re-export
pub use contract::*;

use crate::ip::IpVersion;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use tracing::debug;

/// An error indicating that an invalid network was provided.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidNetwork {
    /// The prefix length is longer than the address width
    #[error("invalid prefix length {1} for {0}")]
    PrefixTooLong(IpVersion, u8),
    /// The provided network description contains set non-network bits
    #[error("Address {0}/{1} contains non network bits")]
    AddressContainsNonNetworkBits(IpAddr, u8),
    /// Failed to parse input as ipv4 or ipv6 network
    #[error("failed to parse input '{0}' as ipv4 or ipv6 network")]
    ParseFailure(String),
}

/// An `IpAddr` with a prefix length describing a network in CIDR notation.
///
/// Note that unlike [`IpNet`] from the `ipnet` crate, this type ensures that only network bits
/// are set in the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Network(IpNet);

fn to_bits(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(addr) => u128::from(addr.to_bits()),
        IpAddr::V6(addr) => addr.to_bits(),
    }
}

#[allow(clippy::cast_possible_truncation)] // ipv4 bits never exceed 32 bits here
fn from_bits(version: IpVersion, bits: u128) -> IpAddr {
    match version {
        IpVersion::V4 => IpAddr::V4(Ipv4Addr::from_bits(bits as u32)),
        IpVersion::V6 => IpAddr::V6(Ipv6Addr::from_bits(bits)),
    }
}

// Mask with the low (host) bits of a `version` network of length `len` set.
fn host_mask(version: IpVersion, len: u8) -> u128 {
    let host_bits = u32::from(version.max_prefix_len() - len);
    if host_bits == 0 {
        0
    } else {
        u128::MAX >> (128 - host_bits)
    }
}

impl Network {
    // Callers guarantee that `len` is legal for `version` and that `bits` has no host bits set.
    fn from_parts(version: IpVersion, bits: u128, len: u8) -> Network {
        match from_bits(version, bits) {
            IpAddr::V4(addr) => Network(IpNet::V4(Ipv4Net::new_assert(addr, len))),
            IpAddr::V6(addr) => Network(IpNet::V6(Ipv6Net::new_assert(addr, len))),
        }
    }

    /// The root network of `version`, i.e. the default route `0.0.0.0/0` or `::/0`.
    #[must_use]
    pub fn root(version: IpVersion) -> Network {
        Network::from_parts(version, 0, 0)
    }

    /// Constructor which validates the arguments provided.
    ///
    /// # Errors
    ///
    /// * Returns [`InvalidNetwork::PrefixTooLong`] if the prefix length exceeds the address width.
    /// * Returns [`InvalidNetwork::AddressContainsNonNetworkBits`] if the provided address contains
    ///   non-network bits.
    #[tracing::instrument(level = "trace")]
    pub fn new_strict(addr: impl Into<IpAddr> + Debug, len: u8) -> Result<Network, InvalidNetwork> {
        let addr = addr.into();
        let version = IpVersion::of(&addr);
        if len > version.max_prefix_len() {
            return Err(InvalidNetwork::PrefixTooLong(version, len));
        }
        if to_bits(addr) & host_mask(version, len) != 0 {
            return Err(InvalidNetwork::AddressContainsNonNetworkBits(addr, len));
        }
        Ok(Network::from_parts(version, to_bits(addr), len))
    }

    /// Create a [`Network`] even if the argument contains non-network bits, which are cleared.
    ///
    /// This is what converting an interface address assignment into a route needs.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidNetwork::PrefixTooLong`] if the prefix length exceeds the address width.
    #[tracing::instrument(level = "trace")]
    pub fn new_tolerant(
        addr: impl Into<IpAddr> + Debug,
        len: u8,
    ) -> Result<Network, InvalidNetwork> {
        let addr = addr.into();
        let version = IpVersion::of(&addr);
        if len > version.max_prefix_len() {
            return Err(InvalidNetwork::PrefixTooLong(version, len));
        }
        let bits = to_bits(addr) & !host_mask(version, len);
        if bits != to_bits(addr) {
            debug!("{addr}/{len} contains non network bits, truncating");
        }
        Ok(Network::from_parts(version, bits, len))
    }

    /// Returns the IP version of the network.
    #[must_use]
    pub const fn version(&self) -> IpVersion {
        match self.0 {
            IpNet::V4(_) => IpVersion::V4,
            IpNet::V6(_) => IpVersion::V6,
        }
    }

    /// Returns the address of the network.
    #[must_use]
    pub fn address(&self) -> IpAddr {
        match self.0 {
            IpNet::V4(net) => IpAddr::V4(net.network()),
            IpNet::V6(net) => IpAddr::V6(net.network()),
        }
    }

    /// Returns the last address covered by the network.
    #[must_use]
    pub fn last_address(&self) -> IpAddr {
        from_bits(self.version(), self.last_bits())
    }

    /// Returns the prefix length of the network.
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// Returns the longest legal prefix length for this network's version.
    #[must_use]
    pub fn max_prefix_len(&self) -> u8 {
        self.version().max_prefix_len()
    }

    /// True for the default route of either version.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.prefix_len() == 0
    }

    /// Cast to `ipnet::IpNet`.
    #[must_use]
    pub const fn as_net(&self) -> IpNet {
        self.0
    }

    fn first_bits(&self) -> u128 {
        to_bits(self.address())
    }

    fn last_bits(&self) -> u128 {
        self.first_bits() | self.host_mask()
    }

    fn host_mask(&self) -> u128 {
        host_mask(self.version(), self.prefix_len())
    }

    /// Number of host bits (address width minus prefix length).
    #[must_use]
    pub fn host_bits(&self) -> u8 {
        self.max_prefix_len() - self.prefix_len()
    }

    /// Number of addresses covered by the network, saturating at `u128::MAX` for `::/0`.
    #[must_use]
    pub fn size(&self) -> u128 {
        1u128.checked_shl(u32::from(self.host_bits())).unwrap_or(u128::MAX)
    }

    /// Number of usable host addresses, i.e. excluding the network and the last address.
    ///
    /// Networks with fewer than four addresses have no usable hosts. The count saturates at
    /// `u128::MAX - 1` for `::/0`.
    #[must_use]
    pub fn host_count(&self) -> u128 {
        match self.host_bits() {
            0 | 1 => 0,
            128 => u128::MAX - 1,
            bits => (1u128 << bits) - 2,
        }
    }

    /// Iterate over the usable host addresses of the network, in ascending order.
    #[must_use]
    pub fn hosts(&self) -> Hosts {
        Hosts {
            version: self.version(),
            range: (self.host_bits() >= 2).then(|| (self.first_bits() + 1, self.last_bits() - 1)),
        }
    }

    /// True if `other` is fully covered by this network.
    #[must_use]
    pub fn contains(&self, other: &Network) -> bool {
        self.version() == other.version()
            && self.prefix_len() <= other.prefix_len()
            && other.first_bits() & !self.host_mask() == self.first_bits()
    }

    /// True if `addr` belongs to this network.
    #[must_use]
    pub fn contains_addr(&self, addr: &IpAddr) -> bool {
        self.version() == IpVersion::of(addr)
            && to_bits(*addr) & !self.host_mask() == self.first_bits()
    }

    /// True if the two networks share at least one address.
    #[must_use]
    pub fn overlaps(&self, other: &Network) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// The network one bit shorter which contains this one, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Network> {
        let len = self.prefix_len().checked_sub(1)?;
        let bits = self.first_bits() & !host_mask(self.version(), len);
        Some(Network::from_parts(self.version(), bits, len))
    }

    /// The other half of this network's parent, if any.
    #[must_use]
    pub fn sibling(&self) -> Option<Network> {
        if self.is_default() {
            return None;
        }
        let bit = 1u128 << self.host_bits();
        Some(Network::from_parts(
            self.version(),
            self.first_bits() ^ bit,
            self.prefix_len(),
        ))
    }

    /// Split the network into its two children, if it is not a single address.
    #[must_use]
    pub fn halves(&self) -> Option<(Network, Network)> {
        if self.host_bits() == 0 {
            return None;
        }
        let len = self.prefix_len() + 1;
        let high_bit = 1u128 << (self.host_bits() - 1);
        Some((
            Network::from_parts(self.version(), self.first_bits(), len),
            Network::from_parts(self.version(), self.first_bits() | high_bit, len),
        ))
    }

    /// The `index`-th aligned subnet of length `len` inside this network.
    ///
    /// Returns `None` if `len` is shorter than this network, longer than the address width, or if
    /// `index` is out of range.
    #[must_use]
    pub fn subnet(&self, len: u8, index: u128) -> Option<Network> {
        if len < self.prefix_len() || len > self.max_prefix_len() {
            return None;
        }
        let index_bits = u32::from(len - self.prefix_len());
        if index.checked_shr(index_bits).unwrap_or(0) != 0 {
            return None;
        }
        let offset = index
            .checked_shl(u32::from(self.max_prefix_len() - len))
            .unwrap_or(0);
        Some(Network::from_parts(
            self.version(),
            self.first_bits() | offset,
            len,
        ))
    }

    /// Remove the address space of `other` from this network.
    ///
    /// Returns the (disjoint) networks covering exactly what is left.
    #[must_use]
    pub fn subtract(&self, other: &Network) -> Vec<Network> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        if other.contains(self) {
            return vec![];
        }
        // Walk down from self to other, keeping the half that does not lead to other.
        let mut remainder = Vec::with_capacity(usize::from(other.prefix_len() - self.prefix_len()));
        let mut current = *self;
        while current != *other {
            let Some((low, high)) = current.halves() else {
                break;
            };
            if low.contains(other) {
                remainder.push(high);
                current = low;
            } else {
                remainder.push(low);
                current = high;
            }
        }
        remainder
    }
}

/// Iterator over the usable host addresses of a [`Network`].
#[derive(Debug, Clone)]
pub struct Hosts {
    version: IpVersion,
    range: Option<(u128, u128)>,
}

impl Iterator for Hosts {
    type Item = IpAddr;

    fn next(&mut self) -> Option<IpAddr> {
        let (next, last) = self.range?;
        self.range = (next < last).then(|| (next + 1, last));
        Some(from_bits(self.version, next))
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Network {
    type Err = InvalidNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net =
            IpNet::from_str(s).map_err(|_| InvalidNetwork::ParseFailure(s.to_string()))?;
        Network::try_from(net)
    }
}

impl TryFrom<IpNet> for Network {
    type Error = InvalidNetwork;

    fn try_from(value: IpNet) -> Result<Self, Self::Error> {
        Network::new_strict(value.addr(), value.prefix_len())
    }
}

impl TryFrom<String> for Network {
    type Error = InvalidNetwork;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Network::from_str(&value)
    }
}

impl From<Network> for String {
    fn from(value: Network) -> Self {
        value.to_string()
    }
}

impl From<Network> for IpNet {
    fn from(value: Network) -> Self {
        value.0
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use super::Network;
    use crate::ip::IpVersion;
    use bolero::{Driver, TypeGenerator, ValueGenerator};
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::ops::Bound;

    impl TypeGenerator for Network {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            let version: IpVersion = driver.produce()?;
            let addr = match version {
                IpVersion::V4 => IpAddr::V4(Ipv4Addr::from_bits(driver.produce()?)),
                IpVersion::V6 => IpAddr::V6(Ipv6Addr::from_bits(driver.produce()?)),
            };
            let len = driver.gen_u8(
                Bound::Included(&0),
                Bound::Included(&version.max_prefix_len()),
            )?;
            Network::new_tolerant(addr, len).ok()
        }
    }

    /// Value generator which produces networks contained in the provided [`Network`].
    ///
    /// Generated prefix lengths never exceed `deepest`.
    pub struct ContainedNetworkGenerator {
        parent: Network,
        deepest: u8,
    }

    impl ContainedNetworkGenerator {
        /// Create a new [`ContainedNetworkGenerator`]
        #[must_use]
        pub fn new(parent: Network) -> Self {
            Self {
                parent,
                deepest: parent.max_prefix_len(),
            }
        }

        /// Limit the prefix length of generated networks.
        #[must_use]
        pub fn deepest(mut self, deepest: u8) -> Self {
            self.deepest = deepest;
            self
        }
    }

    impl ValueGenerator for ContainedNetworkGenerator {
        type Output = Network;

        fn generate<D: Driver>(&self, driver: &mut D) -> Option<Self::Output> {
            let shortest = self.parent.prefix_len();
            let deepest = self.deepest.clamp(shortest, self.parent.max_prefix_len());
            let len = driver.gen_u8(Bound::Included(&shortest), Bound::Included(&deepest))?;
            let index_bits = u32::from(len - shortest);
            let raw: u128 = driver.produce()?;
            let index = raw.checked_shr(128 - index_bits).unwrap_or(0);
            self.parent.subnet(len, index)
        }
    }

    /// [`ValueGenerator`] which produces sets of networks drawn from a
    /// [`ContainedNetworkGenerator`].
    pub struct NetworkSetGenerator {
        networks: ContainedNetworkGenerator,
        max_count: u8,
    }

    impl NetworkSetGenerator {
        /// Create a new [`NetworkSetGenerator`] producing at most `max_count` networks.
        #[must_use]
        pub fn new(networks: ContainedNetworkGenerator, max_count: u8) -> Self {
            Self {
                networks,
                max_count,
            }
        }
    }

    impl ValueGenerator for NetworkSetGenerator {
        type Output = BTreeSet<Network>;

        fn generate<D: Driver>(&self, driver: &mut D) -> Option<Self::Output> {
            let count = driver.gen_u8(Bound::Included(&0), Bound::Included(&self.max_count))?;
            (0..count).map(|_| self.networks.generate(driver)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ContainedNetworkGenerator, InvalidNetwork, Network};
    use crate::ip::IpVersion;
    use std::net::{IpAddr, Ipv4Addr};

    fn net(s: &str) -> Network {
        s.parse().unwrap()
    }

    #[test]
    fn non_network_bits_in_checked_constructor_returns_error() {
        let ip = Ipv4Addr::new(192, 168, 0, 1);
        match Network::new_strict(ip, 24) {
            Err(InvalidNetwork::AddressContainsNonNetworkBits(err_ip, err_len)) => {
                assert_eq!(err_ip, IpAddr::V4(ip));
                assert_eq!(err_len, 24);
            }
            other => unreachable!("{other:?}"),
        }
        assert_eq!(
            Network::new_strict(ip, 33),
            Err(InvalidNetwork::PrefixTooLong(IpVersion::V4, 33))
        );
    }

    #[test]
    fn tolerant_constructor_truncates() {
        let network = Network::new_tolerant(Ipv4Addr::new(192, 168, 7, 9), 22).unwrap();
        assert_eq!(network, net("192.168.4.0/22"));
        assert!(matches!(
            "10.0.0.1/24".parse::<Network>(),
            Err(InvalidNetwork::AddressContainsNonNetworkBits(_, 24))
        ));
        assert!(matches!(
            "potato".parse::<Network>(),
            Err(InvalidNetwork::ParseFailure(_))
        ));
    }

    #[test]
    fn host_ranges() {
        let hosts: Vec<_> = net("192.0.2.0/30").hosts().map(|h| h.to_string()).collect();
        assert_eq!(hosts, vec!["192.0.2.1", "192.0.2.2"]);
        assert_eq!(net("192.0.2.0/30").host_count(), 2);
        assert_eq!(net("192.0.2.0/31").hosts().count(), 0);
        assert_eq!(net("192.0.2.0/31").host_count(), 0);
        assert_eq!(net("192.0.2.7/32").host_count(), 0);
        assert_eq!(net("10.0.0.0/24").host_count(), 254);
        assert_eq!(net("10.0.0.0/24").hosts().count(), 254);
        assert_eq!(net("::/0").host_count(), u128::MAX - 1);
        assert_eq!(net("::/0").size(), u128::MAX);
        assert_eq!(net("10.0.0.0/8").size(), 1 << 24);
        assert_eq!(
            net("2001:db8::/64").hosts().next(),
            Some("2001:db8::1".parse().unwrap())
        );
        assert_eq!(
            net("10.0.0.0/24").last_address(),
            "10.0.0.255".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn family_relations() {
        let network = net("10.1.2.0/24");
        assert_eq!(network.parent(), Some(net("10.1.2.0/23")));
        assert_eq!(network.sibling(), Some(net("10.1.3.0/24")));
        assert_eq!(net("10.1.3.0/24").sibling(), Some(network));
        assert_eq!(
            network.halves(),
            Some((net("10.1.2.0/25"), net("10.1.2.128/25")))
        );
        assert_eq!(net("0.0.0.0/0").parent(), None);
        assert_eq!(net("0.0.0.0/0").sibling(), None);
        assert_eq!(net("10.0.0.1/32").halves(), None);
        assert_eq!(net("128.0.0.0/1").sibling(), Some(net("0.0.0.0/1")));
    }

    #[test]
    fn containment_never_crosses_versions() {
        assert!(!net("0.0.0.0/0").contains(&net("::/128")));
        assert!(!net("::/0").contains_addr(&"10.0.0.1".parse().unwrap()));
        assert!(net("10.0.0.0/8").contains_addr(&"10.200.0.1".parse().unwrap()));
        assert!(net("10.0.0.0/8").overlaps(&net("10.1.0.0/16")));
        assert!(net("10.1.0.0/16").overlaps(&net("10.0.0.0/8")));
        assert!(!net("10.1.0.0/16").overlaps(&net("10.2.0.0/16")));
    }

    #[test]
    fn subnets() {
        let network = net("10.0.0.0/16");
        assert_eq!(network.subnet(24, 0), Some(net("10.0.0.0/24")));
        assert_eq!(network.subnet(24, 255), Some(net("10.0.255.0/24")));
        assert_eq!(network.subnet(24, 256), None);
        assert_eq!(network.subnet(8, 0), None);
        assert_eq!(network.subnet(16, 0), Some(network));
        assert_eq!(net("::/0").subnet(0, 0), Some(net("::/0")));
        assert_eq!(net("::/0").subnet(128, 1), Some(net("::1/128")));
    }

    #[test]
    fn subtraction() {
        assert_eq!(
            net("1.0.0.0/16").subtract(&net("1.0.0.0/17")),
            vec![net("1.0.128.0/17")]
        );
        assert_eq!(net("1.0.0.0/16").subtract(&net("1.0.0.0/8")), vec![]);
        assert_eq!(
            net("1.0.0.0/16").subtract(&net("2.0.0.0/16")),
            vec![net("1.0.0.0/16")]
        );
        let mut remainder = net("1.0.0.0/16").subtract(&net("1.0.1.0/24"));
        remainder.sort();
        assert_eq!(
            remainder,
            vec![
                net("1.0.0.0/24"),
                net("1.0.2.0/23"),
                net("1.0.4.0/22"),
                net("1.0.8.0/21"),
                net("1.0.16.0/20"),
                net("1.0.32.0/19"),
                net("1.0.64.0/18"),
                net("1.0.128.0/17"),
            ]
        );
    }

    #[test]
    fn serde_uses_cidr_text() {
        let network: Network = serde_yaml_ng::from_str("\"2001:db8::/32\"").unwrap();
        assert_eq!(network, net("2001:db8::/32"));
        assert!(serde_yaml_ng::from_str::<Network>("\"2001:db8::1/32\"").is_err());
    }

    #[test]
    fn basic_fuzz() {
        bolero::check!()
            .with_type()
            .cloned()
            .for_each(|network: Network| {
                assert!(network.prefix_len() <= network.max_prefix_len());
                assert!(network.contains(&network));
                assert!(network.contains_addr(&network.address()));
                assert!(network.contains_addr(&network.last_address()));
                if let Some(parent) = network.parent() {
                    assert!(parent.contains(&network));
                    let sibling = network.sibling().unwrap();
                    assert!(!sibling.overlaps(&network));
                    assert_eq!(sibling.parent(), Some(parent));
                }
            });
    }

    #[test]
    fn contained_logic_fuzzing() {
        let parent = net("10.0.0.0/16");
        bolero::check!()
            .with_generator(ContainedNetworkGenerator::new(parent).deepest(30))
            .cloned()
            .for_each(|child: Network| {
                assert!(parent.contains(&child));
                assert!(child.prefix_len() <= 30);
                for host in child.hosts().take(4) {
                    assert!(child.contains_addr(&host));
                    assert_ne!(host, child.address());
                    assert_ne!(host, child.last_address());
                }
            });
    }
}
