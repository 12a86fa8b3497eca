// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Collision-free allocation of point-to-point addresses.

use crate::error::AllocError;
use net::interface::InterfaceAddress;
use net::prefix::Network;
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::trace;

/// Addresses already handed out during one verification run.
///
/// Addresses are compared by IP only: `192.0.2.1/24` and `192.0.2.1/30` are the same address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationLedger {
    issued: BTreeSet<IpAddr>,
}

impl AllocationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger which already knows the addresses configured on the candidate.
    #[must_use]
    pub fn seeded<'a>(addresses: impl IntoIterator<Item = &'a InterfaceAddress>) -> Self {
        let mut ledger = Self::new();
        for address in addresses {
            ledger.record(address);
        }
        ledger
    }

    /// Mark `address` as taken. Returns false if it already was.
    pub fn record(&mut self, address: &InterfaceAddress) -> bool {
        self.issued.insert(address.address())
    }

    #[must_use]
    pub fn contains(&self, address: &IpAddr) -> bool {
        self.issued.contains(address)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.issued.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

/// The lowest host address of `network` which is not in `ledger`, with the prefix length of
/// `network`.
///
/// The address is not recorded: the caller must [`AllocationLedger::record`] it before allocating
/// again.
///
/// # Errors
///
/// Returns [`AllocError::Exhausted`] if every host address of `network` is taken.
pub fn allocate(
    network: &Network,
    ledger: &AllocationLedger,
) -> Result<InterfaceAddress, AllocError> {
    let address = network
        .hosts()
        .find(|host| !ledger.contains(host))
        .ok_or(AllocError::Exhausted(*network))?;
    trace!("allocated {address} in {network}");
    Ok(InterfaceAddress::new(address, network.prefix_len())?)
}

/// Allocate and record two addresses of `network`, in ascending order.
///
/// The first address goes to the router, the second to its client.
///
/// # Errors
///
/// Returns [`AllocError::Exhausted`] if fewer than two host addresses are free.
pub fn allocate_pair(
    network: &Network,
    ledger: &mut AllocationLedger,
) -> Result<(InterfaceAddress, InterfaceAddress), AllocError> {
    let first = allocate(network, ledger)?;
    ledger.record(&first);
    let second = allocate(network, ledger)?;
    ledger.record(&second);
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn net(s: &str) -> Network {
        s.parse().unwrap()
    }

    fn addr(s: &str) -> InterfaceAddress {
        s.parse().unwrap()
    }

    #[test]
    fn allocation_skips_recorded_addresses() {
        let network = net("192.0.2.0/29");
        let mut ledger = AllocationLedger::seeded(&[addr("192.0.2.1/24"), addr("192.0.2.3/30")]);
        assert_eq!(ledger.len(), 2);

        let first = allocate(&network, &ledger).unwrap();
        assert_eq!(first, addr("192.0.2.2/29"));
        // not recorded yet
        assert_eq!(allocate(&network, &ledger).unwrap(), first);
        assert!(ledger.record(&first));
        assert!(!ledger.record(&addr("192.0.2.2/32")));

        let (router, client) = allocate_pair(&network, &mut ledger).unwrap();
        assert_eq!(router, addr("192.0.2.4/29"));
        assert_eq!(client, addr("192.0.2.5/29"));
        assert_eq!(ledger.len(), 5);
    }

    #[test]
    fn exhaustion() {
        let network = net("198.51.100.0/30");
        let mut ledger = AllocationLedger::new();
        let (first, second) = allocate_pair(&network, &mut ledger).unwrap();
        assert_eq!(first.to_string(), "198.51.100.1/30");
        assert_eq!(second.to_string(), "198.51.100.2/30");
        assert_eq!(
            allocate(&network, &ledger),
            Err(AllocError::Exhausted(network))
        );

        // networks without a host range
        let mut ledger = AllocationLedger::new();
        for tiny in ["198.51.100.0/31", "198.51.100.7/32"] {
            assert!(allocate(&net(tiny), &ledger).is_err());
        }
        // one free host is not enough for a pair
        ledger.record(&addr("203.0.113.1/30"));
        assert!(allocate_pair(&net("203.0.113.0/30"), &mut ledger).is_err());
    }

    #[test]
    fn no_collision_across_allocations() {
        bolero::check!()
            .with_type::<(u8, u8)>()
            .for_each(|(len, rounds)| {
                let len = 24 + len % 7;
                let network = Network::new_tolerant(IpAddr::from([203, 0, 113, 0]), len).unwrap();
                let mut ledger = AllocationLedger::seeded(&[addr("203.0.113.1/24")]);
                let mut issued = BTreeSet::new();
                for _ in 0..(*rounds % 64) {
                    match allocate_pair(&network, &mut ledger) {
                        Ok((a, b)) => {
                            assert!(network.contains_addr(&a.address()));
                            assert!(issued.insert(a.address()));
                            assert!(issued.insert(b.address()));
                            assert_ne!(a.address(), "203.0.113.1".parse::<IpAddr>().unwrap());
                        }
                        Err(e) => {
                            assert_eq!(e, AllocError::Exhausted(network));
                            break;
                        }
                    }
                }
            });
    }
}
