// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Selection of an address range nobody announces, to be used as spoofed source.

use crate::config::PrefixBounds;
use crate::error::SelectError;
use net::ip::IpVersion;
use net::prefix::{Network, exclude};
use rand::Rng;
use rand::seq::IteratorRandom;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, trace};

// Blocks a spoofed source must never be drawn from: traffic from there is dropped for reasons
// unrelated to source address validation.
const RESERVED_V4: [(Ipv4Addr, u8); 8] = [
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
];

// Global unicast
const GLOBAL_V6: (Ipv6Addr, u8) = (Ipv6Addr::new(0x2000, 0, 0, 0, 0, 0, 0, 0), 3);

/// The part of the address space of `version` a spoofed range may be taken from.
#[must_use]
pub fn search_space(version: IpVersion) -> BTreeSet<Network> {
    let networks = |list: &[(IpAddr, u8)]| -> BTreeSet<Network> {
        list.iter()
            .filter_map(|(addr, len)| Network::new_strict(*addr, *len).ok())
            .collect()
    };
    match version {
        IpVersion::V4 => {
            let reserved: Vec<(IpAddr, u8)> = RESERVED_V4
                .iter()
                .map(|(addr, len)| (IpAddr::V4(*addr), *len))
                .collect();
            exclude(
                &BTreeSet::from([Network::root(IpVersion::V4)]),
                &networks(&reserved),
            )
        }
        IpVersion::V6 => networks(&[(IpAddr::V6(GLOBAL_V6.0), GLOBAL_V6.1)]),
    }
}

fn random_u128<R: Rng + ?Sized>(rng: &mut R) -> u128 {
    (u128::from(rng.next_u64()) << 64) | u128::from(rng.next_u64())
}

fn random_len<R: Rng + ?Sized>(bounds: PrefixBounds, rng: &mut R) -> u8 {
    let span = u64::from(bounds.max.saturating_sub(bounds.min)) + 1;
    #[allow(clippy::cast_possible_truncation)] // span never exceeds 129
    let offset = (rng.next_u64() % span) as u8;
    bounds.min.saturating_add(offset)
}

/// Pick a network of `version` that overlaps none of `announced`.
///
/// Each attempt draws a prefix length within `bounds`, then a free block able to hold a network of
/// that length, then an aligned network of that length inside the block. Lengths leaving fewer than
/// two usable hosts are rejected, since the spoofing leg needs a router and a client address.
///
/// # Errors
///
/// Returns [`SelectError::NoSuitableRange`] when `max_attempts` attempts all fail.
#[tracing::instrument(level = "debug", skip(announced, rng))]
pub fn select<R: Rng + ?Sized>(
    version: IpVersion,
    announced: &BTreeSet<Network>,
    bounds: PrefixBounds,
    max_attempts: u32,
    rng: &mut R,
) -> Result<Network, SelectError> {
    let announced: BTreeSet<Network> = announced
        .iter()
        .filter(|network| network.version() == version)
        .copied()
        .collect();
    let free = exclude(&search_space(version), &announced);
    debug!(
        "{} free {version} blocks left after excluding {} announced networks",
        free.len(),
        announced.len()
    );

    for attempt in 1..=max_attempts {
        let len = random_len(bounds, rng);
        if len > version.max_prefix_len() || version.max_prefix_len() - len < 2 {
            trace!("attempt {attempt}: /{len} leaves no room for two hosts");
            continue;
        }
        let Some(block) = free
            .iter()
            .filter(|block| block.prefix_len() <= len)
            .choose(rng)
        else {
            trace!("attempt {attempt}: no free block can hold a /{len}");
            continue;
        };
        let index_bits = u32::from(len - block.prefix_len());
        let index = random_u128(rng).checked_shr(128 - index_bits).unwrap_or(0);
        if let Some(network) = block.subnet(len, index) {
            debug!("attempt {attempt}: selected {network} out of free block {block}");
            return Ok(network);
        }
    }
    Err(SelectError::NoSuitableRange {
        version,
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::TypeGenerator;
    use net::prefix::{ContainedNetworkGenerator, NetworkSetGenerator, aggregate};
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn net(s: &str) -> Network {
        s.parse().unwrap()
    }

    #[test]
    fn search_space_skips_reserved_blocks() {
        let space = search_space(IpVersion::V4);
        for reserved in ["10.0.0.0/8", "127.0.0.0/8", "224.0.0.0/3", "192.168.1.0/24"] {
            assert!(!space.iter().any(|n| n.overlaps(&net(reserved))), "{reserved}");
        }
        assert!(space.iter().any(|n| n.contains(&net("203.0.113.0/24"))));
        assert_eq!(search_space(IpVersion::V6), BTreeSet::from([net("2000::/3")]));
    }

    #[test]
    fn selected_range_respects_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let announced = BTreeSet::from([net("1.0.0.0/8"), net("2.0.0.0/7")]);
        for _ in 0..100 {
            let selected = select(
                IpVersion::V4,
                &announced,
                PrefixBounds::IPV4,
                32,
                &mut rng,
            )
            .unwrap();
            assert!((16..=28).contains(&selected.prefix_len()));
            assert!(selected.host_count() >= 2);
            assert!(!announced.iter().any(|a| a.overlaps(&selected)));

            let selected = select(
                IpVersion::V6,
                &BTreeSet::new(),
                PrefixBounds::IPV6,
                32,
                &mut rng,
            )
            .unwrap();
            assert!(net("2000::/3").contains(&selected));
            assert!((48..=64).contains(&selected.prefix_len()));
        }
    }

    #[test]
    fn announced_default_leaves_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        let announced = aggregate(&BTreeSet::from([net("0.0.0.0/1"), net("128.0.0.0/1")]));
        assert_eq!(announced, BTreeSet::from([net("0.0.0.0/0")]));
        assert_eq!(
            select(IpVersion::V4, &announced, PrefixBounds::IPV4, 32, &mut rng),
            Err(SelectError::NoSuitableRange {
                version: IpVersion::V4,
                attempts: 32
            })
        );
    }

    #[test]
    fn exhausted_space() {
        let mut rng = StdRng::seed_from_u64(0);
        let everything = BTreeSet::from([net("0.0.0.0/1"), net("128.0.0.0/1")]);
        assert_eq!(
            select(IpVersion::V4, &everything, PrefixBounds::IPV4, 8, &mut rng),
            Err(SelectError::NoSuitableRange {
                version: IpVersion::V4,
                attempts: 8
            })
        );

        // a /31 never has room for two hosts
        let bounds = PrefixBounds { min: 31, max: 32 };
        assert!(select(IpVersion::V4, &BTreeSet::new(), bounds, 16, &mut rng).is_err());
    }

    #[test]
    fn the_only_free_block_is_found() {
        let mut rng = StdRng::seed_from_u64(7);
        let announced = exclude(
            &BTreeSet::from([net("0.0.0.0/0")]),
            &BTreeSet::from([net("198.51.100.0/24")]),
        );
        let bounds = PrefixBounds { min: 24, max: 28 };
        let selected = select(IpVersion::V4, &announced, bounds, 64, &mut rng).unwrap();
        assert!(net("198.51.100.0/24").contains(&selected));
    }

    #[test]
    fn selection_is_disjoint_from_announced() {
        let announced = NetworkSetGenerator::new(
            ContainedNetworkGenerator::new(net("0.0.0.0/0")).deepest(20),
            32,
        );
        bolero::check!()
            .with_generator((announced, u64::produce()))
            .for_each(|(announced, seed)| {
                let mut rng = StdRng::seed_from_u64(*seed);
                if let Ok(selected) =
                    select(IpVersion::V4, announced, PrefixBounds::IPV4, 32, &mut rng)
                {
                    assert!(!announced.iter().any(|a| a.overlaps(&selected)));
                    assert!(search_space(IpVersion::V4).iter().any(|s| s.contains(&selected)));
                    assert!(selected.host_count() >= 2);
                }
            });
    }
}
