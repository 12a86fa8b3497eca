// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::ip::IpVersion;
use crate::prefix::Network;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Aggregate a set of networks into the smallest set of networks covering exactly the same address
/// space.
///
/// Default routes are dropped first: announcing 0.0.0.0/0 or ::/0 says nothing about which part of
/// the address space is actually in use. Networks covered by another network of the set are dropped
/// next. Then sibling pairs (two networks of the same length which together fill their parent) are
/// replaced by that parent until no pair is left.
///
/// For example, 10.0.0.0/24, 10.0.1.0/24 and 10.0.2.0/23 aggregate into 10.0.0.0/22.
#[must_use]
pub fn aggregate(networks: &BTreeSet<Network>) -> BTreeSet<Network> {
    let mut result = without_covered(networks.iter().filter(|n| !n.is_default()));
    loop {
        let mergeable = result.iter().find_map(|network| {
            let sibling = network.sibling()?;
            result.contains(&sibling).then_some((*network, sibling))
        });
        let Some((network, sibling)) = mergeable else {
            break;
        };
        result.remove(&network);
        result.remove(&sibling);
        if let Some(parent) = network.parent() {
            trace!("merging {network} and {sibling} into {parent}");
            result.insert(parent);
        }
    }
    result
}

// Networks are ordered by version, then address, then prefix length. A network covering another one
// always comes first in that order, and the networks we keep are disjoint, so comparing against the
// last kept network is enough.
fn without_covered<'a>(networks: impl Iterator<Item = &'a Network>) -> BTreeSet<Network> {
    let mut kept = BTreeSet::new();
    let mut last: Option<Network> = None;
    for network in networks {
        if last.is_some_and(|last| last.contains(network)) {
            continue;
        }
        kept.insert(*network);
        last = Some(*network);
    }
    kept
}

/// Aggregate (see [`aggregate`]) every per-version set of networks in place.
pub fn aggregate_by_version(networks: &mut BTreeMap<IpVersion, BTreeSet<Network>>) {
    for set in networks.values_mut() {
        *set = aggregate(set);
    }
}

/// Remove the address space of the exclusion networks from a set of networks, splitting the
/// networks into smaller chunks where needed.
///
/// For example, excluding 1.0.0.0/18 from 1.0.0.0/16 leaves 1.0.64.0/18 and 1.0.128.0/17.
#[must_use]
pub fn exclude(networks: &BTreeSet<Network>, excludes: &BTreeSet<Network>) -> BTreeSet<Network> {
    let mut result = networks.clone();
    for exclude in excludes {
        let overlapping: Vec<Network> = result
            .iter()
            .filter(|network| network.overlaps(exclude))
            .copied()
            .collect();
        for network in overlapping {
            result.remove(&network);
            result.extend(network.subtract(exclude));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::{ContainedNetworkGenerator, NetworkSetGenerator};
    use pretty_assertions::assert_eq;

    fn set_from(networks: Vec<&str>) -> BTreeSet<Network> {
        networks.into_iter().map(|n| n.parse().unwrap()).collect()
    }

    #[test]
    fn test_aggregate() {
        // Empty set
        assert_eq!(aggregate(&BTreeSet::new()), BTreeSet::new());

        // Nothing to merge
        let networks = set_from(vec!["10.0.0.0/24", "10.0.2.0/24", "192.0.2.0/24"]);
        assert_eq!(aggregate(&networks), networks);

        // Siblings merge into their parent
        let networks = set_from(vec!["10.0.0.0/24", "10.0.1.0/24"]);
        assert_eq!(aggregate(&networks), set_from(vec!["10.0.0.0/23"]));

        // Adjacent but not siblings
        let networks = set_from(vec!["10.0.1.0/24", "10.0.2.0/24"]);
        assert_eq!(aggregate(&networks), networks);

        // Merges cascade
        let networks = set_from(vec!["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/23"]);
        assert_eq!(aggregate(&networks), set_from(vec!["10.0.0.0/22"]));

        // Covered networks are dropped
        let networks = set_from(vec!["10.0.0.0/8", "10.1.0.0/16", "10.1.2.0/24"]);
        assert_eq!(aggregate(&networks), set_from(vec!["10.0.0.0/8"]));

        // Default routes are dropped before aggregation
        let networks = set_from(vec!["0.0.0.0/0", "::/0", "10.0.0.0/8"]);
        assert_eq!(aggregate(&networks), set_from(vec!["10.0.0.0/8"]));

        // Two halves of the address space still cover all of it
        let networks = set_from(vec!["0.0.0.0/1", "128.0.0.0/1"]);
        assert_eq!(aggregate(&networks), set_from(vec!["0.0.0.0/0"]));

        // Versions never mix
        let networks = set_from(vec![
            "2001:db8::/33",
            "2001:db8:8000::/33",
            "32.1.13.184/30",
        ]);
        assert_eq!(
            aggregate(&networks),
            set_from(vec!["2001:db8::/32", "32.1.13.184/30"])
        );
    }

    #[test]
    fn test_aggregate_by_version() {
        let mut networks = BTreeMap::from([
            (IpVersion::V4, set_from(vec!["10.0.0.0/25", "10.0.0.128/25"])),
            (IpVersion::V6, set_from(vec!["::/0"])),
        ]);
        aggregate_by_version(&mut networks);
        assert_eq!(networks[&IpVersion::V4], set_from(vec!["10.0.0.0/24"]));
        assert!(networks[&IpVersion::V6].is_empty());
    }

    #[test]
    fn test_exclude() {
        // Excludes outside networks
        let networks = set_from(vec!["10.0.0.0/16"]);
        let excludes = set_from(vec!["1.0.0.0/16", "2.0.0.0/24"]);
        assert_eq!(exclude(&networks, &excludes), networks);

        // Differing IP versions
        let networks = set_from(vec!["1.0.0.0/16"]);
        let excludes = set_from(vec!["1::/112"]);
        assert_eq!(exclude(&networks, &excludes), networks);

        // Full exclusion
        let networks = set_from(vec!["1.1.1.1/32"]);
        let excludes = set_from(vec!["0.0.0.0/0"]);
        assert_eq!(exclude(&networks, &excludes), BTreeSet::new());

        // Multiple excludes on one network
        let networks = set_from(vec!["1.0.0.0/16"]);
        let excludes = set_from(vec!["1.0.1.0/24", "1.0.3.0/24", "1.0.8.0/21"]);
        let expected = set_from(vec![
            "1.0.128.0/17",
            "1.0.64.0/18",
            "1.0.32.0/19",
            "1.0.16.0/20",
            "1.0.4.0/22",
            "1.0.2.0/24",
            "1.0.0.0/24",
        ]);
        assert_eq!(exclude(&networks, &excludes), expected);

        // Overlapping excludes
        let networks = set_from(vec!["1.0.0.0/16"]);
        let excludes = set_from(vec!["1.0.0.0/17", "1.0.0.0/24"]);
        assert_eq!(exclude(&networks, &excludes), set_from(vec!["1.0.128.0/17"]));
    }

    fn generator() -> NetworkSetGenerator {
        let space = "10.0.0.0/16".parse().unwrap();
        NetworkSetGenerator::new(ContainedNetworkGenerator::new(space).deepest(28), 24)
    }

    #[test]
    fn aggregation_covers_the_same_space() {
        bolero::check!()
            .with_generator(generator())
            .for_each(|networks: &BTreeSet<Network>| {
                let aggregated = aggregate(networks);
                assert!(exclude(networks, &aggregated).is_empty());
                assert!(exclude(&aggregated, networks).is_empty());
                assert!(aggregated.len() <= networks.len());
            });
    }

    #[test]
    fn aggregation_is_idempotent_and_minimal() {
        bolero::check!()
            .with_generator(generator())
            .for_each(|networks: &BTreeSet<Network>| {
                let aggregated = aggregate(networks);
                assert_eq!(aggregate(&aggregated), aggregated);
                for network in &aggregated {
                    if let Some(sibling) = network.sibling() {
                        assert!(!aggregated.contains(&sibling));
                    }
                    for other in aggregated.iter().filter(|other| *other != network) {
                        assert!(!network.overlaps(other));
                    }
                }
            });
    }
}
