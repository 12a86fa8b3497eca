// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IP protocol versions

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

/// The version of the internet protocol an address or network belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    /// IPv4
    #[serde(rename = "ipv4")]
    V4,
    /// IPv6
    #[serde(rename = "ipv6")]
    V6,
}

impl IpVersion {
    /// Both versions, in the order checks are performed.
    pub const ALL: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];

    /// The longest legal prefix length for this version (32 or 128).
    #[must_use]
    pub const fn max_prefix_len(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    /// The version number as used on command lines (`4` or `6`).
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }

    /// The version of the given address.
    #[must_use]
    pub const fn of(addr: &IpAddr) -> IpVersion {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

impl Display for IpVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "IPv{}", self.number())
    }
}

impl TryFrom<u8> for IpVersion {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            other => Err(other),
        }
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use super::IpVersion;
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for IpVersion {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(if driver.gen_bool(Some(0.5))? {
                IpVersion::V4
            } else {
                IpVersion::V6
            })
        }
    }
}
