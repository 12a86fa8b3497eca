// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::AssertErrUnreachable;
use crate::ip::IpVersion;
use crate::prefix::Network;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// The type of error returned when building an [`InterfaceAddress`]
/// if the ip address or prefix length are not legal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterfaceAddressError {
    /// The prefix length is zero or longer than the address width
    #[error("Invalid interface prefix length '{0}'")]
    InvalidPrefixLength(u8),

    /// Multicast and unspecified addresses cannot be assigned to an interface
    #[error("Invalid interface address '{0}'")]
    InvalidAddress(IpAddr),

    /// The text is not of the form `address/len`
    #[error("failed to parse '{0}' as an interface address")]
    ParseFailure(String),
}

/// An Ipv4 or Ipv6 address and prefix length configured on an interface.
///
/// Displays (and serializes) as `address/len`, which is what `ip address add` expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceAddress {
    address: IpAddr,
    prefix_len: u8,
}

impl InterfaceAddress {
    /// Create an Ipv4 or Ipv6 address and prefix length to be configured on an interface.
    ///
    /// # Errors
    ///
    /// This function returns [`InterfaceAddressError`] if the provided address is not suitable
    /// for a network interface or the prefix length is not legal.
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, InterfaceAddressError> {
        if address.is_multicast() || address.is_unspecified() {
            return Err(InterfaceAddressError::InvalidAddress(address));
        }
        if prefix_len == 0 || prefix_len > IpVersion::of(&address).max_prefix_len() {
            return Err(InterfaceAddressError::InvalidPrefixLength(prefix_len));
        }
        Ok(Self {
            address,
            prefix_len,
        })
    }

    /// The assigned address.
    #[must_use]
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// The prefix length of the assignment.
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// The IP version of the assigned address.
    #[must_use]
    pub fn version(&self) -> IpVersion {
        IpVersion::of(&self.address)
    }

    /// The network this address belongs to.
    #[must_use]
    pub fn network(&self) -> Network {
        // the prefix length was validated on construction
        Network::new_tolerant(self.address, self.prefix_len).err_unreachable()
    }
}

impl Display for InterfaceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address(), self.prefix_len())
    }
}

impl FromStr for InterfaceAddress {
    type Err = InterfaceAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_failure = || InterfaceAddressError::ParseFailure(s.to_string());
        let (address, prefix_len) = s.split_once('/').ok_or_else(parse_failure)?;
        let address = IpAddr::from_str(address).map_err(|_| parse_failure())?;
        let prefix_len = u8::from_str(prefix_len).map_err(|_| parse_failure())?;
        InterfaceAddress::new(address, prefix_len)
    }
}

impl TryFrom<String> for InterfaceAddress {
    type Error = InterfaceAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        InterfaceAddress::from_str(&value)
    }
}

impl From<InterfaceAddress> for String {
    fn from(value: InterfaceAddress) -> Self {
        value.to_string()
    }
}
