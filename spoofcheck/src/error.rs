// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errors of a verification run.

use device::ExecError;
use net::interface::InterfaceAddressError;
use net::ip::IpVersion;
use net::prefix::Network;
use std::time::Duration;
use topology::TopologyError;

/// The lab or its description does not match what verification expects.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("{provider} has {count} public {version} addresses for the candidate, expected exactly one")]
    PeeringAddress {
        provider: String,
        version: IpVersion,
        count: usize,
    },
    #[error("invalid {version} prefix length bounds {min}..={max}")]
    PrefixBounds { version: IpVersion, min: u8, max: u8 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("no suitable {version} range to spoof found after {attempts} attempts")]
    NoSuitableRange { version: IpVersion, attempts: u32 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("all host addresses of {0} are taken")]
    Exhausted(Network),
    #[error(transparent)]
    InvalidAddress(#[from] InterfaceAddressError),
}

#[derive(thiserror::Error, Debug)]
pub enum CheckError {
    #[error("check script printed '{0}', expected '0' or '1'")]
    Unparseable(String),
    #[error("check script produced no result within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(thiserror::Error, Debug)]
pub enum VerifyError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Check(#[from] CheckError),
}

impl From<TopologyError> for VerifyError {
    fn from(error: TopologyError) -> Self {
        VerifyError::Configuration(error.into())
    }
}
