// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Talking to the devices of an emulated lab: running commands, staging files, reading BGP
//! tables, and generating the vendor specific commands of the candidate router.

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod bgp;
pub mod command;
pub mod docker;
pub mod exec;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod vendor;

pub use bgp::{BgpQuery, FrrBgp};
pub use command::Command;
pub use docker::{DockerExec, DockerExecBuilder};
pub use exec::{DeviceExecutor, ExecError, FileTransfer};
pub use vendor::{CandidateConfig, CandidateConfigBuilder, Frr, Iproute2, VendorConfiguration};

/// Everything verification needs from the lab.
///
/// `FrrBgp<DockerExec>` is a complete lab for containerized FRR routers.
pub trait Lab: DeviceExecutor + FileTransfer + BgpQuery {}

impl<T: DeviceExecutor + FileTransfer + BgpQuery> Lab for T {}
