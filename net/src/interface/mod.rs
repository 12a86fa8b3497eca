// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Addresses assigned to device interfaces.

mod address;

pub use address::{InterfaceAddress, InterfaceAddressError};
