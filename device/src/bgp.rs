// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reading BGP state off the routers of the lab.

use crate::command::Command;
use crate::exec::{DeviceExecutor, ExecError, FileTransfer};
use async_trait::async_trait;
use bytes::Bytes;
use net::ip::IpVersion;
use net::prefix::Network;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::debug;

/// Queries the BGP tables of lab routers.
#[async_trait]
pub trait BgpQuery: Send + Sync {
    /// Networks present in the BGP table of `device`, per IP version.
    async fn announced_networks(
        &self,
        device: &str,
    ) -> Result<BTreeMap<IpVersion, BTreeSet<Network>>, ExecError>;

    /// Networks `device` receives from its neighbour at `peer`.
    async fn advertised_networks(
        &self,
        device: &str,
        peer: IpAddr,
    ) -> Result<BTreeSet<Network>, ExecError>;
}

// The part of FRR's `show bgp ... json` output we care about.
#[derive(Deserialize)]
struct BgpTable {
    #[serde(default)]
    routes: BTreeMap<String, serde_json::Value>,
}

fn afi(version: IpVersion) -> &'static str {
    match version {
        IpVersion::V4 => "ipv4",
        IpVersion::V6 => "ipv6",
    }
}

/// `vtysh -c "show bgp <afi> unicast json"`
#[must_use]
pub fn show_bgp(version: IpVersion) -> Command {
    Command::new("vtysh")
        .arg("-c")
        .arg(format!("show bgp {} unicast json", afi(version)))
}

/// `vtysh -c "show bgp <afi> unicast neighbors <peer> routes json"`
#[must_use]
pub fn show_bgp_neighbor_routes(peer: IpAddr) -> Command {
    Command::new("vtysh").arg("-c").arg(format!(
        "show bgp {} unicast neighbors {peer} routes json",
        afi(IpVersion::of(&peer))
    ))
}

/// Parse the networks out of FRR's json rendering of a BGP table.
///
/// # Errors
///
/// Fails if the output is not json or a route is not a network.
pub fn parse_bgp_table(
    device: &str,
    command: &Command,
    output: &[u8],
) -> Result<BTreeSet<Network>, ExecError> {
    let bad_output = |reason: String| ExecError::BadOutput {
        device: device.to_string(),
        command: command.to_string(),
        reason,
    };
    // vtysh prints nothing when bgp is not running for the address family
    if output.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeSet::new());
    }
    let table: BgpTable =
        serde_json::from_slice(output).map_err(|e| bad_output(e.to_string()))?;
    table
        .routes
        .keys()
        .map(|route| {
            route
                .parse::<Network>()
                .map_err(|e| bad_output(e.to_string()))
        })
        .collect()
}

/// [`BgpQuery`] for FRR routers, over any [`DeviceExecutor`].
///
/// The wrapped transport is exposed as is, so that a `FrrBgp<T>` provides everything a lab needs.
#[derive(Debug, Clone)]
pub struct FrrBgp<E> {
    executor: E,
}

impl<E: DeviceExecutor> FrrBgp<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    async fn table(&self, device: &str, command: Command) -> Result<BTreeSet<Network>, ExecError> {
        let output = self.executor.exec(device, &command).await?;
        let networks = parse_bgp_table(device, &command, &output)?;
        debug!("{device}: `{command}` lists {} networks", networks.len());
        Ok(networks)
    }
}

#[async_trait]
impl<E: DeviceExecutor> BgpQuery for FrrBgp<E> {
    async fn announced_networks(
        &self,
        device: &str,
    ) -> Result<BTreeMap<IpVersion, BTreeSet<Network>>, ExecError> {
        let mut networks = BTreeMap::new();
        for version in IpVersion::ALL {
            networks.insert(version, self.table(device, show_bgp(version)).await?);
        }
        Ok(networks)
    }

    async fn advertised_networks(
        &self,
        device: &str,
        peer: IpAddr,
    ) -> Result<BTreeSet<Network>, ExecError> {
        self.table(device, show_bgp_neighbor_routes(peer)).await
    }
}

#[async_trait]
impl<E: DeviceExecutor> DeviceExecutor for FrrBgp<E> {
    async fn exec(&self, device: &str, command: &Command) -> Result<Vec<u8>, ExecError> {
        self.executor.exec(device, command).await
    }
}

#[async_trait]
impl<E: DeviceExecutor + FileTransfer> FileTransfer for FrrBgp<E> {
    async fn copy(&self, device: &str, destination: &str, content: Bytes) -> Result<(), ExecError> {
        self.executor.copy(device, destination, content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    const TABLE: &str = r#"{
  "vrfId": 0,
  "vrfName": "default",
  "tableVersion": 4,
  "routerId": "10.255.0.2",
  "defaultLocPrf": 100,
  "localAS": 2,
  "routes": {
    "198.51.100.0/24": [{"valid": true, "bestpath": true, "pathFrom": "external"}],
    "192.0.2.0/24": [{"valid": true, "bestpath": true, "pathFrom": "external"}]
  }
}"#;

    struct Canned {
        output: &'static str,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeviceExecutor for Canned {
        async fn exec(&self, _device: &str, command: &Command) -> Result<Vec<u8>, ExecError> {
            self.seen.lock().push(command.to_string());
            Ok(self.output.as_bytes().to_vec())
        }
    }

    #[test]
    fn parse_table() {
        let command = show_bgp(IpVersion::V4);
        let networks = parse_bgp_table("as2_router", &command, TABLE.as_bytes()).unwrap();
        let networks: Vec<_> = networks.iter().map(ToString::to_string).collect();
        assert_eq!(networks, vec!["192.0.2.0/24", "198.51.100.0/24"]);

        assert!(parse_bgp_table("r", &command, b"\n").unwrap().is_empty());
        assert!(parse_bgp_table("r", &command, b"{}").unwrap().is_empty());
        assert!(matches!(
            parse_bgp_table("r", &command, b"% BGP instance not found"),
            Err(ExecError::BadOutput { .. })
        ));
        assert!(matches!(
            parse_bgp_table("r", &command, br#"{"routes": {"potato": []}}"#),
            Err(ExecError::BadOutput { .. })
        ));
    }

    #[tokio::test]
    async fn queries_go_through_vtysh() {
        let bgp = FrrBgp::new(Canned {
            output: TABLE,
            seen: Mutex::new(vec![]),
        });
        let announced = bgp.announced_networks("as2_router").await.unwrap();
        assert_eq!(announced[&IpVersion::V4].len(), 2);
        let peer: IpAddr = "2001:db8:ffff::2".parse().unwrap();
        bgp.advertised_networks("as2_router", peer).await.unwrap();
        assert_eq!(
            *bgp.executor.seen.lock(),
            vec![
                "vtysh -c 'show bgp ipv4 unicast json'",
                "vtysh -c 'show bgp ipv6 unicast json'",
                "vtysh -c 'show bgp ipv6 unicast neighbors 2001:db8:ffff::2 routes json'",
            ]
        );
    }
}
