// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! An in-memory lab for tests.
//!
//! [`EmulatedLab`] applies the generic `ip` commands and FRR interface address commands to a model
//! of each device's addresses and routes, answers BGP queries from canned tables, and runs the
//! spoofing check script with scripted outcomes. Failures can be injected on any command.

use crate::bgp::BgpQuery;
use crate::command::Command;
use crate::exec::{DeviceExecutor, ExecError, FileTransfer};
use async_trait::async_trait;
use bytes::Bytes;
use net::interface::InterfaceAddress;
use net::ip::IpVersion;
use net::prefix::Network;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::IpAddr;
use tracing::debug;

/// Addresses and routes configured on one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// (interface index, address)
    pub addresses: BTreeSet<(u32, InterfaceAddress)>,
    /// (destination, gateway, interface index)
    pub routes: BTreeSet<(Network, IpAddr, u32)>,
}

impl DeviceState {
    fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.routes.is_empty()
    }

    fn has_address(&self, address: IpAddr) -> bool {
        self.addresses.iter().any(|(_, a)| a.address() == address)
    }
}

/// What the next run of the check script does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedCheck {
    /// Print the text and exit successfully
    Prints(String),
    /// Exit with a non-zero status
    Fails,
    /// Never complete
    Hangs,
}

#[derive(Debug)]
struct Fault {
    device: String,
    needle: String,
}

#[derive(Debug, Default)]
struct LabState {
    devices: BTreeMap<String, DeviceState>,
    files: BTreeMap<(String, String), Bytes>,
    announced: BTreeMap<String, BTreeMap<IpVersion, BTreeSet<Network>>>,
    advertised: BTreeMap<(String, IpAddr), BTreeSet<Network>>,
    checks: VecDeque<ScriptedCheck>,
    check_runs: Vec<(String, Vec<String>)>,
    faults: Vec<Fault>,
    history: Vec<(String, String)>,
}

/// In-memory [`DeviceExecutor`], [`FileTransfer`] and [`BgpQuery`].
#[derive(Debug)]
pub struct EmulatedLab {
    check_script: String,
    state: Mutex<LabState>,
}

impl Default for EmulatedLab {
    fn default() -> Self {
        Self::new("/host_spoof_check.py")
    }
}

impl EmulatedLab {
    /// A lab recognizing `check_script` as the spoofing check.
    #[must_use]
    pub fn new(check_script: impl Into<String>) -> Self {
        Self {
            check_script: check_script.into(),
            state: Mutex::new(LabState::default()),
        }
    }

    /// Configure an address on a device before the test starts.
    pub fn with_address(&self, device: &str, iface: u32, address: InterfaceAddress) -> &Self {
        self.state
            .lock()
            .devices
            .entry(device.to_string())
            .or_default()
            .addresses
            .insert((iface, address));
        self
    }

    /// Make `network` part of the BGP table of `device`.
    pub fn announce(&self, device: &str, network: Network) -> &Self {
        self.state
            .lock()
            .announced
            .entry(device.to_string())
            .or_default()
            .entry(network.version())
            .or_default()
            .insert(network);
        self
    }

    /// Make `device` receive `network` from its neighbour at `peer`.
    pub fn advertise(&self, device: &str, peer: IpAddr, network: Network) -> &Self {
        self.state
            .lock()
            .advertised
            .entry((device.to_string(), peer))
            .or_default()
            .insert(network);
        self
    }

    /// Queue the behaviour of the next check script run. Unscripted runs print `1`.
    pub fn script_check(&self, check: ScriptedCheck) -> &Self {
        self.state.lock().checks.push_back(check);
        self
    }

    /// Make the next command on `device` whose text contains `needle` fail.
    pub fn fail_next(&self, device: &str, needle: &str) -> &Self {
        self.state.lock().faults.push(Fault {
            device: device.to_string(),
            needle: needle.to_string(),
        });
        self
    }

    /// State of every device with at least one address or route.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, DeviceState> {
        self.state
            .lock()
            .devices
            .iter()
            .filter(|(_, state)| !state.is_empty())
            .map(|(device, state)| (device.clone(), state.clone()))
            .collect()
    }

    /// State of one device.
    #[must_use]
    pub fn device(&self, device: &str) -> DeviceState {
        self.state
            .lock()
            .devices
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    /// Content of a file staged on a device.
    #[must_use]
    pub fn file(&self, device: &str, path: &str) -> Option<Bytes> {
        self.state
            .lock()
            .files
            .get(&(device.to_string(), path.to_string()))
            .cloned()
    }

    /// Arguments of every check script run, with the device it ran on.
    #[must_use]
    pub fn check_runs(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().check_runs.clone()
    }

    /// Every command run, with the device it ran on.
    #[must_use]
    pub fn history(&self) -> Vec<(String, String)> {
        self.state.lock().history.clone()
    }
}

fn failure(device: &str, command: &Command, stderr: impl Into<String>) -> ExecError {
    ExecError::NonZeroStatus {
        device: device.to_string(),
        command: command.to_string(),
        status: "exit status: 2".to_string(),
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

fn parse_iface(text: &str) -> Option<u32> {
    text.strip_prefix("eth")?.parse().ok()
}

fn set_address(
    state: &mut DeviceState,
    add: bool,
    iface: u32,
    address: InterfaceAddress,
) -> Result<(), &'static str> {
    let changed = if add {
        state.addresses.insert((iface, address))
    } else {
        state.addresses.remove(&(iface, address))
    };
    if changed {
        Ok(())
    } else if add {
        Err("RTNETLINK answers: File exists")
    } else {
        Err("RTNETLINK answers: Cannot assign requested address")
    }
}

// `ip address add|del <a> dev eth<i>` and `ip route add|del <n> via <g> dev eth<i>`
fn apply_ip(state: &mut DeviceState, argv: &[&str]) -> Result<(), &'static str> {
    match argv {
        ["address", action @ ("add" | "del"), address, "dev", iface] => {
            let address: InterfaceAddress = address.parse().map_err(|_| "invalid address")?;
            let iface = parse_iface(iface).ok_or("Cannot find device")?;
            set_address(state, *action == "add", iface, address)
        }
        ["route", action @ ("add" | "del"), network, "via", gateway, "dev", iface] => {
            let network: Network = network.parse().map_err(|_| "invalid prefix")?;
            let gateway: IpAddr = gateway.parse().map_err(|_| "invalid gateway")?;
            let iface = parse_iface(iface).ok_or("Cannot find device")?;
            if IpVersion::of(&gateway) != network.version() {
                return Err("Error: inet address is expected rather than inet6");
            }
            let route = (network, gateway, iface);
            let changed = if *action == "add" {
                state.routes.insert(route)
            } else {
                state.routes.remove(&route)
            };
            if changed {
                Ok(())
            } else if *action == "add" {
                Err("RTNETLINK answers: File exists")
            } else {
                Err("RTNETLINK answers: No such process")
            }
        }
        _ => Err("unsupported ip command"),
    }
}

// `vtysh -c "configure terminal" -c "interface eth<i>" -c "[no ](ip|ipv6) address <a>"`
fn apply_vtysh_config(state: &mut DeviceState, statements: &[&str]) -> Result<(), &'static str> {
    let [_, interface, statement] = statements else {
        return Err("unsupported vtysh command");
    };
    let iface = interface
        .strip_prefix("interface ")
        .and_then(parse_iface)
        .ok_or("% Unknown command")?;
    let (add, statement) = match statement.strip_prefix("no ") {
        Some(rest) => (false, rest),
        None => (true, *statement),
    };
    let words: Vec<&str> = statement.split_whitespace().collect();
    let address = match words.as_slice() {
        ["ip" | "ipv6", "address", address] => {
            address
                .parse::<InterfaceAddress>()
                .map_err(|_| "% Malformed address")?
        }
        _ => return Err("% Unknown command"),
    };
    set_address(state, add, iface, address)
}

impl EmulatedLab {
    // `script` is the position of the check script in the argument vector.
    fn run_check(
        &self,
        device: &str,
        command: &Command,
        script: usize,
    ) -> Result<Option<Vec<u8>>, ExecError> {
        let mut state = self.state.lock();
        if !state
            .files
            .contains_key(&(device.to_string(), self.check_script.clone()))
        {
            return Err(failure(device, command, "No such file or directory"));
        }
        let source = command
            .argv()
            .get(script + 1)
            .and_then(|source| source.parse::<IpAddr>().ok())
            .ok_or_else(|| failure(device, command, "usage"))?;
        if !state
            .devices
            .get(device)
            .is_some_and(|device| device.has_address(source))
        {
            return Err(failure(device, command, "Cannot assign requested address"));
        }
        state
            .check_runs
            .push((device.to_string(), command.argv().to_vec()));
        match state.checks.pop_front() {
            None => Ok(Some(b"1\n".to_vec())),
            Some(ScriptedCheck::Prints(text)) => Ok(Some(text.into_bytes())),
            Some(ScriptedCheck::Fails) => Err(failure(device, command, "Traceback")),
            Some(ScriptedCheck::Hangs) => Ok(None),
        }
    }

    fn run(&self, device: &str, command: &Command) -> Result<Vec<u8>, ExecError> {
        let text = command.to_string();
        let mut state = self.state.lock();
        state.history.push((device.to_string(), text.clone()));
        if let Some(pos) = state
            .faults
            .iter()
            .position(|fault| fault.device == device && text.contains(&fault.needle))
        {
            state.faults.remove(pos);
            return Err(failure(device, command, "injected failure"));
        }
        let argv: Vec<&str> = command.argv().iter().map(String::as_str).collect();
        let device_state = state.devices.entry(device.to_string()).or_default();
        let result = match argv.as_slice() {
            ["ip", rest @ ..] => apply_ip(device_state, rest),
            ["vtysh", "-c", "configure terminal", "-c", interface, "-c", statement] => {
                apply_vtysh_config(device_state, &["configure terminal", *interface, *statement])
            }
            _ => Err("command not found"),
        };
        result
            .map(|()| Vec::new())
            .map_err(|stderr| failure(device, command, stderr))
    }
}

#[async_trait]
impl DeviceExecutor for EmulatedLab {
    async fn exec(&self, device: &str, command: &Command) -> Result<Vec<u8>, ExecError> {
        debug!("{device}: {command}");
        if let Some(script) = command
            .argv()
            .iter()
            .position(|arg| *arg == self.check_script)
        {
            self.state
                .lock()
                .history
                .push((device.to_string(), command.to_string()));
            return match self.run_check(device, command, script)? {
                Some(output) => Ok(output),
                None => std::future::pending().await,
            };
        }
        self.run(device, command)
    }
}

#[async_trait]
impl FileTransfer for EmulatedLab {
    async fn copy(&self, device: &str, destination: &str, content: Bytes) -> Result<(), ExecError> {
        self.state
            .lock()
            .files
            .insert((device.to_string(), destination.to_string()), content);
        Ok(())
    }
}

#[async_trait]
impl BgpQuery for EmulatedLab {
    async fn announced_networks(
        &self,
        device: &str,
    ) -> Result<BTreeMap<IpVersion, BTreeSet<Network>>, ExecError> {
        let mut networks = self
            .state
            .lock()
            .announced
            .get(device)
            .cloned()
            .unwrap_or_default();
        for version in IpVersion::ALL {
            networks.entry(version).or_default();
        }
        Ok(networks)
    }

    async fn advertised_networks(
        &self,
        device: &str,
        peer: IpAddr,
    ) -> Result<BTreeSet<Network>, ExecError> {
        Ok(self
            .state
            .lock()
            .advertised
            .get(&(device.to_string(), peer))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ip_address_add, ip_address_del, ip_route_add};
    use crate::vendor::{CandidateConfigBuilder, Frr, VendorConfiguration};
    use pretty_assertions::assert_eq;

    fn addr(text: &str) -> InterfaceAddress {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn commands_change_device_state() {
        let lab = EmulatedLab::default();
        let before = lab.snapshot();
        let address = addr("192.0.2.1/24");
        lab.exec("r1", &ip_address_add(1, &address)).await.unwrap();
        assert!(lab.exec("r1", &ip_address_add(1, &address)).await.is_err());
        let gateway = "192.0.2.254".parse().unwrap();
        let default = Network::root(IpVersion::V4);
        lab.exec("h1", &ip_route_add(&default, gateway, 0))
            .await
            .unwrap();
        assert_eq!(lab.device("h1").routes.len(), 1);
        assert_ne!(lab.snapshot(), before);

        let frr = Frr::new(CandidateConfigBuilder::default().local_as(1).build().unwrap());
        let v6 = addr("2001:db8::1/64");
        lab.exec("r1", &frr.set_interface_address(2, &v6))
            .await
            .unwrap();
        assert!(lab.device("r1").addresses.contains(&(2, v6)));
        lab.exec("r1", &frr.unset_interface_address(2, &v6))
            .await
            .unwrap();
        lab.exec("r1", &ip_address_del(1, &address)).await.unwrap();
        assert!(lab.exec("r1", &ip_address_del(1, &address)).await.is_err());
        assert_eq!(lab.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn injected_faults_fire_once() {
        let lab = EmulatedLab::default();
        lab.fail_next("r1", "address add");
        let address = addr("192.0.2.1/24");
        assert!(lab.exec("r1", &ip_address_add(0, &address)).await.is_err());
        assert!(lab.device("r1").addresses.is_empty());
        lab.exec("r1", &ip_address_add(0, &address)).await.unwrap();
        assert_eq!(lab.history().len(), 2);
    }

    #[tokio::test]
    async fn check_needs_script_and_source_address() {
        let lab = EmulatedLab::default();
        let check = Command::new("/usr/bin/python3").args([
            "/host_spoof_check.py",
            "192.0.2.10",
            "203.0.113.2",
            "198.51.100.2",
            "4",
        ]);
        assert!(lab.exec("c1", &check).await.is_err());
        lab.copy("c1", "/host_spoof_check.py", Bytes::from_static(b"#"))
            .await
            .unwrap();
        assert!(lab.exec("c1", &check).await.is_err());
        lab.with_address("c1", 0, addr("192.0.2.10/24"));
        lab.script_check(ScriptedCheck::Prints("0".to_string()));
        assert_eq!(lab.exec("c1", &check).await.unwrap(), b"0");
        assert_eq!(lab.exec("c1", &check).await.unwrap(), b"1\n");
        let bounded = Command::new("timeout").arg(121).args(check.argv());
        assert_eq!(lab.exec("c1", &bounded).await.unwrap(), b"1\n");
        assert_eq!(lab.check_runs().len(), 3);
    }
}
