// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Commands run on lab devices, and the generic `ip` commands every Linux host understands.

use net::interface::InterfaceAddress;
use net::prefix::Network;
use std::fmt::Display;
use std::net::IpAddr;

/// A command to run on a device, as an argument vector.
///
/// Commands are never parsed by a shell: each argument reaches the program as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    argv: Vec<String>,
}

impl Command {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Display) -> Self {
        self.argv.push(arg.to_string());
        self
    }

    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Display,
    {
        self.argv.extend(args.into_iter().map(|arg| arg.to_string()));
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        // argv always holds the program
        self.argv.first().map_or("", String::as_str)
    }

    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, arg) in self.argv.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, "'{arg}'")?;
            } else {
                write!(f, "{arg}")?;
            }
        }
        Ok(())
    }
}

fn ip() -> Command {
    Command::new("ip")
}

/// `ip address add <address> dev eth<iface>`
#[must_use]
pub fn ip_address_add(iface: u32, address: &InterfaceAddress) -> Command {
    ip().args(["address", "add"])
        .arg(address)
        .arg("dev")
        .arg(format!("eth{iface}"))
}

/// `ip address del <address> dev eth<iface>`
#[must_use]
pub fn ip_address_del(iface: u32, address: &InterfaceAddress) -> Command {
    ip().args(["address", "del"])
        .arg(address)
        .arg("dev")
        .arg(format!("eth{iface}"))
}

/// `ip route add <network> via <gateway> dev eth<iface>`
#[must_use]
pub fn ip_route_add(network: &Network, gateway: IpAddr, iface: u32) -> Command {
    ip().args(["route", "add"])
        .arg(network)
        .arg("via")
        .arg(gateway)
        .arg("dev")
        .arg(format!("eth{iface}"))
}

/// `ip route del <network> via <gateway> dev eth<iface>`
#[must_use]
pub fn ip_route_del(network: &Network, gateway: IpAddr, iface: u32) -> Command {
    ip().args(["route", "del"])
        .arg(network)
        .arg("via")
        .arg(gateway)
        .arg("dev")
        .arg(format!("eth{iface}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::ip::IpVersion;
    use pretty_assertions::assert_eq;

    #[test]
    fn generic_commands() {
        let address: InterfaceAddress = "192.0.2.1/24".parse().unwrap();
        assert_eq!(
            ip_address_add(3, &address).argv(),
            ["ip", "address", "add", "192.0.2.1/24", "dev", "eth3"]
        );
        assert_eq!(
            ip_address_del(3, &address).to_string(),
            "ip address del 192.0.2.1/24 dev eth3"
        );
        let default = Network::root(IpVersion::V6);
        let gateway: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(
            ip_route_add(&default, gateway, 0).to_string(),
            "ip route add ::/0 via 2001:db8::1 dev eth0"
        );
        assert_eq!(ip_route_del(&default, gateway, 0).argv()[2], "del");
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let command = Command::new("vtysh").arg("-c").arg("show bgp ipv4 unicast json");
        assert_eq!(command.program(), "vtysh");
        assert_eq!(command.to_string(), "vtysh -c 'show bgp ipv4 unicast json'");
    }
}
