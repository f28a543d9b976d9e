//! Address resolution: picks the address of a machine that is reachable from
//! the caller's position in the cloud network.
//!
//! Resolution is a pure topology heuristic; nothing is probed on the wire.
//! The candidates are evaluated in a fixed priority order:
//!
//! 1. a fixed address on a subnet the caller is attached to,
//! 2. a fixed address on a subnet one router hop away,
//! 3. the first floating address,
//! 4. the first fixed address outside the private ranges.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

use crate::topology::TopologySnapshot;

/// Private, link-local and carrier-grade NAT ranges that are never reachable
/// from outside the cloud.
pub const PRIVATE_RANGES: [&str; 5] = [
    "192.168.0.0/16",
    "172.16.0.0/12",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "169.254.0.0/16",
];

/// How an address is attached to a machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressKind {
    /// Address assigned to the machine's port on an internal network.
    Fixed,
    /// Separately allocated address mapped onto the machine.
    Floating,
}

/// One address reported for a machine on a network.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineAddress {
    /// Address in textual form, as reported by the provider.
    pub addr: String,
    /// IP version (4 or 6).
    pub version: u8,
    /// Fixed or floating.
    pub kind: AddressKind,
}

impl MachineAddress {
    /// Builds a fixed IPv4 address entry.
    #[must_use]
    pub fn fixed(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            version: 4,
            kind: AddressKind::Fixed,
        }
    }

    /// Builds a floating IPv4 address entry.
    #[must_use]
    pub fn floating(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            version: 4,
            kind: AddressKind::Floating,
        }
    }

    fn ipv4(&self, kind: AddressKind) -> Option<Ipv4Addr> {
        if self.version != 4 || self.kind != kind {
            return None;
        }
        Ipv4Addr::from_str(self.addr.trim()).ok()
    }
}

/// Addresses of one machine on one network, in provider order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkAddresses {
    /// Network name as used by the compute service.
    pub network: String,
    /// Addresses on that network.
    pub addresses: Vec<MachineAddress>,
}

/// Ordered mapping from network name to the addresses a machine holds there.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AddressBook {
    networks: Vec<NetworkAddresses>,
}

impl AddressBook {
    /// Creates an empty address book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a network with its addresses, keeping insertion order.
    #[must_use]
    pub fn with_network(
        mut self,
        network: impl Into<String>,
        addresses: impl IntoIterator<Item = MachineAddress>,
    ) -> Self {
        self.push(network, addresses);
        self
    }

    /// Appends a network with its addresses, keeping insertion order.
    pub fn push(
        &mut self,
        network: impl Into<String>,
        addresses: impl IntoIterator<Item = MachineAddress>,
    ) {
        self.networks.push(NetworkAddresses {
            network: network.into(),
            addresses: addresses.into_iter().collect(),
        });
    }

    /// Iterates networks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkAddresses> {
        self.networks.iter()
    }

    /// Returns `true` when the machine has no networks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl NetworkAddresses {
    fn first_ipv4(&self, kind: AddressKind) -> Option<Ipv4Addr> {
        self.addresses.iter().find_map(|entry| entry.ipv4(kind))
    }
}

/// Errors raised while parsing CIDR notation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CidrError {
    /// The input does not contain a `/`.
    #[error("'{0}' is not in address/prefix notation")]
    MissingPrefix(String),
    /// The network part is not an IPv4 address.
    #[error("'{0}' is not an IPv4 network address")]
    InvalidAddress(String),
    /// The prefix length is not a number between 0 and 32.
    #[error("'{0}' is not a valid IPv4 prefix length")]
    InvalidPrefix(String),
}

/// An IPv4 network in CIDR notation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Cidr {
    /// Builds a CIDR from a network address and prefix length.
    ///
    /// # Errors
    ///
    /// Returns [`CidrError::InvalidPrefix`] when `prefix` exceeds 32.
    pub fn new(network: Ipv4Addr, prefix: u8) -> Result<Self, CidrError> {
        if prefix > 32 {
            return Err(CidrError::InvalidPrefix(prefix.to_string()));
        }
        Ok(Self { network, prefix })
    }

    /// Network mask with the top `prefix` bits set.
    #[must_use]
    pub fn mask(&self) -> u32 {
        u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0)
    }

    /// Returns `true` when the top `prefix` bits of `addr` and the network
    /// address are equal.
    #[must_use]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = self.mask();
        u32::from(addr) & mask == u32::from(self.network) & mask
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (net, bits) = value
            .split_once('/')
            .ok_or_else(|| CidrError::MissingPrefix(value.to_owned()))?;
        let network =
            Ipv4Addr::from_str(net).map_err(|_| CidrError::InvalidAddress(net.to_owned()))?;
        let prefix = bits
            .parse::<u8>()
            .map_err(|_| CidrError::InvalidPrefix(bits.to_owned()))?;
        Self::new(network, prefix)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Returns `true` when `addr` lies inside `cidr`.
///
/// # Errors
///
/// Returns [`CidrError`] when `cidr` is malformed.
pub fn ip_in_cidr(addr: Ipv4Addr, cidr: &str) -> Result<bool, CidrError> {
    Ok(Cidr::from_str(cidr)?.contains(addr))
}

/// Returns `true` when `addr` is outside every range in [`PRIVATE_RANGES`].
#[must_use]
pub fn is_public(addr: Ipv4Addr) -> bool {
    !PRIVATE_RANGES
        .iter()
        .filter_map(|range| Cidr::from_str(range).ok())
        .any(|cidr| cidr.contains(addr))
}

/// Selects the best reachable IPv4 address from `addresses`.
///
/// Returns `None` when no candidate qualifies. The result is always one of
/// the addresses present in `addresses`.
#[must_use]
pub fn resolve(addresses: &AddressBook, snapshot: &TopologySnapshot) -> Option<Ipv4Addr> {
    if !snapshot.is_empty() {
        if let Some(addr) = same_subnet(addresses, snapshot) {
            return Some(addr);
        }
        if let Some(addr) = one_router_hop(addresses, snapshot) {
            return Some(addr);
        }
    }

    addresses
        .iter()
        .find_map(|net| net.first_ipv4(AddressKind::Floating))
        .or_else(|| {
            addresses
                .iter()
                .filter_map(|net| net.first_ipv4(AddressKind::Fixed))
                .find(|addr| is_public(*addr))
        })
}

fn same_subnet(addresses: &AddressBook, snapshot: &TopologySnapshot) -> Option<Ipv4Addr> {
    addresses
        .iter()
        .filter(|net| snapshot.has_own_subnet_named(&net.network))
        .find_map(|net| net.first_ipv4(AddressKind::Fixed))
}

fn one_router_hop(addresses: &AddressBook, snapshot: &TopologySnapshot) -> Option<Ipv4Addr> {
    addresses
        .iter()
        .filter(|net| {
            snapshot
                .routers
                .iter()
                .any(|router| router.is_connected(&net.network))
        })
        .find_map(|net| net.first_ipv4(AddressKind::Fixed))
}
