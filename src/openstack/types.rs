//! Wire representations of OpenStack API responses.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::cloud::{ImageInfo, PortInfo, RouterInfo, ServerListing, SubnetInfo};
use crate::resolve::{AddressBook, AddressKind, MachineAddress};

const FLOATING_TYPE: &str = "floating";
const NEXT_REL: &str = "next";

#[derive(Debug, Deserialize)]
pub(super) struct Link {
    pub(super) href: String,
    pub(super) rel: String,
}

/// One page of `GET /servers/detail`.
#[derive(Debug, Deserialize)]
pub(super) struct ServersPage {
    #[serde(default)]
    pub(super) servers: Vec<ServerWire>,
    #[serde(default)]
    pub(super) servers_links: Vec<Link>,
}

impl ServersPage {
    pub(super) fn next_href(&self) -> Option<&str> {
        self.servers_links
            .iter()
            .find(|link| link.rel == NEXT_REL)
            .map(|link| link.href.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerWire {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    // Key order is the network order the resolver walks.
    #[serde(default)]
    addresses: Map<String, Value>,
    key_name: Option<String>,
    #[serde(default)]
    flavor: Value,
    #[serde(default)]
    image: Value,
    #[serde(rename = "os-extended-volumes:volumes_attached", default)]
    volumes_attached: Vec<VolumeRef>,
}

#[derive(Debug, Deserialize)]
struct VolumeRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AddressWire {
    addr: String,
    #[serde(default = "default_version")]
    version: u8,
    #[serde(rename = "OS-EXT-IPS:type")]
    kind: Option<String>,
}

const fn default_version() -> u8 {
    4
}

impl From<AddressWire> for MachineAddress {
    fn from(value: AddressWire) -> Self {
        let kind = match value.kind.as_deref() {
            Some(FLOATING_TYPE) => AddressKind::Floating,
            _ => AddressKind::Fixed,
        };
        Self {
            addr: value.addr,
            version: value.version,
            kind,
        }
    }
}

impl From<ServerWire> for ServerListing {
    fn from(value: ServerWire) -> Self {
        let mut addresses = AddressBook::new();
        for (network, entries) in value.addresses {
            match serde_json::from_value::<Vec<AddressWire>>(entries) {
                Ok(parsed) => {
                    addresses.push(network, parsed.into_iter().map(MachineAddress::from));
                }
                Err(err) => debug!(
                    server = %value.id,
                    %network,
                    error = %err,
                    "skipping malformed addresses"
                ),
            }
        }

        // Newer microversions embed `original_name`; older ones only an `id`.
        let flavor_name = string_field(&value.flavor, "original_name")
            .or_else(|| string_field(&value.flavor, "name"))
            .or_else(|| string_field(&value.flavor, "id"));
        // Boot-from-volume servers report `"image": ""`.
        let image_id = string_field(&value.image, "id");

        Self {
            id: value.id,
            name: value.name,
            status: value.status,
            addresses,
            key_name: value.key_name.filter(|key| !key.is_empty()),
            flavor_name,
            image_id,
            volume_ids: value.volumes_attached.into_iter().map(|volume| volume.id).collect(),
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

/// `GET /v2/images/{id}`; Glance returns image properties at the top level.
#[derive(Debug, Deserialize)]
pub(super) struct ImageWire {
    id: String,
    #[serde(default)]
    name: Option<String>,
    os_distro: Option<String>,
    image_original_user: Option<String>,
}

impl From<ImageWire> for ImageInfo {
    fn from(value: ImageWire) -> Self {
        Self {
            id: value.id,
            name: value.name.unwrap_or_default(),
            os_distro: value.os_distro,
            original_user: value.image_original_user,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct VolumeEnvelope {
    volume: VolumeWire,
}

#[derive(Debug, Deserialize)]
struct VolumeWire {
    #[serde(default)]
    volume_image_metadata: Map<String, Value>,
}

impl VolumeEnvelope {
    pub(super) fn image_id(&self) -> Option<String> {
        self.volume
            .volume_image_metadata
            .get("image_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SubnetsEnvelope {
    #[serde(default)]
    subnets: Vec<NamedWire>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RoutersEnvelope {
    #[serde(default)]
    routers: Vec<NamedWire>,
}

#[derive(Debug, Deserialize)]
struct NamedWire {
    id: String,
    #[serde(default)]
    name: String,
}

impl SubnetsEnvelope {
    pub(super) fn into_subnets(self) -> Vec<SubnetInfo> {
        self.subnets
            .into_iter()
            .map(|subnet| SubnetInfo {
                id: subnet.id,
                name: subnet.name,
            })
            .collect()
    }
}

impl RoutersEnvelope {
    pub(super) fn into_routers(self) -> Vec<RouterInfo> {
        self.routers
            .into_iter()
            .map(|router| RouterInfo {
                id: router.id,
                name: router.name,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct NetworkEnvelope {
    network: NetworkWire,
}

#[derive(Debug, Deserialize)]
struct NetworkWire {
    #[serde(default)]
    subnets: Vec<String>,
}

impl NetworkEnvelope {
    pub(super) fn into_subnet_ids(self) -> Vec<String> {
        self.network.subnets
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct PortsEnvelope {
    #[serde(default)]
    ports: Vec<PortWire>,
}

#[derive(Debug, Deserialize)]
struct PortWire {
    #[serde(default)]
    device_owner: String,
    #[serde(default)]
    fixed_ips: Vec<FixedIpWire>,
}

#[derive(Debug, Deserialize)]
struct FixedIpWire {
    subnet_id: Option<String>,
}

impl PortsEnvelope {
    pub(super) fn into_ports(self) -> Vec<PortInfo> {
        self.ports
            .into_iter()
            .map(|port| PortInfo {
                device_owner: port.device_owner,
                subnet_ids: port
                    .fixed_ips
                    .into_iter()
                    .filter_map(|ip| ip.subnet_id)
                    .collect(),
            })
            .collect()
    }
}

/// `network_data.json` served by the metadata service.
#[derive(Debug, Deserialize)]
pub(super) struct NetworkData {
    #[serde(default)]
    networks: Vec<MetadataNetwork>,
}

#[derive(Debug, Deserialize)]
struct MetadataNetwork {
    network_id: Option<String>,
}

impl NetworkData {
    pub(super) fn network_ids(self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.networks.into_iter().filter_map(|network| network.network_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}
