//! Snapshot of the caller's network position within one cloud account.
//!
//! The snapshot records which subnets this host is attached to and which
//! routers bridge those subnets to others. It is built once per account and
//! shared read-only by every address resolution of that account.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::cloud::{CloudApi, MetadataProbe, ProbeOutcome, ROUTER_GATEWAY_OWNER};

/// How the caller's attachment was determined.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProbeStatus {
    /// The metadata service answered with the caller's networks.
    OnCloud,
    /// The metadata service could not be reached.
    OffCloud,
    /// The metadata service answered with something unusable.
    Unavailable(String),
}

/// A router together with the subnets it bridges.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Router {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Subnet IDs of the router's internal ports.
    pub subnet_ids: Vec<String>,
    /// Names of those subnets, where known.
    pub subnet_names: Vec<String>,
}

impl Router {
    /// Returns `true` when the router has a port on `subnet`, given either
    /// as an ID or as a name.
    #[must_use]
    pub fn is_connected(&self, subnet: &str) -> bool {
        self.subnet_ids.iter().any(|id| id == subnet)
            || self.subnet_names.iter().any(|name| name == subnet)
    }
}

/// The caller's subnets and the routers attached to them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopologySnapshot {
    /// Subnet IDs the caller is attached to.
    pub own_subnets: Vec<String>,
    /// Names of the caller's subnets.
    pub own_subnet_names: Vec<String>,
    /// Routers bridging at least one of the caller's subnets.
    pub routers: Vec<Router>,
    /// Outcome of the metadata probe.
    pub probe: ProbeStatus,
}

impl TopologySnapshot {
    /// Empty snapshot for a host that is not a cloud instance.
    #[must_use]
    pub const fn off_cloud() -> Self {
        Self {
            own_subnets: Vec::new(),
            own_subnet_names: Vec::new(),
            routers: Vec::new(),
            probe: ProbeStatus::OffCloud,
        }
    }

    /// Empty snapshot for a metadata service that gave no usable answer.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            probe: ProbeStatus::Unavailable(reason.into()),
            ..Self::off_cloud()
        }
    }

    /// Returns `true` when the caller has no known subnets, in which case
    /// topology-based resolution is skipped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.own_subnets.is_empty()
    }

    /// Returns `true` when one of the caller's subnets is named `name`.
    #[must_use]
    pub fn has_own_subnet_named(&self, name: &str) -> bool {
        self.own_subnet_names.iter().any(|own| own == name)
    }

    /// Builds the snapshot from the metadata probe and the account's network
    /// listings.
    ///
    /// Never fails: an unreachable metadata service yields an empty snapshot,
    /// and networks or routers that cannot be listed are skipped.
    pub async fn build<P, C>(probe: &P, api: &C) -> Self
    where
        P: MetadataProbe + ?Sized,
        C: CloudApi + ?Sized,
    {
        let network_ids = match probe.attached_networks().await {
            ProbeOutcome::Attached(ids) => ids,
            ProbeOutcome::OffCloud(reason) => {
                debug!(%reason, "metadata service unreachable, assuming off-cloud");
                return Self::off_cloud();
            }
            ProbeOutcome::Unavailable(reason) => {
                warn!(%reason, "metadata service gave no usable answer");
                return Self::unavailable(reason);
            }
        };

        let names = SubnetNames::fetch(api).await;
        let mut own_subnets = Vec::new();
        let mut own_subnet_names = Vec::new();
        for network_id in &network_ids {
            let subnet_ids = match api.network_subnets(network_id).await {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(%network_id, error = %err, "could not retrieve network, skipping");
                    continue;
                }
            };
            for subnet_id in subnet_ids {
                if let Some(name) = names.get(&subnet_id) {
                    own_subnet_names.push(name.to_owned());
                }
                own_subnets.push(subnet_id);
            }
        }
        debug!(subnets = ?own_subnet_names, "attached to subnets");

        let routers = if own_subnets.is_empty() {
            Vec::new()
        } else {
            connected_routers(api, &names, &own_subnets).await
        };
        debug!(
            routers = ?routers.iter().map(|router| router.name.as_str()).collect::<Vec<_>>(),
            "connected to routers"
        );

        Self {
            own_subnets,
            own_subnet_names,
            routers,
            probe: ProbeStatus::OnCloud,
        }
    }
}

/// Subnet ID to name map, local to a single snapshot build.
struct SubnetNames(HashMap<String, String>);

impl SubnetNames {
    async fn fetch<C: CloudApi + ?Sized>(api: &C) -> Self {
        match api.list_subnets().await {
            Ok(subnets) => Self(
                subnets
                    .into_iter()
                    .map(|subnet| (subnet.id, subnet.name))
                    .collect(),
            ),
            Err(err) => {
                warn!(error = %err, "could not list subnets, subnet names unknown");
                Self(HashMap::new())
            }
        }
    }

    fn get(&self, id: &str) -> Option<&str> {
        let name = self.0.get(id).map(String::as_str);
        if name.is_none() {
            debug!(subnet_id = %id, "subnet name not found");
        }
        name
    }
}

async fn connected_routers<C: CloudApi + ?Sized>(
    api: &C,
    names: &SubnetNames,
    own_subnets: &[String],
) -> Vec<Router> {
    let listed = match api.list_routers().await {
        Ok(routers) => routers,
        Err(err) => {
            warn!(error = %err, "could not list routers");
            return Vec::new();
        }
    };

    let mut routers = Vec::new();
    for info in listed {
        let ports = match api.router_ports(&info.id).await {
            Ok(ports) => ports,
            Err(err) => {
                warn!(router = %info.name, error = %err, "could not list router ports, skipping");
                continue;
            }
        };

        let mut router = Router {
            id: info.id,
            name: info.name,
            subnet_ids: Vec::new(),
            subnet_names: Vec::new(),
        };
        for subnet_id in ports
            .into_iter()
            .filter(|port| port.device_owner != ROUTER_GATEWAY_OWNER)
            .flat_map(|port| port.subnet_ids)
        {
            if let Some(name) = names.get(&subnet_id) {
                debug!(router = %router.name, subnet = %name, "router connected to subnet");
                router.subnet_names.push(name.to_owned());
            }
            router.subnet_ids.push(subnet_id);
        }

        if own_subnets.iter().any(|subnet| router.is_connected(subnet)) {
            routers.push(router);
        }
    }
    routers
}
