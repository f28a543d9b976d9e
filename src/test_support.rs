//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeCloud`] serves scripted listings for a single account,
//! [`FakeConnector`] hands those out by account name and can simulate
//! rejected credentials, and [`StaticProbe`] answers the metadata probe with
//! a fixed outcome. [`EnvGuard`] serialises environment mutation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::env;
use std::ffi::OsString;
use std::future::ready;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::cloud::{
    CloudApi, CloudFuture, ConnectError, Connector, ImageInfo, MetadataProbe, PortInfo,
    ProbeFuture, ProbeOutcome, RouterInfo, ServerListing, SubnetInfo,
};

/// Error returned by [`FakeCloud`] for scripted failures.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("scripted failure: {0}")]
pub struct FakeCloudError(pub String);

#[derive(Debug, Default)]
struct CloudState {
    servers: Vec<ServerListing>,
    images: HashMap<String, ImageInfo>,
    volume_images: HashMap<String, String>,
    subnets: Vec<SubnetInfo>,
    networks: HashMap<String, Vec<String>>,
    routers: Vec<RouterInfo>,
    ports: HashMap<String, Vec<PortInfo>>,
    failing_networks: HashSet<String>,
    failing_routers: HashSet<String>,
    fail_server_listing: bool,
    image_lookups: usize,
}

/// In-memory cloud account.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    /// Creates an account with no resources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        self.state
            .lock()
            .unwrap_or_else(|err| panic!("fake cloud lock poisoned: {err}"))
    }

    /// Adds a server to the compute listing.
    #[must_use]
    pub fn with_server(self, server: ServerListing) -> Self {
        self.state().servers.push(server);
        self
    }

    /// Adds an image.
    #[must_use]
    pub fn with_image(self, image: ImageInfo) -> Self {
        self.state().images.insert(image.id.clone(), image);
        self
    }

    /// Records the image a volume was created from.
    #[must_use]
    pub fn with_volume_image(self, volume_id: &str, image_id: &str) -> Self {
        self.state()
            .volume_images
            .insert(volume_id.to_owned(), image_id.to_owned());
        self
    }

    /// Adds a subnet.
    #[must_use]
    pub fn with_subnet(self, subnet: SubnetInfo) -> Self {
        self.state().subnets.push(subnet);
        self
    }

    /// Adds a network made of the given subnets.
    #[must_use]
    pub fn with_network(self, network_id: &str, subnet_ids: &[&str]) -> Self {
        self.state().networks.insert(
            network_id.to_owned(),
            subnet_ids.iter().map(|id| (*id).to_owned()).collect(),
        );
        self
    }

    /// Makes lookups of `network_id` fail.
    #[must_use]
    pub fn with_failing_network(self, network_id: &str) -> Self {
        self.state().failing_networks.insert(network_id.to_owned());
        self
    }

    /// Adds a router with its ports.
    #[must_use]
    pub fn with_router(self, router: RouterInfo, ports: Vec<PortInfo>) -> Self {
        {
            let mut state = self.state();
            state.ports.insert(router.id.clone(), ports);
            state.routers.push(router);
        }
        self
    }

    /// Makes port listings of `router_id` fail.
    #[must_use]
    pub fn with_failing_router(self, router_id: &str) -> Self {
        self.state().failing_routers.insert(router_id.to_owned());
        self
    }

    /// Makes the server listing fail.
    #[must_use]
    pub fn with_failing_server_listing(self) -> Self {
        self.state().fail_server_listing = true;
        self
    }

    /// Replaces the server listing, keeping everything else.
    pub fn replace_servers(&self, servers: Vec<ServerListing>) {
        self.state().servers = servers;
    }

    /// Number of image lookups performed so far.
    #[must_use]
    pub fn image_lookups(&self) -> usize {
        self.state().image_lookups
    }
}

impl CloudApi for FakeCloud {
    type Error = FakeCloudError;

    fn list_servers(&self) -> CloudFuture<'_, Vec<ServerListing>, Self::Error> {
        let state = self.state();
        let result = if state.fail_server_listing {
            Err(FakeCloudError(String::from("server listing")))
        } else {
            Ok(state.servers.clone())
        };
        Box::pin(ready(result))
    }

    fn image<'a>(&'a self, image_id: &'a str) -> CloudFuture<'a, Option<ImageInfo>, Self::Error> {
        let mut state = self.state();
        state.image_lookups += 1;
        let result = Ok(state.images.get(image_id).cloned());
        Box::pin(ready(result))
    }

    fn volume_image_id<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> CloudFuture<'a, Option<String>, Self::Error> {
        let result = Ok(self.state().volume_images.get(volume_id).cloned());
        Box::pin(ready(result))
    }

    fn list_subnets(&self) -> CloudFuture<'_, Vec<SubnetInfo>, Self::Error> {
        let result = Ok(self.state().subnets.clone());
        Box::pin(ready(result))
    }

    fn network_subnets<'a>(
        &'a self,
        network_id: &'a str,
    ) -> CloudFuture<'a, Vec<String>, Self::Error> {
        let state = self.state();
        let result = if state.failing_networks.contains(network_id) {
            Err(FakeCloudError(format!("network {network_id}")))
        } else {
            state
                .networks
                .get(network_id)
                .cloned()
                .ok_or_else(|| FakeCloudError(format!("network {network_id} not found")))
        };
        Box::pin(ready(result))
    }

    fn list_routers(&self) -> CloudFuture<'_, Vec<RouterInfo>, Self::Error> {
        let result = Ok(self.state().routers.clone());
        Box::pin(ready(result))
    }

    fn router_ports<'a>(
        &'a self,
        router_id: &'a str,
    ) -> CloudFuture<'a, Vec<PortInfo>, Self::Error> {
        let state = self.state();
        let result = if state.failing_routers.contains(router_id) {
            Err(FakeCloudError(format!("ports of {router_id}")))
        } else {
            Ok(state.ports.get(router_id).cloned().unwrap_or_default())
        };
        Box::pin(ready(result))
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    clouds: HashMap<String, FakeCloud>,
    domain_required: HashSet<String>,
    attempts: Vec<(String, Option<String>)>,
}

/// Hands out [`FakeCloud`] sessions by account name.
///
/// Unknown accounts fail with [`ConnectError::Transport`]. Accounts marked
/// with [`FakeConnector::requiring_domain`] reject connections without a
/// domain override as unauthorized.
#[derive(Clone, Debug, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    /// Creates a connector that knows no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ConnectorState> {
        self.state
            .lock()
            .unwrap_or_else(|err| panic!("fake connector lock poisoned: {err}"))
    }

    /// Registers an account.
    #[must_use]
    pub fn with_account(self, account: &str, cloud: FakeCloud) -> Self {
        self.state().clouds.insert(account.to_owned(), cloud);
        self
    }

    /// Makes `account` accept only connections carrying a domain override.
    #[must_use]
    pub fn requiring_domain(self, account: &str) -> Self {
        self.state().domain_required.insert(account.to_owned());
        self
    }

    /// Connection attempts so far, as `(account, domain_override)` pairs.
    #[must_use]
    pub fn attempts(&self) -> Vec<(String, Option<String>)> {
        self.state().attempts.clone()
    }
}

impl Connector for FakeConnector {
    type Api = FakeCloud;

    fn connect<'a>(
        &'a self,
        account: &'a str,
        domain_override: Option<&'a str>,
    ) -> CloudFuture<'a, Self::Api, ConnectError> {
        let mut state = self.state();
        state
            .attempts
            .push((account.to_owned(), domain_override.map(str::to_owned)));
        let result = if state.domain_required.contains(account) && domain_override.is_none() {
            Err(ConnectError::Unauthorized {
                account: account.to_owned(),
                message: String::from("domain required"),
            })
        } else {
            state
                .clouds
                .get(account)
                .cloned()
                .ok_or_else(|| ConnectError::Transport {
                    account: account.to_owned(),
                    message: String::from("unknown account"),
                })
        };
        Box::pin(ready(result))
    }
}

/// Metadata probe returning a fixed outcome.
#[derive(Clone, Debug)]
pub struct StaticProbe {
    outcome: ProbeOutcome,
}

impl StaticProbe {
    /// Creates a probe that always returns `outcome`.
    #[must_use]
    pub const fn new(outcome: ProbeOutcome) -> Self {
        Self { outcome }
    }

    /// Probe for a host outside the cloud.
    #[must_use]
    pub fn off_cloud() -> Self {
        Self::new(ProbeOutcome::OffCloud(String::from("connection refused")))
    }

    /// Probe for an instance attached to `network_ids`.
    #[must_use]
    pub fn attached(network_ids: &[&str]) -> Self {
        Self::new(ProbeOutcome::Attached(
            network_ids.iter().map(|id| (*id).to_owned()).collect(),
        ))
    }
}

impl MetadataProbe for StaticProbe {
    fn attached_networks(&self) -> ProbeFuture<'_> {
        Box::pin(ready(self.outcome.clone()))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets (`Some`) or removes (`None`) environment variables while holding
    /// a global mutex.
    pub async fn apply(changes: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                changes.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(changes.len());
        for (key, value) in changes {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
