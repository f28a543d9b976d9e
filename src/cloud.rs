//! Collaborator interfaces for the cloud provider.
//!
//! The reconciler only talks to the provider through these traits, which keeps
//! the OpenStack client swappable for in-memory doubles in tests.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::resolve::AddressBook;

/// Future returned by collaborator operations.
pub type CloudFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Future returned by the metadata probe, which never fails.
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ProbeOutcome> + Send + 'a>>;

/// Compute status of a machine that is up and serving.
pub const ACTIVE_STATUS: &str = "ACTIVE";

/// Raw view of one server as listed by the compute service.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerListing {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Provider status, for example `ACTIVE` or `SHUTOFF`.
    pub status: String,
    /// Addresses per network, in provider order.
    pub addresses: AddressBook,
    /// Key pair registered for the server.
    pub key_name: Option<String>,
    /// Flavor name.
    pub flavor_name: Option<String>,
    /// Image the server was booted from, when booted from an image.
    pub image_id: Option<String>,
    /// Attached volume identifiers, boot volume first.
    pub volume_ids: Vec<String>,
}

/// Image metadata relevant for guessing the login user.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageInfo {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// `os_distro` image property.
    pub os_distro: Option<String>,
    /// `image_original_user` image property.
    pub original_user: Option<String>,
}

/// A subnet with its display name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubnetInfo {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// A router with its display name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouterInfo {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// A port attached to a router.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortInfo {
    /// Device owner, for example `network:router_interface`.
    pub device_owner: String,
    /// Subnets of the port's fixed IPs.
    pub subnet_ids: Vec<String>,
}

/// Device owner of the port connecting a router to its external network.
pub const ROUTER_GATEWAY_OWNER: &str = "network:router_gateway";

/// Result of asking the metadata service which networks this host is
/// attached to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProbeOutcome {
    /// The host is a cloud instance attached to these network IDs.
    Attached(Vec<String>),
    /// The metadata service could not be reached; the host is not on the
    /// cloud.
    OffCloud(String),
    /// The metadata service answered, but the answer was unusable.
    Unavailable(String),
}

/// Source of the caller's own network attachments.
pub trait MetadataProbe {
    /// Queries the metadata service.
    fn attached_networks(&self) -> ProbeFuture<'_>;
}

/// Read-only view of one cloud account.
pub trait CloudApi {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists all servers visible to the account, in any status.
    fn list_servers(&self) -> CloudFuture<'_, Vec<ServerListing>, Self::Error>;

    /// Looks up an image; `Ok(None)` when it does not exist.
    fn image<'a>(&'a self, image_id: &'a str) -> CloudFuture<'a, Option<ImageInfo>, Self::Error>;

    /// Returns the image a volume was created from, if any.
    fn volume_image_id<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> CloudFuture<'a, Option<String>, Self::Error>;

    /// Lists every subnet visible to the account.
    fn list_subnets(&self) -> CloudFuture<'_, Vec<SubnetInfo>, Self::Error>;

    /// Lists the subnet IDs of a network.
    fn network_subnets<'a>(
        &'a self,
        network_id: &'a str,
    ) -> CloudFuture<'a, Vec<String>, Self::Error>;

    /// Lists every router visible to the account.
    fn list_routers(&self) -> CloudFuture<'_, Vec<RouterInfo>, Self::Error>;

    /// Lists the ports owned by a router.
    fn router_ports<'a>(&'a self, router_id: &'a str)
    -> CloudFuture<'a, Vec<PortInfo>, Self::Error>;
}

/// Errors raised while connecting to an account.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectError {
    /// The identity service rejected the credentials.
    #[error("authorization for account {account} was rejected: {message}")]
    Unauthorized {
        /// Account name.
        account: String,
        /// Message returned by the identity service.
        message: String,
    },
    /// No usable profile exists for the account.
    #[error("no usable profile for account {account}: {message}")]
    Profile {
        /// Account name.
        account: String,
        /// Human-readable description.
        message: String,
    },
    /// Any other failure while establishing the session.
    #[error("failed to connect to account {account}: {message}")]
    Transport {
        /// Account name.
        account: String,
        /// Human-readable description.
        message: String,
    },
}

/// Opens sessions to cloud accounts.
pub trait Connector {
    /// Session type returned on success.
    type Api: CloudApi + Send + Sync;

    /// Connects to `account`. When `domain_override` is set, it replaces the
    /// user and project domains of the account's profile.
    fn connect<'a>(
        &'a self,
        account: &'a str,
        domain_override: Option<&'a str>,
    ) -> CloudFuture<'a, Self::Api, ConnectError>;
}
