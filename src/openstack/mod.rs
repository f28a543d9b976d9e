//! OpenStack implementation of the cloud collaborator traits.
//!
//! The client speaks the Keystone v3, Nova, Glance v2, Cinder v3 and
//! Neutron v2.0 REST APIs directly with `reqwest`.

mod auth;
mod error;
mod probe;
mod types;

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

pub use error::OpenStackError;
pub use probe::HttpMetadataProbe;

use self::auth::Session;
use self::types::{
    ImageWire, NetworkEnvelope, PortsEnvelope, RoutersEnvelope, ServersPage, SubnetsEnvelope,
    VolumeEnvelope,
};
use crate::accounts::CloudsDiscovery;
use crate::cloud::{
    CloudApi, CloudFuture, ConnectError, Connector, ImageInfo, PortInfo, RouterInfo,
    ServerListing, SubnetInfo,
};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

fn http_client(timeout: Duration) -> Result<Client, OpenStackError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| OpenStackError::Client {
            message: err.to_string(),
        })
}

/// Opens authenticated sessions for accounts defined in `clouds.yaml`.
#[derive(Clone, Debug)]
pub struct OpenStackConnector {
    discovery: CloudsDiscovery,
    http: Client,
}

impl OpenStackConnector {
    /// Creates a connector reading profiles from `discovery`. Every API
    /// request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStackError::Client`] when the HTTP client cannot be
    /// built.
    pub fn new(discovery: CloudsDiscovery, timeout: Duration) -> Result<Self, OpenStackError> {
        Ok(Self {
            discovery,
            http: http_client(timeout)?,
        })
    }
}

impl Connector for OpenStackConnector {
    type Api = OpenStackClient;

    fn connect<'a>(
        &'a self,
        account: &'a str,
        domain_override: Option<&'a str>,
    ) -> CloudFuture<'a, Self::Api, ConnectError> {
        Box::pin(async move {
            let mut profile = self
                .discovery
                .profile(account)
                .map_err(|err| ConnectError::Profile {
                    account: account.to_owned(),
                    message: err.to_string(),
                })?;
            if let Some(domain) = domain_override {
                let auth = &mut profile.auth;
                auth.user_domain_id = None;
                auth.project_domain_id = None;
                auth.user_domain_name = Some(domain.to_owned());
                auth.project_domain_name = Some(domain.to_owned());
            }

            let session = auth::authenticate(&self.http, &profile)
                .await
                .map_err(|err| err.into_connect_error(account))?;
            info!(account, compute = %session.endpoints.compute, "connected");
            Ok(OpenStackClient {
                http: self.http.clone(),
                session,
            })
        })
    }
}

/// Authenticated session against one account.
#[derive(Clone, Debug)]
pub struct OpenStackClient {
    http: Client,
    session: Session,
}

impl OpenStackClient {
    fn endpoint<'a>(
        endpoint: Option<&'a str>,
        service: &str,
    ) -> Result<&'a str, OpenStackError> {
        endpoint.ok_or_else(|| OpenStackError::MissingEndpoint {
            service: service.to_owned(),
        })
    }

    /// GETs `url`; `Ok(None)` on 404.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, OpenStackError> {
        debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .query(query)
            .header(AUTH_TOKEN_HEADER, &self.session.token)
            .send()
            .await
            .map_err(|err| OpenStackError::Transport {
                url: url.to_owned(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OpenStackError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|err| OpenStackError::Decode {
                url: url.to_owned(),
                message: err.to_string(),
            })
    }

    /// GETs `url`, treating 404 as an error.
    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, OpenStackError> {
        self.get_optional(url, query)
            .await?
            .ok_or_else(|| OpenStackError::Status {
                url: url.to_owned(),
                status: StatusCode::NOT_FOUND.as_u16(),
                message: String::from("not found"),
            })
    }

    async fn fetch_servers(&self) -> Result<Vec<ServerListing>, OpenStackError> {
        let mut servers = Vec::new();
        let mut url = format!("{}/servers/detail", self.session.endpoints.compute);
        loop {
            let page: ServersPage = self.get(&url, &[]).await?;
            let next = page.next_href().map(str::to_owned);
            servers.extend(page.servers.into_iter().map(ServerListing::from));
            match next {
                Some(href) if href != url => url = href,
                _ => break,
            }
        }
        Ok(servers)
    }

    fn network_url(&self, path: &str) -> Result<String, OpenStackError> {
        let base = Self::endpoint(self.session.endpoints.network.as_deref(), "network")?;
        Ok(format!("{base}/{path}"))
    }
}

impl CloudApi for OpenStackClient {
    type Error = OpenStackError;

    fn list_servers(&self) -> CloudFuture<'_, Vec<ServerListing>, Self::Error> {
        Box::pin(self.fetch_servers())
    }

    fn image<'a>(&'a self, image_id: &'a str) -> CloudFuture<'a, Option<ImageInfo>, Self::Error> {
        Box::pin(async move {
            let base = Self::endpoint(self.session.endpoints.image.as_deref(), "image")?;
            let url = format!("{base}/images/{image_id}");
            let image: Option<ImageWire> = self.get_optional(&url, &[]).await?;
            Ok(image.map(ImageInfo::from))
        })
    }

    fn volume_image_id<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> CloudFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move {
            let base = Self::endpoint(self.session.endpoints.volume.as_deref(), "block-storage")?;
            let url = format!("{base}/volumes/{volume_id}");
            let volume: Option<VolumeEnvelope> = self.get_optional(&url, &[]).await?;
            Ok(volume.and_then(|volume| volume.image_id()))
        })
    }

    fn list_subnets(&self) -> CloudFuture<'_, Vec<SubnetInfo>, Self::Error> {
        Box::pin(async move {
            let url = self.network_url("subnets")?;
            let subnets: SubnetsEnvelope = self.get(&url, &[]).await?;
            Ok(subnets.into_subnets())
        })
    }

    fn network_subnets<'a>(
        &'a self,
        network_id: &'a str,
    ) -> CloudFuture<'a, Vec<String>, Self::Error> {
        Box::pin(async move {
            let url = self.network_url(&format!("networks/{network_id}"))?;
            let network: NetworkEnvelope = self.get(&url, &[]).await?;
            Ok(network.into_subnet_ids())
        })
    }

    fn list_routers(&self) -> CloudFuture<'_, Vec<RouterInfo>, Self::Error> {
        Box::pin(async move {
            let url = self.network_url("routers")?;
            let routers: RoutersEnvelope = self.get(&url, &[]).await?;
            Ok(routers.into_routers())
        })
    }

    fn router_ports<'a>(
        &'a self,
        router_id: &'a str,
    ) -> CloudFuture<'a, Vec<PortInfo>, Self::Error> {
        Box::pin(async move {
            let url = self.network_url("ports")?;
            let ports: PortsEnvelope = self.get(&url, &[("device_id", router_id)]).await?;
            Ok(ports.into_ports())
        })
    }
}
