//! Machine records assembled from the compute listing.
//!
//! Records are built in stages, each stage a separate type:
//! [`ServerListing`] (raw, any status) → [`MachineSummary`] (active only,
//! image reference classified) → [`MachineRecord`] (image and login user
//! resolved). Nothing is mutated after construction.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::cloud::{ACTIVE_STATUS, CloudApi, ImageInfo, ServerListing};
use crate::resolve::AddressBook;

/// Image property naming the default login user of an image.
pub const ORIGINAL_USER_PROPERTY: &str = "image_original_user";

/// Where the image of a machine can be found.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageRef {
    /// The machine was booted from this image.
    Direct(String),
    /// The machine was booted from this volume; its metadata names the image.
    BootVolume(String),
    /// No image information is available.
    Unknown,
}

/// An active machine before its image has been looked up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineSummary {
    /// Provider identifier.
    pub id: String,
    /// Display name, unique among the account's active machines.
    pub name: String,
    /// Addresses per network.
    pub addresses: AddressBook,
    /// Key pair registered for the machine.
    pub key_name: Option<String>,
    /// Flavor name.
    pub flavor_name: Option<String>,
    /// Image reference.
    pub image: ImageRef,
}

impl MachineSummary {
    /// Builds a summary from a listing entry; `None` unless the machine is
    /// active.
    #[must_use]
    pub fn from_listing(listing: ServerListing) -> Option<Self> {
        if listing.status != ACTIVE_STATUS {
            return None;
        }
        let image = match (listing.image_id, listing.volume_ids.into_iter().next()) {
            (Some(id), _) => ImageRef::Direct(id),
            (None, Some(volume)) => ImageRef::BootVolume(volume),
            (None, None) => ImageRef::Unknown,
        };
        Some(Self {
            id: listing.id,
            name: listing.name,
            addresses: listing.addresses,
            key_name: listing.key_name,
            flavor_name: listing.flavor_name,
            image,
        })
    }
}

/// A fully assembled active machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineRecord {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Addresses per network.
    pub addresses: AddressBook,
    /// Key pair registered for the machine.
    pub key_name: Option<String>,
    /// Flavor name.
    pub flavor_name: Option<String>,
    /// Image the machine runs, when known.
    pub image_id: Option<String>,
    /// Login user inferred from the image, when known.
    pub login_user: Option<String>,
}

impl MachineRecord {
    /// Completes a summary with its resolved image and login user.
    #[must_use]
    pub fn from_summary(
        summary: MachineSummary,
        image_id: Option<String>,
        login_user: Option<String>,
    ) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            addresses: summary.addresses,
            key_name: summary.key_name,
            flavor_name: summary.flavor_name,
            image_id,
            login_user,
        }
    }
}

/// Guesses the login user of an image.
///
/// Uses the `image_original_user` property when set. Otherwise this is a
/// best-effort guess that only recognises Ubuntu images by name or
/// `os_distro`.
#[must_use]
pub fn infer_login_user(image: &ImageInfo) -> Option<String> {
    if let Some(user) = image
        .original_user
        .as_deref()
        .map(str::trim)
        .filter(|user| !user.is_empty())
    {
        return Some(user.to_owned());
    }

    let is_ubuntu = |value: &str| value.to_ascii_lowercase().starts_with("ubuntu");
    if is_ubuntu(image.name.as_str()) || image.os_distro.as_deref().is_some_and(is_ubuntu) {
        return Some(String::from("ubuntu"));
    }
    None
}

/// Lists the account's active machines and resolves their images and login
/// users.
///
/// Image lookups are cached by image ID. Failed lookups leave the image or
/// login user unset.
///
/// # Errors
///
/// Returns the provider error when the server listing itself fails.
pub async fn collect_machines<C>(api: &C) -> Result<Vec<MachineRecord>, C::Error>
where
    C: CloudApi + ?Sized,
{
    let summaries: Vec<_> = api
        .list_servers()
        .await?
        .into_iter()
        .filter_map(MachineSummary::from_listing)
        .collect();

    let mut users: HashMap<String, Option<String>> = HashMap::new();
    let mut machines = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let image_id = image_id_of(api, &summary).await;
        let login_user = match &image_id {
            Some(id) => {
                if let Some(cached) = users.get(id) {
                    cached.clone()
                } else {
                    let user = login_user_of(api, id).await;
                    users.insert(id.clone(), user.clone());
                    user
                }
            }
            None => None,
        };
        machines.push(MachineRecord::from_summary(summary, image_id, login_user));
    }
    Ok(machines)
}

async fn image_id_of<C: CloudApi + ?Sized>(api: &C, summary: &MachineSummary) -> Option<String> {
    match &summary.image {
        ImageRef::Direct(id) => Some(id.clone()),
        ImageRef::BootVolume(volume_id) => match api.volume_image_id(volume_id).await {
            Ok(image_id) => image_id,
            Err(err) => {
                warn!(
                    machine = %summary.name,
                    %volume_id,
                    error = %err,
                    "could not read boot volume"
                );
                None
            }
        },
        ImageRef::Unknown => None,
    }
}

async fn login_user_of<C: CloudApi + ?Sized>(api: &C, image_id: &str) -> Option<String> {
    match api.image(image_id).await {
        Ok(Some(image)) => infer_login_user(&image),
        Ok(None) => {
            debug!(%image_id, "image not found");
            None
        }
        Err(err) => {
            warn!(%image_id, error = %err, "image lookup failed");
            None
        }
    }
}
