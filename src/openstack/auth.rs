//! Keystone v3 authentication and service catalog lookup.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::OpenStackError;
use crate::accounts::{AuthSettings, CloudProfile};

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const DEFAULT_INTERFACE: &str = "public";
const APPLICATION_CREDENTIAL_AUTH: &str = "v3applicationcredential";

const COMPUTE_TYPES: &[&str] = &["compute"];
const IMAGE_TYPES: &[&str] = &["image"];
const NETWORK_TYPES: &[&str] = &["network"];
const VOLUME_TYPES: &[&str] = &["block-storage", "volumev3", "volume"];

/// Token and endpoints of an authenticated session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct Session {
    pub(super) token: String,
    pub(super) endpoints: Endpoints,
}

/// Endpoints picked from the catalog. Only compute is mandatory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(super) struct Endpoints {
    pub(super) compute: String,
    pub(super) image: Option<String>,
    pub(super) network: Option<String>,
    pub(super) volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    region_id: Option<String>,
    region: Option<String>,
    url: String,
}

/// Authenticates `profile` against Keystone and returns the scoped session.
pub(super) async fn authenticate(
    http: &Client,
    profile: &CloudProfile,
) -> Result<Session, OpenStackError> {
    let url = tokens_url(profile.auth.auth_url.as_deref())?;
    let body = request_body(profile)?;
    debug!(%url, "requesting token");

    let response = http
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|err| OpenStackError::Transport {
            url: url.clone(),
            message: err.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(OpenStackError::Status {
            url,
            status: status.as_u16(),
            message,
        });
    }

    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| OpenStackError::Decode {
            url: url.clone(),
            message: format!("missing {SUBJECT_TOKEN_HEADER} header"),
        })?;
    let parsed: TokenResponse = response.json().await.map_err(|err| OpenStackError::Decode {
        url: url.clone(),
        message: err.to_string(),
    })?;

    let interface = profile.interface.as_deref().unwrap_or(DEFAULT_INTERFACE);
    let endpoints = select_endpoints(
        &parsed.token.catalog,
        profile.region_name.as_deref(),
        interface,
    )?;
    Ok(Session { token, endpoints })
}

fn tokens_url(auth_url: Option<&str>) -> Result<String, OpenStackError> {
    let base = auth_url
        .map(|url| url.trim().trim_end_matches('/'))
        .filter(|url| !url.is_empty())
        .ok_or_else(|| OpenStackError::Profile {
            message: String::from("auth.auth_url is not set"),
        })?;
    if base.ends_with("/v3") {
        Ok(format!("{base}/auth/tokens"))
    } else {
        Ok(format!("{base}/v3/auth/tokens"))
    }
}

fn request_body(profile: &CloudProfile) -> Result<Value, OpenStackError> {
    let auth = &profile.auth;
    if profile.auth_type.as_deref() == Some(APPLICATION_CREDENTIAL_AUTH) {
        let (Some(id), Some(secret)) = (
            auth.application_credential_id.as_deref(),
            auth.application_credential_secret.as_deref(),
        ) else {
            return Err(missing("application_credential_id and application_credential_secret"));
        };
        return Ok(json!({
            "auth": {
                "identity": {
                    "methods": ["application_credential"],
                    "application_credential": {"id": id, "secret": secret}
                }
            }
        }));
    }

    let username = auth.username.as_deref().ok_or_else(|| missing("username"))?;
    let password = auth.password.as_deref().ok_or_else(|| missing("password"))?;
    let mut user = json!({"name": username, "password": password});
    if let Some(domain) = domain_ref(
        auth.user_domain_id.as_deref(),
        auth.user_domain_name.as_deref(),
        auth,
    ) {
        user["domain"] = domain;
    }

    let mut body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {"user": user}
            }
        }
    });
    if let Some(scope) = project_scope(auth) {
        body["auth"]["scope"] = scope;
    }
    Ok(body)
}

fn project_scope(auth: &AuthSettings) -> Option<Value> {
    if let Some(id) = auth.project_id.as_deref() {
        return Some(json!({"project": {"id": id}}));
    }
    let name = auth.project_name.as_deref()?;
    let mut project = json!({"name": name});
    if let Some(domain) = domain_ref(
        auth.project_domain_id.as_deref(),
        auth.project_domain_name.as_deref(),
        auth,
    ) {
        project["domain"] = domain;
    }
    Some(json!({"project": project}))
}

fn domain_ref(id: Option<&str>, name: Option<&str>, auth: &AuthSettings) -> Option<Value> {
    if let Some(domain_id) = id {
        return Some(json!({"id": domain_id}));
    }
    name.or(auth.domain_name.as_deref())
        .map(|domain_name| json!({"name": domain_name}))
}

fn missing(field: &str) -> OpenStackError {
    OpenStackError::Profile {
        message: format!("auth.{field} is not set"),
    }
}

fn select_endpoints(
    catalog: &[CatalogEntry],
    region: Option<&str>,
    interface: &str,
) -> Result<Endpoints, OpenStackError> {
    let find = |types: &[&str]| find_endpoint(catalog, types, region, interface);
    let compute = find(COMPUTE_TYPES).ok_or_else(|| OpenStackError::MissingEndpoint {
        service: String::from("compute"),
    })?;
    Ok(Endpoints {
        compute,
        image: find(IMAGE_TYPES).map(|url| versioned(&url, "v2")),
        network: find(NETWORK_TYPES).map(|url| versioned(&url, "v2.0")),
        volume: find(VOLUME_TYPES),
    })
}

/// First endpoint of the first matching service type, in preference order.
fn find_endpoint(
    catalog: &[CatalogEntry],
    types: &[&str],
    region: Option<&str>,
    interface: &str,
) -> Option<String> {
    types.iter().find_map(|wanted| {
        catalog
            .iter()
            .filter(|entry| entry.service_type == *wanted)
            .flat_map(|entry| entry.endpoints.iter())
            .find(|endpoint| {
                endpoint.interface == interface
                    && region.is_none_or(|wanted_region| {
                        endpoint.region_id.as_deref() == Some(wanted_region)
                            || endpoint.region.as_deref() == Some(wanted_region)
                    })
            })
            .map(|endpoint| endpoint.url.trim_end_matches('/').to_owned())
    })
}

/// Appends the API version segment unless the catalog URL already has it.
fn versioned(url: &str, version: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with(&format!("/{version}")) {
        trimmed.to_owned()
    } else {
        format!("{trimmed}/{version}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn profile(auth: AuthSettings) -> CloudProfile {
        CloudProfile {
            auth,
            ..CloudProfile::default()
        }
    }

    fn password_auth() -> AuthSettings {
        AuthSettings {
            auth_url: Some(String::from("https://keystone.example.com:5000")),
            username: Some(String::from("op")),
            password: Some(String::from("secret")),
            project_name: Some(String::from("infra")),
            user_domain_name: Some(String::from("ops")),
            ..AuthSettings::default()
        }
    }

    #[rstest]
    #[case("https://keystone:5000", "https://keystone:5000/v3/auth/tokens")]
    #[case("https://keystone:5000/v3/", "https://keystone:5000/v3/auth/tokens")]
    fn tokens_url_adds_version_once(#[case] auth_url: &str, #[case] expected: &str) {
        assert_eq!(tokens_url(Some(auth_url)), Ok(String::from(expected)));
    }

    #[test]
    fn tokens_url_requires_auth_url() {
        assert!(matches!(
            tokens_url(Some("  ")),
            Err(OpenStackError::Profile { .. })
        ));
    }

    #[test]
    fn password_body_scopes_project_with_domain_fallback() {
        let mut auth = password_auth();
        auth.domain_name = Some(String::from("shared"));

        let body = request_body(&profile(auth)).unwrap_or_else(|err| panic!("body: {err}"));

        let user = &body["auth"]["identity"]["password"]["user"];
        assert_eq!(user["name"], "op");
        assert_eq!(user["domain"]["name"], "ops");
        let project = &body["auth"]["scope"]["project"];
        assert_eq!(project["name"], "infra");
        assert_eq!(project["domain"]["name"], "shared");
    }

    #[test]
    fn application_credential_body_has_no_scope() {
        let profile = CloudProfile {
            auth_type: Some(String::from(APPLICATION_CREDENTIAL_AUTH)),
            auth: AuthSettings {
                application_credential_id: Some(String::from("cred")),
                application_credential_secret: Some(String::from("s3cret")),
                ..AuthSettings::default()
            },
            ..CloudProfile::default()
        };

        let body = request_body(&profile).unwrap_or_else(|err| panic!("body: {err}"));

        assert_eq!(body["auth"]["identity"]["methods"][0], "application_credential");
        assert!(body["auth"].get("scope").is_none());
    }

    #[test]
    fn password_body_requires_username() {
        let mut auth = password_auth();
        auth.username = None;

        assert_eq!(
            request_body(&profile(auth)),
            Err(OpenStackError::Profile {
                message: String::from("auth.username is not set")
            })
        );
    }

    fn catalog() -> Vec<CatalogEntry> {
        let json = r#"[
            {"type": "compute", "endpoints": [
                {"interface": "internal", "region_id": "r1", "url": "http://nova-int/v2.1"},
                {"interface": "public", "region_id": "r2", "url": "https://nova-r2/v2.1"},
                {"interface": "public", "region_id": "r1", "url": "https://nova-r1/v2.1/"}
            ]},
            {"type": "network", "endpoints": [
                {"interface": "public", "region_id": "r1", "url": "https://neutron-r1"}
            ]},
            {"type": "volumev3", "endpoints": [
                {"interface": "public", "region": "r1", "url": "https://cinder-r1/v3/p"}
            ]},
            {"type": "image", "endpoints": [
                {"interface": "public", "region_id": "r1", "url": "https://glance-r1/v2"}
            ]}
        ]"#;
        serde_json::from_str(json).unwrap_or_else(|err| panic!("catalog: {err}"))
    }

    #[test]
    fn endpoints_match_region_and_interface() {
        let endpoints = select_endpoints(&catalog(), Some("r1"), "public")
            .unwrap_or_else(|err| panic!("{err}"));

        assert_eq!(
            endpoints,
            Endpoints {
                compute: String::from("https://nova-r1/v2.1"),
                image: Some(String::from("https://glance-r1/v2")),
                network: Some(String::from("https://neutron-r1/v2.0")),
                volume: Some(String::from("https://cinder-r1/v3/p")),
            }
        );
    }

    #[test]
    fn missing_compute_endpoint_is_an_error() {
        let result = select_endpoints(&catalog(), Some("r9"), "public");

        assert_eq!(
            result,
            Err(OpenStackError::MissingEndpoint {
                service: String::from("compute")
            })
        );
    }
}
