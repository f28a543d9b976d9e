//! Account selection and discovery of `clouds.yaml` profiles.
//!
//! Accounts are the top-level keys of the `clouds` mapping in `clouds.yaml`,
//! looked up in the current directory, `~/.config/openstack` and
//! `/etc/openstack`, in that order. A `secure.yaml` next to a `clouds.yaml`
//! contributes secrets that are merged over the profile.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// File listing the configured clouds.
pub const CLOUDS_FILE: &str = "clouds.yaml";

/// Companion file holding secrets for the clouds.
pub const SECURE_FILE: &str = "secure.yaml";

/// Environment variable naming the default account.
pub const DEFAULT_ACCOUNT_ENV: &str = "OS_CLOUD";

const SYSTEM_CONFIG_DIR: &str = "/etc/openstack";

/// Errors raised while selecting accounts or loading their profiles.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AccountsError {
    /// Neither account names, `--all`, nor `OS_CLOUD` were given.
    #[error("no account given; pass account names, --all, or set {DEFAULT_ACCOUNT_ENV}")]
    NoAccountSelected,
    /// No `clouds.yaml` defines the account.
    #[error("account {account} is not defined in any {CLOUDS_FILE}")]
    UnknownAccount {
        /// Account name.
        account: String,
    },
    /// Raised when a file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a file is not valid YAML or has an unexpected shape.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Credentials and endpoint of one account, as written in `clouds.yaml`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct CloudProfile {
    /// Authentication settings.
    #[serde(default)]
    pub auth: AuthSettings,
    /// `password` (default) or `v3applicationcredential`.
    pub auth_type: Option<String>,
    /// Region used to pick catalog endpoints.
    pub region_name: Option<String>,
    /// Endpoint interface, `public` unless configured.
    pub interface: Option<String>,
}

/// The `auth` section of a profile.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct AuthSettings {
    /// Identity service URL.
    pub auth_url: Option<String>,
    /// User name for password authentication.
    pub username: Option<String>,
    /// Password for password authentication.
    pub password: Option<String>,
    /// Project to scope the token to, by name.
    pub project_name: Option<String>,
    /// Project to scope the token to, by ID.
    pub project_id: Option<String>,
    /// Domain of the user, by name.
    pub user_domain_name: Option<String>,
    /// Domain of the user, by ID.
    pub user_domain_id: Option<String>,
    /// Domain of the project, by name.
    pub project_domain_name: Option<String>,
    /// Domain of the project, by ID.
    pub project_domain_id: Option<String>,
    /// Fallback domain for both user and project.
    pub domain_name: Option<String>,
    /// Application credential ID.
    pub application_credential_id: Option<String>,
    /// Application credential secret.
    pub application_credential_secret: Option<String>,
}

/// Ordered set of directories searched for `clouds.yaml`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudsDiscovery {
    dirs: Vec<Utf8PathBuf>,
}

impl CloudsDiscovery {
    /// The standard locations: `cwd`, `<home>/.config/openstack`,
    /// `/etc/openstack`.
    #[must_use]
    pub fn standard(home: &Utf8Path, cwd: &Utf8Path) -> Self {
        Self::with_dirs(vec![
            cwd.to_path_buf(),
            home.join(".config").join("openstack"),
            Utf8PathBuf::from(SYSTEM_CONFIG_DIR),
        ])
    }

    /// Searches exactly `dirs`, in order.
    #[must_use]
    pub const fn with_dirs(dirs: Vec<Utf8PathBuf>) -> Self {
        Self { dirs }
    }

    /// Every account defined in any readable `clouds.yaml`, first occurrence
    /// first. Unparseable files are logged and skipped.
    #[must_use]
    pub fn account_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for dir in &self.dirs {
            let clouds = match read_clouds(dir, CLOUDS_FILE) {
                Ok(Some(clouds)) => clouds,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable clouds file");
                    continue;
                }
            };
            for name in clouds.keys().filter_map(Value::as_str) {
                if !names.iter().any(|known| known == name) {
                    names.push(name.to_owned());
                }
            }
        }
        debug!(accounts = ?names, "discovered accounts");
        names
    }

    /// Loads the profile of `account` from the first `clouds.yaml` defining
    /// it, with the matching `secure.yaml` entry merged on top.
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError::UnknownAccount`] when no file defines the
    /// account, or a read/parse error for the defining file.
    pub fn profile(&self, account: &str) -> Result<CloudProfile, AccountsError> {
        for dir in &self.dirs {
            let Some(clouds) = read_clouds(dir, CLOUDS_FILE)? else {
                continue;
            };
            let Some(entry) = clouds.get(account) else {
                continue;
            };
            let mut merged = entry.clone();
            if let Some(secure) = read_clouds(dir, SECURE_FILE)?
                && let Some(secret) = secure.get(account)
            {
                merge_values(&mut merged, secret);
            }
            return serde_yaml::from_value(merged).map_err(|err| AccountsError::Parse {
                path: dir.join(CLOUDS_FILE),
                message: err.to_string(),
            });
        }
        Err(AccountsError::UnknownAccount {
            account: account.to_owned(),
        })
    }
}

/// Resolves the accounts to process.
///
/// `--all` enumerates every discovered account; otherwise the explicit names
/// are used, falling back to the `OS_CLOUD` default.
///
/// # Errors
///
/// Returns [`AccountsError::NoAccountSelected`] when nothing selects an
/// account.
pub fn select_accounts(
    explicit: &[String],
    all: bool,
    env_default: Option<String>,
    discovery: &CloudsDiscovery,
) -> Result<Vec<String>, AccountsError> {
    if all {
        return Ok(discovery.account_names());
    }
    if !explicit.is_empty() {
        return Ok(explicit.to_vec());
    }
    env_default
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
        .map(|name| vec![name])
        .ok_or(AccountsError::NoAccountSelected)
}

/// Reads the `clouds` mapping of `<dir>/<file>`; `Ok(None)` when the file
/// does not exist.
fn read_clouds(dir: &Utf8Path, file: &str) -> Result<Option<Mapping>, AccountsError> {
    let path = dir.join(file);
    let contents = match Dir::open_ambient_dir(dir, ambient_authority())
        .and_then(|handle| handle.read_to_string(file))
    {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(AccountsError::Io {
                path,
                message: err.to_string(),
            });
        }
    };

    let document: Value = serde_yaml::from_str(&contents).map_err(|err| AccountsError::Parse {
        path: path.clone(),
        message: err.to_string(),
    })?;
    match document.get("clouds") {
        Some(Value::Mapping(clouds)) => Ok(Some(clouds.clone())),
        Some(_) => Err(AccountsError::Parse {
            path,
            message: String::from("`clouds` must be a mapping"),
        }),
        None => Ok(Some(Mapping::new())),
    }
}

/// Merges `overlay` into `base`, recursing into mappings.
fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct DirsFixture {
        _tmp: TempDir,
        first: Utf8PathBuf,
        second: Utf8PathBuf,
    }

    impl DirsFixture {
        fn discovery(&self) -> CloudsDiscovery {
            CloudsDiscovery::with_dirs(vec![
                self.first.clone(),
                self.second.clone(),
                self.first.join("absent"),
            ])
        }
    }

    #[fixture]
    fn dirs() -> DirsFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        let first = root.join("first");
        let second = root.join("second");
        for dir in [&first, &second] {
            std::fs::create_dir_all(dir).unwrap_or_else(|err| panic!("mkdir {dir}: {err}"));
        }
        DirsFixture {
            _tmp: tmp,
            first,
            second,
        }
    }

    fn write(dir: &Utf8Path, file: &str, contents: &str) {
        std::fs::write(dir.join(file), contents)
            .unwrap_or_else(|err| panic!("write {file}: {err}"));
    }

    #[rstest]
    fn account_names_merge_locations_without_duplicates(dirs: DirsFixture) {
        write(&dirs.first, CLOUDS_FILE, "clouds:\n  prod: {}\n  dev: {}\n");
        write(&dirs.second, CLOUDS_FILE, "clouds:\n  dev: {}\n  lab: {}\n");

        assert_eq!(
            dirs.discovery().account_names(),
            vec![String::from("prod"), String::from("dev"), String::from("lab")]
        );
    }

    #[rstest]
    fn broken_clouds_file_is_skipped(dirs: DirsFixture) {
        write(&dirs.first, CLOUDS_FILE, "clouds: [unclosed\n");
        write(&dirs.second, CLOUDS_FILE, "clouds:\n  lab: {}\n");

        assert_eq!(dirs.discovery().account_names(), vec![String::from("lab")]);
    }

    #[rstest]
    fn profile_merges_secure_yaml(dirs: DirsFixture) {
        write(
            &dirs.second,
            CLOUDS_FILE,
            concat!(
                "clouds:\n",
                "  prod:\n",
                "    region_name: RegionOne\n",
                "    auth:\n",
                "      auth_url: https://keystone.example.com:5000/v3\n",
                "      username: op\n",
                "      project_name: infra\n",
                "      user_domain_name: ops\n",
            ),
        );
        write(
            &dirs.second,
            SECURE_FILE,
            "clouds:\n  prod:\n    auth:\n      password: hunter2\n",
        );

        let profile = dirs
            .discovery()
            .profile("prod")
            .unwrap_or_else(|err| panic!("profile: {err}"));

        assert_eq!(profile.region_name.as_deref(), Some("RegionOne"));
        assert_eq!(profile.auth.username.as_deref(), Some("op"));
        assert_eq!(profile.auth.password.as_deref(), Some("hunter2"));
        assert_eq!(profile.auth.user_domain_name.as_deref(), Some("ops"));
    }

    #[rstest]
    fn unknown_profile_is_reported(dirs: DirsFixture) {
        write(&dirs.first, CLOUDS_FILE, "clouds:\n  dev: {}\n");

        assert_eq!(
            dirs.discovery().profile("prod"),
            Err(AccountsError::UnknownAccount {
                account: String::from("prod")
            })
        );
    }

    #[rstest]
    fn select_all_uses_discovery(dirs: DirsFixture) {
        write(&dirs.first, CLOUDS_FILE, "clouds:\n  dev: {}\n");

        let selected = select_accounts(&[], true, None, &dirs.discovery());

        assert_eq!(selected, Ok(vec![String::from("dev")]));
    }

    #[rstest]
    #[case(&["a", "b"], Some("env"), Ok(vec!["a", "b"]))]
    #[case(&[], Some("env"), Ok(vec!["env"]))]
    #[case(&[], Some("  "), Err(AccountsError::NoAccountSelected))]
    #[case(&[], None, Err(AccountsError::NoAccountSelected))]
    fn explicit_names_then_env_default(
        #[case] explicit: &[&str],
        #[case] env_default: Option<&str>,
        #[case] expected: Result<Vec<&str>, AccountsError>,
    ) {
        let names: Vec<String> = explicit.iter().map(|name| (*name).to_owned()).collect();
        let discovery = CloudsDiscovery::with_dirs(Vec::new());

        let selected = select_accounts(&names, false, env_default.map(str::to_owned), &discovery);

        let expected_owned =
            expected.map(|list| list.into_iter().map(str::to_owned).collect::<Vec<_>>());
        assert_eq!(selected, expected_owned);
    }
}
