//! Brings each account's host file in line with the machines it runs.
//!
//! Per account the reconciler loads the previous host file, connects,
//! collects active machines, builds the topology snapshot once, resolves an
//! address per machine and merges the result into the existing hosts. Hand
//! edits survive: only `Hostname` is refreshed, `User` and `IdentityFile`
//! are filled in when missing, and unknown directives are kept verbatim.

use std::net::Ipv4Addr;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cloud::{ConnectError, Connector, MetadataProbe};
use crate::host_store::{HostStore, HostStoreError};
use crate::keyfile::KeyLocator;
use crate::machine::{MachineRecord, collect_machines};
use crate::resolve::resolve;
use crate::sshcfg::SshHost;
use crate::topology::TopologySnapshot;

/// Domain tried when an account's own domain settings are rejected.
pub const DEFAULT_DOMAIN: &str = "Default";

/// Errors that abort the reconciliation of one account.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The existing host file could not be read.
    #[error("failed to load existing hosts: {0}")]
    Load(#[source] HostStoreError),
    /// No session could be opened.
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// The compute listing failed.
    #[error("failed to list machines of account {account}: {message}")]
    Listing {
        /// Account name.
        account: String,
        /// Provider error message.
        message: String,
    },
    /// The host file could not be written.
    #[error("failed to write host file: {0}")]
    Save(#[source] HostStoreError),
}

/// Result of reconciling one account.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountSummary {
    /// Account name.
    pub account: String,
    /// Hosts now on record for the account.
    pub hosts: Vec<SshHost>,
    /// Host file written, if any.
    pub path: Option<Utf8PathBuf>,
}

impl AccountSummary {
    /// Number of hosts written to disk.
    #[must_use]
    pub fn written(&self) -> usize {
        if self.path.is_some() {
            self.hosts.len()
        } else {
            0
        }
    }
}

/// Aggregate result of a run over several accounts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// Accounts that completed, in processing order.
    pub accounts: Vec<AccountSummary>,
    /// Accounts that were aborted.
    pub failed: Vec<String>,
    /// Umbrella file written, if any.
    pub umbrella: Option<Utf8PathBuf>,
}

impl RunSummary {
    /// Hosts written over all accounts.
    #[must_use]
    pub fn total_written(&self) -> usize {
        self.accounts.iter().map(AccountSummary::written).sum()
    }
}

/// A machine with the address chosen for it, if any.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedMachine {
    /// The machine.
    pub machine: MachineRecord,
    /// Address to connect to.
    pub address: Option<Ipv4Addr>,
}

/// Merges the machines of `account` into its existing hosts.
///
/// Existing hosts keep their position; new hosts are appended in machine
/// order. A host is only created when an address was resolved; an existing
/// host without a hostname gets one as soon as an address resolves. Hosts
/// whose alias does not name an active machine are dropped.
pub fn merge_hosts<F>(
    account: &str,
    existing: Vec<SshHost>,
    machines: &[ResolvedMachine],
    find_key: F,
) -> Vec<SshHost>
where
    F: Fn(&str) -> Option<Utf8PathBuf>,
{
    let prefix = format!("{account}-");
    let mut hosts = existing;

    for resolved in machines {
        let machine = &resolved.machine;
        let alias = format!("{prefix}{}", machine.name);
        let index = match hosts.iter().position(|host| host.alias == alias) {
            Some(index) => index,
            None => {
                let Some(address) = resolved.address else {
                    debug!(%alias, "no reachable address, not adding");
                    continue;
                };
                hosts.push(SshHost::new(alias.clone(), address.to_string()));
                hosts.len() - 1
            }
        };
        let Some(host) = hosts.get_mut(index) else {
            continue;
        };

        if let Some(address) = resolved.address {
            host.hostname = Some(address.to_string());
        } else {
            debug!(
                %alias,
                hostname = ?host.hostname,
                "no reachable address, keeping hostname"
            );
        }
        if host.user.is_none() {
            host.user.clone_from(&machine.login_user);
        }
        if host.identity_file.is_none()
            && let Some(key_name) = machine.key_name.as_deref()
        {
            host.identity_file = find_key(key_name).map(|path| path.to_string());
            if host.identity_file.is_none() {
                debug!(%alias, key_name, "key file not found");
            }
        }
    }

    hosts.retain(|host| {
        let keep = host
            .alias
            .strip_prefix(prefix.as_str())
            .is_some_and(|name| machines.iter().any(|resolved| resolved.machine.name == name));
        if !keep {
            info!(alias = %host.alias, "removing host without active machine");
        }
        keep
    });
    hosts
}

/// Reconciles accounts against their host files.
#[derive(Debug)]
pub struct Reconciler<K, P> {
    connector: K,
    probe: P,
    store: HostStore,
    keys: KeyLocator,
    default_domain: String,
}

impl<K, P> Reconciler<K, P>
where
    K: Connector,
    P: MetadataProbe,
{
    /// Creates a reconciler retrying rejected logins with [`DEFAULT_DOMAIN`].
    #[must_use]
    pub fn new(connector: K, probe: P, store: HostStore, keys: KeyLocator) -> Self {
        Self {
            connector,
            probe,
            store,
            keys,
            default_domain: DEFAULT_DOMAIN.to_owned(),
        }
    }

    /// Overrides the domain used for the login retry.
    #[must_use]
    pub fn with_default_domain(mut self, domain: impl Into<String>) -> Self {
        self.default_domain = domain.into();
        self
    }

    async fn connect(&self, account: &str) -> Result<K::Api, ConnectError> {
        match self.connector.connect(account, None).await {
            Err(ConnectError::Unauthorized { message, .. }) => {
                info!(
                    account,
                    %message,
                    domain = %self.default_domain,
                    "login rejected, retrying with default domain"
                );
                self.connector
                    .connect(account, Some(self.default_domain.as_str()))
                    .await
            }
            other => other,
        }
    }

    /// Reconciles one account.
    ///
    /// Hosts still lacking a hostname after the merge are not written. When
    /// no host remains the existing file is left untouched and the summary
    /// reports no path.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the existing file cannot be read, the
    /// account cannot be reached or listed, or the new file cannot be
    /// written.
    pub async fn reconcile(&self, account: &str) -> Result<AccountSummary, ReconcileError> {
        let existing = self.store.load(account).map_err(ReconcileError::Load)?;
        let api = self.connect(account).await?;
        let machines = collect_machines(&api)
            .await
            .map_err(|err| ReconcileError::Listing {
                account: account.to_owned(),
                message: err.to_string(),
            })?;
        let snapshot = TopologySnapshot::build(&self.probe, &api).await;
        debug!(account, machines = machines.len(), "collected machines");

        let resolved: Vec<ResolvedMachine> = machines
            .into_iter()
            .map(|machine| {
                let address = resolve(&machine.addresses, &snapshot);
                if address.is_none() {
                    warn!(account, machine = %machine.name, "no usable address");
                }
                ResolvedMachine { machine, address }
            })
            .collect();
        let (hosts, pending): (Vec<SshHost>, Vec<SshHost>) =
            merge_hosts(account, existing, &resolved, |key| self.keys.find(key))
                .into_iter()
                .partition(SshHost::is_complete);
        for host in &pending {
            warn!(account, alias = %host.alias, "host has no hostname, not writing it");
        }

        if hosts.is_empty() {
            info!(account, "no hosts, leaving host file untouched");
            return Ok(AccountSummary {
                account: account.to_owned(),
                hosts,
                path: None,
            });
        }
        let path = self
            .store
            .save(account, &hosts)
            .map_err(ReconcileError::Save)?;
        info!(account, hosts = hosts.len(), %path, "wrote host file");
        Ok(AccountSummary {
            account: account.to_owned(),
            hosts,
            path: Some(path),
        })
    }

    /// Reconciles `accounts` one after the other. A failing account is
    /// logged and does not stop the others.
    ///
    /// With `umbrella` set and at least one host file written, also writes
    /// an umbrella file of that name including every written host file.
    pub async fn reconcile_all(&self, accounts: &[String], umbrella: Option<&str>) -> RunSummary {
        let mut summary = RunSummary::default();
        for account in accounts {
            match self.reconcile(account).await {
                Ok(result) => summary.accounts.push(result),
                Err(err) => {
                    error!(%account, error = %err, "skipping account");
                    summary.failed.push(account.clone());
                }
            }
        }

        if let Some(file_name) = umbrella {
            let files: Vec<Utf8PathBuf> = summary
                .accounts
                .iter()
                .filter(|account| account.written() > 0)
                .filter_map(|account| account.path.clone())
                .collect();
            if files.is_empty() {
                debug!("no host files written, skipping umbrella file");
            } else {
                match self.store.write_umbrella(file_name, &files) {
                    Ok(path) => {
                        info!(%path, includes = files.len(), "wrote umbrella file");
                        summary.umbrella = Some(path);
                    }
                    Err(err) => error!(error = %err, "failed to write umbrella file"),
                }
            }
        }
        summary
    }
}
