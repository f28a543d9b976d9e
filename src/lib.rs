//! Core library for the srv2ssh inventory tool.
//!
//! The crate turns the active machines of OpenStack accounts into SSH client
//! configuration. For each machine it picks the address reachable from where
//! the tool runs, using the caller's own network attachments and the routers
//! connected to them, and merges the result into per-account host files
//! without disturbing manual edits.

pub mod accounts;
pub mod cloud;
pub mod config;
pub mod host_store;
pub mod keyfile;
pub mod logging;
pub mod machine;
pub mod openstack;
pub mod reconcile;
pub mod resolve;
pub mod sshcfg;
pub mod test_support;
pub mod topology;

pub use accounts::{
    AccountsError, AuthSettings, CloudProfile, CloudsDiscovery, DEFAULT_ACCOUNT_ENV,
    select_accounts,
};
pub use cloud::{
    CloudApi, ConnectError, Connector, ImageInfo, MetadataProbe, PortInfo, ProbeOutcome,
    RouterInfo, ServerListing, SubnetInfo,
};
pub use config::{ConfigError, Srv2SshConfig, home_dir};
pub use host_store::{HostStore, HostStoreError};
pub use keyfile::KeyLocator;
pub use logging::Verbosity;
pub use machine::{MachineRecord, collect_machines, infer_login_user};
pub use openstack::{HttpMetadataProbe, OpenStackClient, OpenStackConnector, OpenStackError};
pub use reconcile::{
    AccountSummary, ReconcileError, Reconciler, ResolvedMachine, RunSummary, merge_hosts,
};
pub use resolve::{AddressBook, AddressKind, Cidr, CidrError, MachineAddress, resolve};
pub use sshcfg::{SshHost, parse_hosts, render_hosts};
pub use topology::{ProbeStatus, Router, TopologySnapshot};
