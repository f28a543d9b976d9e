//! Command-line interface definitions for the `srv2ssh` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `srv2ssh` binary.
#[derive(Debug, Parser)]
#[command(
    name = "srv2ssh",
    version,
    about = "Write SSH client configuration for the machines of OpenStack accounts",
    long_about = "Write SSH client configuration for the machines of OpenStack accounts.\n\n\
        Each account's active machines are written to <ssh dir>/<account>.sshcfg as \
        `Host <account>-<machine>` blocks. Manual edits to those files are preserved. \
        Without ACCOUNT arguments the account named by OS_CLOUD is used.",
    after_help = "Exit status: 0 when hosts were written, 2 when none were, 1 on usage errors."
)]
pub(crate) struct Cli {
    /// Process every account found in clouds.yaml and write an umbrella file
    /// including all host files.
    #[arg(short = 'a', long, conflicts_with = "accounts")]
    pub(crate) all: bool,
    /// Report progress and print the resulting host blocks.
    #[arg(short = 'v', long)]
    pub(crate) verbose: bool,
    /// Report every decision taken while resolving addresses.
    #[arg(short = 'd', long)]
    pub(crate) debug: bool,
    /// Report errors only.
    #[arg(short = 'q', long)]
    pub(crate) quiet: bool,
    /// Accounts to process, as named in clouds.yaml.
    #[arg(value_name = "ACCOUNT")]
    pub(crate) accounts: Vec<String>,
}
