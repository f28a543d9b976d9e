//! Diagnostic output via `tracing`.
//!
//! Diagnostics go to stderr so that `--verbose` output on stdout stays
//! clean. `RUST_LOG` overrides the level chosen on the command line.

use std::io;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// How chatty the binary should be.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Warnings and errors.
    #[default]
    Normal,
    /// Progress per account.
    Verbose,
    /// Everything, including topology and merge decisions.
    Debug,
}

impl Verbosity {
    /// Picks the verbosity from the CLI flags; `debug` wins over `verbose`,
    /// which wins over `quiet`.
    #[must_use]
    pub const fn from_flags(quiet: bool, verbose: bool, debug: bool) -> Self {
        if debug {
            Self::Debug
        } else if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    /// Maximum level emitted at this verbosity.
    #[must_use]
    pub const fn level(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::ERROR,
            Self::Normal => LevelFilter::WARN,
            Self::Verbose => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Installs the global subscriber. Calling it twice is harmless.
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.level().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}
