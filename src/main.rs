//! Binary entry point for the srv2ssh CLI.

use std::env;
use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use clap::error::ErrorKind;
use thiserror::Error;

use srv2ssh::{
    AccountsError, CloudsDiscovery, ConfigError, DEFAULT_ACCOUNT_ENV, HostStore,
    HttpMetadataProbe, KeyLocator, OpenStackConnector, OpenStackError, Reconciler, RunSummary,
    Srv2SshConfig, Verbosity, home_dir, logging, select_accounts,
};

mod cli;

use cli::Cli;

/// At least one host was written, or help was requested.
const EXIT_SUCCESS: i32 = 0;
/// Usage or configuration error.
const EXIT_USAGE: i32 = 1;
/// The run completed without writing any host.
const EXIT_NO_HOSTS: i32 = 2;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Accounts(#[from] AccountsError),
    #[error("cannot determine the current directory: {0}")]
    CurrentDir(String),
    #[error("{0}")]
    OpenStack(#[from] OpenStackError),
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            err.print().ok();
            process::exit(parse_failure_code(&err));
        }
    };

    let exit_code = match run(cli).await {
        Ok(summary) => exit_code(&summary),
        Err(err) => {
            report_error(&err);
            EXIT_USAGE
        }
    };
    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<RunSummary, CliError> {
    logging::init(Verbosity::from_flags(cli.quiet, cli.verbose, cli.debug));

    let config = Srv2SshConfig::load_without_cli_args()?;
    config.validate()?;
    let home = home_dir()?;
    let cwd = current_dir()?;

    let discovery = CloudsDiscovery::standard(&home, &cwd);
    let accounts = select_accounts(
        &cli.accounts,
        cli.all,
        env::var(DEFAULT_ACCOUNT_ENV).ok(),
        &discovery,
    )?;

    let store = HostStore::new(config.resolved_ssh_dir()?);
    let keys = KeyLocator::from_search_path(&config.key_search_path, &home, &cwd);
    let connector = OpenStackConnector::new(discovery, config.connect_timeout())?;
    let probe = HttpMetadataProbe::new(config.metadata_url.clone(), config.probe_timeout())?;
    let reconciler = Reconciler::new(connector, probe, store, keys)
        .with_default_domain(config.default_domain.clone());

    let umbrella = cli.all.then_some(config.umbrella_file.as_str());
    let summary = reconciler.reconcile_all(&accounts, umbrella).await;
    if cli.verbose {
        write_hosts(io::stdout(), &summary);
    }
    Ok(summary)
}

fn current_dir() -> Result<Utf8PathBuf, CliError> {
    let cwd = env::current_dir().map_err(|err| CliError::CurrentDir(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|path| CliError::CurrentDir(format!("{} is not UTF-8", path.display())))
}

fn parse_failure_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => EXIT_SUCCESS,
        _ => EXIT_USAGE,
    }
}

fn exit_code(summary: &RunSummary) -> i32 {
    if summary.total_written() > 0 {
        EXIT_SUCCESS
    } else {
        EXIT_NO_HOSTS
    }
}

fn write_hosts(mut target: impl Write, summary: &RunSummary) {
    for account in &summary.accounts {
        for host in &account.hosts {
            writeln!(target, "{host}\n").ok();
        }
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "srv2ssh: {err}").ok();
}
