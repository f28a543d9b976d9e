//! Reader and writer for the generated SSH client configuration files.
//!
//! The parser understands just enough of `ssh_config(5)` to round-trip the
//! files this tool writes, including lines an operator added by hand: the
//! `Hostname`, `User`, `IdentityFile` and `ForwardAgent` directives are
//! typed, everything else inside a `Host` block is kept verbatim.

use std::fmt;

/// Marker that opens a host block. Only recognised at the start of a line.
pub const HOST_MARKER: &str = "Host ";

/// First banner line of every generated file.
pub const GENERATED_BANNER: &str = "# SSH config file written by srv2ssh";

const INDENT: &str = "  ";

/// One `Host` stanza.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SshHost {
    /// Host alias, unique within a file.
    pub alias: String,
    /// Address or DNS name to connect to. A block without one is kept so
    /// its other directives survive until an address is known.
    pub hostname: Option<String>,
    /// Login user.
    pub user: Option<String>,
    /// Private key file.
    pub identity_file: Option<String>,
    /// Whether to forward the authentication agent.
    pub forward_agent: bool,
    /// Other directives, verbatim and in file order, without indentation.
    pub misc: Vec<String>,
}

impl SshHost {
    /// Creates a stanza with only an alias and a hostname.
    #[must_use]
    pub fn new(alias: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            hostname: Some(hostname.into()),
            ..Self::default()
        }
    }

    /// Whether the stanza names a host to connect to.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.hostname.is_some()
    }
}

impl fmt::Display for SshHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{HOST_MARKER}{}", self.alias)?;
        if let Some(hostname) = &self.hostname {
            write!(f, "\n{INDENT}Hostname {hostname}")?;
        }
        if let Some(user) = &self.user {
            write!(f, "\n{INDENT}User {user}")?;
        }
        if let Some(identity_file) = &self.identity_file {
            write!(f, "\n{INDENT}IdentityFile {identity_file}")?;
        }
        if self.forward_agent {
            write!(f, "\n{INDENT}ForwardAgent yes")?;
        }
        for line in &self.misc {
            write!(f, "\n{INDENT}{line}")?;
        }
        Ok(())
    }
}

/// A host block whose end has not been seen yet.
#[derive(Debug, Default)]
struct PartialHost {
    alias: String,
    hostname: Option<String>,
    user: Option<String>,
    identity_file: Option<String>,
    forward_agent: bool,
    misc: Vec<String>,
}

impl PartialHost {
    fn open(alias: &str) -> Self {
        Self {
            alias: alias.trim().to_owned(),
            ..Self::default()
        }
    }

    fn apply(&mut self, line: &str) {
        let content = line.trim();
        if content.is_empty() {
            return;
        }
        let (keyword, value) = content
            .split_once(char::is_whitespace)
            .map_or((content, ""), |(keyword, rest)| (keyword, rest.trim()));
        let non_empty = || (!value.is_empty()).then(|| value.to_owned());

        match keyword.to_ascii_lowercase().as_str() {
            "hostname" => self.hostname = non_empty(),
            "user" => self.user = non_empty(),
            "identityfile" => self.identity_file = non_empty(),
            "forwardagent" => self.forward_agent = value.eq_ignore_ascii_case("yes"),
            _ => self.misc.push(content.to_owned()),
        }
    }

    /// Completes the block; blocks without an alias are dropped.
    fn finish(self) -> Option<SshHost> {
        if self.alias.is_empty() {
            return None;
        }
        Some(SshHost {
            alias: self.alias,
            hostname: self.hostname,
            user: self.user,
            identity_file: self.identity_file,
            forward_agent: self.forward_agent,
            misc: self.misc,
        })
    }
}

/// Parses every `Host` block in `text`.
///
/// Lines before the first block are ignored. Blocks lacking a `Hostname`
/// are returned with `hostname` unset.
#[must_use]
pub fn parse_hosts(text: &str) -> Vec<SshHost> {
    let mut hosts = Vec::new();
    let mut current: Option<PartialHost> = None;

    for line in text.lines() {
        if let Some(alias) = line.strip_prefix(HOST_MARKER) {
            hosts.extend(current.take().and_then(PartialHost::finish));
            current = Some(PartialHost::open(alias));
        } else if let Some(host) = current.as_mut() {
            host.apply(line);
        }
    }
    hosts.extend(current.and_then(PartialHost::finish));
    hosts
}

/// Renders the per-account file: banner, blank line, then each complete
/// stanza followed by a blank line. Stanzas without a hostname are skipped.
#[must_use]
pub fn render_hosts(account: &str, hosts: &[SshHost]) -> String {
    let mut out = format!("{GENERATED_BANNER}\n# Hosts from cloud {account}\n\n");
    for host in hosts.iter().filter(|host| host.is_complete()) {
        out.push_str(&host.to_string());
        out.push_str("\n\n");
    }
    out
}

/// Renders the umbrella file including every listed per-account file.
#[must_use]
pub fn render_umbrella<P: fmt::Display>(files: &[P]) -> String {
    let mut out = format!("{GENERATED_BANNER}\n# Includes the host files of all clouds\n");
    for file in files {
        out.push_str(&format!("Include {file}\n"));
    }
    out
}
