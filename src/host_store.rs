//! Persistence of the generated host files under the SSH directory.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::sshcfg::{SshHost, parse_hosts, render_hosts, render_umbrella};

/// Extension of the per-account host files.
pub const HOST_FILE_EXTENSION: &str = "sshcfg";

/// Errors raised while reading or writing host files.
#[derive(Debug, Error)]
pub enum HostStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Reads and writes `<ssh_dir>/<account>.sshcfg` and the umbrella file.
#[derive(Clone, Debug)]
pub struct HostStore {
    ssh_dir: Utf8PathBuf,
}

impl HostStore {
    /// Creates a store rooted at `ssh_dir`.
    #[must_use]
    pub fn new(ssh_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            ssh_dir: ssh_dir.into(),
        }
    }

    /// Path of the host file for `account`.
    #[must_use]
    pub fn path_for(&self, account: &str) -> Utf8PathBuf {
        self.ssh_dir.join(file_name_for(account))
    }

    /// Loads the hosts previously written for `account`; an absent file
    /// yields no hosts.
    ///
    /// # Errors
    ///
    /// Returns [`HostStoreError::Io`] when the file exists but cannot be read.
    pub fn load(&self, account: &str) -> Result<Vec<SshHost>, HostStoreError> {
        let path = self.path_for(account);
        let dir = match Dir::open_ambient_dir(&self.ssh_dir, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&self.ssh_dir, &err)),
        };

        match dir.read_to_string(file_name_for(account)) {
            Ok(contents) => Ok(parse_hosts(&contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(io_error(&path, &err)),
        }
    }

    /// Overwrites the host file for `account`.
    ///
    /// # Errors
    ///
    /// Returns [`HostStoreError::Io`] when the directory or file cannot be
    /// written.
    pub fn save(&self, account: &str, hosts: &[SshHost]) -> Result<Utf8PathBuf, HostStoreError> {
        let path = self.path_for(account);
        self.write(&file_name_for(account), &path, render_hosts(account, hosts))?;
        Ok(path)
    }

    /// Writes the umbrella file `file_name` including each of `files`.
    ///
    /// # Errors
    ///
    /// Returns [`HostStoreError::Io`] when the file cannot be written.
    pub fn write_umbrella(
        &self,
        file_name: &str,
        files: &[Utf8PathBuf],
    ) -> Result<Utf8PathBuf, HostStoreError> {
        let path = self.ssh_dir.join(file_name);
        self.write(file_name, &path, render_umbrella(files))?;
        Ok(path)
    }

    fn write(
        &self,
        file_name: &str,
        path: &Utf8Path,
        contents: String,
    ) -> Result<(), HostStoreError> {
        Dir::create_ambient_dir_all(&self.ssh_dir, ambient_authority())
            .map_err(|err| io_error(&self.ssh_dir, &err))?;
        let dir = Dir::open_ambient_dir(&self.ssh_dir, ambient_authority())
            .map_err(|err| io_error(&self.ssh_dir, &err))?;
        dir.write(file_name, contents)
            .map_err(|err| io_error(path, &err))
    }
}

fn file_name_for(account: &str) -> String {
    format!("{account}.{HOST_FILE_EXTENSION}")
}

fn io_error(path: &Utf8Path, err: &io::Error) -> HostStoreError {
    HostStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
