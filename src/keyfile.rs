//! Locates private key files for key pairs registered on the cloud.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

/// Directories searched when none are configured.
pub const DEFAULT_SEARCH_PATH: &str = "~/.ssh:~:.";

/// Extension of the key files written when a key pair is created.
pub const KEY_FILE_EXTENSION: &str = "pem";

/// Searches an ordered list of directories for `<key pair>.pem`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyLocator {
    dirs: Vec<Utf8PathBuf>,
}

impl KeyLocator {
    /// Builds a locator from a colon-separated search path.
    ///
    /// `~` expands to `home`; relative entries are taken relative to `cwd`.
    #[must_use]
    pub fn from_search_path(search_path: &str, home: &Utf8Path, cwd: &Utf8Path) -> Self {
        let expanded = search_path.replace('~', home.as_str());
        let dirs = expanded
            .split(':')
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let path = Utf8Path::new(entry);
                if path.is_absolute() {
                    path.to_path_buf()
                } else if entry == "." {
                    cwd.to_path_buf()
                } else {
                    cwd.join(entry.trim_end_matches("/."))
                }
            })
            .collect();
        Self { dirs }
    }

    /// Directories in search order.
    #[must_use]
    pub fn dirs(&self) -> &[Utf8PathBuf] {
        &self.dirs
    }

    /// Returns the first readable key file for `key_name`.
    #[must_use]
    pub fn find(&self, key_name: &str) -> Option<Utf8PathBuf> {
        let file_name = format!("{key_name}.{KEY_FILE_EXTENSION}");
        self.dirs.iter().find_map(|dir| {
            let handle = Dir::open_ambient_dir(dir, ambient_authority()).ok()?;
            handle.open(&file_name).ok()?;
            Some(dir.join(&file_name))
        })
    }
}
