// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

/// Filesystem path of a Unix listening socket.
///
/// A temporary address owns its parent directory; the directory and the
/// socket inside it are removed when the last clone is dropped.
#[derive(Clone)]
pub struct SocketAddress {
    path: PathBuf,
    dir: Option<Arc<TempDir>>,
}

impl SocketAddress {
    /// Fresh `<tmp>/callcred-XXXXXX/<name>.sock`, unique per run.
    pub fn temporary(name: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("callcred-").tempdir()?;
        Ok(Self {
            path: dir.path().join(format!("{}.sock", name)),
            dir: Some(Arc::new(dir)),
        })
    }

    /// Address at a caller-managed path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dir: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `unix:<path>`
    pub fn uri(&self) -> String {
        format!("unix:{}", self.path.display())
    }

    /// Whether this address owns a temporary directory.
    pub fn is_temporary(&self) -> bool {
        self.dir.is_some()
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl fmt::Debug for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketAddress")
            .field("path", &self.path)
            .field("temporary", &self.is_temporary())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_addresses_are_unique_and_cleaned_up() {
        let first = SocketAddress::temporary("echo").unwrap();
        let second = SocketAddress::temporary("echo").unwrap();
        assert_ne!(first.path(), second.path());
        assert!(first.path().ends_with("echo.sock"));
        assert!(first.uri().starts_with("unix:"));

        let dir = first.path().parent().unwrap().to_path_buf();
        assert!(dir.exists());
        let clone = first.clone();
        drop(first);
        assert!(dir.exists());
        drop(clone);
        assert!(!dir.exists());
    }

    #[test]
    fn test_fixed_address_keeps_its_path() {
        let address = SocketAddress::at("/run/callcred/echo.sock");
        assert!(!address.is_temporary());
        assert_eq!(address.path(), Path::new("/run/callcred/echo.sock"));
        assert_eq!(address.to_string(), "unix:/run/callcred/echo.sock");
    }
}
