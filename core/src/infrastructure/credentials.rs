//! Credential bundles on the local filesystem.
//!
//! Each api user has one bundle file, `<bundle_dir>/<username>.config.yaml`,
//! written by the agent when the user is created. Ownership is handed to the
//! configured account with `chown(2)` once the user is fully provisioned.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::CredentialStore;
use crate::types::user::UsersConfig;

pub struct FsCredentialStore {
    config: UsersConfig,
}

impl FsCredentialStore {
    pub fn new(config: UsersConfig) -> Self {
        FsCredentialStore { config }
    }
}

/// Bundle file name for a user.
pub fn bundle_file_name(username: &str) -> String {
    format!("{}.config.yaml", username)
}

fn lookup_uid(name: &str) -> Result<libc::uid_t, String> {
    let c_name = CString::new(name).map_err(|_| format!("invalid account name {:?}", name))?;
    let entry = unsafe { libc::getpwnam(c_name.as_ptr()) };
    if entry.is_null() {
        return Err(format!("unknown account '{}'", name));
    }
    Ok(unsafe { (*entry).pw_uid })
}

fn lookup_gid(name: &str) -> Result<libc::gid_t, String> {
    let c_name = CString::new(name).map_err(|_| format!("invalid group name {:?}", name))?;
    let entry = unsafe { libc::getgrnam(c_name.as_ptr()) };
    if entry.is_null() {
        return Err(format!("unknown group '{}'", name));
    }
    Ok(unsafe { (*entry).gr_gid })
}

fn chown(path: &Path, uid: libc::uid_t, gid: libc::gid_t) -> Result<(), String> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| format!("invalid path {}", path.display()))?;
    let ret = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if ret != 0 {
        return Err(format!(
            "chown {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

impl CredentialStore for FsCredentialStore {
    fn bundle_path(&self, username: &str) -> PathBuf {
        self.config.bundle_dir.join(bundle_file_name(username))
    }

    fn bundle_exists(&self, username: &str) -> bool {
        self.bundle_path(username).is_file()
    }

    fn remove_stale(&mut self, username: &str) -> Result<Vec<PathBuf>, String> {
        let path = self.bundle_path(username);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(user = %username, path = %path.display(), "removed stale credential bundle");
                Ok(vec![path])
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(format!("remove {}: {}", path.display(), e)),
        }
    }

    fn fix_ownership(&mut self, paths: &[PathBuf]) -> Result<(), String> {
        let uid = lookup_uid(&self.config.owner)?;
        let gid = lookup_gid(self.config.group())?;
        for path in paths {
            chown(path, uid, gid)?;
            debug!(path = %path.display(), owner = %self.config.owner, "ownership reassigned");
        }
        Ok(())
    }
}
