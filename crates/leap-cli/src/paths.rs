//! Credential-file locations.
//!
//! Pairing writes three PEM files per bridge; connect reads them back.
//! The default directory follows the XDG config convention.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// The directory holding credential files: an explicit override, or
/// `<XDG_CONFIG_HOME>/pylutron_caseta/`.
pub fn cert_dir(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    ProjectDirs::from("", "", "pylutron_caseta")
        .map(|dirs| dirs.config_dir().to_owned())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `<dir>/<host>-bridge.crt` — the bridge's CA certificate.
pub fn ca_path(dir: &Path, host: &str) -> PathBuf {
    dir.join(format!("{host}-bridge.crt"))
}

/// `<dir>/<host>.crt` — the client's signed certificate.
pub fn cert_path(dir: &Path, host: &str) -> PathBuf {
    dir.join(format!("{host}.crt"))
}

/// `<dir>/<host>.key` — the client's private key.
pub fn key_path(dir: &Path, host: &str) -> PathBuf {
    dir.join(format!("{host}.key"))
}
