//! etcd client credentials pushed into every Redis member
//!
//! The material is read once at startup from files named by environment
//! variables and then handed to the controller as an explicit value.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::info;

use crate::Error;

/// Environment variable naming the client certificate file
pub const ENV_CERT_PATH: &str = "ETCD_PATH_CERT";
/// Environment variable naming the client key file
pub const ENV_KEY_PATH: &str = "ETCD_PATH_KEY";
/// Environment variable naming the CA bundle file
pub const ENV_CA_PATH: &str = "ETCD_PATH_CACERT";

/// Script inside the Redis image that stores the credentials
pub const INSTALL_SCRIPT: &str = "/usr/bin/etcd-save-crt.sh";

/// Certificate, key and CA bundle for the members' etcd client
#[derive(Clone, PartialEq, Eq)]
pub struct EtcdCredentials {
    cert: String,
    key: String,
    ca: String,
}

impl std::fmt::Debug for EtcdCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdCredentials")
            .field("cert_len", &self.cert.len())
            .field("key", &"<redacted>")
            .field("ca_len", &self.ca.len())
            .finish()
    }
}

impl EtcdCredentials {
    /// Build credentials from in-memory PEM material
    pub fn new(cert: impl Into<String>, key: impl Into<String>, ca: impl Into<String>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
            ca: ca.into(),
        }
    }

    /// Load credentials from the files named by `ETCD_PATH_CERT`,
    /// `ETCD_PATH_KEY` and `ETCD_PATH_CACERT`
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load credentials using an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let cert_path = required_path(&lookup, ENV_CERT_PATH)?;
        let key_path = required_path(&lookup, ENV_KEY_PATH)?;
        let ca_path = required_path(&lookup, ENV_CA_PATH)?;

        Self::from_files(&cert_path, &key_path, &ca_path)
    }

    /// Load credentials from explicit file paths
    pub fn from_files(cert: &Path, key: &Path, ca: &Path) -> Result<Self, Error> {
        let creds = Self {
            cert: read_file(cert)?,
            key: read_file(key)?,
            ca: read_file(ca)?,
        };
        info!(
            cert = %cert.display(),
            ca = %ca.display(),
            "loaded etcd client credentials"
        );
        Ok(creds)
    }

    /// Command line that installs these credentials inside a member
    ///
    /// The script takes the certificate, key and CA bundle as positional
    /// standard-base64 arguments, in that order.
    pub fn install_command(&self) -> Vec<String> {
        vec![
            INSTALL_SCRIPT.to_string(),
            STANDARD.encode(self.cert.as_bytes()),
            STANDARD.encode(self.key.as_bytes()),
            STANDARD.encode(self.ca.as_bytes()),
        ]
    }
}

fn required_path(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<PathBuf, Error> {
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(PathBuf::from(value)),
        _ => Err(Error::config(format!("{name} must be set to a file path"))),
    }
}

fn read_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))
}
