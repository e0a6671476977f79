use std::path::Path;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Client-side TLS for the gRPC channels
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TlsConfig {
    /// Default: false
    #[serde(default)]
    pub enable_tls: bool,

    /// CA certificate used to verify the server, PEM
    /// Default: "/etc/ssl/certs/ca.pem"
    #[serde(default = "default_ca_path")]
    pub certificate_authority_root_path: String,

    /// Name checked against the server certificate; empty uses the endpoint host
    #[serde(default)]
    pub domain_name: String,

    /// Present a client certificate (mTLS)
    /// Default: false
    #[serde(default)]
    pub enable_mtls: bool,

    /// Default: "./certs/client.pem"
    #[serde(default = "default_client_cert_path")]
    pub client_certificate_path: String,

    /// Default: "./certs/client.key"
    #[serde(default = "default_client_key_path")]
    pub client_private_key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enable_tls: false,
            certificate_authority_root_path: default_ca_path(),
            domain_name: String::new(),
            enable_mtls: false,
            client_certificate_path: default_client_cert_path(),
            client_private_key_path: default_client_key_path(),
        }
    }
}

impl TlsConfig {
    /// # Errors
    /// Returns `Error::Config` when mTLS is enabled without TLS or when a
    /// required PEM file is missing.
    pub fn validate(&self) -> Result<()> {
        if self.enable_mtls && !self.enable_tls {
            return Err(Error::Config(ConfigError::Message(
                "mTLS requires enable_tls to be true".into(),
            )));
        }
        if !self.enable_tls {
            return Ok(());
        }

        require_file(&self.certificate_authority_root_path, "CA certificate")?;
        if self.enable_mtls {
            require_file(&self.client_certificate_path, "client certificate")?;
            require_file(&self.client_private_key_path, "client private key")?;
        }
        Ok(())
    }
}

fn require_file(
    path: &str,
    name: &str,
) -> Result<()> {
    if Path::new(path).is_file() {
        Ok(())
    } else {
        Err(Error::Config(ConfigError::Message(format!(
            "{name} file {path} not found"
        ))))
    }
}

fn default_ca_path() -> String {
    "/etc/ssl/certs/ca.pem".into()
}
fn default_client_cert_path() -> String {
    "./certs/client.pem".into()
}
fn default_client_key_path() -> String {
    "./certs/client.key".into()
}
