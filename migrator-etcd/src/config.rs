use crate::{EtcdError, EtcdResult};
use std::path::PathBuf;
use std::time::Duration;

/// etcd client configuration
#[derive(Debug, Clone, Default)]
pub struct EtcdConfig {
    /// Connection configuration
    pub connection: ConnectionConfig,

    /// Mutual TLS material
    pub tls: TlsConfig,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// etcd server endpoint
    pub endpoint: String,

    /// Dial timeout
    pub connect_timeout: Duration,

    /// Deadline applied to every membership request
    pub request_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:2379".to_string(),
            connect_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// TLS configuration. All three files are required, the membership API is
/// only reachable with a client certificate.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// CA bundle file path
    pub ca_file: PathBuf,

    /// Client certificate file path
    pub cert_file: PathBuf,

    /// Client private key file path
    pub key_file: PathBuf,

    /// Server name for certificate verification
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_file: PathBuf::from("/etc/kubernetes/ssl/etcd/server-ca.pem"),
            cert_file: PathBuf::from("/etc/kubernetes/ssl/etcd/server-crt.pem"),
            key_file: PathBuf::from("/etc/kubernetes/ssl/etcd/server-key.pem"),
            server_name: None,
        }
    }
}

impl EtcdConfig {
    /// Validate the configuration
    pub fn validate(&self) -> EtcdResult<()> {
        if self.connection.endpoint.trim().is_empty() {
            return Err(EtcdError::configuration("etcd endpoint cannot be empty"));
        }

        if self.connection.request_timeout.is_zero() {
            return Err(EtcdError::configuration(
                "Request timeout must be greater than 0",
            ));
        }

        for (name, path) in [
            ("CA file", &self.tls.ca_file),
            ("cert file", &self.tls.cert_file),
            ("key file", &self.tls.key_file),
        ] {
            if path.as_os_str().is_empty() {
                return Err(EtcdError::configuration(format!(
                    "TLS {} cannot be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Configuration builder for programmatic configuration
#[derive(Debug, Default)]
pub struct EtcdConfigBuilder {
    config: EtcdConfig,
}

impl EtcdConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.connection.endpoint = endpoint.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.request_timeout = timeout;
        self
    }

    pub fn tls_files(
        mut self,
        ca_file: impl Into<PathBuf>,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        self.config.tls.ca_file = ca_file.into();
        self.config.tls.cert_file = cert_file.into();
        self.config.tls.key_file = key_file.into();
        self
    }

    pub fn server_name(mut self, server_name: impl Into<String>) -> Self {
        self.config.tls.server_name = Some(server_name.into());
        self
    }

    pub fn build(self) -> EtcdResult<EtcdConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
