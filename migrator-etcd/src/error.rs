use thiserror::Error;

/// Errors that can occur while talking to the etcd membership API
#[derive(Error, Debug)]
pub enum EtcdError {
    /// Connection error
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// TLS material could not be loaded
    #[error("TLS error: {path} - {message}")]
    Tls { path: String, message: String },

    /// A membership RPC failed
    #[error("Membership {operation} failed: {message}")]
    Membership { operation: String, message: String },

    /// Timeout error
    #[error("Operation timeout: {operation}")]
    Timeout { operation: String },
}

impl EtcdError {
    /// Create a new connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new TLS error
    pub fn tls(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tls {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new membership error
    pub fn membership(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Membership {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}

/// Result type for etcd operations
pub type EtcdResult<T> = Result<T, EtcdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_error_message() {
        let error = EtcdError::membership("MemberAdd", "peer URL exists");
        assert_eq!(
            error.to_string(),
            "Membership MemberAdd failed: peer URL exists"
        );
    }

    #[test]
    fn test_tls_error_names_path() {
        let error = EtcdError::tls("/etc/ssl/ca.pem", "No such file or directory");
        assert!(error.to_string().contains("/etc/ssl/ca.pem"));
    }
}
