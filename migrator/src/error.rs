use migrator_etcd::EtcdError;
use thiserror::Error;

/// Errors raised while migrating the etcd cluster
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invariant violation: found {member_count} members in etcd cluster, expected 1, 2 or 3")]
    InvariantViolation { member_count: usize },

    #[error("Invalid master ordinal on node {node}: {reason}")]
    InvalidNodeOrdinal { node: String, reason: String },

    #[error("{operation} still unavailable after {attempts} attempts: {last_error}")]
    Unavailable {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Remote run on node {node} failed: {reason}")]
    RemoteRun { node: String, reason: String },

    #[error("etcd error: {0}")]
    Membership(#[from] EtcdError),

    #[error("Kubernetes API error during {operation}: {source}")]
    Kubernetes {
        operation: String,
        #[source]
        source: kube::Error,
    },

    #[error("{context}: {source}")]
    Step {
        context: String,
        #[source]
        source: Box<MigrationError>,
    },
}

impl MigrationError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        MigrationError::Configuration(msg.into())
    }

    pub fn invalid_ordinal<N: Into<String>, R: Into<String>>(node: N, reason: R) -> Self {
        MigrationError::InvalidNodeOrdinal {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable<S: Into<String>>(operation: S, attempts: u32, last_error: String) -> Self {
        MigrationError::Unavailable {
            operation: operation.into(),
            attempts,
            last_error,
        }
    }

    pub fn remote_run<N: Into<String>, R: Into<String>>(node: N, reason: R) -> Self {
        MigrationError::RemoteRun {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn kubernetes<S: Into<String>>(operation: S, source: kube::Error) -> Self {
        MigrationError::Kubernetes {
            operation: operation.into(),
            source,
        }
    }

    /// The innermost error beneath any step context
    pub fn root_cause(&self) -> &MigrationError {
        match self {
            MigrationError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Attach call-site context to a failing step
pub trait StepContext<T> {
    fn step_context<F>(self, context_fn: F) -> MigrationResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> StepContext<T> for Result<T, E>
where
    E: Into<MigrationError>,
{
    fn step_context<F>(self, context_fn: F) -> MigrationResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| MigrationError::Step {
            context: context_fn(),
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_violation_message() {
        let error = MigrationError::InvariantViolation { member_count: 4 };
        assert_eq!(
            error.to_string(),
            "Invariant violation: found 4 members in etcd cluster, expected 1, 2 or 3"
        );
    }

    #[test]
    fn test_step_context_wraps_and_unwraps() {
        let result: MigrationResult<()> =
            Err(MigrationError::remote_run("master-2", "job failed"));
        let error = result
            .step_context(|| "join node 2".to_string())
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "join node 2: Remote run on node master-2 failed: job failed"
        );
        assert!(matches!(
            error.root_cause(),
            MigrationError::RemoteRun { .. }
        ));
    }

    #[test]
    fn test_etcd_error_converts() {
        let result: Result<(), EtcdError> = Err(EtcdError::timeout("MemberList"));
        let error = result.step_context(|| "list members".to_string()).unwrap_err();
        assert!(matches!(error.root_cause(), MigrationError::Membership(_)));
    }
}
