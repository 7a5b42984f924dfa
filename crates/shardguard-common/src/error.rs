use thiserror::Error;

/// Errors produced by shardguard components.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("field '{0}' is missing or has an unexpected type")]
    Parse(String),

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("request timeout")]
    RequestTimeout,

    #[error("no connection to the instance")]
    NoConnection,

    #[error("master of the replica set is not available so its topology could not be discovered")]
    MasterNotAvailable,

    #[error("replica set not found")]
    ReplicaSetNotFound,

    #[error("instance not found")]
    InstanceNotFound,

    #[error("replica set does not have any alive followers or all of them were excluded from the election")]
    NoAliveFollowers,

    #[error("no available candidate found")]
    NoCandidateFound,

    #[error("election veto: {0}")]
    ElectionVeto(String),

    #[error("hook '{0}' failed")]
    HookFailed(String),

    #[error("recovery for scope '{0}' is blocked")]
    RecoveryBlocked(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// A transient error: the connection is torn down and the call retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NoConnection | Error::RequestTimeout | Error::ConnectTimeout
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(Error::NoConnection.is_retryable());
        assert!(Error::RequestTimeout.is_retryable());
        assert!(Error::ConnectTimeout.is_retryable());
    }

    #[test]
    fn test_non_retryable_errors() {
        assert!(!Error::Parse("status".into()).is_retryable());
        assert!(!Error::MasterNotAvailable.is_retryable());
        assert!(!Error::NoAliveFollowers.is_retryable());
        assert!(!Error::Storage("busy".into()).is_retryable());
    }

    #[test]
    fn test_parse_error_names_field() {
        let err = Error::Parse("bucket.active".into());
        assert!(err.to_string().contains("bucket.active"));
    }
}
