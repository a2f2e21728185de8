/// Errors a remote cart or wishlist service can fail with.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RemoteError {
    /// The service could not be reached.
    #[error("Service '{service}' is unavailable")]
    Unavailable {
        service: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The transport gave up waiting.
    #[error("Operation '{operation}' timed out")]
    Timeout { operation: String },

    /// The service answered and refused the request.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The addressed resource does not exist on the service.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Returns true if this error is transient and the call may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Unavailable { .. } | RemoteError::Timeout { .. } => true,
            RemoteError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors surfaced by the optimistic coordinators and the query store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CartError {
    /// The remote mutation failed. The speculative edit has already been
    /// rolled back and a refresh scheduled by the time this is returned.
    #[error("Remote call '{operation}' failed: {source}")]
    RemoteCallFailed {
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    /// A foreground load was requested but the store has no fetcher.
    #[error("No fetcher registered for namespace '{0}'")]
    NoFetcher(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl CartError {
    /// The underlying remote error, if this came from a remote call.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            CartError::RemoteCallFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Take the underlying remote error back by value.
    pub fn into_remote(self) -> Option<RemoteError> {
        match self {
            CartError::RemoteCallFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<cartsync_config::ConfigError> for CartError {
    fn from(e: cartsync_config::ConfigError) -> Self {
        CartError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_remote_is_transient_unavailable() {
        let err = RemoteError::Unavailable {
            service: "cart".to_string(),
            source: Box::new(std::io::Error::other("conn reset")),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_remote_is_transient_by_status() {
        let busy = RemoteError::Rejected {
            status: 503,
            message: "busy".to_string(),
        };
        let bad = RemoteError::Rejected {
            status: 422,
            message: "quantity".to_string(),
        };
        assert!(busy.is_transient());
        assert!(!bad.is_transient());
        assert!(!RemoteError::NotFound("p1".to_string()).is_transient());
    }

    #[test]
    fn test_remote_call_failed_keeps_source() {
        let err = CartError::RemoteCallFailed {
            operation: "add_to_cart",
            source: RemoteError::Timeout {
                operation: "POST /cart".to_string(),
            },
        };

        assert!(err.to_string().contains("add_to_cart"));
        assert!(err.source().is_some());
        assert!(matches!(err.remote(), Some(RemoteError::Timeout { .. })));
        assert!(matches!(
            err.into_remote(),
            Some(RemoteError::Timeout { operation }) if operation == "POST /cart"
        ));
    }

    #[test]
    fn test_from_config_error() {
        let config_err = cartsync_config::ConfigError::InvalidConfig("bad".to_string());
        let err: CartError = config_err.into();
        assert!(matches!(err, CartError::Config(_)));
        assert!(err.remote().is_none());
    }
}
