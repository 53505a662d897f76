use std::path::PathBuf;

/// Errors returned by a [`QueryExecutor`](crate::QueryExecutor).
///
/// The loader never propagates these past a fetch attempt: each one is
/// turned into the panel's `error_detail` via [`ExecutionError::detail`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// The query service answered with an error status.
    #[error("query service returned {status}: {detail}")]
    Service { status: u16, detail: String },

    /// The request never produced a response (connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The blocking request task panicked or was cancelled.
    #[error("executor task failed: {0}")]
    Join(String),
}

impl ExecutionError {
    /// The human-readable message shown on the panel.
    ///
    /// Service errors surface the server's own message; everything else
    /// surfaces the error's display text.
    pub fn detail(&self) -> String {
        match self {
            ExecutionError::Service { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors raised while loading a [`PanelConfig`](crate::PanelConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse panel config: {0}")]
    Parse(String),

    #[error("invalid panel config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_detail_is_the_server_message() {
        let err = ExecutionError::Service {
            status: 400,
            detail: "parse error at char 4".to_string(),
        };
        assert_eq!(err.detail(), "parse error at char 4");
        assert_eq!(
            err.to_string(),
            "query service returned 400: parse error at char 4"
        );
    }

    #[test]
    fn other_details_use_display() {
        let err = ExecutionError::Transport("connection refused".to_string());
        assert_eq!(err.detail(), "transport error: connection refused");
    }
}
