//! Server error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Failures raised by the dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no registration for pattern {pattern}")]
    NotFound { pattern: String },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] oscine_core::PatternError),

    #[error("handler for {address} failed: {source}")]
    Handler {
        address: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] oscine_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] oscine_core::Error),

    #[error("parse error: {0}")]
    Parse(#[from] oscine_core::ParseError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(e: impl Into<ServerError>) -> ServerError {
        e.into()
    }

    #[test]
    fn test_errors_land_in_their_own_variant() {
        let transport = layer(oscine_transport::TransportError::Timeout);
        assert!(matches!(transport, ServerError::Transport(_)));

        let io = layer(std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken"));
        assert!(matches!(io, ServerError::Io(_)));

        let dispatch = layer(DispatchError::NotFound {
            pattern: "/x".into(),
        });
        assert_eq!(dispatch.to_string(), "dispatch error: no registration for pattern /x");
    }
}
