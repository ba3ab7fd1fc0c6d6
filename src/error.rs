// Error handling module
// Typed errors for every boundary of the access subsystem

use thiserror::Error;

/// A single invalid field in an access method draft
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// Proxy server address is missing
    #[error("server address is empty")]
    EmptyHost,

    /// Proxy server address is not an IP address
    #[error("server address is not a valid IP address: {0}")]
    InvalidHost(String),

    /// Port is missing
    #[error("port is empty")]
    EmptyPort,

    /// Port does not parse or is zero
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// SOCKS5 authentication enabled without a username
    #[error("username is empty")]
    EmptyUsername,

    /// SOCKS5 authentication enabled without a password
    #[error("password is empty")]
    EmptyPassword,
}

/// The draft cannot be turned into a persistable configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid access method configuration: {}", join_fields(.0))]
pub struct InvalidConfiguration(pub Vec<FieldError>);

impl InvalidConfiguration {
    /// Field errors in the order they were found
    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures while performing an HTTP call through a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Request did not finish in time
    #[error("request timed out")]
    Timeout,

    /// TCP/TLS connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Peer answered with something that is not the expected protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The access method needs a transport this client cannot build
    #[error("unsupported access method: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Protocol(e.to_string())
        }
    }
}

/// Token acquisition failed
///
/// Cloneable so one failed authentication can be handed to every waiter
/// of the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// Server refused the account
    #[error("authentication rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// The authentication request never got an answer
    #[error("authentication transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The answer could not be understood
    #[error("invalid authentication response: {0}")]
    InvalidResponse(String),

    /// The authentication task died before producing a result
    #[error("authentication task aborted")]
    Aborted,
}

/// Errors returned by the REST proxies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestError {
    /// Could not obtain a bearer token
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Request never reached the API
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// API answered with an unexpected status
    #[error("API error: {status} - {message}")]
    Unhandled { status: u16, message: String },

    /// API answered with a body that does not decode
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Request could not be built from the given arguments
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a connectivity probe did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailureKind {
    Timeout,
    ConnectionRefused,
    ProtocolMismatch,
    Cancelled,
}

/// Failed connectivity probe
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("probe failed ({kind:?}): {message}")]
pub struct ProbeError {
    pub kind: ProbeFailureKind,
    pub message: String,
}

impl ProbeError {
    pub fn new(kind: ProbeFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            ProbeFailureKind::Timeout,
            format!("no answer within {}ms", after.as_millis()),
        )
    }
}

impl From<RestError> for ProbeError {
    fn from(e: RestError) -> Self {
        let kind = match &e {
            RestError::Transport(TransportError::Timeout) => ProbeFailureKind::Timeout,
            RestError::Transport(TransportError::Connect(_)) => ProbeFailureKind::ConnectionRefused,
            _ => ProbeFailureKind::ProtocolMismatch,
        };
        ProbeError::new(kind, e.to_string())
    }
}

impl From<TransportError> for ProbeError {
    fn from(e: TransportError) -> Self {
        RestError::Transport(e).into()
    }
}

/// Failures reported by an access method repository, passed through untouched
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Underlying storage failed
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Stored record could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else the storage layer wants to report
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Errors surfaced by the access method interactor
#[derive(Error, Debug)]
pub enum AccessMethodError {
    #[error(transparent)]
    InvalidConfiguration(#[from] InvalidConfiguration),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result type alias for REST proxy operations
pub type Result<T> = std::result::Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AuthenticationError::Rejected {
            status: 401,
            message: "INVALID_ACCOUNT".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "authentication rejected: 401 - INVALID_ACCOUNT"
        );

        let err = RestError::Unhandled {
            status: 429,
            message: "Rate limit exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 429 - Rate limit exceeded");
    }

    #[test]
    fn test_invalid_configuration_lists_every_field() {
        let err = InvalidConfiguration(vec![FieldError::EmptyHost, FieldError::EmptyPort]);
        assert_eq!(
            err.to_string(),
            "invalid access method configuration: server address is empty, port is empty"
        );
        assert_eq!(err.fields().len(), 2);
    }

    #[test]
    fn test_probe_error_kind_from_rest_error() {
        let err: ProbeError = RestError::Transport(TransportError::Timeout).into();
        assert_eq!(err.kind, ProbeFailureKind::Timeout);

        let err: ProbeError =
            RestError::Transport(TransportError::Connect("refused".to_string())).into();
        assert_eq!(err.kind, ProbeFailureKind::ConnectionRefused);

        let err: ProbeError = RestError::Unhandled {
            status: 502,
            message: "Bad gateway".to_string(),
        }
        .into();
        assert_eq!(err.kind, ProbeFailureKind::ProtocolMismatch);

        let err: ProbeError = TransportError::Unsupported("shadowsocks".to_string()).into();
        assert_eq!(err.kind, ProbeFailureKind::ProtocolMismatch);
    }

    #[test]
    fn test_authentication_error_from_transport() {
        let err: AuthenticationError = TransportError::Timeout.into();
        assert_eq!(err, AuthenticationError::Transport(TransportError::Timeout));
        assert_eq!(
            err.to_string(),
            "authentication transport failure: request timed out"
        );
    }
}
