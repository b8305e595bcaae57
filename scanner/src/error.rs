use alloy::transports::{RpcError as AlloyRpcError, TransportErrorKind};
use thiserror::Error;

/// JSON-RPC error code used by several providers for "limit exceeded".
const LIMIT_EXCEEDED_CODE: i64 = -32005;
const TOO_MANY_REQUESTS: i64 = 429;

/// Typed classification of a failed RPC call. Retry policy is decided from
/// the variant, never from message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The endpoint refused the request because of its quota.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The request did not reach the node or the node did not answer.
    #[error("connection failure: {0}")]
    Connection(String),

    /// The node answered, but the call can not succeed by retrying.
    #[error("rpc call failed: {0}")]
    Fatal(String),

    /// The node has no such block or receipt.
    #[error("{0} not found")]
    NotFound(String),

    /// Every permitted attempt failed with a retryable error.
    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<RpcError> },
}

impl RpcError {
    /// Whether backing off and trying again can help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::RateLimited(_) | RpcError::Connection(_))
    }
}

impl From<AlloyRpcError<TransportErrorKind>> for RpcError {
    fn from(err: AlloyRpcError<TransportErrorKind>) -> Self {
        match err {
            AlloyRpcError::ErrorResp(payload) => {
                let message = payload.message.to_string();
                let lowered = message.to_lowercase();
                if payload.code == TOO_MANY_REQUESTS
                    || payload.code == LIMIT_EXCEEDED_CODE
                    || lowered.contains("rate limit")
                    || lowered.contains("too many requests")
                {
                    RpcError::RateLimited(format!("code {}: {message}", payload.code))
                } else {
                    RpcError::Fatal(format!("code {}: {message}", payload.code))
                }
            }
            AlloyRpcError::Transport(kind) => match kind {
                TransportErrorKind::HttpError(http) if http.status == 429 => {
                    RpcError::RateLimited(format!("http {}", http.status))
                }
                TransportErrorKind::HttpError(http) if http.status >= 500 => {
                    RpcError::Connection(format!("http {}: {}", http.status, http.body))
                }
                TransportErrorKind::HttpError(http) => {
                    RpcError::Fatal(format!("http {}: {}", http.status, http.body))
                }
                TransportErrorKind::BackendGone => {
                    RpcError::Connection("transport backend gone".into())
                }
                TransportErrorKind::Custom(e) => RpcError::Connection(e.to_string()),
                other => RpcError::Fatal(other.to_string()),
            },
            AlloyRpcError::NullResp => RpcError::Connection("null response".into()),
            other => RpcError::Fatal(other.to_string()),
        }
    }
}

/// Failures of a [`StorageSink`](crate::storage::StorageSink). A duplicate
/// key is not one of them.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("could not encode csv row: {0}")]
    Csv(#[from] csv::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Invalid or missing configuration. Always fatal, before any scanning.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no RPC endpoint configured: set --rpc-url / SCANNER_RPC_URL or ALCHEMY_API_KEY")]
    MissingEndpoint,

    #[error("invalid RPC endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),

    #[error("initial backoff ({initial_ms} ms) exceeds max backoff ({max_ms} ms)")]
    BackoffOrder { initial_ms: u128, max_ms: u128 },
}
