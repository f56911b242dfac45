use thiserror::Error;

/// Raw failures surfaced by a [`crate::chain::ChainClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("ledger node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("timed out waiting for the ledger node")]
    Timeout,

    #[error("unexpected response from ledger node: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::NodeUnreachable(_) | ChainError::Timeout)
    }
}

/// Raw failures surfaced by the [`crate::session::AccountSession`] and the
/// wallet providers behind it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no wallet provider available")]
    NoProvider,

    #[error("wallet refused the request: {0}")]
    Denied(String),

    #[error("wallet returned no accounts")]
    NoAccounts,

    #[error("wallet transport failed: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum MatchSourceError {
    #[error("match source request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("match source responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid match payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("no matches available")]
    Empty,
}

/// Failures while wiring the application's components together.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("ledger node transport: {0}")]
    Rpc(#[from] crate::rpc::RpcError),

    #[error("match source: {0}")]
    Matches(#[from] MatchSourceError),
}
