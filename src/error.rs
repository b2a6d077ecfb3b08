use thiserror::Error;

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Corrupt state: {0}")]
    Corrupt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transaction {txid} failed: {reason}")]
    Transaction { txid: String, reason: String },
}

impl LedgerError {
    /// Returns true if this error came from the transport layer, meaning
    /// the remote outcome is unknown rather than a definite refusal.
    pub fn is_transport(&self) -> bool {
        matches!(self, LedgerError::Io(_) | LedgerError::Network(_))
    }
}
