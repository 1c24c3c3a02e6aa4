use thiserror::Error;
use uuid::Uuid;

/// Every rejection path of the ledger raises its own discriminated variant;
/// the boundary layer maps each to a status code and passes the message
/// through unmodified.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and destination wallets must be different")]
    SelfTransfer,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Asset mismatch")]
    AssetMismatch,

    #[error("Idempotency key mismatch: request parameters differ from original transaction")]
    IdempotencyConflict,

    #[error("Wallet already exists for this owner and asset")]
    DuplicateWallet,

    /// Raised by the storage layer when a transaction header insert loses a
    /// race on the idempotency key unique index. The engine resolves it by
    /// re-reading the committed transaction; it never reaches callers.
    #[error("Duplicate idempotency key")]
    DuplicateIdempotencyKey,

    #[error("Invalid pagination cursor")]
    InvalidCursor,

    #[error("Storage error: {0}")]
    Storage(String),
}
