use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Topup,
    Spend,
    Bonus,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topup => "TOPUP",
            Self::Spend => "SPEND",
            Self::Bonus => "BONUS",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "TOPUP" => Some(Self::Topup),
            "SPEND" => Some(Self::Spend),
            "BONUS" => Some(Self::Bonus),
            _ => None,
        }
    }
}

/// The transfer header. Immutable once written; its fields are the canonical
/// record a retried request carrying the same idempotency key is validated
/// against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub idempotency_key: String,
    pub kind: TransactionKind,
    pub asset_id: Uuid,
    pub source_wallet_id: Uuid,
    pub dest_wallet_id: Uuid,
    pub amount: Amount,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        kind: TransactionKind,
        asset_id: Uuid,
        source_wallet_id: Uuid,
        dest_wallet_id: Uuid,
        amount: Amount,
        idempotency_key: String,
        metadata: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            idempotency_key,
            kind,
            asset_id,
            source_wallet_id,
            dest_wallet_id,
            amount,
            metadata,
            // Truncated to the microsecond so the in-memory value is exactly
            // what a TIMESTAMPTZ column and the wire cursor can carry.
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "CREDIT",
            Self::Debit => "DEBIT",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "CREDIT" => Some(Self::Credit),
            "DEBIT" => Some(Self::Debit),
            _ => None,
        }
    }
}

/// One side of a double-entry pair. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub wallet_id: Uuid,
    pub amount: Amount,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn new(transaction: &Transaction, wallet_id: Uuid, direction: Direction) -> Self {
        Self {
            id: Uuid::now_v7(),
            transaction_id: transaction.id,
            wallet_id,
            amount: transaction.amount.clone(),
            direction,
            created_at: transaction.created_at,
        }
    }

    /// The conservation law in type form: every transaction produces exactly
    /// one debit on its source and one credit on its destination, both
    /// carrying the transaction's amount.
    pub fn pair_for(transaction: &Transaction) -> (LedgerEntry, LedgerEntry) {
        (
            Self::new(transaction, transaction.source_wallet_id, Direction::Debit),
            Self::new(transaction, transaction.dest_wallet_id, Direction::Credit),
        )
    }
}
