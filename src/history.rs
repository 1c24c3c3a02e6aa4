use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::amount::Amount;
use crate::error::LedgerError;
use crate::transaction::{Direction, TransactionKind};
use crate::LedgerStore;

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Composite pagination cursor: the `(created_at, id)` sort key of the last
/// row the caller has seen. Folding the id into the cursor keeps pages exact
/// when several entries share a timestamp.
///
/// Opaque on the wire: `{rfc3339}~{uuid}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub entry_id: Uuid,
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}~{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.entry_id
        )
    }
}

impl FromStr for Cursor {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts, id) = s.split_once('~').ok_or(LedgerError::InvalidCursor)?;
        let created_at = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| LedgerError::InvalidCursor)?
            .with_timezone(&Utc);
        let entry_id = Uuid::parse_str(id).map_err(|_| LedgerError::InvalidCursor)?;
        Ok(Self {
            created_at,
            entry_id,
        })
    }
}

/// One ledger entry joined with its transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub amount: Amount,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
    pub transaction_id: Uuid,
    pub kind: TransactionKind,
    pub metadata: Option<String>,
}

impl HistoryEntry {
    pub fn sort_key(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            entry_id: self.id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub next_cursor: Option<Cursor>,
}

/// Cursor-paginated, newest-first read of a wallet's ledger.
pub struct HistoryReader {
    store: Arc<dyn LedgerStore>,
}

impl HistoryReader {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Fetches `limit + 1` rows to learn whether a further page exists
    /// without a count query. `limit` of zero falls back to the default;
    /// anything above [`MAX_PAGE_LIMIT`] is clamped, which also keeps the
    /// `limit + 1` fetch size from overflowing on a hostile query parameter.
    pub async fn get_history(
        &self,
        wallet_id: Uuid,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<HistoryPage, LedgerError> {
        self.store.get_wallet(wallet_id).await?;

        let limit = match limit {
            0 => DEFAULT_PAGE_LIMIT,
            n => n.min(MAX_PAGE_LIMIT),
        };
        let mut entries = self
            .store
            .wallet_history(wallet_id, cursor, limit + 1)
            .await?;

        let next_cursor = if entries.len() > limit {
            entries.truncate(limit);
            entries.last().map(HistoryEntry::sort_key)
        } else {
            None
        };

        debug!(
            %wallet_id,
            count = entries.len(),
            has_next = next_cursor.is_some(),
            "wallet history fetched"
        );

        Ok(HistoryPage {
            entries,
            next_cursor,
        })
    }
}

impl Serialize for Cursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
