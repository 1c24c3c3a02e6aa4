//! Postgres store.
//!
//! The schema carries the invariants a crashed or buggy process cannot be
//! trusted to hold on its own: `balance >= 0`, one wallet per (owner, asset),
//! one system wallet per asset, globally unique idempotency keys. Amounts are
//! `NUMERIC` and cross the driver boundary as base-10 text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::amount::Amount;
use crate::asset::{Asset, AssetStatus};
use crate::error::LedgerError;
use crate::history::{Cursor, HistoryEntry};
use crate::transaction::{Direction, LedgerEntry, Transaction, TransactionKind};
use crate::wallet::{Wallet, WalletKind};
use crate::{LedgerStore, StoreUnit};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await
            .map_err(storage)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                id UUID PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                decimals SMALLINT NOT NULL DEFAULT 0,
                status TEXT NOT NULL CHECK (status IN ('ACTIVE', 'FROZEN')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                id UUID PRIMARY KEY,
                owner_id UUID,
                asset_id UUID NOT NULL REFERENCES assets(id),
                balance NUMERIC NOT NULL DEFAULT 0 CHECK (balance >= 0),
                kind TEXT NOT NULL CHECK (kind IN ('USER', 'SYSTEM')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS wallets_owner_asset_unique
            ON wallets(owner_id, asset_id) WHERE owner_id IS NOT NULL
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS wallets_system_asset_unique
            ON wallets(asset_id) WHERE owner_id IS NULL
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id UUID PRIMARY KEY,
                idempotency_key TEXT NOT NULL
                    CONSTRAINT transactions_idempotency_key_unique UNIQUE,
                kind TEXT NOT NULL CHECK (kind IN ('TOPUP', 'SPEND', 'BONUS')),
                asset_id UUID NOT NULL REFERENCES assets(id),
                source_wallet_id UUID NOT NULL REFERENCES wallets(id),
                dest_wallet_id UUID NOT NULL REFERENCES wallets(id),
                amount NUMERIC NOT NULL CHECK (amount > 0),
                metadata TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                id UUID PRIMARY KEY,
                transaction_id UUID NOT NULL REFERENCES transactions(id),
                wallet_id UUID NOT NULL REFERENCES wallets(id),
                amount NUMERIC NOT NULL CHECK (amount > 0),
                direction TEXT NOT NULL CHECK (direction IN ('CREDIT', 'DEBIT')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS ledger_entries_wallet_scan
            ON ledger_entries(wallet_id, created_at DESC, id DESC)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS ledger_entries_transaction_idx
            ON ledger_entries(transaction_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(())
    }
}

fn storage(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

/// The violated constraint's name, when the error is a unique violation.
fn unique_violation(e: &sqlx::Error) -> Option<String> {
    e.as_database_error()
        .filter(|db| db.is_unique_violation())
        .and_then(|db| db.constraint())
        .map(|c| c.to_string())
}

fn asset_from_row(row: &PgRow) -> Result<Asset, LedgerError> {
    let status: String = row.try_get("status").map_err(storage)?;
    Ok(Asset {
        id: row.try_get("id").map_err(storage)?,
        slug: row.try_get("slug").map_err(storage)?,
        name: row.try_get("name").map_err(storage)?,
        decimals: row.try_get::<i16, _>("decimals").map_err(storage)? as u8,
        status: AssetStatus::parse_str(&status)
            .ok_or_else(|| LedgerError::Storage(format!("unknown asset status: {status}")))?,
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet, LedgerError> {
    let kind: String = row.try_get("kind").map_err(storage)?;
    let balance: String = row.try_get("balance").map_err(storage)?;
    Ok(Wallet {
        id: row.try_get("id").map_err(storage)?,
        owner_id: row.try_get("owner_id").map_err(storage)?,
        asset_id: row.try_get("asset_id").map_err(storage)?,
        balance: Amount::parse(&balance)?,
        kind: WalletKind::parse_str(&kind)
            .ok_or_else(|| LedgerError::Storage(format!("unknown wallet kind: {kind}")))?,
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, LedgerError> {
    let kind: String = row.try_get("kind").map_err(storage)?;
    let amount: String = row.try_get("amount").map_err(storage)?;
    Ok(Transaction {
        id: row.try_get("id").map_err(storage)?,
        idempotency_key: row.try_get("idempotency_key").map_err(storage)?,
        kind: TransactionKind::parse_str(&kind)
            .ok_or_else(|| LedgerError::Storage(format!("unknown transaction kind: {kind}")))?,
        asset_id: row.try_get("asset_id").map_err(storage)?,
        source_wallet_id: row.try_get("source_wallet_id").map_err(storage)?,
        dest_wallet_id: row.try_get("dest_wallet_id").map_err(storage)?,
        amount: Amount::parse(&amount)?,
        metadata: row.try_get("metadata").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}

const WALLET_COLUMNS: &str =
    "id, owner_id, asset_id, balance::TEXT AS balance, kind, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, idempotency_key, kind, asset_id, source_wallet_id, \
     dest_wallet_id, amount::TEXT AS amount, metadata, created_at";

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreUnit>, LedgerError> {
        let tx = self.pool.begin().await.map_err(storage)?;
        Ok(Box::new(PostgresUnit { tx }))
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO assets (id, slug, name, decimals, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(asset.id)
        .bind(&asset.slug)
        .bind(&asset.name)
        .bind(asset.decimals as i16)
        .bind(asset.status.as_str())
        .bind(asset.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if unique_violation(&e).is_some() {
                LedgerError::Storage(format!("duplicate asset slug: {}", asset.slug))
            } else {
                storage(e)
            }
        })?;
        Ok(())
    }

    async fn get_asset(&self, slug: &str) -> Result<Asset, LedgerError> {
        let row = sqlx::query(
            "SELECT id, slug, name, decimals, status, created_at FROM assets WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .ok_or_else(|| LedgerError::AssetNotFound(slug.to_string()))?;
        asset_from_row(&row)
    }

    async fn list_assets(&self) -> Result<Vec<Asset>, LedgerError> {
        let rows = sqlx::query(
            "SELECT id, slug, name, decimals, status, created_at FROM assets ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(asset_from_row).collect()
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, owner_id, asset_id, balance, kind, created_at, updated_at)
            VALUES ($1, $2, $3, $4::NUMERIC, $5, $6, $7)
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.owner_id)
        .bind(wallet.asset_id)
        .bind(wallet.balance.to_string())
        .bind(wallet.kind.as_str())
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => LedgerError::DuplicateWallet,
            None => storage(e),
        })?;
        Ok(())
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1"
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        wallet_from_row(&row)
    }

    async fn find_wallet(
        &self,
        owner_id: Uuid,
        asset_id: Uuid,
    ) -> Result<Option<Wallet>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE owner_id = $1 AND asset_id = $2"
        ))
        .bind(owner_id)
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn find_system_wallet(&self, asset_id: Uuid) -> Result<Option<Wallet>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE asset_id = $1 AND owner_id IS NULL"
        ))
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn list_wallets_for_owner(&self, owner_id: Uuid) -> Result<Vec<Wallet>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE owner_id = $1 ORDER BY id"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(wallet_from_row).collect()
    }

    async fn list_owners(&self) -> Result<Vec<Uuid>, LedgerError> {
        let rows = sqlx::query(
            "SELECT DISTINCT owner_id FROM wallets WHERE owner_id IS NOT NULL ORDER BY owner_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter()
            .map(|row| row.try_get("owner_id").map_err(storage))
            .collect()
    }

    async fn wallet_history(
        &self,
        wallet_id: Uuid,
        cursor: Option<Cursor>,
        fetch: usize,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        // Row comparison on the full sort key, so entries sharing a
        // timestamp are neither skipped nor repeated across pages.
        let rows = sqlx::query(
            r#"
            SELECT le.id, le.amount::TEXT AS amount, le.direction, le.created_at,
                   t.id AS transaction_id, t.kind, t.metadata
            FROM ledger_entries le
            JOIN transactions t ON t.id = le.transaction_id
            WHERE le.wallet_id = $1
              AND ($2::TIMESTAMPTZ IS NULL OR (le.created_at, le.id) < ($2, $3))
            ORDER BY le.created_at DESC, le.id DESC
            LIMIT $4
            "#,
        )
        .bind(wallet_id)
        .bind(cursor.map(|c| c.created_at))
        .bind(cursor.map(|c| c.entry_id))
        .bind(fetch as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                let direction: String = row.try_get("direction").map_err(storage)?;
                let kind: String = row.try_get("kind").map_err(storage)?;
                let amount: String = row.try_get("amount").map_err(storage)?;
                Ok(HistoryEntry {
                    id: row.try_get("id").map_err(storage)?,
                    amount: Amount::parse(&amount)?,
                    direction: Direction::parse_str(&direction).ok_or_else(|| {
                        LedgerError::Storage(format!("unknown direction: {direction}"))
                    })?,
                    created_at: row.try_get("created_at").map_err(storage)?,
                    transaction_id: row.try_get("transaction_id").map_err(storage)?,
                    kind: TransactionKind::parse_str(&kind).ok_or_else(|| {
                        LedgerError::Storage(format!("unknown transaction kind: {kind}"))
                    })?,
                    metadata: row.try_get("metadata").map_err(storage)?,
                })
            })
            .collect()
    }
}

struct PostgresUnit {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl StoreUnit for PostgresUnit {
    async fn find_transaction_by_key(
        &mut self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn lock_wallets(&mut self, ordered_ids: &[Uuid]) -> Result<(), LedgerError> {
        for wallet_id in ordered_ids {
            sqlx::query("SELECT id FROM wallets WHERE id = $1 FOR UPDATE")
                .bind(wallet_id)
                .execute(&mut *self.tx)
                .await
                .map_err(storage)?;
        }
        Ok(())
    }

    async fn get_wallet(&mut self, wallet_id: Uuid) -> Result<Option<Wallet>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1"
        ))
        .bind(wallet_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, idempotency_key, kind, asset_id, source_wallet_id, dest_wallet_id,
                 amount, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7::NUMERIC, $8, $9)
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.idempotency_key)
        .bind(transaction.kind.as_str())
        .bind(transaction.asset_id)
        .bind(transaction.source_wallet_id)
        .bind(transaction.dest_wallet_id)
        .bind(transaction.amount.to_string())
        .bind(&transaction.metadata)
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(c) if c.contains("idempotency") => LedgerError::DuplicateIdempotencyKey,
            _ => storage(e),
        })?;
        Ok(())
    }

    async fn debit_wallet(&mut self, wallet_id: Uuid, amount: &Amount) -> Result<(), LedgerError> {
        // The engine has already validated the balance under the row lock;
        // the CHECK constraint is the storage-level backstop.
        sqlx::query(
            "UPDATE wallets SET balance = balance - $2::NUMERIC, updated_at = NOW() WHERE id = $1",
        )
        .bind(wallet_id)
        .bind(amount.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn credit_wallet(&mut self, wallet_id: Uuid, amount: &Amount) -> Result<(), LedgerError> {
        sqlx::query(
            "UPDATE wallets SET balance = balance + $2::NUMERIC, updated_at = NOW() WHERE id = $1",
        )
        .bind(wallet_id)
        .bind(amount.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn insert_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries
                    (id, transaction_id, wallet_id, amount, direction, created_at)
                VALUES ($1, $2, $3, $4::NUMERIC, $5, $6)
                "#,
            )
            .bind(entry.id)
            .bind(entry.transaction_id)
            .bind(entry.wallet_id)
            .bind(entry.amount.to_string())
            .bind(entry.direction.as_str())
            .bind(entry.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await.map_err(storage)
    }
}
