//! A double-entry wallet ledger with idempotent transfers.
//!
//! The transfer engine moves a fixed-point quantity of one asset between two
//! wallets with strict conservation and exactly-once semantics under retries.
//! All storage goes through the [`LedgerStore`] port; the atomic unit is a
//! first-class [`StoreUnit`] object, so the engine never touches a hidden
//! global handle.

pub mod adapters;
pub mod amount;
pub mod asset;
pub mod engine;
pub mod error;
pub mod history;
pub mod http;
pub mod transaction;
pub mod wallet;

pub use amount::Amount;
pub use asset::{Asset, AssetRegistry, AssetStatus};
pub use engine::{TransferEngine, TransferRequest};
pub use error::LedgerError;
pub use history::{Cursor, HistoryEntry, HistoryPage, HistoryReader};
pub use transaction::{Direction, LedgerEntry, Transaction, TransactionKind};
pub use wallet::{Wallet, WalletKind, WalletStore};

use async_trait::async_trait;
use uuid::Uuid;

/// Storage port. Non-transactional reads and creates, plus [`begin`] for the
/// engine's atomic unit.
///
/// [`begin`]: LedgerStore::begin
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open an atomic unit. Everything done through the returned [`StoreUnit`]
    /// becomes observable only at [`StoreUnit::commit`]; dropping the unit
    /// beforehand rolls every change back.
    async fn begin(&self) -> Result<Box<dyn StoreUnit>, LedgerError>;

    async fn insert_asset(&self, asset: &Asset) -> Result<(), LedgerError>;
    async fn get_asset(&self, slug: &str) -> Result<Asset, LedgerError>;
    async fn list_assets(&self) -> Result<Vec<Asset>, LedgerError>;

    /// Insert a wallet. Uniqueness — one wallet per (owner, asset), one
    /// system wallet per asset — is enforced by the storage itself and
    /// surfaces as [`LedgerError::DuplicateWallet`].
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), LedgerError>;
    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet, LedgerError>;
    async fn find_wallet(
        &self,
        owner_id: Uuid,
        asset_id: Uuid,
    ) -> Result<Option<Wallet>, LedgerError>;
    async fn find_system_wallet(&self, asset_id: Uuid) -> Result<Option<Wallet>, LedgerError>;
    async fn list_wallets_for_owner(&self, owner_id: Uuid) -> Result<Vec<Wallet>, LedgerError>;

    /// Distinct owner ids over all user wallets, ascending. System wallets
    /// have no owner and never appear.
    async fn list_owners(&self) -> Result<Vec<Uuid>, LedgerError>;

    /// Ledger entries for one wallet joined with their transaction, newest
    /// first by `(created_at, id)`, at most `fetch` rows, strictly older than
    /// `cursor` when one is given.
    async fn wallet_history(
        &self,
        wallet_id: Uuid,
        cursor: Option<Cursor>,
        fetch: usize,
    ) -> Result<Vec<HistoryEntry>, LedgerError>;
}

/// One atomic unit against the store. Implementors MUST:
/// 1. BEGIN a storage transaction when the unit is created
/// 2. take exclusive row locks in exactly the order `lock_wallets` is given
/// 3. COMMIT only in `commit`, and ROLLBACK when dropped uncommitted
#[async_trait]
pub trait StoreUnit: Send {
    async fn find_transaction_by_key(
        &mut self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// Exclusive row locks on the given wallets, acquired one by one in the
    /// caller's order. The caller is responsible for sorting the ids so the
    /// order is independent of transfer direction.
    async fn lock_wallets(&mut self, ordered_ids: &[Uuid]) -> Result<(), LedgerError>;

    async fn get_wallet(&mut self, wallet_id: Uuid) -> Result<Option<Wallet>, LedgerError>;

    /// Insert a transaction header. A lost race on the idempotency key unique
    /// index surfaces as [`LedgerError::DuplicateIdempotencyKey`].
    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), LedgerError>;

    async fn debit_wallet(&mut self, wallet_id: Uuid, amount: &Amount) -> Result<(), LedgerError>;
    async fn credit_wallet(&mut self, wallet_id: Uuid, amount: &Amount) -> Result<(), LedgerError>;
    async fn insert_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
