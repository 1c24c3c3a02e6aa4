//! In-memory store for tests and examples.
//!
//! The whole state sits behind one `tokio::sync::Mutex`; an atomic unit takes
//! the owned guard and works on a cloned copy, swapping it back on commit.
//! The guard serializes units, so wallet locks cannot conflict and two units
//! can never both miss the same idempotency key.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::amount::Amount;
use crate::asset::Asset;
use crate::error::LedgerError;
use crate::history::{Cursor, HistoryEntry};
use crate::transaction::{LedgerEntry, Transaction};
use crate::wallet::Wallet;
use crate::{LedgerStore, StoreUnit};

#[derive(Default, Clone)]
struct MemoryState {
    assets: HashMap<Uuid, Asset>,
    wallets: HashMap<Uuid, Wallet>,
    transactions: HashMap<Uuid, Transaction>,
    transactions_by_key: HashMap<String, Uuid>,
    entries: Vec<LedgerEntry>,
}

pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreUnit>, LedgerError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnit { guard, working }))
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if state.assets.values().any(|a| a.slug == asset.slug) {
            return Err(LedgerError::Storage(format!(
                "duplicate asset slug: {}",
                asset.slug
            )));
        }
        state.assets.insert(asset.id, asset.clone());
        Ok(())
    }

    async fn get_asset(&self, slug: &str) -> Result<Asset, LedgerError> {
        let state = self.state.lock().await;
        state
            .assets
            .values()
            .find(|a| a.slug == slug)
            .cloned()
            .ok_or_else(|| LedgerError::AssetNotFound(slug.to_string()))
    }

    async fn list_assets(&self) -> Result<Vec<Asset>, LedgerError> {
        let state = self.state.lock().await;
        let mut assets: Vec<Asset> = state.assets.values().cloned().collect();
        assets.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(assets)
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let duplicate = state.wallets.values().any(|w| match wallet.owner_id {
            Some(owner) => w.owner_id == Some(owner) && w.asset_id == wallet.asset_id,
            None => w.owner_id.is_none() && w.asset_id == wallet.asset_id,
        });
        if duplicate {
            return Err(LedgerError::DuplicateWallet);
        }
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet, LedgerError> {
        let state = self.state.lock().await;
        state
            .wallets
            .get(&wallet_id)
            .cloned()
            .ok_or(LedgerError::WalletNotFound(wallet_id))
    }

    async fn find_wallet(
        &self,
        owner_id: Uuid,
        asset_id: Uuid,
    ) -> Result<Option<Wallet>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .wallets
            .values()
            .find(|w| w.owner_id == Some(owner_id) && w.asset_id == asset_id)
            .cloned())
    }

    async fn find_system_wallet(&self, asset_id: Uuid) -> Result<Option<Wallet>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .wallets
            .values()
            .find(|w| w.owner_id.is_none() && w.asset_id == asset_id)
            .cloned())
    }

    async fn list_wallets_for_owner(&self, owner_id: Uuid) -> Result<Vec<Wallet>, LedgerError> {
        let state = self.state.lock().await;
        let mut wallets: Vec<Wallet> = state
            .wallets
            .values()
            .filter(|w| w.owner_id == Some(owner_id))
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.id);
        Ok(wallets)
    }

    async fn list_owners(&self) -> Result<Vec<Uuid>, LedgerError> {
        let state = self.state.lock().await;
        let mut owners: Vec<Uuid> = state
            .wallets
            .values()
            .filter_map(|w| w.owner_id)
            .collect();
        owners.sort();
        owners.dedup();
        Ok(owners)
    }

    async fn wallet_history(
        &self,
        wallet_id: Uuid,
        cursor: Option<Cursor>,
        fetch: usize,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        let state = self.state.lock().await;
        let mut rows: Vec<HistoryEntry> = state
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id)
            .filter(|e| match cursor {
                Some(c) => (e.created_at, e.id) < (c.created_at, c.entry_id),
                None => true,
            })
            .map(|e| {
                let transaction = state
                    .transactions
                    .get(&e.transaction_id)
                    .ok_or_else(|| {
                        LedgerError::Storage(format!(
                            "ledger entry {} references missing transaction {}",
                            e.id, e.transaction_id
                        ))
                    })?;
                Ok(HistoryEntry {
                    id: e.id,
                    amount: e.amount.clone(),
                    direction: e.direction,
                    created_at: e.created_at,
                    transaction_id: transaction.id,
                    kind: transaction.kind,
                    metadata: transaction.metadata.clone(),
                })
            })
            .collect::<Result<_, LedgerError>>()?;

        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.truncate(fetch);
        Ok(rows)
    }
}

struct MemoryUnit {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreUnit for MemoryUnit {
    async fn find_transaction_by_key(
        &mut self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .working
            .transactions_by_key
            .get(key)
            .and_then(|id| self.working.transactions.get(id))
            .cloned())
    }

    async fn lock_wallets(&mut self, _ordered_ids: &[Uuid]) -> Result<(), LedgerError> {
        // The owned guard already gives this unit exclusive access to every
        // wallet row.
        Ok(())
    }

    async fn get_wallet(&mut self, wallet_id: Uuid) -> Result<Option<Wallet>, LedgerError> {
        Ok(self.working.wallets.get(&wallet_id).cloned())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), LedgerError> {
        if self
            .working
            .transactions_by_key
            .contains_key(&transaction.idempotency_key)
        {
            return Err(LedgerError::DuplicateIdempotencyKey);
        }
        self.working
            .transactions_by_key
            .insert(transaction.idempotency_key.clone(), transaction.id);
        self.working
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn debit_wallet(&mut self, wallet_id: Uuid, amount: &Amount) -> Result<(), LedgerError> {
        let wallet = self
            .working
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        wallet.balance = wallet.balance.checked_sub(amount).ok_or_else(|| {
            LedgerError::Storage(format!("balance underflow on wallet {wallet_id}"))
        })?;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn credit_wallet(&mut self, wallet_id: Uuid, amount: &Amount) -> Result<(), LedgerError> {
        let wallet = self
            .working
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        wallet.balance = &wallet.balance + amount;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        self.working.entries.extend_from_slice(entries);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let MemoryUnit { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
