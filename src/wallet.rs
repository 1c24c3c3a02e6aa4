use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::amount::Amount;
use crate::error::LedgerError;
use crate::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WalletKind {
    User,
    System,
}

impl WalletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::System => "SYSTEM",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Self::User),
            "SYSTEM" => Some(Self::System),
            _ => None,
        }
    }
}

/// A ledger account holding a balance of one asset.
///
/// `owner_id` is absent exactly for system wallets. The balance is mutated
/// only by the transfer engine and can never go negative: `Amount` is
/// unsigned and the storage layer carries its own `balance >= 0` check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub asset_id: Uuid,
    pub balance: Amount,
    pub kind: WalletKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    fn new(owner_id: Option<Uuid>, asset_id: Uuid, kind: WalletKind, balance: Amount) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner_id,
            asset_id,
            balance,
            kind,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Creates and fetches wallet records. The owner/kind pairing is encoded in
/// the two creation entry points, so a user wallet without an owner or a
/// system wallet with one cannot be expressed.
pub struct WalletStore {
    store: Arc<dyn LedgerStore>,
}

impl WalletStore {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Create a user wallet for `(owner_id, asset_slug)`. At most one such
    /// wallet may exist per pair; the storage unique constraint is the
    /// authority and surfaces as `DuplicateWallet`.
    pub async fn create_wallet(
        &self,
        owner_id: Uuid,
        asset_slug: &str,
        initial_balance: Amount,
    ) -> Result<Wallet, LedgerError> {
        let asset = self.store.get_asset(asset_slug).await?;
        let wallet = Wallet::new(Some(owner_id), asset.id, WalletKind::User, initial_balance);
        self.insert(wallet).await
    }

    /// Create the single system wallet for an asset. It is the counterparty
    /// of every topup, bonus and spend, and is subject to the same
    /// non-negative balance rule as any other wallet.
    pub async fn create_system_wallet(
        &self,
        asset_slug: &str,
        initial_balance: Amount,
    ) -> Result<Wallet, LedgerError> {
        let asset = self.store.get_asset(asset_slug).await?;
        let wallet = Wallet::new(None, asset.id, WalletKind::System, initial_balance);
        self.insert(wallet).await
    }

    async fn insert(&self, wallet: Wallet) -> Result<Wallet, LedgerError> {
        match self.store.insert_wallet(&wallet).await {
            Ok(()) => {
                info!(wallet_id = %wallet.id, kind = wallet.kind.as_str(), "wallet created");
                Ok(wallet)
            }
            Err(err) => {
                warn!(asset_id = %wallet.asset_id, error = %err, "wallet creation failed");
                Err(err)
            }
        }
    }

    pub async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet, LedgerError> {
        self.store.get_wallet(wallet_id).await
    }

    pub async fn get_balance(&self, wallet_id: Uuid) -> Result<Amount, LedgerError> {
        Ok(self.get_wallet(wallet_id).await?.balance)
    }

    pub async fn find_wallet(
        &self,
        owner_id: Uuid,
        asset_slug: &str,
    ) -> Result<Option<Wallet>, LedgerError> {
        let asset = self.store.get_asset(asset_slug).await?;
        self.store.find_wallet(owner_id, asset.id).await
    }

    pub async fn find_system_wallet(
        &self,
        asset_slug: &str,
    ) -> Result<Option<Wallet>, LedgerError> {
        let asset = self.store.get_asset(asset_slug).await?;
        self.store.find_system_wallet(asset.id).await
    }

    pub async fn list_wallets(&self, owner_id: Uuid) -> Result<Vec<Wallet>, LedgerError> {
        self.store.list_wallets_for_owner(owner_id).await
    }

    /// Every owner id that holds at least one wallet, ascending.
    pub async fn list_owners(&self) -> Result<Vec<Uuid>, LedgerError> {
        self.store.list_owners().await
    }
}
