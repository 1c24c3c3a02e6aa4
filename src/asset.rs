use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetStatus {
    Active,
    Frozen,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Frozen => "FROZEN",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "FROZEN" => Some(Self::Frozen),
            _ => None,
        }
    }
}

/// Immutable after creation except for `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub decimals: u8,
    pub status: AssetStatus,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(slug: &str, name: &str, decimals: u8) -> Self {
        Self {
            id: Uuid::now_v7(),
            slug: slug.to_string(),
            name: name.to_string(),
            decimals,
            status: AssetStatus::Active,
            created_at: Utc::now(),
        }
    }
}

/// Resolves asset identifiers to their metadata.
pub struct AssetRegistry {
    store: Arc<dyn LedgerStore>,
}

impl AssetRegistry {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn create_asset(&self, asset: Asset) -> Result<Asset, LedgerError> {
        self.store.insert_asset(&asset).await?;
        info!(asset_id = %asset.id, slug = %asset.slug, "asset created");
        Ok(asset)
    }

    pub async fn get_asset(&self, slug: &str) -> Result<Asset, LedgerError> {
        self.store.get_asset(slug).await
    }

    pub async fn list_assets(&self) -> Result<Vec<Asset>, LedgerError> {
        self.store.list_assets().await
    }
}
