use std::sync::Arc;

use metrics::{counter, histogram};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::amount::Amount;
use crate::error::LedgerError;
use crate::transaction::{LedgerEntry, Transaction, TransactionKind};
use crate::LedgerStore;

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source_wallet_id: Uuid,
    pub dest_wallet_id: Uuid,
    pub amount: Amount,
    pub kind: TransactionKind,
    pub idempotency_key: String,
    pub metadata: Option<String>,
}

/// The only writer of wallet balances and ledger rows.
///
/// Each transfer runs as one atomic unit: idempotency resolution, row locks
/// in a direction-independent order, balance mutation and the double-entry
/// pair either all commit together or leave no trace.
pub struct TransferEngine {
    store: Arc<dyn LedgerStore>,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn transfer(&self, request: TransferRequest) -> Result<Transaction, LedgerError> {
        if request.amount.is_zero() {
            warn!(key = %request.idempotency_key, "transfer rejected: zero amount");
            return Err(LedgerError::InvalidAmount);
        }
        if request.source_wallet_id == request.dest_wallet_id {
            warn!(
                wallet_id = %request.source_wallet_id,
                key = %request.idempotency_key,
                "transfer rejected: source equals destination"
            );
            return Err(LedgerError::SelfTransfer);
        }

        info!(
            source = %request.source_wallet_id,
            dest = %request.dest_wallet_id,
            amount = %request.amount,
            kind = request.kind.as_str(),
            key = %request.idempotency_key,
            "transfer initiated"
        );

        let result = match self.execute(&request).await {
            // Lost the header-insert race against a concurrent request with
            // the same key. The winner has committed by the time our unit
            // failed, so a fresh read observes its transaction.
            Err(LedgerError::DuplicateIdempotencyKey) => {
                debug!(key = %request.idempotency_key, "idempotency insert race lost, re-reading");
                self.resolve_committed(&request).await
            }
            other => other,
        };

        match &result {
            Ok(transaction) => {
                counter!("ledger.transfers.total", "status" => "success").increment(1);
                info!(
                    transaction_id = %transaction.id,
                    key = %request.idempotency_key,
                    "transfer completed"
                );
            }
            Err(err) => {
                counter!("ledger.transfers.total", "status" => "failed").increment(1);
                warn!(key = %request.idempotency_key, error = %err, "transfer failed");
            }
        }

        result
    }

    async fn execute(&self, request: &TransferRequest) -> Result<Transaction, LedgerError> {
        let mut unit = self.store.begin().await?;

        // 1. Idempotency resolution. A match short-circuits before any lock
        //    or write; dropping the unit rolls the read-only work back.
        if let Some(prior) = unit
            .find_transaction_by_key(&request.idempotency_key)
            .await?
        {
            return Self::replay(prior, request);
        }

        // 2. Row locks sorted by wallet id, never by role. Two opposite
        //    transfers between the same pair lock in the same order and
        //    cannot form a cycle.
        let mut order = [request.source_wallet_id, request.dest_wallet_id];
        order.sort();
        unit.lock_wallets(&order).await?;

        // 3. & 4. Load and validate both wallets under the locks. System
        //    wallets get no special treatment here.
        let source = unit
            .get_wallet(request.source_wallet_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(request.source_wallet_id))?;
        if source.balance < request.amount {
            return Err(LedgerError::InsufficientFunds);
        }
        let dest = unit
            .get_wallet(request.dest_wallet_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(request.dest_wallet_id))?;
        if source.asset_id != dest.asset_id {
            return Err(LedgerError::AssetMismatch);
        }

        // 5. The header carries every identifying parameter a future retry
        //    is compared against.
        let transaction = Transaction::new(
            request.kind,
            source.asset_id,
            source.id,
            dest.id,
            request.amount.clone(),
            request.idempotency_key.clone(),
            request.metadata.clone(),
        );
        unit.insert_transaction(&transaction).await?;

        // 6. Balance mutation inside the same unit.
        unit.debit_wallet(source.id, &request.amount).await?;
        unit.credit_wallet(dest.id, &request.amount).await?;

        // 7. The double-entry pair.
        let (debit, credit) = LedgerEntry::pair_for(&transaction);
        unit.insert_entries(&[debit, credit]).await?;

        // 8. Nothing above is observable until here.
        unit.commit().await?;

        histogram!("ledger.transfer.amount", "kind" => request.kind.as_str())
            .record(request.amount.to_string().parse::<f64>().unwrap_or(f64::INFINITY));

        Ok(transaction)
    }

    /// A retried request must match the committed header exactly; any
    /// divergence in amount, wallets or kind is a conflict, not a replay.
    fn replay(prior: Transaction, request: &TransferRequest) -> Result<Transaction, LedgerError> {
        if prior.amount != request.amount
            || prior.source_wallet_id != request.source_wallet_id
            || prior.dest_wallet_id != request.dest_wallet_id
            || prior.kind != request.kind
        {
            warn!(
                key = %request.idempotency_key,
                transaction_id = %prior.id,
                "idempotency key reused with different parameters"
            );
            return Err(LedgerError::IdempotencyConflict);
        }

        info!(
            transaction_id = %prior.id,
            key = %request.idempotency_key,
            "duplicate request, returning committed transaction"
        );
        counter!("ledger.transfers.replayed").increment(1);
        Ok(prior)
    }

    async fn resolve_committed(
        &self,
        request: &TransferRequest,
    ) -> Result<Transaction, LedgerError> {
        let mut unit = self.store.begin().await?;
        match unit
            .find_transaction_by_key(&request.idempotency_key)
            .await?
        {
            Some(prior) => Self::replay(prior, request),
            None => Err(LedgerError::Storage(
                "transaction vanished after idempotency key conflict".to_string(),
            )),
        }
    }
}
