use std::sync::Arc;

use uuid::Uuid;
use wallet_ledger::adapters::MemoryStore;
use wallet_ledger::{
    Amount, Asset, AssetRegistry, Direction, HistoryReader, LedgerError, LedgerStore,
    TransactionKind, TransferEngine, TransferRequest, WalletStore,
};

struct Harness {
    engine: Arc<TransferEngine>,
    wallets: WalletStore,
    history: HistoryReader,
    assets: AssetRegistry,
}

async fn setup() -> Harness {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
    let assets = AssetRegistry::new(Arc::clone(&store));
    assets
        .create_asset(Asset::new("gold", "Gold coins", 0))
        .await
        .unwrap();
    Harness {
        engine: Arc::new(TransferEngine::new(Arc::clone(&store))),
        wallets: WalletStore::new(Arc::clone(&store)),
        history: HistoryReader::new(store),
        assets,
    }
}

fn spend(source: Uuid, dest: Uuid, amount: u64, key: &str) -> TransferRequest {
    TransferRequest {
        source_wallet_id: source,
        dest_wallet_id: dest,
        amount: Amount::from(amount),
        kind: TransactionKind::Spend,
        idempotency_key: key.to_string(),
        metadata: None,
    }
}

#[tokio::test]
async fn transfer_moves_funds_and_writes_the_entry_pair() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(100))
        .await
        .unwrap();
    let b = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(50))
        .await
        .unwrap();

    let txn = h.engine.transfer(spend(a.id, b.id, 30, "key1")).await.unwrap();

    assert_eq!(h.wallets.get_balance(a.id).await.unwrap(), Amount::from(70));
    assert_eq!(h.wallets.get_balance(b.id).await.unwrap(), Amount::from(80));

    let a_page = h.history.get_history(a.id, 10, None).await.unwrap();
    let b_page = h.history.get_history(b.id, 10, None).await.unwrap();
    assert_eq!(a_page.entries.len(), 1);
    assert_eq!(b_page.entries.len(), 1);

    let debit = &a_page.entries[0];
    let credit = &b_page.entries[0];
    assert_eq!(debit.direction, Direction::Debit);
    assert_eq!(credit.direction, Direction::Credit);
    assert_eq!(debit.transaction_id, txn.id);
    assert_eq!(credit.transaction_id, txn.id);
    // Conservation: both entries carry the transaction's amount.
    assert_eq!(debit.amount, Amount::from(30));
    assert_eq!(credit.amount, Amount::from(30));
}

#[tokio::test]
async fn retried_request_replays_without_mutating_again() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(100))
        .await
        .unwrap();
    let b = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(50))
        .await
        .unwrap();

    let first = h.engine.transfer(spend(a.id, b.id, 10, "key2")).await.unwrap();
    let second = h.engine.transfer(spend(a.id, b.id, 10, "key2")).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.wallets.get_balance(a.id).await.unwrap(), Amount::from(90));
    assert_eq!(h.wallets.get_balance(b.id).await.unwrap(), Amount::from(60));

    // Exactly one entry pair exists.
    let a_page = h.history.get_history(a.id, 10, None).await.unwrap();
    assert_eq!(a_page.entries.len(), 1);
}

#[tokio::test]
async fn reused_key_with_different_parameters_is_a_conflict() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(100))
        .await
        .unwrap();
    let b = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(50))
        .await
        .unwrap();

    h.engine.transfer(spend(a.id, b.id, 30, "key1")).await.unwrap();

    let conflicting = h.engine.transfer(spend(a.id, b.id, 999, "key1")).await;
    assert!(matches!(conflicting, Err(LedgerError::IdempotencyConflict)));

    // Swapped direction under the same key is also a conflict.
    let swapped = h.engine.transfer(spend(b.id, a.id, 30, "key1")).await;
    assert!(matches!(swapped, Err(LedgerError::IdempotencyConflict)));

    // A different kind under the same key is a conflict too.
    let mut rekinded = spend(a.id, b.id, 30, "key1");
    rekinded.kind = TransactionKind::Bonus;
    let rekinded = h.engine.transfer(rekinded).await;
    assert!(matches!(rekinded, Err(LedgerError::IdempotencyConflict)));

    // Nothing moved beyond the original transfer.
    assert_eq!(h.wallets.get_balance(a.id).await.unwrap(), Amount::from(70));
    assert_eq!(h.wallets.get_balance(b.id).await.unwrap(), Amount::from(80));
}

#[tokio::test]
async fn insufficient_funds_leaves_state_untouched() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(500))
        .await
        .unwrap();
    let b = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(0))
        .await
        .unwrap();

    let result = h.engine.transfer(spend(a.id, b.id, 1000, "key3")).await;
    assert!(matches!(result, Err(LedgerError::InsufficientFunds)));

    assert_eq!(h.wallets.get_balance(a.id).await.unwrap(), Amount::from(500));
    let page = h.history.get_history(a.id, 10, None).await.unwrap();
    assert!(page.entries.is_empty());

    // Retrying the failed key later with sufficient funds works: nothing was
    // recorded for it.
    let result = h.engine.transfer(spend(a.id, b.id, 400, "key3")).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn self_transfer_is_rejected() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(100))
        .await
        .unwrap();

    let result = h.engine.transfer(spend(a.id, a.id, 10, "key4")).await;
    assert!(matches!(result, Err(LedgerError::SelfTransfer)));
}

#[tokio::test]
async fn zero_amount_is_rejected_before_storage() {
    let h = setup().await;
    let result = h
        .engine
        .transfer(spend(Uuid::now_v7(), Uuid::now_v7(), 0, "key5"))
        .await;
    assert!(matches!(result, Err(LedgerError::InvalidAmount)));
}

#[tokio::test]
async fn unknown_wallets_are_reported() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(100))
        .await
        .unwrap();

    let ghost = Uuid::now_v7();
    let result = h.engine.transfer(spend(ghost, a.id, 10, "key6")).await;
    assert!(matches!(result, Err(LedgerError::WalletNotFound(id)) if id == ghost));

    let result = h.engine.transfer(spend(a.id, ghost, 10, "key7")).await;
    assert!(matches!(result, Err(LedgerError::WalletNotFound(id)) if id == ghost));
}

#[tokio::test]
async fn cross_asset_transfer_is_rejected() {
    let h = setup().await;
    h.assets
        .create_asset(Asset::new("silver", "Silver coins", 0))
        .await
        .unwrap();

    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(100))
        .await
        .unwrap();
    let b = h
        .wallets
        .create_wallet(Uuid::now_v7(), "silver", Amount::from(100))
        .await
        .unwrap();

    let result = h.engine.transfer(spend(a.id, b.id, 10, "key8")).await;
    assert!(matches!(result, Err(LedgerError::AssetMismatch)));
    assert_eq!(h.wallets.get_balance(a.id).await.unwrap(), Amount::from(100));
}

#[tokio::test]
async fn wallet_uniqueness_is_enforced() {
    let h = setup().await;
    let owner = Uuid::now_v7();

    h.wallets
        .create_wallet(owner, "gold", Amount::zero())
        .await
        .unwrap();
    let dup = h.wallets.create_wallet(owner, "gold", Amount::zero()).await;
    assert!(matches!(dup, Err(LedgerError::DuplicateWallet)));

    h.wallets
        .create_system_wallet("gold", Amount::zero())
        .await
        .unwrap();
    let dup = h.wallets.create_system_wallet("gold", Amount::zero()).await;
    assert!(matches!(dup, Err(LedgerError::DuplicateWallet)));
}

#[tokio::test]
async fn pagination_reconstructs_the_full_history() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(1000))
        .await
        .unwrap();
    let b = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(0))
        .await
        .unwrap();

    for i in 0..15u64 {
        h.engine
            .transfer(spend(a.id, b.id, i + 1, &format!("page-key-{i}")))
            .await
            .unwrap();
    }

    let full = h.history.get_history(a.id, 100, None).await.unwrap();
    assert_eq!(full.entries.len(), 15);
    assert!(full.next_cursor.is_none());

    let first = h.history.get_history(a.id, 10, None).await.unwrap();
    assert_eq!(first.entries.len(), 10);
    let cursor = first.next_cursor.expect("a further page exists");

    let second = h.history.get_history(a.id, 10, Some(cursor)).await.unwrap();
    assert_eq!(second.entries.len(), 5);
    assert!(second.next_cursor.is_none());

    // No duplicate, no gap: the two pages are exactly the full scan.
    let paged_ids: Vec<_> = first
        .entries
        .iter()
        .chain(second.entries.iter())
        .map(|e| e.id)
        .collect();
    let full_ids: Vec<_> = full.entries.iter().map(|e| e.id).collect();
    assert_eq!(paged_ids, full_ids);
}

#[tokio::test]
async fn oversized_limit_is_clamped_not_overflowed() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(100))
        .await
        .unwrap();
    let b = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(0))
        .await
        .unwrap();

    h.engine.transfer(spend(a.id, b.id, 5, "clamp-key")).await.unwrap();

    let page = h.history.get_history(a.id, usize::MAX, None).await.unwrap();
    assert_eq!(page.entries.len(), 1);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn cursor_survives_its_wire_form_between_pages() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(100))
        .await
        .unwrap();
    let b = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(0))
        .await
        .unwrap();

    for i in 0..5u64 {
        h.engine
            .transfer(spend(a.id, b.id, 1, &format!("wire-key-{i}")))
            .await
            .unwrap();
    }

    let full = h.history.get_history(a.id, 100, None).await.unwrap();

    // Walk one entry at a time, forcing every cursor through its string
    // form as an HTTP client would.
    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = h.history.get_history(a.id, 1, cursor).await.unwrap();
        seen.extend(page.entries.iter().map(|e| e.id));
        match page.next_cursor {
            Some(c) => cursor = Some(c.to_string().parse().unwrap()),
            None => break,
        }
    }

    let full_ids: Vec<_> = full.entries.iter().map(|e| e.id).collect();
    assert_eq!(seen, full_ids);
}

#[tokio::test]
async fn listing_users_yields_each_wallet_owner_once() {
    let h = setup().await;
    h.assets
        .create_asset(Asset::new("silver", "Silver coins", 0))
        .await
        .unwrap();

    let alice = Uuid::now_v7();
    let bob = Uuid::now_v7();
    h.wallets.create_wallet(alice, "gold", Amount::zero()).await.unwrap();
    h.wallets.create_wallet(alice, "silver", Amount::zero()).await.unwrap();
    h.wallets.create_wallet(bob, "gold", Amount::zero()).await.unwrap();
    h.wallets.create_system_wallet("gold", Amount::zero()).await.unwrap();

    let mut expected = vec![alice, bob];
    expected.sort();

    // Two wallets for one owner collapse to one entry; the system wallet
    // has no owner and is absent.
    assert_eq!(h.wallets.list_owners().await.unwrap(), expected);
}

#[tokio::test]
async fn history_of_unknown_wallet_is_not_found() {
    let h = setup().await;
    let ghost = Uuid::now_v7();
    let result = h.history.get_history(ghost, 10, None).await;
    assert!(matches!(result, Err(LedgerError::WalletNotFound(id)) if id == ghost));
}

#[tokio::test]
async fn alternating_concurrent_transfers_all_complete() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(1000))
        .await
        .unwrap();
    let b = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(1000))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10u64 {
        let engine = Arc::clone(&h.engine);
        // Direction alternates on every task; the sorted lock order keeps
        // opposite transfers from deadlocking.
        let request = if i % 2 == 0 {
            spend(a.id, b.id, 7, &format!("alt-key-{i}"))
        } else {
            spend(b.id, a.id, 3, &format!("alt-key-{i}"))
        };
        handles.push(tokio::spawn(async move { engine.transfer(request).await }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // 5 transfers of 7 one way, 5 of 3 the other: net -20 for a, +20 for b.
    assert_eq!(h.wallets.get_balance(a.id).await.unwrap(), Amount::from(980));
    assert_eq!(h.wallets.get_balance(b.id).await.unwrap(), Amount::from(1020));
}

#[tokio::test]
async fn concurrent_requests_with_one_key_mutate_once() {
    let h = setup().await;
    let a = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(100))
        .await
        .unwrap();
    let b = h
        .wallets
        .create_wallet(Uuid::now_v7(), "gold", Amount::from(0))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&h.engine);
        let request = spend(a.id, b.id, 25, "racing-key");
        handles.push(tokio::spawn(async move { engine.transfer(request).await }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }

    // Every caller observed the same committed transaction.
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(h.wallets.get_balance(a.id).await.unwrap(), Amount::from(75));
    assert_eq!(h.wallets.get_balance(b.id).await.unwrap(), Amount::from(25));
}
