// src/backend/storage/ledger_log.rs
use crate::error::AccessError;
use crate::models::common::PrincipalId;
use crate::models::credit::LedgerReceipt;
use crate::storage::memory::{get_ledger_log_data_memory, get_ledger_log_index_memory, Memory};
use crate::storage::storable::Cbor;
use ic_stable_structures::StableLog;
use std::cell::RefCell;

type StorableLedgerReceipt = Cbor<LedgerReceipt>;

thread_local! {
    /// Ledger journal: append-only log of applied debits and credits.
    static LEDGER_LOG: RefCell<StableLog<StorableLedgerReceipt, Memory, Memory>> = RefCell::new(
        StableLog::init(get_ledger_log_index_memory(), get_ledger_log_data_memory())
            .expect("Failed to initialize ledger log")
    );
}

/// Appends a receipt to the journal and returns its index.
pub fn append_ledger_entry(receipt: LedgerReceipt) -> Result<u64, AccessError> {
    LEDGER_LOG.with(|log| {
        log.borrow_mut()
            .append(&Cbor(receipt))
            .map_err(|e| AccessError::InternalError(format!("Failed to append ledger entry: {:?}", e)))
    })
}

/// Newest-first page of one principal's receipts.
pub fn list_ledger_entries(principal: PrincipalId, offset: usize, limit: usize) -> Vec<LedgerReceipt> {
    LEDGER_LOG.with(|log| {
        let log = log.borrow();
        (0..log.len())
            .rev()
            .filter_map(|idx| log.get(idx))
            .map(|entry| entry.0)
            .filter(|receipt| receipt.principal == principal)
            .skip(offset)
            .take(limit)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::credit::LedgerEntryKind;
    use crate::testing::principal;

    fn receipt(who: u8, amount: u64, at: u64) -> LedgerReceipt {
        LedgerReceipt {
            principal: principal(who),
            kind: LedgerEntryKind::Credit,
            amount,
            reason: "top-up".to_string(),
            balance_after: amount,
            at,
        }
    }

    #[test]
    fn pages_are_newest_first_and_per_principal() {
        append_ledger_entry(receipt(1, 5, 1)).unwrap();
        append_ledger_entry(receipt(2, 6, 2)).unwrap();
        append_ledger_entry(receipt(1, 7, 3)).unwrap();

        let page = list_ledger_entries(principal(1), 0, 10);
        assert_eq!(page.iter().map(|r| r.amount).collect::<Vec<_>>(), vec![7, 5]);
        assert_eq!(list_ledger_entries(principal(1), 1, 10).len(), 1);
        assert!(list_ledger_entries(principal(3), 0, 10).is_empty());
    }
}
