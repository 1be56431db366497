// src/backend/storage/metrics.rs
use crate::metrics::MetricsSnapshot;
use crate::storage::memory::{get_metrics_memory, Memory};
use crate::storage::storable::Cbor;
use ic_stable_structures::StableCell;
use std::cell::RefCell;

type StorableMetrics = Cbor<MetricsSnapshot>;

thread_local! {
    /// Last persisted metrics snapshot, restored after an upgrade.
    static METRICS_CELL: RefCell<StableCell<StorableMetrics, Memory>> = RefCell::new(
        StableCell::init(get_metrics_memory(), Cbor(MetricsSnapshot::default()))
            .expect("Failed to initialize metrics stable cell")
    );
}

pub fn get_metrics() -> MetricsSnapshot {
    METRICS_CELL.with(|cell| cell.borrow().get().0.clone())
}

pub fn save_metrics(snapshot: MetricsSnapshot) -> Result<(), String> {
    METRICS_CELL.with(|cell| {
        cell.borrow_mut()
            .set(Cbor(snapshot))
            .map(|_| ())
            .map_err(|e| format!("Failed to update metrics: {:?}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_survives_a_save() {
        let snapshot = MetricsSnapshot { codes_issued: 3, ..MetricsSnapshot::default() };
        save_metrics(snapshot.clone()).unwrap();
        assert_eq!(get_metrics(), snapshot);
    }
}
