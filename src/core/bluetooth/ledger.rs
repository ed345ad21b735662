//! Discovered peripheral ledger
//! Keeps at most one record per peripheral, ranked by signal strength.

use std::collections::HashSet;

use crate::core::bluetooth::types::{PeripheralId, PeripheralRecord};

#[derive(Debug, Default)]
pub struct DiscoveryLedger {
    ids: HashSet<PeripheralId>,
    /// Sorted by descending RSSI; ties keep insertion order
    ranked: Vec<PeripheralRecord>,
}

impl DiscoveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a newly seen peripheral. Returns false without touching the ledger when the
    /// peripheral is already listed (the first sighting wins) or its signal strength is
    /// outside (-100, 0] dBm.
    pub fn offer(&mut self, record: PeripheralRecord) -> bool {
        if self.ids.contains(&record.id) || !record.has_listable_rssi() {
            return false;
        }

        self.ids.insert(record.id.clone());
        self.ranked.push(record);
        // stable sort
        self.ranked.sort_by(|a, b| b.rssi.total_cmp(&a.rssi));
        true
    }

    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &PeripheralId) -> Option<&PeripheralRecord> {
        self.ranked.iter().find(|record| &record.id == id)
    }

    /// Current ranked view, strongest signal first
    pub fn snapshot(&self) -> Vec<PeripheralRecord> {
        self.ranked.clone()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.ranked.clear();
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, rssi: f32) -> PeripheralRecord {
        PeripheralRecord::new(PeripheralId::from(id), Some(id.to_string()), rssi, "")
    }

    fn strengths(ledger: &DiscoveryLedger) -> Vec<f32> {
        ledger.snapshot().iter().map(|r| r.rssi).collect()
    }

    #[test]
    fn first_sighting_wins() {
        let mut ledger = DiscoveryLedger::new();
        assert!(ledger.offer(record("a", -70.0)));
        assert!(!ledger.offer(record("a", -30.0)));

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.snapshot()[0].rssi, -70.0);
    }

    #[test]
    fn accepts_only_half_open_rssi_range() {
        let mut ledger = DiscoveryLedger::new();
        assert!(ledger.offer(record("zero", 0.0)));
        assert!(ledger.offer(record("just-below-zero", -0.0001)));
        assert!(!ledger.offer(record("floor", -100.0)));
        assert!(!ledger.offer(record("below-floor", -100.1)));
        assert!(!ledger.offer(record("positive", 3.0)));
        assert!(!ledger.offer(record("nan", f32::NAN)));

        assert_eq!(ledger.len(), 2);
        assert!(!ledger.contains(&PeripheralId::from("floor")));
    }

    #[test]
    fn snapshot_is_ranked_by_signal_strength() {
        let mut ledger = DiscoveryLedger::new();
        for (id, rssi) in [("far", -90.0), ("near", -40.0), ("mid", -60.0)] {
            ledger.offer(record(id, rssi));
        }
        assert_eq!(strengths(&ledger), vec![-40.0, -60.0, -90.0]);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut ledger = DiscoveryLedger::new();
        ledger.offer(record("first", -60.0));
        ledger.offer(record("strong", -20.0));
        ledger.offer(record("second", -60.0));

        let ids: Vec<String> = ledger.snapshot().into_iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["strong", "first", "second"]);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut ledger = DiscoveryLedger::new();
        ledger.offer(record("a", -50.0));
        ledger.clear();

        assert!(ledger.is_empty());
        assert!(ledger.offer(record("a", -50.0)));
    }
}
