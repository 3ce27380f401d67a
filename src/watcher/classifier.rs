use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::api::RawItem;
use crate::storage::ItemSnapshot;

/// Kind of availability change between two observations of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    NewStock,
    SoldOut,
    StockReduced,
    StockIncreased,
    #[serde(rename = "none")]
    Unchanged,
}

impl Transition {
    /// Every kind an account can subscribe to.
    pub const ALERTS: [Transition; 4] = [
        Transition::NewStock,
        Transition::SoldOut,
        Transition::StockReduced,
        Transition::StockIncreased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::NewStock => "new_stock",
            Transition::SoldOut => "sold_out",
            Transition::StockReduced => "stock_reduced",
            Transition::StockIncreased => "stock_increased",
            Transition::Unchanged => "none",
        }
    }

    pub fn is_alert(&self) -> bool {
        !matches!(self, Transition::Unchanged)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition between a previous quantity (if the item was ever seen) and the fresh one.
pub fn classify_quantities(old: Option<u32>, new: u32) -> Transition {
    match old {
        None if new > 0 => Transition::NewStock,
        None => Transition::Unchanged,
        Some(old) if old > 0 && new == 0 => Transition::SoldOut,
        Some(0) if new > 0 => Transition::NewStock,
        Some(old) if old > new => Transition::StockReduced,
        Some(old) if old < new => Transition::StockIncreased,
        Some(_) => Transition::Unchanged,
    }
}

/// Per-cycle classification working set.
///
/// Holds the snapshots as they stood when the cycle began, the transitions already
/// decided this cycle (first observer wins) and the snapshots to be persisted once
/// the cycle ends. Snapshots left over from a failed save are part of both the
/// baseline and the pending writes until a fresh observation replaces them.
#[derive(Debug, Default)]
pub struct CycleClassifier {
    baseline: HashMap<String, ItemSnapshot>,
    decided: HashMap<String, Transition>,
    updated: HashMap<String, ItemSnapshot>,
    observed_at: Option<DateTime<Utc>>,
}

impl CycleClassifier {
    pub fn begin(
        mut baseline: HashMap<String, ItemSnapshot>,
        pending: HashMap<String, ItemSnapshot>,
    ) -> Self {
        baseline.extend(pending.iter().map(|(id, s)| (id.clone(), s.clone())));
        Self {
            baseline,
            decided: HashMap::new(),
            updated: pending,
            observed_at: Some(Utc::now()),
        }
    }

    /// Classifies one item seen by an account. Blacklisted stores must be filtered
    /// out by the caller before this runs.
    pub fn classify(&mut self, item: &RawItem) -> Transition {
        let item_id = item.item_id().to_string();
        let observed_at = self.observed_at.unwrap_or_else(Utc::now);

        let transition = match self.decided.get(&item_id) {
            Some(transition) => *transition,
            None => {
                let old = self.baseline.get(&item_id).map(|snapshot| snapshot.quantity);
                let transition = classify_quantities(old, item.items_available);
                if transition.is_alert() {
                    self.decided.insert(item_id.clone(), transition);
                }
                transition
            }
        };

        self.updated
            .insert(item_id, ItemSnapshot::from_raw(item, observed_at));

        transition
    }

    /// Transition already claimed for `item_id` in this cycle, if any.
    pub fn decided(&self, item_id: &str) -> Option<Transition> {
        self.decided.get(item_id).copied()
    }

    /// The freshest snapshot of `item_id` this cycle, falling back to the baseline.
    pub fn snapshot(&self, item_id: &str) -> Option<&ItemSnapshot> {
        self.updated
            .get(item_id)
            .or_else(|| self.baseline.get(item_id))
    }

    /// Snapshots written this cycle plus any carried-over ones, ready for a single bulk save.
    pub fn into_updates(self) -> Vec<ItemSnapshot> {
        let mut updates: Vec<ItemSnapshot> = self.updated.into_values().collect();
        updates.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Address, ItemInfo, Price, StoreInfo, StoreLocation};

    fn raw_item(item_id: &str, quantity: u32) -> RawItem {
        RawItem {
            item: ItemInfo {
                item_id: item_id.to_string(),
                price_including_taxes: Price {
                    code: "EUR".into(),
                    minor_units: 399,
                    decimals: 2,
                },
            },
            store: StoreInfo {
                store_id: "s-1".into(),
                store_name: "Bakery".into(),
                store_location: StoreLocation {
                    address: Address {
                        address_line: "Main St 1".into(),
                    },
                },
            },
            items_available: quantity,
            pickup_interval: None,
            display_name: None,
        }
    }

    fn baseline(entries: &[(&str, u32)]) -> HashMap<String, ItemSnapshot> {
        entries
            .iter()
            .map(|(id, qty)| {
                (
                    id.to_string(),
                    ItemSnapshot::from_raw(&raw_item(id, *qty), Utc::now()),
                )
            })
            .collect()
    }

    #[test]
    fn test_quantity_table() {
        let cases = [
            (None, 0, Transition::Unchanged),
            (None, 4, Transition::NewStock),
            (Some(0), 0, Transition::Unchanged),
            (Some(0), 3, Transition::NewStock),
            (Some(2), 0, Transition::SoldOut),
            (Some(5), 2, Transition::StockReduced),
            (Some(2), 5, Transition::StockIncreased),
            (Some(3), 3, Transition::Unchanged),
        ];

        for (old, new, expected) in cases {
            assert_eq!(
                classify_quantities(old, new),
                expected,
                "old={:?} new={}",
                old,
                new
            );
        }
    }

    #[test]
    fn test_transition_names_match_serde() {
        for transition in Transition::ALERTS {
            assert_eq!(
                serde_json::to_string(&transition).unwrap(),
                format!("\"{}\"", transition.as_str())
            );
        }
        assert_eq!(
            serde_json::to_string(&Transition::Unchanged).unwrap(),
            "\"none\""
        );
    }

    #[test]
    fn test_first_observer_claims_transition() {
        let mut cycle = CycleClassifier::begin(baseline(&[("42", 0)]), HashMap::new());

        assert_eq!(cycle.classify(&raw_item("42", 3)), Transition::NewStock);
        // A second account sees a different quantity later in the same cycle.
        assert_eq!(cycle.classify(&raw_item("42", 1)), Transition::NewStock);

        assert_eq!(cycle.decided("42"), Some(Transition::NewStock));
        assert_eq!(cycle.snapshot("42").map(|s| s.quantity), Some(1));
    }

    #[test]
    fn test_unchanged_is_not_recorded() {
        let mut cycle = CycleClassifier::begin(baseline(&[("7", 2)]), HashMap::new());

        assert_eq!(cycle.classify(&raw_item("7", 2)), Transition::Unchanged);
        assert_eq!(cycle.decided("7"), None);
        assert_eq!(cycle.classify(&raw_item("7", 0)), Transition::SoldOut);
    }

    #[test]
    fn test_unseen_empty_item_is_stored_without_transition() {
        let mut cycle = CycleClassifier::begin(HashMap::new(), HashMap::new());

        assert_eq!(cycle.classify(&raw_item("99", 0)), Transition::Unchanged);

        let updates = cycle.into_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].item_id, "99");
        assert_eq!(updates[0].quantity, 0);
    }

    #[test]
    fn test_missing_items_are_left_alone() {
        let mut cycle = CycleClassifier::begin(baseline(&[("1", 4), ("2", 4)]), HashMap::new());
        cycle.classify(&raw_item("1", 4));

        assert_eq!(cycle.decided("2"), None);
        let updates = cycle.into_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].item_id, "1");
    }

    #[test]
    fn test_pending_snapshots_are_carried_into_updates() {
        let stored = baseline(&[("42", 0), ("7", 1)]);
        let pending = baseline(&[("42", 3), ("7", 5)]);
        let mut cycle = CycleClassifier::begin(stored, pending);

        // Compared against the unsaved quantity, not the stale stored one.
        assert_eq!(cycle.classify(&raw_item("42", 3)), Transition::Unchanged);

        let updates = cycle.into_updates();
        let quantities: Vec<(&str, u32)> = updates
            .iter()
            .map(|s| (s.item_id.as_str(), s.quantity))
            .collect();
        assert_eq!(quantities, vec![("42", 3), ("7", 5)]);
    }
}
