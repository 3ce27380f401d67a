use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{AccountId, PickupInterval, Price, RawItem};
use crate::watcher::Transition;

/// Last observed state of one marketplace item, shared by every account that can see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub item_id: String,
    pub store_id: String,
    pub store_name: String,
    pub address: String,
    pub quantity: u32,
    pub price: Price,
    pub pickup: Option<PickupInterval>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl ItemSnapshot {
    pub fn from_raw(item: &RawItem, observed_at: DateTime<Utc>) -> Self {
        Self {
            item_id: item.item.item_id.clone(),
            store_id: item.store.store_id.clone(),
            store_name: item.store.store_name.clone(),
            address: item.store.store_location.address.address_line.clone(),
            quantity: item.items_available,
            price: item.item.price_including_taxes.clone(),
            pickup: item.pickup_interval.clone(),
            display_name: item.display_name.clone(),
            observed_at,
        }
    }
}

/// Which transition kinds an account wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPreferences {
    pub sold_out: bool,
    pub new_stock: bool,
    pub stock_reduced: bool,
    pub stock_increased: bool,
}

impl Default for AlertPreferences {
    fn default() -> Self {
        Self {
            sold_out: false,
            new_stock: true,
            stock_reduced: false,
            stock_increased: false,
        }
    }
}

impl AlertPreferences {
    pub fn is_enabled(&self, transition: Transition) -> bool {
        match transition {
            Transition::SoldOut => self.sold_out,
            Transition::NewStock => self.new_stock,
            Transition::StockReduced => self.stock_reduced,
            Transition::StockIncreased => self.stock_increased,
            Transition::Unchanged => false,
        }
    }

    /// Returns false for `Unchanged`, which cannot be subscribed to.
    pub fn set(&mut self, transition: Transition, enabled: bool) -> bool {
        let slot = match transition {
            Transition::SoldOut => &mut self.sold_out,
            Transition::NewStock => &mut self.new_stock,
            Transition::StockReduced => &mut self.stock_reduced,
            Transition::StockIncreased => &mut self.stock_increased,
            Transition::Unchanged => return false,
        };
        *slot = enabled;
        true
    }

    pub fn toggle(&mut self, transition: Transition) -> bool {
        let enabled = !self.is_enabled(transition);
        self.set(transition, enabled)
    }

    pub fn set_all(&mut self, enabled: bool) {
        for transition in Transition::ALERTS {
            self.set(transition, enabled);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub account: AccountId,
    pub store_id: String,
    pub store_name: String,
    pub added_at: DateTime<Utc>,
}

impl BlacklistEntry {
    pub fn new(account: AccountId, store_id: impl Into<String>, store_name: impl Into<String>) -> Self {
        Self {
            account,
            store_id: store_id.into(),
            store_name: store_name.into(),
            added_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preferences_only_new_stock() {
        let prefs = AlertPreferences::default();
        assert!(prefs.is_enabled(Transition::NewStock));
        assert!(!prefs.is_enabled(Transition::SoldOut));
        assert!(!prefs.is_enabled(Transition::StockReduced));
        assert!(!prefs.is_enabled(Transition::StockIncreased));
        assert!(!prefs.is_enabled(Transition::Unchanged));
    }

    #[test]
    fn test_toggle_and_set_all() {
        let mut prefs = AlertPreferences::default();
        assert!(prefs.toggle(Transition::SoldOut));
        assert!(prefs.sold_out);

        prefs.set_all(true);
        assert!(Transition::ALERTS.iter().all(|t| prefs.is_enabled(*t)));

        prefs.set_all(false);
        assert!(Transition::ALERTS.iter().all(|t| !prefs.is_enabled(*t)));

        assert!(!prefs.set(Transition::Unchanged, true));
        assert!(!prefs.is_enabled(Transition::Unchanged));
    }
}
