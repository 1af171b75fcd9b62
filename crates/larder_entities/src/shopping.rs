//! Shopping lists.
//!
//! `total_cost_cents` belongs to the server: clients never send it, and a
//! local edit racing with a push still picks up the server's new total.

use crate::error::{require_text, EntityError, EntityResult, Validate};
use crate::wire::synced_from;
use larder_storage::SyncRecord;
use larder_sync_engine::{encode_record, EntityAdapter, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field the server fills in.
pub const FIELD_TOTAL_COST: &str = "total_cost_cents";

/// One entry on a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingListItem {
    /// What to buy.
    pub name: String,
    /// How many.
    pub quantity: u32,
    /// Ticked off in the shop.
    #[serde(default)]
    pub checked: bool,
    /// Unit price, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
}

impl ShoppingListItem {
    /// Creates an unchecked, unpriced entry.
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        Self {
            name: name.into(),
            quantity,
            checked: false,
            price_cents: None,
        }
    }

    /// Sets the unit price.
    pub fn priced(mut self, cents: i64) -> Self {
        self.price_cents = Some(cents);
        self
    }

    /// Price times quantity, or 0 if unpriced.
    pub fn cost_cents(&self) -> i64 {
        self.price_cents.unwrap_or(0) * i64::from(self.quantity)
    }
}

/// A shopping list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingList {
    /// List name.
    pub name: String,
    /// Entries in display order.
    #[serde(default)]
    pub items: Vec<ShoppingListItem>,
    /// Server-computed total; `None` until the server has seen the list.
    #[serde(default)]
    pub total_cost_cents: Option<i64>,
}

impl ShoppingList {
    /// Creates an empty list.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            total_cost_cents: None,
        }
    }

    /// Appends an entry.
    pub fn with_item(mut self, item: ShoppingListItem) -> Self {
        self.items.push(item);
        self
    }

    /// Ticks off every entry named `name`. Returns how many changed.
    pub fn check(&mut self, name: &str) -> usize {
        let mut changed = 0;
        for item in self.items.iter_mut().filter(|i| i.name == name && !i.checked) {
            item.checked = true;
            changed += 1;
        }
        changed
    }

    /// Entries not yet ticked off.
    pub fn remaining(&self) -> impl Iterator<Item = &ShoppingListItem> {
        self.items.iter().filter(|i| !i.checked)
    }
}

impl Validate for ShoppingList {
    fn validate(&self) -> EntityResult<()> {
        require_text("name", &self.name)?;
        for item in &self.items {
            require_text("items.name", &item.name)?;
            if item.quantity == 0 {
                return Err(EntityError::out_of_range("items.quantity", "must be at least 1"));
            }
            if item.price_cents.is_some_and(|p| p < 0) {
                return Err(EntityError::out_of_range("items.price_cents", "must not be negative"));
            }
        }
        Ok(())
    }
}

/// Sums the cost of every entry.
pub fn total_cost_cents(items: &[ShoppingListItem]) -> i64 {
    items.iter().map(ShoppingListItem::cost_cents).sum()
}

/// Fills `total_cost_cents` on a wire record the way the backend does.
///
/// Records whose items cannot be read are left alone.
pub fn stamp_total_cost(record: &mut Value) {
    let Some(items) = record.get("items").cloned() else {
        return;
    };
    if let Ok(items) = serde_json::from_value::<Vec<ShoppingListItem>>(items) {
        if let Some(object) = record.as_object_mut() {
            object.insert(FIELD_TOTAL_COST.into(), Value::from(total_cost_cents(&items)));
        }
    }
}

#[derive(Serialize)]
struct OutgoingList<'a> {
    name: &'a str,
    items: &'a [ShoppingListItem],
}

/// Adapter for `/shopping-lists`.
pub struct ShoppingListAdapter;

impl EntityAdapter for ShoppingListAdapter {
    type Entity = ShoppingList;
    const RESOURCE: &'static str = "shopping-lists";

    fn to_remote(record: &SyncRecord<ShoppingList>) -> SyncResult<Value> {
        let outgoing = OutgoingList {
            name: &record.body.name,
            items: &record.body.items,
        };
        encode_record(record, &outgoing)
    }

    fn from_remote(value: Value) -> SyncResult<SyncRecord<ShoppingList>> {
        synced_from(value)
    }

    fn absorb_server_fields(local: &mut ShoppingList, canonical: &ShoppingList) {
        local.total_cost_cents = canonical.total_cost_cents;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn weekly() -> ShoppingList {
        ShoppingList::new("weekly")
            .with_item(ShoppingListItem::new("lemons", 3).priced(45))
            .with_item(ShoppingListItem::new("yogurt", 2).priced(129))
            .with_item(ShoppingListItem::new("basil", 1))
    }

    #[test]
    fn totals() {
        assert_eq!(total_cost_cents(&weekly().items), 3 * 45 + 2 * 129);
        assert_eq!(total_cost_cents(&[]), 0);
    }

    #[test]
    fn checking_items() {
        let mut list = weekly();
        assert_eq!(list.check("lemons"), 1);
        assert_eq!(list.check("lemons"), 0);
        assert_eq!(list.remaining().count(), 2);
    }

    #[test]
    fn validation() {
        assert!(weekly().validate().is_ok());
        assert!(ShoppingList::new("x")
            .with_item(ShoppingListItem::new("eggs", 0))
            .validate()
            .is_err());
        assert!(ShoppingList::new("x")
            .with_item(ShoppingListItem::new("eggs", 1).priced(-5))
            .validate()
            .is_err());
    }

    #[test]
    fn server_total_is_not_sent() {
        let mut list = weekly();
        list.total_cost_cents = Some(1);
        let record = SyncRecord::new_local(list, Utc::now());

        let value = ShoppingListAdapter::to_remote(&record).unwrap();
        assert!(value.get(FIELD_TOTAL_COST).is_none());
        assert_eq!(value["items"][0]["price_cents"], 45);
        assert!(value["items"][2].get("price_cents").is_none());
    }

    #[test]
    fn stamped_total_is_read_back() {
        let record = SyncRecord::new_local(weekly(), Utc::now());
        let mut value = ShoppingListAdapter::to_remote(&record).unwrap();
        stamp_total_cost(&mut value);

        let back = ShoppingListAdapter::from_remote(value).unwrap();
        assert_eq!(back.body.total_cost_cents, Some(393));
        assert_eq!(back.body.items, weekly().items);
    }

    #[test]
    fn absorb_keeps_local_items() {
        let mut local = weekly();
        local.check("basil");
        let mut canonical = weekly();
        canonical.total_cost_cents = Some(393);

        ShoppingListAdapter::absorb_server_fields(&mut local, &canonical);
        assert_eq!(local.total_cost_cents, Some(393));
        assert!(local.items[2].checked);
    }

    #[test]
    fn stamping_ignores_unreadable_items() {
        let mut value = serde_json::json!({"items": "nope"});
        stamp_total_cost(&mut value);
        assert!(value.get(FIELD_TOTAL_COST).is_none());
    }
}
