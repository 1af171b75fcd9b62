//! Property-based test generators using proptest.
//!
//! Every entity strategy produces records that pass
//! [`larder_entities::Validate`], so the reference server accepts them.

use chrono::{Days, NaiveDate};
use larder_entities::{
    Ingredient, InventoryItem, Meal, MealPlan, Recipe, ShoppingList, ShoppingListItem,
    StorageLocation,
};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for short lowercase names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}( [a-z]{1,8})?").expect("Invalid regex")
}

/// Strategy for quantities in quarter steps.
///
/// Quarters are exact in binary, so values survive a JSON round trip.
pub fn quantity_strategy() -> impl Strategy<Value = f64> {
    (0u32..4000).prop_map(|q| f64::from(q) / 4.0)
}

/// Strategy for dates in 2026.
pub fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2026, 1, 1).expect("Invalid date");
    (0u64..365).prop_map(move |d| start + Days::new(d))
}

/// Strategy for storage locations.
pub fn location_strategy() -> impl Strategy<Value = StorageLocation> {
    prop_oneof![
        Just(StorageLocation::Pantry),
        Just(StorageLocation::Fridge),
        Just(StorageLocation::Freezer),
    ]
}

/// Strategy for inventory items.
pub fn inventory_item_strategy() -> impl Strategy<Value = InventoryItem> {
    (
        name_strategy(),
        quantity_strategy(),
        prop::sample::select(vec!["g", "kg", "ml", "l", "pcs"]),
        location_strategy(),
        prop::option::of(date_strategy()),
    )
        .prop_map(|(name, quantity, unit, location, expires_on)| InventoryItem {
            name,
            quantity,
            unit: unit.to_string(),
            location,
            expires_on,
        })
}

/// Strategy for recipes.
pub fn recipe_strategy() -> impl Strategy<Value = Recipe> {
    (
        name_strategy(),
        1u32..12,
        prop::collection::vec(
            (name_strategy(), quantity_strategy())
                .prop_map(|(name, quantity)| Ingredient::new(name, quantity, "g")),
            0..6,
        ),
        prop::collection::vec(name_strategy(), 0..4),
    )
        .prop_map(|(title, servings, ingredients, steps)| Recipe {
            title,
            servings,
            ingredients,
            steps,
        })
}

/// Strategy for meal slots.
pub fn meal_strategy() -> impl Strategy<Value = Meal> {
    prop_oneof![
        Just(Meal::Breakfast),
        Just(Meal::Lunch),
        Just(Meal::Dinner),
        Just(Meal::Snack),
    ]
}

/// Strategy for meal plans, either pointing at a recipe or carrying notes.
pub fn meal_plan_strategy() -> impl Strategy<Value = MealPlan> {
    (
        date_strategy(),
        meal_strategy(),
        prop::option::of(any::<u128>().prop_map(Uuid::from_u128)),
        name_strategy(),
    )
        .prop_map(|(date, meal, recipe_id, notes)| match recipe_id {
            Some(id) => MealPlan::recipe(date, meal, id),
            None => MealPlan::note(date, meal, notes),
        })
}

/// Strategy for shopping lists. The total is left for the server.
pub fn shopping_list_strategy() -> impl Strategy<Value = ShoppingList> {
    (
        name_strategy(),
        prop::collection::vec(
            (name_strategy(), 1u32..10, prop::option::of(0i64..2000), any::<bool>()).prop_map(
                |(name, quantity, price, checked)| {
                    let mut item = ShoppingListItem::new(name, quantity);
                    item.price_cents = price;
                    item.checked = checked;
                    item
                },
            ),
            0..8,
        ),
    )
        .prop_map(|(name, items)| {
            items
                .into_iter()
                .fold(ShoppingList::new(name), ShoppingList::with_item)
        })
}

/// One step of a simulated user session against the inventory.
///
/// `slot` picks among the records created so far, modulo their count.
#[derive(Debug, Clone)]
pub enum InventoryOp {
    /// Create a new item.
    Create(InventoryItem),
    /// Change the quantity of an existing item.
    SetQuantity {
        /// Which record.
        slot: usize,
        /// New quantity.
        quantity: f64,
    },
    /// Delete an existing item.
    Delete {
        /// Which record.
        slot: usize,
    },
    /// Run a sync cycle.
    Sync,
}

/// Strategy for a single session step.
pub fn inventory_op_strategy() -> impl Strategy<Value = InventoryOp> {
    prop_oneof![
        3 => inventory_item_strategy().prop_map(InventoryOp::Create),
        3 => (any::<usize>(), quantity_strategy())
            .prop_map(|(slot, quantity)| InventoryOp::SetQuantity { slot, quantity }),
        2 => any::<usize>().prop_map(|slot| InventoryOp::Delete { slot }),
        1 => Just(InventoryOp::Sync),
    ]
}

/// Strategy for a session of up to `max_len` steps.
pub fn inventory_session_strategy(max_len: usize) -> impl Strategy<Value = Vec<InventoryOp>> {
    prop::collection::vec(inventory_op_strategy(), 1..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_entities::Validate;

    proptest! {
        #[test]
        fn inventory_items_are_valid(item in inventory_item_strategy()) {
            prop_assert!(item.validate().is_ok());
        }

        #[test]
        fn recipes_are_valid(recipe in recipe_strategy()) {
            prop_assert!(recipe.validate().is_ok());
        }

        #[test]
        fn meal_plans_are_valid(plan in meal_plan_strategy()) {
            prop_assert!(plan.validate().is_ok());
        }

        #[test]
        fn shopping_lists_are_valid(list in shopping_list_strategy()) {
            prop_assert!(list.validate().is_ok());
            prop_assert!(list.total_cost_cents.is_none());
        }

        #[test]
        fn quantities_survive_json(quantity in quantity_strategy()) {
            let text = serde_json::to_string(&quantity).unwrap();
            prop_assert_eq!(serde_json::from_str::<f64>(&text).unwrap(), quantity);
        }
    }
}
