//! # Larder Entities
//!
//! The four synced entity types of the Larder app and their adapters.
//!
//! | Entity | Adapter | Resource |
//! |---|---|---|
//! | [`InventoryItem`] | [`InventoryAdapter`] | `/inventory` |
//! | [`Recipe`] | [`RecipeAdapter`] | `/recipes` |
//! | [`MealPlan`] | [`MealPlanAdapter`] | `/meal-plans` |
//! | [`ShoppingList`] | [`ShoppingListAdapter`] | `/shopping-lists` |
//!
//! [`LarderClient`] wires one [`larder_sync_engine::EntitySyncService`]
//! per entity over a shared gateway.
//!
//! ```rust
//! use larder_entities::{InventoryItem, LarderClient, StorageLocation};
//! use larder_sync_engine::{MockGateway, SyncConfig};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let client = LarderClient::in_memory(Arc::new(MockGateway::new()), SyncConfig::new());
//! client
//!     .inventory
//!     .create(InventoryItem::new("butter", 250.0, "g").in_location(StorageLocation::Fridge))
//!     .unwrap();
//!
//! let summary = client.sync_all().await;
//! assert!(summary.is_clean());
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod inventory;
mod meal_plan;
mod recipe;
mod shopping;
mod wire;

pub use client::{LarderClient, SyncSummary, RESOURCES};
pub use error::{EntityError, EntityResult, Validate};
pub use inventory::{InventoryAdapter, InventoryItem, StorageLocation};
pub use meal_plan::{Meal, MealPlan, MealPlanAdapter};
pub use recipe::{Ingredient, Recipe, RecipeAdapter};
pub use shopping::{
    stamp_total_cost, total_cost_cents, ShoppingList, ShoppingListAdapter, ShoppingListItem,
    FIELD_TOTAL_COST,
};
