//! # Larder Testkit
//!
//! Test utilities for Larder sync.
//!
//! This crate provides:
//! - An in-process reference backend with every Larder resource registered
//! - Simulated devices, in-memory or file-backed, wired to that backend
//! - Property-based test generators using proptest
//! - Session replay with an expected-state model
//!
//! ## Usage
//!
//! ```rust
//! use larder_testkit::prelude::*;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let harness = TestHarness::new();
//! let device = harness.device();
//! let session = vec![InventoryOp::Create(InventoryItem::new("salt", 1.0, "kg")), InventoryOp::Sync];
//!
//! let replay = replay_inventory(&device, &session).await;
//! assert_eq!(replay.expected.len(), 1);
//! assert_eq!(harness.server_len("inventory"), 1);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod session;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::session::*;
    pub use larder_entities::{
        InventoryItem, MealPlan, Recipe, ShoppingList, ShoppingListItem, Validate,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use session::*;
