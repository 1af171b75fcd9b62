//! Replays generated sessions against a device and tracks what it
//! should end up holding.

use crate::fixtures::TestClient;
use crate::generators::InventoryOp;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Expected visible inventory after a session: record ID to quantity.
pub type InventoryModel = BTreeMap<Uuid, f64>;

/// Outcome of [`replay_inventory`].
#[derive(Debug, Default)]
pub struct Replay {
    /// Every record the session created, deleted or not.
    pub created: Vec<Uuid>,
    /// Records the session deleted.
    pub deleted: Vec<Uuid>,
    /// Records still visible, with their final quantity.
    pub expected: InventoryModel,
}

/// Applies `ops` to `client.inventory`, running cycles on
/// [`InventoryOp::Sync`].
///
/// Steps that target a deleted record, or that run before any record
/// exists, are skipped.
///
/// # Panics
///
/// Panics if a local mutation fails.
pub async fn replay_inventory(client: &TestClient, ops: &[InventoryOp]) -> Replay {
    let mut replay = Replay::default();
    for op in ops {
        match op {
            InventoryOp::Create(item) => {
                let record = client
                    .inventory
                    .create(item.clone())
                    .expect("Failed to create item");
                replay.created.push(record.id);
                replay.expected.insert(record.id, item.quantity);
            }
            InventoryOp::SetQuantity { slot, quantity } => {
                let Some(id) = replay.live(*slot) else {
                    continue;
                };
                client
                    .inventory
                    .modify(id, |item| item.quantity = *quantity)
                    .expect("Failed to modify item");
                replay.expected.insert(id, *quantity);
            }
            InventoryOp::Delete { slot } => {
                let Some(id) = replay.live(*slot) else {
                    continue;
                };
                client.inventory.delete(id).expect("Failed to delete item");
                replay.expected.remove(&id);
                replay.deleted.push(id);
            }
            InventoryOp::Sync => {
                client.sync_all().await;
            }
        }
    }
    replay
}

/// Visible inventory on `client` as a model.
///
/// # Panics
///
/// Panics if the store fails.
pub fn inventory_model(client: &TestClient) -> InventoryModel {
    client
        .inventory
        .list()
        .expect("Failed to list inventory")
        .into_iter()
        .map(|r| (r.id, r.body.quantity))
        .collect()
}

impl Replay {
    fn live(&self, slot: usize) -> Option<Uuid> {
        if self.created.is_empty() {
            return None;
        }
        let id = self.created[slot % self.created.len()];
        self.expected.contains_key(&id).then_some(id)
    }
}
