//! All four entity services behind one handle.

use crate::inventory::{InventoryAdapter, InventoryItem};
use crate::meal_plan::{MealPlan, MealPlanAdapter};
use crate::recipe::{Recipe, RecipeAdapter};
use crate::shopping::{ShoppingList, ShoppingListAdapter};
use larder_storage::{
    CursorStore, FileCursorStore, FileStore, InMemoryStore, LocalStore, MemoryCursorStore,
};
use larder_sync_engine::{
    CycleReport, CycleRunner, EntityAdapter, EntitySyncService, RemoteGateway, SyncConfig,
    SyncError, SyncResult,
};
use std::path::Path;
use std::sync::Arc;

/// Resource names, which double as local table names.
pub const RESOURCES: [&str; 4] = [
    InventoryAdapter::RESOURCE,
    RecipeAdapter::RESOURCE,
    MealPlanAdapter::RESOURCE,
    ShoppingListAdapter::RESOURCE,
];

/// Outcome of [`LarderClient::sync_all`], one entry per resource in
/// [`RESOURCES`] order.
#[derive(Debug)]
pub struct SyncSummary {
    /// Cycle result per resource.
    pub results: Vec<(&'static str, SyncResult<CycleReport>)>,
}

impl SyncSummary {
    /// Returns true if every cycle completed and no record failed.
    pub fn is_clean(&self) -> bool {
        self.results
            .iter()
            .all(|(_, r)| r.as_ref().is_ok_and(CycleReport::is_clean))
    }

    /// Cycles that did not complete.
    pub fn errors(&self) -> impl Iterator<Item = (&'static str, &SyncError)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (*name, e)))
    }

    /// The report for `resource`, if its cycle completed.
    pub fn report(&self, resource: &str) -> Option<&CycleReport> {
        self.results
            .iter()
            .find(|(name, _)| *name == resource)
            .and_then(|(_, r)| r.as_ref().ok())
    }

    /// Records pushed across all resources.
    pub fn pushed(&self) -> usize {
        self.results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(CycleReport::pushed)
            .sum()
    }
}

/// The app's sync surface: one service per entity type, sharing a
/// gateway and a cursor store.
pub struct LarderClient<G: RemoteGateway + 'static> {
    /// Inventory items.
    pub inventory: Arc<EntitySyncService<InventoryAdapter, G>>,
    /// Recipes.
    pub recipes: Arc<EntitySyncService<RecipeAdapter, G>>,
    /// Meal plans.
    pub meal_plans: Arc<EntitySyncService<MealPlanAdapter, G>>,
    /// Shopping lists.
    pub shopping_lists: Arc<EntitySyncService<ShoppingListAdapter, G>>,
}

impl<G: RemoteGateway + 'static> LarderClient<G> {
    /// Builds a client over in-memory stores.
    pub fn in_memory(gateway: Arc<G>, config: SyncConfig) -> Self {
        let cursors: Arc<dyn CursorStore> = Arc::new(MemoryCursorStore::new());
        Self {
            inventory: service(memory::<InventoryItem>(), &gateway, &cursors, &config),
            recipes: service(memory::<Recipe>(), &gateway, &cursors, &config),
            meal_plans: service(memory::<MealPlan>(), &gateway, &cursors, &config),
            shopping_lists: service(memory::<ShoppingList>(), &gateway, &cursors, &config),
        }
    }

    /// Opens file-backed stores and cursors in `dir`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if any table cannot be opened, including
    /// when another process holds it.
    pub fn open(dir: &Path, gateway: Arc<G>, config: SyncConfig) -> SyncResult<Self> {
        let cursors: Arc<dyn CursorStore> = Arc::new(FileCursorStore::open(dir)?);
        Ok(Self {
            inventory: service(
                Arc::new(FileStore::<InventoryItem>::open(dir, InventoryAdapter::RESOURCE)?),
                &gateway,
                &cursors,
                &config,
            ),
            recipes: service(
                Arc::new(FileStore::<Recipe>::open(dir, RecipeAdapter::RESOURCE)?),
                &gateway,
                &cursors,
                &config,
            ),
            meal_plans: service(
                Arc::new(FileStore::<MealPlan>::open(dir, MealPlanAdapter::RESOURCE)?),
                &gateway,
                &cursors,
                &config,
            ),
            shopping_lists: service(
                Arc::new(FileStore::<ShoppingList>::open(dir, ShoppingListAdapter::RESOURCE)?),
                &gateway,
                &cursors,
                &config,
            ),
        })
    }

    /// Runs one cycle per resource, concurrently.
    ///
    /// Resources are independent: one failing cycle does not stop the
    /// others.
    pub async fn sync_all(&self) -> SyncSummary {
        let (inventory, recipes, meal_plans, shopping_lists) = tokio::join!(
            self.inventory.sync(),
            self.recipes.sync(),
            self.meal_plans.sync(),
            self.shopping_lists.sync(),
        );
        let summary = SyncSummary {
            results: vec![
                (InventoryAdapter::RESOURCE, inventory),
                (RecipeAdapter::RESOURCE, recipes),
                (MealPlanAdapter::RESOURCE, meal_plans),
                (ShoppingListAdapter::RESOURCE, shopping_lists),
            ],
        };
        for (resource, error) in summary.errors() {
            tracing::warn!(resource, error = %error, "resource sync failed");
        }
        summary
    }

    /// Records awaiting push across all resources.
    ///
    /// # Errors
    ///
    /// Returns the first storage error.
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.inventory.pending_count()?
            + self.recipes.pending_count()?
            + self.meal_plans.pending_count()?
            + self.shopping_lists.pending_count()?)
    }

    /// Cancels every running cycle.
    pub fn cancel(&self) {
        for runner in self.runners() {
            runner.cancel();
        }
    }

    /// The services as scheduler runners, in [`RESOURCES`] order.
    pub fn runners(&self) -> Vec<Arc<dyn CycleRunner>> {
        let runners: [Arc<dyn CycleRunner>; 4] = [
            self.inventory.clone(),
            self.recipes.clone(),
            self.meal_plans.clone(),
            self.shopping_lists.clone(),
        ];
        runners.into()
    }
}

fn service<A, G, S>(
    store: Arc<S>,
    gateway: &Arc<G>,
    cursors: &Arc<dyn CursorStore>,
    config: &SyncConfig,
) -> Arc<EntitySyncService<A, G>>
where
    A: EntityAdapter,
    G: RemoteGateway + 'static,
    S: LocalStore<A::Entity> + 'static,
{
    Arc::new(EntitySyncService::new(
        store,
        Arc::clone(gateway),
        Arc::clone(cursors),
        config.clone(),
    ))
}

fn memory<T>() -> Arc<InMemoryStore<T>> {
    Arc::new(InMemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ingredient, Meal, ShoppingListItem};
    use chrono::NaiveDate;
    use larder_sync_engine::{GatewayOp, MockFailure, MockGateway};

    fn populate<G: RemoteGateway + 'static>(client: &LarderClient<G>) {
        client.inventory.create(InventoryItem::new("flour", 1.5, "kg")).unwrap();
        let recipe = client
            .recipes
            .create(Recipe::new("Bread", 1).with_ingredient(Ingredient::new("flour", 500.0, "g")))
            .unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        client
            .meal_plans
            .create(MealPlan::recipe(day, Meal::Lunch, recipe.id))
            .unwrap();
        client
            .shopping_lists
            .create(ShoppingList::new("bakery").with_item(ShoppingListItem::new("yeast", 1)))
            .unwrap();
    }

    #[tokio::test]
    async fn sync_all_covers_every_resource() {
        let gateway = Arc::new(MockGateway::new());
        let client = LarderClient::in_memory(Arc::clone(&gateway), SyncConfig::new());
        populate(&client);
        assert_eq!(client.pending_count().unwrap(), 4);

        let summary = client.sync_all().await;
        assert!(summary.is_clean());
        assert_eq!(summary.pushed(), 4);
        for resource in RESOURCES {
            assert_eq!(gateway.len(resource), 1, "{resource}");
            assert_eq!(summary.report(resource).unwrap().created, 1);
        }
        assert_eq!(client.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn one_failing_resource_does_not_stop_the_rest() {
        let gateway = Arc::new(MockGateway::new());
        let client = LarderClient::in_memory(Arc::clone(&gateway), SyncConfig::new());
        populate(&client);

        gateway.fail_next(GatewayOp::List, MockFailure::Transient, 1);
        let summary = client.sync_all().await;
        assert_eq!(summary.errors().count(), 1);
        assert!(!summary.is_clean());
        // Pushes finish before the pull, so even the failed cycle's
        // record went out.
        assert_eq!(client.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn runners_follow_resource_order() {
        let client = LarderClient::in_memory(Arc::new(MockGateway::new()), SyncConfig::new());
        let names: Vec<&str> = client.runners().iter().map(|r| r.resource()).collect();
        assert_eq!(names, RESOURCES);
        client.cancel();
    }

    #[tokio::test]
    async fn file_backed_client_keeps_pending_records() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(MockGateway::new());

        {
            let client = LarderClient::open(dir.path(), Arc::clone(&gateway), SyncConfig::new()).unwrap();
            populate(&client);
            assert!(LarderClient::open(dir.path(), Arc::clone(&gateway), SyncConfig::new()).is_err());
        }

        let client = LarderClient::open(dir.path(), Arc::clone(&gateway), SyncConfig::new()).unwrap();
        assert_eq!(client.pending_count().unwrap(), 4);
        assert!(client.sync_all().await.is_clean());
        assert_eq!(client.pending_count().unwrap(), 0);
    }
}
