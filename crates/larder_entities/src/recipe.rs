//! Recipes.

use crate::error::{require_quantity, require_text, EntityError, EntityResult, Validate};
use crate::wire::synced_from;
use larder_storage::SyncRecord;
use larder_sync_engine::{encode_record, EntityAdapter, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of a recipe's ingredient list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    /// Ingredient name.
    pub name: String,
    /// Amount, in `unit`.
    pub quantity: f64,
    /// Unit of `quantity`.
    pub unit: String,
}

impl Ingredient {
    /// Creates an ingredient line.
    pub fn new(name: impl Into<String>, quantity: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit: unit.into(),
        }
    }
}

/// A recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// Title.
    pub title: String,
    /// Number of servings the quantities are for.
    pub servings: u32,
    /// Ingredient list.
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    /// Method, one entry per step.
    #[serde(default)]
    pub steps: Vec<String>,
}

impl Recipe {
    /// Creates an empty recipe.
    pub fn new(title: impl Into<String>, servings: u32) -> Self {
        Self {
            title: title.into(),
            servings,
            ingredients: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Appends an ingredient.
    pub fn with_ingredient(mut self, ingredient: Ingredient) -> Self {
        self.ingredients.push(ingredient);
        self
    }

    /// Appends a step.
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Returns the ingredient list scaled to `servings`.
    pub fn scaled_ingredients(&self, servings: u32) -> Vec<Ingredient> {
        let factor = f64::from(servings) / f64::from(self.servings.max(1));
        self.ingredients
            .iter()
            .map(|i| Ingredient {
                quantity: i.quantity * factor,
                ..i.clone()
            })
            .collect()
    }
}

impl Validate for Recipe {
    fn validate(&self) -> EntityResult<()> {
        require_text("title", &self.title)?;
        if self.servings == 0 {
            return Err(EntityError::out_of_range("servings", "must be at least 1"));
        }
        for ingredient in &self.ingredients {
            require_text("ingredients.name", &ingredient.name)?;
            require_quantity("ingredients.quantity", ingredient.quantity)?;
        }
        Ok(())
    }
}

/// Adapter for `/recipes`.
pub struct RecipeAdapter;

impl EntityAdapter for RecipeAdapter {
    type Entity = Recipe;
    const RESOURCE: &'static str = "recipes";

    fn to_remote(record: &SyncRecord<Recipe>) -> SyncResult<Value> {
        encode_record(record, &record.body)
    }

    fn from_remote(value: Value) -> SyncResult<SyncRecord<Recipe>> {
        synced_from(value)
    }
}
