//! Meal plans: what to cook on which day.

use crate::error::{EntityError, EntityResult, Validate};
use crate::wire::synced_from;
use chrono::NaiveDate;
use larder_storage::SyncRecord;
use larder_sync_engine::{encode_record, EntityAdapter, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Slot within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Meal {
    /// Morning.
    Breakfast,
    /// Midday.
    Lunch,
    /// Evening.
    Dinner,
    /// Anything else.
    Snack,
}

impl fmt::Display for Meal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Meal::Breakfast => "breakfast",
            Meal::Lunch => "lunch",
            Meal::Dinner => "dinner",
            Meal::Snack => "snack",
        })
    }
}

/// One planned meal.
///
/// `recipe_id` refers to a [`crate::Recipe`] record by ID. The reference
/// is not enforced: a plan may outlive its recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlan {
    /// Day.
    pub date: NaiveDate,
    /// Slot.
    pub meal: Meal,
    /// Planned recipe, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<Uuid>,
    /// Free-form notes ("leftovers", "eating out").
    #[serde(default)]
    pub notes: String,
}

impl MealPlan {
    /// Plans a recipe.
    pub fn recipe(date: NaiveDate, meal: Meal, recipe_id: Uuid) -> Self {
        Self {
            date,
            meal,
            recipe_id: Some(recipe_id),
            notes: String::new(),
        }
    }

    /// Plans a meal described only by notes.
    pub fn note(date: NaiveDate, meal: Meal, notes: impl Into<String>) -> Self {
        Self {
            date,
            meal,
            recipe_id: None,
            notes: notes.into(),
        }
    }
}

impl Validate for MealPlan {
    fn validate(&self) -> EntityResult<()> {
        if self.recipe_id.is_none() && self.notes.trim().is_empty() {
            return Err(EntityError::Inconsistent(format!(
                "{} on {} needs a recipe or notes",
                self.meal, self.date
            )));
        }
        Ok(())
    }
}

/// Adapter for `/meal-plans`.
pub struct MealPlanAdapter;

impl EntityAdapter for MealPlanAdapter {
    type Entity = MealPlan;
    const RESOURCE: &'static str = "meal-plans";

    fn to_remote(record: &SyncRecord<MealPlan>) -> SyncResult<Value> {
        encode_record(record, &record.body)
    }

    fn from_remote(value: Value) -> SyncResult<SyncRecord<MealPlan>> {
        synced_from(value)
    }
}
