//! In-memory existence cache over the persisted ingredients.
//!
//! Loaded once from the store at startup, then appended to after every
//! committed insert. Readers run concurrently; writers are serialized by the
//! lock. The store's unique `name_key` makes ingredient creation idempotent, so
//! two tasks that both miss the cache for the same name converge on one row.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use tracing::info;

use crate::recipe::StepIngredient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
    pub image_url: Option<String>,
}

/// A step ingredient whose ingredient row already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStepIngredient {
    pub step: StepIngredient,
    pub ingredient: Ingredient,
}

/// Identity of an ingredient name: trimmed, inner whitespace collapsed,
/// lowercased. The store keys its unique column on the same value.
pub fn ingredient_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Source of the initial cache contents.
pub trait IngredientStore {
    fn load_ingredients(&self) -> Result<Vec<Ingredient>>;
}

#[derive(Debug, Default)]
pub struct IngredientsCache {
    by_key: RwLock<HashMap<String, Ingredient>>,
}

impl IngredientsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache contents with everything the store holds.
    pub fn load_data(&self, store: &dyn IngredientStore) -> Result<usize> {
        let loaded = store.load_ingredients()?;
        let mut map = self.by_key.write().unwrap_or_else(PoisonError::into_inner);
        map.clear();
        for ingredient in loaded {
            map.insert(ingredient_key(&ingredient.name), ingredient);
        }
        info!(count = map.len(), "Loaded ingredients cache");
        Ok(map.len())
    }

    pub fn get(&self, name: &str) -> Option<Ingredient> {
        self.by_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ingredient_key(name))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.by_key.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn step_ingredients_where_ingredient_exists(
        &self,
        candidates: &[StepIngredient],
    ) -> Vec<ResolvedStepIngredient> {
        self.partition(candidates).0
    }

    pub fn step_ingredients_where_ingredient_does_not_exist(
        &self,
        candidates: &[StepIngredient],
    ) -> Vec<StepIngredient> {
        self.partition(candidates).1
    }

    /// Split a batch into known and unknown ingredients under one read lock.
    pub fn partition(
        &self,
        candidates: &[StepIngredient],
    ) -> (Vec<ResolvedStepIngredient>, Vec<StepIngredient>) {
        let map = self.by_key.read().unwrap_or_else(PoisonError::into_inner);
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for step in candidates {
            match map.get(&ingredient_key(&step.name)) {
                Some(ingredient) => known.push(ResolvedStepIngredient {
                    step: step.clone(),
                    ingredient: ingredient.clone(),
                }),
                None => unknown.push(step.clone()),
            }
        }
        (known, unknown)
    }

    /// Record ingredients that were just committed to the store.
    pub fn add_data<I>(&self, ingredients: I)
    where
        I: IntoIterator<Item = Ingredient>,
    {
        let mut map = self.by_key.write().unwrap_or_else(PoisonError::into_inner);
        for ingredient in ingredients {
            map.entry(ingredient_key(&ingredient.name)).or_insert(ingredient);
        }
    }
}
