use crate::models::{NutritionFacts, DEFAULT_CALORIES, UNKNOWN_FOOD_NAME};

/// Per-serving values for a common food.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceFood {
    pub key: &'static str,
    pub name: &'static str,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

const fn food(key: &'static str, name: &'static str, calories: f64, protein: f64, carbs: f64, fat: f64) -> ReferenceFood {
    ReferenceFood {
        key,
        name,
        calories,
        protein,
        carbs,
        fat,
    }
}

pub const REFERENCE_FOODS: &[ReferenceFood] = &[
    food("apple", "Apple", 95.0, 0.5, 25.0, 0.3),
    food("banana", "Banana", 105.0, 1.3, 27.0, 0.4),
    food("orange", "Orange", 62.0, 1.2, 15.0, 0.2),
    food("pizza", "Pizza Slice", 285.0, 12.0, 36.0, 10.0),
    food("burger", "Hamburger", 350.0, 15.0, 33.0, 18.0),
    food("salad", "Garden Salad", 120.0, 3.0, 10.0, 7.0),
    food("pasta", "Pasta", 200.0, 7.0, 40.0, 2.0),
    food("rice", "White Rice", 150.0, 3.0, 33.0, 0.5),
    food("chicken", "Grilled Chicken", 165.0, 31.0, 0.0, 3.6),
    food("steak", "Steak", 250.0, 25.0, 0.0, 16.0),
];

/// First table entry whose key appears in `name`, ignoring case.
pub fn lookup(name: &str) -> Option<&'static ReferenceFood> {
    let lowered = name.to_lowercase();
    REFERENCE_FOODS.iter().find(|entry| lowered.contains(entry.key))
}

/// Completed nutrition values, ready to become a `FoodRecord`.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairedFacts {
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

/// Fill gaps in model output.
///
/// The table is consulted only when the name or the calorie figure is
/// missing, and it never overwrites a value the model supplied. Whatever is
/// still missing afterwards gets the sentinel defaults.
pub fn repair(facts: NutritionFacts) -> RepairedFacts {
    let mut facts = facts;

    if facts.is_incomplete() {
        if let Some(entry) = facts.name.as_deref().and_then(lookup) {
            log::info!(
                "🔧 Filling missing fields for '{}' from reference entry '{}'",
                facts.name.as_deref().unwrap_or_default(),
                entry.key
            );
            facts.calories = facts.calories.or(Some(entry.calories));
            facts.protein = facts.protein.or(Some(entry.protein));
            facts.carbs = facts.carbs.or(Some(entry.carbs));
            facts.fat = facts.fat.or(Some(entry.fat));
        } else {
            log::warn!("Incomplete nutrition data with no reference match, using defaults");
        }
    }

    RepairedFacts {
        name: facts.name.unwrap_or_else(|| UNKNOWN_FOOD_NAME.to_string()),
        calories: facts.calories.unwrap_or(DEFAULT_CALORIES),
        protein: facts.protein.unwrap_or(0.0),
        carbs: facts.carbs.unwrap_or(0.0),
        fat: facts.fat.unwrap_or(0.0),
    }
}
