use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Name used when neither the model nor the reference table could name the food.
pub const UNKNOWN_FOOD_NAME: &str = "Unknown Food";

/// Calorie figure used when nothing better is known.
pub const DEFAULT_CALORIES: f64 = 200.0;

/// One recognized food, as shown to the user and stored in the log.
///
/// Serialized in camelCase so a persisted log keeps the same JSON shape as
/// the browser app's `foodItems` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodRecord {
    pub id: String,
    pub name: String,
    pub calories: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub carbs: f64,
    #[serde(default)]
    pub fat: f64,
    pub image_url: Option<String>,  // ImageRegistry handle, process-local
    pub timestamp: DateTime<Utc>,
}

/// Nutrition fields as parsed from model output. Anything may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionFacts {
    pub name: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
}

impl NutritionFacts {
    /// A name or a calorie figure is enough to build a record.
    pub fn has_core_field(&self) -> bool {
        self.name.is_some() || self.calories.is_some()
    }

    /// Needs the reference table before it can become a record.
    pub fn is_incomplete(&self) -> bool {
        self.name.is_none() || self.calories.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressLevel {
    OnTrack,
    Approaching,
    Exceeded,
}

impl std::fmt::Display for ProgressLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProgressLevel::OnTrack => "on track",
            ProgressLevel::Approaching => "approaching goal",
            ProgressLevel::Exceeded => "over goal",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_calories: f64,
    pub goal_calories: u32,
    pub items_count: usize,
    pub progress_percentage: u32,
    /// Calories left before the goal, never below zero.
    pub remaining_calories: f64,
    pub level: ProgressLevel,
    pub bar: String,
}

impl DailySummary {
    pub fn new(date: NaiveDate, items: &[FoodRecord], goal_calories: u32) -> Self {
        let total_calories: f64 = items.iter().map(|item| item.calories).sum();
        let progress_percentage = progress_percentage(total_calories, goal_calories);

        let level = if progress_percentage >= 100 {
            ProgressLevel::Exceeded
        } else if progress_percentage > 85 {
            ProgressLevel::Approaching
        } else {
            ProgressLevel::OnTrack
        };

        Self {
            date,
            total_calories,
            goal_calories,
            items_count: items.len(),
            progress_percentage,
            remaining_calories: (goal_calories as f64 - total_calories).max(0.0),
            level,
            bar: progress_bar(progress_percentage),
        }
    }
}

impl std::fmt::Display for DailySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {:.0}/{} kcal ({}%, {}), {:.0} kcal left",
            self.date,
            self.bar,
            self.total_calories,
            self.goal_calories,
            self.progress_percentage,
            self.level,
            self.remaining_calories
        )
    }
}

fn progress_percentage(current: f64, goal: u32) -> u32 {
    if goal == 0 {
        return 100;
    }
    let percentage = (current / goal as f64 * 100.0).round();
    percentage.clamp(0.0, 100.0) as u32
}

fn progress_bar(percentage: u32) -> String {
    let filled = (percentage / 10) as usize; // 10 cells
    let empty = 10 - filled;
    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(calories: f64) -> FoodRecord {
        FoodRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Apple".to_string(),
            calories,
            protein: 0.0,
            carbs: 0.0,
            fat: 0.0,
            image_url: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_summary_levels() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let on_track = DailySummary::new(date, &[record(500.0)], 2000);
        assert_eq!(on_track.progress_percentage, 25);
        assert_eq!(on_track.level, ProgressLevel::OnTrack);
        assert_eq!(on_track.bar, "██░░░░░░░░");
        assert_eq!(on_track.remaining_calories, 1500.0);

        let approaching = DailySummary::new(date, &[record(1000.0), record(800.0)], 2000);
        assert_eq!(approaching.progress_percentage, 90);
        assert_eq!(approaching.level, ProgressLevel::Approaching);

        let exceeded = DailySummary::new(date, &[record(2500.0)], 2000);
        assert_eq!(exceeded.progress_percentage, 100);
        assert_eq!(exceeded.level, ProgressLevel::Exceeded);
        assert_eq!(exceeded.remaining_calories, 0.0);
        assert_eq!(
            exceeded.to_string(),
            "2024-03-01 ██████████ 2500/2000 kcal (100%, over goal), 0 kcal left"
        );
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let mut item = record(95.0);
        item.image_url = Some("blob:nutrivision/abc".to_string());

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["imageUrl"], "blob:nutrivision/abc");
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_core_field_detection() {
        let empty = NutritionFacts::default();
        assert!(!empty.has_core_field());
        assert!(empty.is_incomplete());

        let named = NutritionFacts {
            name: Some("Steak".to_string()),
            ..Default::default()
        };
        assert!(named.has_core_field());
        assert!(named.is_incomplete());
    }
}
