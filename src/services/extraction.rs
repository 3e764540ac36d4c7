use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;

use super::vision::truncate;
use super::RecognitionError;
use crate::models::NutritionFacts;

#[derive(Debug, Error)]
pub enum StrictParseError {
    #[error("no JSON object in text")]
    NoJsonObject,
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("JSON value is not an object")]
    NotAnObject,
}

/// Best-effort fallback for model output that is not valid JSON.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Option<NutritionFacts>;
}

/// The span from the first `{` to the last `}`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

pub fn parse_strict(text: &str) -> Result<NutritionFacts, StrictParseError> {
    let candidate = extract_json_object(text).ok_or(StrictParseError::NoJsonObject)?;
    let value: Value = serde_json::from_str(candidate)?;
    let object = value.as_object().ok_or(StrictParseError::NotAnObject)?;

    Ok(NutritionFacts {
        name: field(object, "name").and_then(as_name),
        calories: field(object, "calories").and_then(as_amount),
        protein: field(object, "protein").and_then(as_amount),
        carbs: field(object, "carbs").and_then(as_amount),
        fat: field(object, "fat").and_then(as_amount),
    })
}

/// Strict JSON first; the extractor only runs when strict parsing fails.
pub fn normalize(text: &str, extractor: &dyn TextExtractor) -> Result<NutritionFacts, RecognitionError> {
    match parse_strict(text) {
        Ok(facts) if facts.has_core_field() => Ok(facts),
        Ok(_) => Err(RecognitionError::UnrecognizableResponse(format!(
            "JSON object has neither name nor calories: {}",
            truncate(text, 200)
        ))),
        Err(e) => {
            log::debug!("Strict JSON parse failed ({}), trying text extraction", e);
            extractor
                .extract(text)
                .filter(NutritionFacts::has_core_field)
                .ok_or_else(|| RecognitionError::UnrecognizableResponse(truncate(text, 200)))
        }
    }
}

/// Case-insensitive key lookup; models are not consistent about casing.
fn field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).or_else(|| {
        object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn as_name(value: &Value) -> Option<String> {
    let name = value.as_str()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn as_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_amount(s)?,
        _ => return None,
    };
    valid_amount(amount)
}

static LEADING_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").ok());

/// First number in a string like "95 kcal" or "1,250", sign included.
fn parse_amount(text: &str) -> Option<f64> {
    let re = LEADING_NUMBER.as_ref()?;
    let matched = re.find(text)?;
    matched.as_str().replace(',', "").parse::<f64>().ok()
}

fn valid_amount(amount: f64) -> Option<f64> {
    if amount.is_finite() && amount >= 0.0 {
        Some(amount)
    } else {
        None
    }
}

static NAME_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)["']?\bname\b["']?\s*[:=]\s*["']?([^"'\n{},:;]+)"#).ok());
static CALORIES_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)["']?\b(?:calories|kcal)\b["']?\s*[:=]\s*["']?~?\s*(\d+(?:\.\d+)?)"#).ok());
static PROTEIN_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)["']?\bprotein\b["']?\s*[:=]\s*["']?~?\s*(\d+(?:\.\d+)?)"#).ok());
static CARBS_FIELD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)["']?\b(?:carbs|carbohydrates?)\b["']?\s*[:=]\s*["']?~?\s*(\d+(?:\.\d+)?)"#).ok()
});
static FAT_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)["']?\bfat\b["']?\s*[:=]\s*["']?~?\s*(\d+(?:\.\d+)?)"#).ok());
static TRAILING_LABEL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\s+\b(?:calories|kcal|protein|carbs|carbohydrates?|fat)\s*$").ok());

/// Scans for `label: value` pairs anywhere in the text.
#[derive(Debug, Default, Clone, Copy)]
pub struct LabeledFieldExtractor;

impl LabeledFieldExtractor {
    pub fn new() -> Self {
        Self
    }

    fn capture<'t>(pattern: &Option<Regex>, text: &'t str) -> Option<&'t str> {
        let re = pattern.as_ref()?;
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    fn number(pattern: &Option<Regex>, text: &str) -> Option<f64> {
        Self::capture(pattern, text)
            .and_then(|raw| raw.parse::<f64>().ok())
            .and_then(valid_amount)
    }

    fn name(text: &str) -> Option<String> {
        let re = NAME_FIELD.as_ref()?;
        let found = re.captures(text)?.get(1)?;
        let raw = found.as_str();

        // "name: Steak calories: 250" on one line; a label word only ends the
        // name when its own separator follows ("Low Fat Yogurt" stays whole)
        let label_follows = text[found.end()..].trim_start().starts_with([':', '=']);
        let cut = match TRAILING_LABEL.as_ref() {
            Some(label) if label_follows => label.replace(raw, "").into_owned(),
            _ => raw.to_string(),
        };
        // "name: Banana Slices. Looks tasty."
        let sentence = cut.split(". ").next().unwrap_or_default();
        let name = sentence.trim().trim_end_matches(['.', '!']).trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

impl TextExtractor for LabeledFieldExtractor {
    fn extract(&self, text: &str) -> Option<NutritionFacts> {
        let facts = NutritionFacts {
            name: Self::name(text),
            calories: Self::number(&CALORIES_FIELD, text),
            protein: Self::number(&PROTEIN_FIELD, text),
            carbs: Self::number(&CARBS_FIELD, text),
            fat: Self::number(&FAT_FIELD, text),
        };

        if facts.has_core_field() {
            Some(facts)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_parse_complete_object() {
        let facts = parse_strict(r#"{"name":"Apple","calories":95,"protein":0.5,"carbs":25,"fat":0.3}"#).unwrap();
        assert_eq!(facts.name.as_deref(), Some("Apple"));
        assert_eq!(facts.calories, Some(95.0));
        assert_eq!(facts.protein, Some(0.5));
        assert_eq!(facts.carbs, Some(25.0));
        assert_eq!(facts.fat, Some(0.3));
    }

    #[test]
    fn test_strict_parse_discards_surrounding_prose() {
        let text = r#"Here you go: {"name":"Apple","calories":95,"protein":0.5,"carbs":25,"fat":0.3} enjoy"#;
        let facts = parse_strict(text).unwrap();
        assert_eq!(facts.name.as_deref(), Some("Apple"));
        assert_eq!(facts.calories, Some(95.0));
    }

    #[test]
    fn test_strict_parse_inside_markdown_fence() {
        let text = "```json\n{\"Name\": \"Pasta\", \"Calories\": \"200 kcal\", \"fat\": -1}\n```";
        let facts = parse_strict(text).unwrap();
        assert_eq!(facts.name.as_deref(), Some("Pasta"));
        assert_eq!(facts.calories, Some(200.0));
        assert_eq!(facts.fat, None);
    }

    #[test]
    fn test_strict_parse_failures() {
        assert!(matches!(parse_strict("no braces here"), Err(StrictParseError::NoJsonObject)));
        assert!(matches!(parse_strict("{name: Steak}"), Err(StrictParseError::InvalidJson(_))));
        assert!(matches!(parse_strict("} backwards {"), Err(StrictParseError::NoJsonObject)));
    }

    #[test]
    fn test_strict_parse_negative_string_amount_is_absent() {
        let facts = parse_strict(r#"{"name":"Apple","calories":95,"fat":"-3 g","protein":-3,"carbs":"-0.5"}"#).unwrap();
        assert_eq!(facts.calories, Some(95.0));
        assert_eq!(facts.fat, None);
        assert_eq!(facts.protein, None);
        assert_eq!(facts.carbs, None);
    }

    #[test]
    fn test_amount_parsing() {
        assert_eq!(parse_amount("1,250 kcal"), Some(1250.0));
        assert_eq!(parse_amount("approx 12.5g"), Some(12.5));
        assert_eq!(parse_amount("unknown"), None);
        assert_eq!(parse_amount("-3 g"), Some(-3.0));
    }

    #[test]
    fn test_heuristic_any_order_and_case() {
        let extractor = LabeledFieldExtractor::new();

        let facts = extractor.extract("CALORIES: 250\nName: Steak").unwrap();
        assert_eq!(facts.name.as_deref(), Some("Steak"));
        assert_eq!(facts.calories, Some(250.0));
        assert_eq!(facts.protein, None);

        let facts = extractor.extract("name: Steak calories: 250 protein: 25.5").unwrap();
        assert_eq!(facts.name.as_deref(), Some("Steak"));
        assert_eq!(facts.calories, Some(250.0));
        assert_eq!(facts.protein, Some(25.5));
    }

    #[test]
    fn test_heuristic_keeps_label_words_inside_names() {
        let extractor = LabeledFieldExtractor::new();
        let facts = extractor.extract("name: Low Fat Yogurt\ncalories: 150").unwrap();
        assert_eq!(facts.name.as_deref(), Some("Low Fat Yogurt"));
        assert_eq!(facts.calories, Some(150.0));

        let facts = extractor.extract("name: Low Fat Yogurt calories: 150").unwrap();
        assert_eq!(facts.name.as_deref(), Some("Low Fat Yogurt"));

        let facts = extractor.extract("name: High Protein Bar, protein = 20").unwrap();
        assert_eq!(facts.name.as_deref(), Some("High Protein Bar"));
        assert_eq!(facts.protein, Some(20.0));
    }

    #[test]
    fn test_heuristic_handles_broken_json() {
        let extractor = LabeledFieldExtractor::new();
        let facts = extractor
            .extract(r#"{"name": "Banana", "calories": 105, "carbs": 27,"#)
            .unwrap();
        assert_eq!(facts.name.as_deref(), Some("Banana"));
        assert_eq!(facts.calories, Some(105.0));
        assert_eq!(facts.carbs, Some(27.0));
    }

    #[test]
    fn test_heuristic_needs_name_or_calories() {
        let extractor = LabeledFieldExtractor::new();
        assert!(extractor.extract("protein: 10, fat: 2").is_none());
        assert!(extractor.extract("I cannot identify this image.").is_none());
    }

    #[test]
    fn test_normalize_prefers_strict_parse() {
        let extractor = LabeledFieldExtractor::new();
        let text = r#"name: Wrong calories: 1 {"name":"Orange","calories":62}"#;
        let facts = normalize(text, &extractor).unwrap();
        assert_eq!(facts.name.as_deref(), Some("Orange"));
        assert_eq!(facts.calories, Some(62.0));
    }

    #[test]
    fn test_normalize_unrecognizable() {
        let extractor = LabeledFieldExtractor::new();
        let err = normalize("Sorry, I can't tell what this is.", &extractor).unwrap_err();
        assert!(matches!(err, RecognitionError::UnrecognizableResponse(_)));

        let err = normalize(r#"{"description":"a plate"}"#, &extractor).unwrap_err();
        assert!(matches!(err, RecognitionError::UnrecognizableResponse(_)));
    }
}
