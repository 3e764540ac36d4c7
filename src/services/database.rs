use anyhow::Result;
use chrono::NaiveDate;
use chrono_tz::Tz;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::{Path, PathBuf};

use super::credentials::CredentialStore;
use crate::models::{DailySummary, FoodRecord};

const CALORIE_GOAL_KEY: &str = "calorie_goal";

/// SQLite-backed food log plus the key-value settings the browser app kept
/// in local storage (API keys, quota flags, calorie goal).
pub struct Database {
    pool: SqlitePool,
    default_calorie_goal: u32,
}

impl Database {
    pub async fn new(database_url: &str, default_calorie_goal: u32) -> Result<Self> {
        // Every connection to :memory: is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let db = Database {
            pool,
            default_calorie_goal,
        };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS food_items (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                calories REAL NOT NULL,
                protein REAL NOT NULL DEFAULT 0,
                carbs REAL NOT NULL DEFAULT 0,
                fat REAL NOT NULL DEFAULT 0,
                image_url TEXT,
                image_path TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Logs created before uploads were tracked on disk
        let has_image_path = sqlx::query("SELECT 1 FROM pragma_table_info('food_items') WHERE name = 'image_path'")
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !has_image_path {
            sqlx::query("ALTER TABLE food_items ADD COLUMN image_path TEXT")
                .execute(&self.pool)
                .await?;
        }

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_food_items_created_at ON food_items(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// `image_path` is the stored upload behind `item.image_url`; the
    /// display handle itself does not survive a restart.
    pub async fn add_food(&self, item: &FoodRecord, image_path: Option<&Path>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO food_items (id, name, calories, protein, carbs, fat, image_url, image_path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(item.calories)
        .bind(item.protein)
        .bind(item.carbs)
        .bind(item.fat)
        .bind(&item.image_url)
        .bind(image_path.map(|path| path.to_string_lossy().into_owned()))
        .bind(item.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_food(&self, id: &str) -> Result<Option<FoodRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, calories, protein, carbs, fat, image_url, created_at
            FROM food_items
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_food(&r)).transpose()
    }

    pub async fn image_path(&self, id: &str) -> Result<Option<PathBuf>> {
        let row = sqlx::query("SELECT image_path FROM food_items WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let path: Option<String> = match row {
            Some(r) => r.try_get("image_path")?,
            None => None,
        };
        Ok(path.map(PathBuf::from))
    }

    /// Removes an entry and hands it back so the caller can release its image.
    pub async fn delete_food(&self, id: &str) -> Result<Option<FoodRecord>> {
        let existing = self.get_food(id).await?;
        if existing.is_some() {
            sqlx::query("DELETE FROM food_items WHERE id = ?1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(existing)
    }

    /// Whole log, newest first.
    pub async fn list_foods(&self) -> Result<Vec<FoodRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, calories, protein, carbs, fat, image_url, created_at
            FROM food_items
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_food).collect()
    }

    /// Entries whose timestamp falls on `date` in the given timezone.
    pub async fn foods_on(&self, date: NaiveDate, tz: Tz) -> Result<Vec<FoodRecord>> {
        let items = self.list_foods().await?;
        Ok(items
            .into_iter()
            .filter(|item| item.timestamp.with_timezone(&tz).date_naive() == date)
            .collect())
    }

    pub async fn calorie_goal(&self) -> Result<u32> {
        let stored = self.get_setting(CALORIE_GOAL_KEY).await?;
        Ok(stored
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|goal| *goal > 0)
            .unwrap_or(self.default_calorie_goal))
    }

    pub async fn set_calorie_goal(&self, goal: u32) -> Result<()> {
        if goal == 0 {
            anyhow::bail!("Calorie goal must be a positive number");
        }
        self.put_setting(CALORIE_GOAL_KEY, &goal.to_string()).await
    }

    pub async fn daily_summary(&self, date: NaiveDate, tz: Tz) -> Result<DailySummary> {
        let items = self.foods_on(date, tz).await?;
        let goal = self.calorie_goal().await?;
        Ok(DailySummary::new(date, &items, goal))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_food(row: &sqlx::sqlite::SqliteRow) -> Result<FoodRecord> {
        Ok(FoodRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            calories: row.try_get("calories")?,
            protein: row.try_get("protein")?,
            carbs: row.try_get("carbs")?,
            fat: row.try_get("fat")?,
            image_url: row.try_get("image_url")?,
            timestamp: row.try_get("created_at")?,
        })
    }
}

#[async_trait::async_trait]
impl CredentialStore for Database {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_setting(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.put_setting(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
