use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use url::Url;

use crate::ingredients::{ingredient_key, Ingredient, IngredientStore};
use crate::recipe::NewRecipe;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Location of the SQLite database. Hands out one [`Session`] per task.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the parent directory and schema if missing.
    pub fn init(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        self.session()?.init_schema()
    }

    pub fn session(&self) -> Result<Session> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        Session::configure(conn)
    }
}

/// One connection. Never shared between concurrent tasks.
pub struct Session {
    conn: Connection,
}

impl Session {
    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let session = Self::configure(Connection::open_in_memory()?)?;
        session.init_schema()?;
        Ok(session)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS recipe_urls (
                id              INTEGER PRIMARY KEY,
                url             TEXT UNIQUE NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending'
                                CHECK(status IN ('pending','done','no_recipe','skipped','failed')),
                attempts        INTEGER NOT NULL DEFAULT 0,
                last_error      TEXT,
                discovered_from TEXT,
                processed_at    TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_recipe_urls_status ON recipe_urls(status);

            CREATE TABLE IF NOT EXISTS raw_data_sources (
                id          INTEGER PRIMARY KEY,
                url         TEXT NOT NULL,
                status_code INTEGER,
                html        TEXT NOT NULL,
                sections    TEXT NOT NULL,
                fetched_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_raw_data_url ON raw_data_sources(url);

            CREATE TABLE IF NOT EXISTS ingredients (
                id        INTEGER PRIMARY KEY,
                name      TEXT NOT NULL,
                name_key  TEXT UNIQUE NOT NULL,
                image_url TEXT
            );

            CREATE TABLE IF NOT EXISTS recipes (
                id                 INTEGER PRIMARY KEY,
                url                TEXT UNIQUE NOT NULL,
                name               TEXT,
                description        TEXT,
                image_url          TEXT,
                author             TEXT,
                prep_minutes       INTEGER,
                cook_minutes       INTEGER,
                total_minutes      INTEGER,
                yield_text         TEXT,
                category           TEXT,
                cuisine            TEXT,
                site_name          TEXT,
                raw_data_source_id INTEGER REFERENCES raw_data_sources(id),
                created_at         TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS recipe_steps (
                id        INTEGER PRIMARY KEY,
                recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                position  INTEGER NOT NULL,
                text      TEXT NOT NULL,
                UNIQUE(recipe_id, position)
            );

            CREATE TABLE IF NOT EXISTS recipe_step_ingredients (
                id            INTEGER PRIMARY KEY,
                recipe_id     INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                ingredient_id INTEGER NOT NULL REFERENCES ingredients(id),
                position      INTEGER NOT NULL,
                quantity      TEXT,
                measurement   TEXT,
                notes         TEXT,
                raw_text      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_step_ingredients_recipe ON recipe_step_ingredients(recipe_id);
            CREATE INDEX IF NOT EXISTS idx_step_ingredients_ingredient ON recipe_step_ingredients(ingredient_id);
            ",
        )?;
        Ok(())
    }

    // ── URL queue ──

    pub fn insert_urls(&self, urls: &[String]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO recipe_urls (url) VALUES (?1)")?;
            for url in urls {
                count += stmt.execute(params![url])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn fetch_pending(&self, limit: Option<usize>) -> Result<Vec<RecipeUrl>> {
        self.query_urls("WHERE status = 'pending'", limit)
    }

    /// URLs that have at least one stored raw page.
    pub fn fetch_reprocessable(&self, limit: Option<usize>) -> Result<Vec<RecipeUrl>> {
        self.query_urls(
            "WHERE EXISTS (SELECT 1 FROM raw_data_sources r WHERE r.url = recipe_urls.url)",
            limit,
        )
    }

    fn query_urls(&self, filter: &str, limit: Option<usize>) -> Result<Vec<RecipeUrl>> {
        let sql = format!(
            "SELECT id, url, attempts FROM recipe_urls {} ORDER BY id{}",
            filter,
            match limit {
                Some(n) => format!(" LIMIT {}", n),
                None => String::new(),
            }
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RecipeUrl {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    attempts: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn record_outcome(&self, url_id: i64, status: UrlStatus, error: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE recipe_urls
             SET status = ?2, last_error = ?3, attempts = attempts + 1,
                 processed_at = datetime('now')
             WHERE id = ?1",
            params![url_id, status.as_str(), error],
        )?;
        Ok(())
    }

    // ── Raw pages ──

    pub fn insert_raw_data_source(&self, page: &RawPageData) -> Result<i64> {
        let sections = serde_json::to_string(&page.sections)?;
        self.conn.execute(
            "INSERT INTO raw_data_sources (url, status_code, html, sections, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                page.url,
                page.status,
                page.html,
                sections,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn latest_raw_data_source(&self, url: &str) -> Result<Option<RawDataSource>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, url, status_code, html, sections, fetched_at
                 FROM raw_data_sources WHERE url = ?1 ORDER BY id DESC LIMIT 1",
                params![url],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<u16>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, url, status, html, sections, fetched_at)) = row else {
            return Ok(None);
        };
        Ok(Some(RawDataSource {
            id,
            fetched_at: DateTime::parse_from_rfc3339(&fetched_at)
                .with_context(|| format!("Bad fetched_at on raw data source {}", id))?
                .with_timezone(&Utc),
            page: RawPageData {
                url,
                status,
                html,
                sections: serde_json::from_str(&sections)
                    .with_context(|| format!("Bad sections on raw data source {}", id))?,
            },
        }))
    }

    // ── Stats ──

    pub fn stats(&self) -> Result<Stats> {
        let count = |sql: &str| -> Result<usize> {
            Ok(self.conn.query_row(sql, [], |r| r.get(0))?)
        };
        let by_status = |status: &str| -> Result<usize> {
            Ok(self.conn.query_row(
                "SELECT COUNT(*) FROM recipe_urls WHERE status = ?1",
                params![status],
                |r| r.get(0),
            )?)
        };
        Ok(Stats {
            urls: count("SELECT COUNT(*) FROM recipe_urls")?,
            pending: by_status(UrlStatus::Pending.as_str())?,
            done: by_status(UrlStatus::Done.as_str())?,
            no_recipe: by_status(UrlStatus::NoRecipe.as_str())?,
            skipped: by_status(UrlStatus::Skipped.as_str())?,
            failed: by_status(UrlStatus::Failed.as_str())?,
            raw_pages: count("SELECT COUNT(*) FROM raw_data_sources")?,
            recipes: count("SELECT COUNT(*) FROM recipes")?,
            ingredients: count("SELECT COUNT(*) FROM ingredients")?,
        })
    }
}

impl IngredientStore for Session {
    fn load_ingredients(&self) -> Result<Vec<Ingredient>> {
        let mut stmt = self.conn.prepare("SELECT id, name, image_url FROM ingredients")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Ingredient {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    image_url: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ── Recipe writes (run inside the caller's transaction) ──

/// Insert the ingredient unless its `name_key` exists, then return the row.
/// Safe to race: the loser's insert is ignored and it reads the winner's row.
pub fn upsert_ingredient(conn: &Connection, name: &str) -> Result<Ingredient> {
    let key = ingredient_key(name);
    conn.execute(
        "INSERT OR IGNORE INTO ingredients (name, name_key) VALUES (?1, ?2)",
        params![name.trim(), key],
    )?;
    let ingredient = conn.query_row(
        "SELECT id, name, image_url FROM ingredients WHERE name_key = ?1",
        params![key],
        |row| {
            Ok(Ingredient {
                id: row.get(0)?,
                name: row.get(1)?,
                image_url: row.get(2)?,
            })
        },
    )?;
    Ok(ingredient)
}

/// Write `recipe` with its steps and step ingredients, replacing any recipe
/// previously stored for the same URL. `ingredient_ids` maps each step
/// ingredient's position to its ingredient row.
pub fn replace_recipe(
    conn: &Connection,
    recipe: &NewRecipe,
    raw_data_source_id: Option<i64>,
    ingredient_ids: &HashMap<usize, i64>,
) -> Result<i64> {
    conn.execute("DELETE FROM recipes WHERE url = ?1", params![recipe.url])?;
    conn.execute(
        "INSERT INTO recipes
         (url, name, description, image_url, author, prep_minutes, cook_minutes,
          total_minutes, yield_text, category, cuisine, site_name, raw_data_source_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            recipe.url, recipe.name, recipe.description, recipe.image_url, recipe.author,
            recipe.prep_minutes, recipe.cook_minutes, recipe.total_minutes, recipe.yield_text,
            recipe.category, recipe.cuisine, recipe.site_name, raw_data_source_id,
        ],
    )?;
    let recipe_id = conn.last_insert_rowid();

    {
        let mut stmt = conn.prepare(
            "INSERT INTO recipe_steps (recipe_id, position, text) VALUES (?1, ?2, ?3)",
        )?;
        for (i, text) in recipe.steps.iter().enumerate() {
            stmt.execute(params![recipe_id, i as i64, text])?;
        }
    }

    let mut stmt = conn.prepare(
        "INSERT INTO recipe_step_ingredients
         (recipe_id, ingredient_id, position, quantity, measurement, notes, raw_text)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for step in &recipe.ingredients {
        let ingredient_id = ingredient_ids
            .get(&step.position)
            .with_context(|| format!("No ingredient row for '{}'", step.name))?;
        stmt.execute(params![
            recipe_id,
            ingredient_id,
            step.position as i64,
            step.quantity,
            step.measurement,
            step.notes,
            step.raw,
        ])?;
    }

    Ok(recipe_id)
}

/// Consumer side of the crawl queue.
pub trait JobQueue: Send + Sync {
    /// Schedule `url` for a later crawl. Returns whether it was new.
    fn enqueue(&self, conn: &Connection, url: &Url, discovered_from: &Url) -> Result<bool>;
}

/// Queue backed by the `recipe_urls` table; known URLs are left alone.
#[derive(Debug, Default)]
pub struct UrlTableQueue;

impl JobQueue for UrlTableQueue {
    fn enqueue(&self, conn: &Connection, url: &Url, discovered_from: &Url) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO recipe_urls (url, discovered_from) VALUES (?1, ?2)",
            params![url.as_str(), discovered_from.as_str()],
        )?;
        Ok(inserted > 0)
    }
}

// ── Rows ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeUrl {
    pub id: i64,
    pub url: String,
    pub attempts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlStatus {
    Pending,
    Done,
    NoRecipe,
    Skipped,
    Failed,
}

impl UrlStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UrlStatus::Pending => "pending",
            UrlStatus::Done => "done",
            UrlStatus::NoRecipe => "no_recipe",
            UrlStatus::Skipped => "skipped",
            UrlStatus::Failed => "failed",
        }
    }
}

/// One fetched page and the LD-JSON sections found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPageData {
    pub url: String,
    pub status: Option<u16>,
    pub html: String,
    pub sections: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RawDataSource {
    pub id: i64,
    pub fetched_at: DateTime<Utc>,
    pub page: RawPageData,
}

pub struct Stats {
    pub urls: usize,
    pub pending: usize,
    pub done: usize,
    pub no_recipe: usize,
    pub skipped: usize,
    pub failed: usize,
    pub raw_pages: usize,
    pub recipes: usize,
    pub ingredients: usize,
}
