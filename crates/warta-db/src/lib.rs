//! Warta persistence layer providing blog post storage.
//!
//! This crate offers an async API around SQLite (sqlx) for the post catalog
//! the daemon serves, plus a disk-backed media store for the uploaded images
//! the posts reference. Records carry RFC 3339 UTC timestamps so the catalog
//! can be listed newest first straight from the index.

use std::{path::Path, str::FromStr, time::Duration};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use thiserror::Error;
use uuid::Uuid;

pub mod media;

pub use media::{ImageKind, MediaStore};

/// Default SQLite busy timeout in milliseconds when the DB is under load.
const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Primary entry point to the persistence layer.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes (or creates) a connection pool to the SQLite database located at
    /// the given URL (e.g. `sqlite:///var/lib/warta/warta.db`).
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await?;

        // Run embedded migrations. The directory is resolved relative to this crate.
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Connects to a file path via `sqlite://` scheme.
    pub async fn connect_file(path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}", path.display());
        Self::connect(&url).await
    }

    /// Exposes the underlying pool. Needed when other services want to compose
    /// queries (e.g. reporting or background tasks).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a new post into the catalog and returns the persisted record.
    pub async fn create_post(&self, data: NewPost<'_>) -> Result<PostRecord> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO posts (id, title, content, image, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(data.title)
        .bind(data.content)
        .bind(data.image)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.fetch_post(id)
            .await?
            .ok_or_else(|| anyhow!("post inserted but missing when reloaded (id={})", id))
    }

    /// Retrieves a post by its identifier.
    pub async fn fetch_post(&self, id: Uuid) -> Result<Option<PostRecord>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(map_post).transpose()
    }

    /// Lists a window of posts ordered by creation time descending.
    pub async fn list_posts(&self, limit: u32, offset: u32) -> Result<Vec<PostRecord>> {
        let mut rows = sqlx::query(
            r#"
            SELECT * FROM posts
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch(&self.pool);

        let mut out = Vec::new();
        while let Some(row) = rows.try_next().await? {
            out.push(map_post(row)?);
        }
        Ok(out)
    }

    /// Total number of posts in the catalog.
    pub async fn count_posts(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM posts")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }

    /// Applies field updates to an existing post and returns the reloaded
    /// record, or `None` when the id is unknown. A `None` image keeps the
    /// stored filename.
    pub async fn update_post(&self, id: Uuid, data: UpdatePost<'_>) -> Result<Option<PostRecord>> {
        let now = Utc::now().to_rfc3339();
        let result = match data.image {
            Some(image) => {
                sqlx::query(
                    r#"
                    UPDATE posts
                    SET title = ?, content = ?, image = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(data.title)
                .bind(data.content)
                .bind(image)
                .bind(&now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE posts
                    SET title = ?, content = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(data.title)
                .bind(data.content)
                .bind(&now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch_post(id).await
    }

    /// Removes a post from the catalog. Returns `true` when a row was deleted.
    pub async fn delete_post(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_datetime(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid RFC3339 timestamp '{}': {}", value, err))
}

fn map_post(row: SqliteRow) -> Result<PostRecord> {
    let id: String = row.try_get("id")?;

    Ok(PostRecord {
        id: Uuid::parse_str(&id)?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        image: row.try_get("image")?,
        created_at: parse_datetime(row.try_get("created_at")?)?,
        updated_at: parse_datetime(row.try_get("updated_at")?)?,
    })
}

/// Errors returned by the database layer.
#[derive(Debug, Error, Clone)]
pub enum PostError {
    #[error("post {0} not found")]
    NotFound(Uuid),
}

/// Input payload for post creation.
#[derive(Debug, Clone)]
pub struct NewPost<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub image: &'a str,
}

/// Field updates applied to an existing post.
#[derive(Debug, Clone)]
pub struct UpdatePost<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub image: Option<&'a str>,
}

/// Persisted blog post row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostRecord {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DB_URL: &str = "sqlite::memory:";

    async fn setup_db() -> Database {
        Database::connect(TEST_DB_URL).await.unwrap()
    }

    fn sample_post<'a>(title: &'a str, image: &'a str) -> NewPost<'a> {
        NewPost {
            title,
            content: "long enough content",
            image,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_post_roundtrip() {
        let db = setup_db().await;
        let record = db
            .create_post(sample_post("First post", "aa11.jpg"))
            .await
            .unwrap();

        assert_eq!(record.title, "First post");
        assert_eq!(record.image, "aa11.jpg");
        assert_eq!(record.created_at, record.updated_at);

        let fetched = db.fetch_post(record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn fetch_unknown_post_returns_none() {
        let db = setup_db().await;
        assert!(db.fetch_post(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_posts_orders_newest_first() {
        let db = setup_db().await;
        for title in ["one", "two", "three"] {
            db.create_post(sample_post(title, "img.png")).await.unwrap();
        }

        let posts = db.list_posts(10, 0).await.unwrap();
        let titles: Vec<_> = posts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["three", "two", "one"]);
    }

    #[tokio::test]
    async fn list_posts_applies_limit_and_offset() {
        let db = setup_db().await;
        for title in ["a", "b", "c", "d"] {
            db.create_post(sample_post(title, "img.png")).await.unwrap();
        }

        let first = db.list_posts(2, 0).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].title, "d");

        let rest = db.list_posts(2, 2).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].title, "b");

        let past_end = db.list_posts(2, 10).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn count_posts_tracks_inserts_and_deletes() {
        let db = setup_db().await;
        assert_eq!(db.count_posts().await.unwrap(), 0);

        let record = db.create_post(sample_post("counted", "x.gif")).await.unwrap();
        assert_eq!(db.count_posts().await.unwrap(), 1);

        assert!(db.delete_post(record.id).await.unwrap());
        assert_eq!(db.count_posts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_post_replaces_fields_and_image() {
        let db = setup_db().await;
        let record = db
            .create_post(sample_post("before", "old.jpg"))
            .await
            .unwrap();

        let updated = db
            .update_post(
                record.id,
                UpdatePost {
                    title: "after",
                    content: "rewritten content here",
                    image: Some("new.png"),
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.title, "after");
        assert_eq!(updated.image, "new.png");
        assert_eq!(updated.created_at, record.created_at);
        assert!(updated.updated_at > record.updated_at);
    }

    #[tokio::test]
    async fn update_post_keeps_image_when_absent() {
        let db = setup_db().await;
        let record = db
            .create_post(sample_post("keeps image", "keep.jpg"))
            .await
            .unwrap();

        let updated = db
            .update_post(
                record.id,
                UpdatePost {
                    title: "new title",
                    content: "new content body",
                    image: None,
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.image, "keep.jpg");
        assert_eq!(updated.title, "new title");
    }

    #[tokio::test]
    async fn update_unknown_post_returns_none() {
        let db = setup_db().await;
        let missing = db
            .update_post(
                Uuid::new_v4(),
                UpdatePost {
                    title: "ghost",
                    content: "never stored",
                    image: None,
                },
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn delete_post_reports_removal() {
        let db = setup_db().await;
        let record = db.create_post(sample_post("doomed", "d.jpg")).await.unwrap();

        assert!(db.delete_post(record.id).await.unwrap());
        assert!(!db.delete_post(record.id).await.unwrap());
        assert!(db.fetch_post(record.id).await.unwrap().is_none());
    }
}
