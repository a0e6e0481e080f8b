//! Story repository
//!
//! Stories are created together with their conversation and its first turns
//! in a single transaction, so a failed write never leaves a story without
//! history. Publishing records the wiki page and archives the conversation
//! atomically as well.

use crate::config::DatabaseDriver;
use crate::db::{mysql_pool, sqlite_pool, DynDatabasePool};
use crate::models::{
    ConversationHistory, ConversationStatus, CreateStoryInput, ListParams, NewTurn, PagedResult,
    PublishedPage, Story, StorySource,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::conversation::{
    insert_conversation_mysql, insert_conversation_sqlite, insert_turns_mysql, insert_turns_sqlite,
};

const STORY_COLUMNS: &str = "id, owner_id, title, content, transcript, source, published, \
     wiki_page_id, wiki_url, published_at, created_at, updated_at";

/// Story repository trait
#[async_trait]
pub trait StoryRepository: Send + Sync {
    /// Create a story, its conversation and the initial turns atomically
    async fn create_with_conversation(
        &self,
        input: &CreateStoryInput,
        turns: &[NewTurn],
    ) -> Result<(Story, ConversationHistory)>;

    /// Get story by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Story>>;

    /// List stories newest first; `owner_id = None` lists every story
    async fn list(&self, owner_id: Option<i64>, params: &ListParams) -> Result<PagedResult<Story>>;

    /// Change a story's title
    async fn update_title(&self, id: i64, title: &str) -> Result<()>;

    /// Record a successful publication and archive the conversation
    async fn mark_published(&self, id: i64, page: &PublishedPage) -> Result<Story>;

    /// Delete a story (cascades to its conversation); false if it did not exist
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// SQLx-based story repository for SQLite and MySQL
pub struct SqlxStoryRepository {
    pool: DynDatabasePool,
}

impl SqlxStoryRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a shared repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn StoryRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl StoryRepository for SqlxStoryRepository {
    async fn create_with_conversation(
        &self,
        input: &CreateStoryInput,
        turns: &[NewTurn],
    ) -> Result<(Story, ConversationHistory)> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_story_sqlite(sqlite_pool(&self.pool)?, input, turns).await,
            DatabaseDriver::Mysql => create_story_mysql(mysql_pool(&self.pool)?, input, turns).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Story>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_story_sqlite(sqlite_pool(&self.pool)?, id).await,
            DatabaseDriver::Mysql => get_story_mysql(mysql_pool(&self.pool)?, id).await,
        }
    }

    async fn list(&self, owner_id: Option<i64>, params: &ListParams) -> Result<PagedResult<Story>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_stories_sqlite(sqlite_pool(&self.pool)?, owner_id, params).await
            }
            DatabaseDriver::Mysql => {
                list_stories_mysql(mysql_pool(&self.pool)?, owner_id, params).await
            }
        }
    }

    async fn update_title(&self, id: i64, title: &str) -> Result<()> {
        let sql = "UPDATE stories SET title = ?, updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(title)
                .bind(now)
                .bind(id)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(title)
                .bind(now)
                .bind(id)
                .execute(mysql_pool(&self.pool)?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to update story title")?;
        Ok(())
    }

    async fn mark_published(&self, id: i64, page: &PublishedPage) -> Result<Story> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => mark_published_sqlite(sqlite_pool(&self.pool)?, id, page).await,
            DatabaseDriver::Mysql => mark_published_mysql(mysql_pool(&self.pool)?, id, page).await,
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM stories WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(mysql_pool(&self.pool)?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to delete story")?;
        Ok(affected > 0)
    }
}

fn new_story(id: i64, input: &CreateStoryInput, now: chrono::DateTime<Utc>) -> Story {
    Story {
        id,
        owner_id: input.owner_id,
        title: input.title.clone(),
        content: input.content.clone(),
        transcript: input.transcript.clone(),
        source: input.source,
        published: false,
        wiki_page_id: None,
        wiki_url: None,
        published_at: None,
        created_at: now,
        updated_at: now,
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_story_sqlite(
    pool: &SqlitePool,
    input: &CreateStoryInput,
    turns: &[NewTurn],
) -> Result<(Story, ConversationHistory)> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let story_id = sqlx::query(
        r#"
        INSERT INTO stories (owner_id, title, content, transcript, source, published, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(input.owner_id)
    .bind(&input.title)
    .bind(&input.content)
    .bind(&input.transcript)
    .bind(input.source.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create story")?
    .last_insert_rowid();

    let conversation_id = Uuid::new_v4().to_string();
    let conversation = insert_conversation_sqlite(&mut *tx, &conversation_id, story_id, now).await?;
    let stored = insert_turns_sqlite(&mut *tx, &conversation_id, turns, now).await?;

    tx.commit().await.context("Failed to commit story")?;

    Ok((
        new_story(story_id, input, now),
        ConversationHistory {
            conversation,
            turns: stored,
        },
    ))
}

async fn get_story_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Story>> {
    let sql = format!("SELECT {} FROM stories WHERE id = ?", STORY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get story by ID")?;

    row.map(|r| row_to_story_sqlite(&r)).transpose()
}

async fn list_stories_sqlite(
    pool: &SqlitePool,
    owner_id: Option<i64>,
    params: &ListParams,
) -> Result<PagedResult<Story>> {
    let filter = if owner_id.is_some() { "WHERE owner_id = ?" } else { "" };

    let sql = format!(
        "SELECT {} FROM stories {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        STORY_COLUMNS, filter
    );
    let mut query = sqlx::query(&sql);
    if let Some(owner_id) = owner_id {
        query = query.bind(owner_id);
    }
    let rows = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list stories")?;

    let count_sql = format!("SELECT COUNT(*) AS count FROM stories {}", filter);
    let mut count_query = sqlx::query(&count_sql);
    if let Some(owner_id) = owner_id {
        count_query = count_query.bind(owner_id);
    }
    let total: i64 = count_query
        .fetch_one(pool)
        .await
        .context("Failed to count stories")?
        .get("count");

    let items = rows
        .iter()
        .map(row_to_story_sqlite)
        .collect::<Result<Vec<_>>>()?;

    Ok(PagedResult::new(items, total, params))
}

async fn mark_published_sqlite(pool: &SqlitePool, id: i64, page: &PublishedPage) -> Result<Story> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let updated = sqlx::query(
        r#"
        UPDATE stories
        SET published = 1, wiki_page_id = ?, wiki_url = ?, published_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&page.page_id)
    .bind(&page.url)
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await
    .context("Failed to mark story published")?
    .rows_affected();

    if updated == 0 {
        return Err(anyhow!("Story {} not found", id));
    }

    sqlx::query("UPDATE conversations SET status = ?, updated_at = ? WHERE story_id = ?")
        .bind(ConversationStatus::Archived.to_string())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to archive conversation")?;

    tx.commit().await.context("Failed to commit publication")?;

    get_story_sqlite(pool, id)
        .await?
        .ok_or_else(|| anyhow!("Story not found after publishing"))
}

fn row_to_story_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Story> {
    let source: String = row.get("source");
    Ok(Story {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        content: row.get("content"),
        transcript: row.get("transcript"),
        source: StorySource::from_str(&source)?,
        published: row.get("published"),
        wiki_page_id: row.get("wiki_page_id"),
        wiki_url: row.get("wiki_url"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_story_mysql(
    pool: &MySqlPool,
    input: &CreateStoryInput,
    turns: &[NewTurn],
) -> Result<(Story, ConversationHistory)> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let story_id = sqlx::query(
        r#"
        INSERT INTO stories (owner_id, title, content, transcript, source, published, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, FALSE, ?, ?)
        "#,
    )
    .bind(input.owner_id)
    .bind(&input.title)
    .bind(&input.content)
    .bind(&input.transcript)
    .bind(input.source.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create story")?
    .last_insert_id() as i64;

    let conversation_id = Uuid::new_v4().to_string();
    let conversation = insert_conversation_mysql(&mut *tx, &conversation_id, story_id, now).await?;
    let stored = insert_turns_mysql(&mut *tx, &conversation_id, turns, now).await?;

    tx.commit().await.context("Failed to commit story")?;

    Ok((
        new_story(story_id, input, now),
        ConversationHistory {
            conversation,
            turns: stored,
        },
    ))
}

async fn get_story_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Story>> {
    let sql = format!("SELECT {} FROM stories WHERE id = ?", STORY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get story by ID")?;

    row.map(|r| row_to_story_mysql(&r)).transpose()
}

async fn list_stories_mysql(
    pool: &MySqlPool,
    owner_id: Option<i64>,
    params: &ListParams,
) -> Result<PagedResult<Story>> {
    let filter = if owner_id.is_some() { "WHERE owner_id = ?" } else { "" };

    let sql = format!(
        "SELECT {} FROM stories {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        STORY_COLUMNS, filter
    );
    let mut query = sqlx::query(&sql);
    if let Some(owner_id) = owner_id {
        query = query.bind(owner_id);
    }
    let rows = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list stories")?;

    let count_sql = format!("SELECT COUNT(*) AS count FROM stories {}", filter);
    let mut count_query = sqlx::query(&count_sql);
    if let Some(owner_id) = owner_id {
        count_query = count_query.bind(owner_id);
    }
    let total: i64 = count_query
        .fetch_one(pool)
        .await
        .context("Failed to count stories")?
        .get("count");

    let items = rows
        .iter()
        .map(row_to_story_mysql)
        .collect::<Result<Vec<_>>>()?;

    Ok(PagedResult::new(items, total, params))
}

async fn mark_published_mysql(pool: &MySqlPool, id: i64, page: &PublishedPage) -> Result<Story> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let updated = sqlx::query(
        r#"
        UPDATE stories
        SET published = TRUE, wiki_page_id = ?, wiki_url = ?, published_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&page.page_id)
    .bind(&page.url)
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await
    .context("Failed to mark story published")?
    .rows_affected();

    if updated == 0 {
        return Err(anyhow!("Story {} not found", id));
    }

    sqlx::query("UPDATE conversations SET status = ?, updated_at = ? WHERE story_id = ?")
        .bind(ConversationStatus::Archived.to_string())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to archive conversation")?;

    tx.commit().await.context("Failed to commit publication")?;

    get_story_mysql(pool, id)
        .await?
        .ok_or_else(|| anyhow!("Story not found after publishing"))
}

fn row_to_story_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Story> {
    let source: String = row.get("source");
    Ok(Story {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        content: row.get("content"),
        transcript: row.get("transcript"),
        source: StorySource::from_str(&source)?,
        published: row.get("published"),
        wiki_page_id: row.get("wiki_page_id"),
        wiki_url: row.get("wiki_url"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
