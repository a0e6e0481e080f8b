//! Conversation repository
//!
//! Stores the message history of each story's refinement conversation.
//! Turns are only ever appended (numbered `max(seq) + 1` inside the writing
//! transaction) until the conversation is archived; `replace` is the only way
//! history shrinks. Publishing a story archives its conversation (see the
//! story repository), after which every write here returns `Ok(None)`.
//!
//! Appending the turns of a refinement and rewriting the story draft happen
//! in one transaction, so a story's content always matches the newest
//! assistant turn.

use crate::config::DatabaseDriver;
use crate::db::{mysql_pool, sqlite_pool, DynDatabasePool};
use crate::models::{Conversation, ConversationHistory, ConversationStatus, NewTurn, Turn, TurnRole};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlConnection, MySqlPool, Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// New story content written together with appended turns
#[derive(Debug, Clone, Copy)]
pub struct DraftUpdate<'a> {
    pub story_id: i64,
    pub content: &'a str,
    /// New title, written in the same transaction when set
    pub title: Option<&'a str>,
}

/// Conversation repository trait
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Get the conversation attached to a story
    async fn get_by_story(&self, story_id: i64) -> Result<Option<Conversation>>;

    /// Read the full ordered history of a conversation
    async fn history(&self, conversation_id: &str) -> Result<Vec<Turn>>;

    /// Append turns to an active conversation, optionally rewriting the
    /// story draft in the same transaction. Returns the stored turns, or
    /// `None` without writing anything when the conversation is missing or
    /// archived.
    async fn append(
        &self,
        conversation_id: &str,
        turns: &[NewTurn],
        draft: Option<DraftUpdate<'_>>,
    ) -> Result<Option<Vec<Turn>>>;

    /// Clear an active conversation and store `turns` as its new history
    /// (pass no turns to just clear it). `None` when the conversation is
    /// missing or archived; its history is then left untouched.
    async fn replace(
        &self,
        conversation_id: &str,
        turns: &[NewTurn],
    ) -> Result<Option<Vec<Turn>>>;

    /// Load a conversation together with its turns
    async fn load(&self, conversation: Conversation) -> Result<ConversationHistory> {
        let turns = self.history(&conversation.id).await?;
        Ok(ConversationHistory {
            conversation,
            turns,
        })
    }
}

/// SQLx-based conversation repository for SQLite and MySQL
pub struct SqlxConversationRepository {
    pool: DynDatabasePool,
}

impl SqlxConversationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a shared repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ConversationRepository> {
        Arc::new(Self::new(pool))
    }
}

const CONVERSATION_COLUMNS: &str = "id, story_id, status, created_at, updated_at";

#[async_trait]
impl ConversationRepository for SqlxConversationRepository {
    async fn get_by_story(&self, story_id: i64) -> Result<Option<Conversation>> {
        let sql = format!(
            "SELECT {} FROM conversations WHERE story_id = ?",
            CONVERSATION_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(story_id)
                    .fetch_optional(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to get conversation by story")?;
                row.map(|r| row_to_conversation_sqlite(&r)).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(story_id)
                    .fetch_optional(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to get conversation by story")?;
                row.map(|r| row_to_conversation_mysql(&r)).transpose()
            }
        }
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => history_sqlite(sqlite_pool(&self.pool)?, conversation_id).await,
            DatabaseDriver::Mysql => history_mysql(mysql_pool(&self.pool)?, conversation_id).await,
        }
    }

    async fn append(
        &self,
        conversation_id: &str,
        turns: &[NewTurn],
        draft: Option<DraftUpdate<'_>>,
    ) -> Result<Option<Vec<Turn>>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                append_sqlite(sqlite_pool(&self.pool)?, conversation_id, turns, draft).await
            }
            DatabaseDriver::Mysql => {
                append_mysql(mysql_pool(&self.pool)?, conversation_id, turns, draft).await
            }
        }
    }

    async fn replace(
        &self,
        conversation_id: &str,
        turns: &[NewTurn],
    ) -> Result<Option<Vec<Turn>>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                replace_sqlite(sqlite_pool(&self.pool)?, conversation_id, turns).await
            }
            DatabaseDriver::Mysql => {
                replace_mysql(mysql_pool(&self.pool)?, conversation_id, turns).await
            }
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn history_sqlite(pool: &SqlitePool, conversation_id: &str) -> Result<Vec<Turn>> {
    let rows = sqlx::query(
        "SELECT seq, role, content, created_at FROM conversation_turns WHERE conversation_id = ? ORDER BY seq",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await
    .context("Failed to read conversation history")?;

    rows.iter().map(row_to_turn_sqlite).collect()
}

/// Insert a conversation row inside an open transaction
pub(super) async fn insert_conversation_sqlite(
    conn: &mut SqliteConnection,
    id: &str,
    story_id: i64,
    now: DateTime<Utc>,
) -> Result<Conversation> {
    sqlx::query(
        "INSERT INTO conversations (id, story_id, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(story_id)
    .bind(ConversationStatus::Active.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("Failed to create conversation")?;

    Ok(Conversation {
        id: id.to_string(),
        story_id,
        status: ConversationStatus::Active,
        created_at: now,
        updated_at: now,
    })
}

/// Insert turns after the current last turn inside an open transaction
pub(super) async fn insert_turns_sqlite(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    turns: &[NewTurn],
    now: DateTime<Utc>,
) -> Result<Vec<Turn>> {
    let last: i64 = sqlx::query(
        "SELECT COALESCE(MAX(seq), 0) AS last_seq FROM conversation_turns WHERE conversation_id = ?",
    )
    .bind(conversation_id)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to read last turn")?
    .get("last_seq");

    let mut stored = Vec::with_capacity(turns.len());
    for (offset, turn) in turns.iter().enumerate() {
        let seq = last + offset as i64 + 1;
        sqlx::query(
            "INSERT INTO conversation_turns (conversation_id, seq, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(seq)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(now)
        .execute(&mut *conn)
        .await
        .context("Failed to append turn")?;

        stored.push(Turn {
            seq,
            role: turn.role,
            content: turn.content.clone(),
            created_at: now,
        });
    }

    Ok(stored)
}

/// Bump `updated_at` of an active conversation; false when it is missing or archived
async fn touch_active_sqlite(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let touched = sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ? AND status = ?")
        .bind(now)
        .bind(conversation_id)
        .bind(ConversationStatus::Active.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to update conversation")?
        .rows_affected();

    Ok(touched > 0)
}

async fn append_sqlite(
    pool: &SqlitePool,
    conversation_id: &str,
    turns: &[NewTurn],
    draft: Option<DraftUpdate<'_>>,
) -> Result<Option<Vec<Turn>>> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    if !touch_active_sqlite(&mut *tx, conversation_id, now).await? {
        return Ok(None);
    }
    let stored = insert_turns_sqlite(&mut *tx, conversation_id, turns, now).await?;

    if let Some(draft) = draft {
        sqlx::query(
            "UPDATE stories SET content = ?, title = COALESCE(?, title), updated_at = ? WHERE id = ?",
        )
        .bind(draft.content)
        .bind(draft.title)
        .bind(now)
        .bind(draft.story_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update story draft")?;
    }

    tx.commit().await.context("Failed to commit turns")?;
    Ok(Some(stored))
}

async fn replace_sqlite(
    pool: &SqlitePool,
    conversation_id: &str,
    turns: &[NewTurn],
) -> Result<Option<Vec<Turn>>> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    if !touch_active_sqlite(&mut *tx, conversation_id, now).await? {
        return Ok(None);
    }
    sqlx::query("DELETE FROM conversation_turns WHERE conversation_id = ?")
        .bind(conversation_id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear conversation")?;
    let stored = insert_turns_sqlite(&mut *tx, conversation_id, turns, now).await?;

    tx.commit().await.context("Failed to commit history")?;
    Ok(Some(stored))
}

pub(super) fn row_to_conversation_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation> {
    let status: String = row.get("status");
    Ok(Conversation {
        id: row.get("id"),
        story_id: row.get("story_id"),
        status: ConversationStatus::from_str(&status)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_turn_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Turn> {
    let role: String = row.get("role");
    Ok(Turn {
        seq: row.get("seq"),
        role: TurnRole::from_str(&role)?,
        content: row.get("content"),
        created_at: row.get("created_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn history_mysql(pool: &MySqlPool, conversation_id: &str) -> Result<Vec<Turn>> {
    let rows = sqlx::query(
        "SELECT seq, role, content, created_at FROM conversation_turns WHERE conversation_id = ? ORDER BY seq",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await
    .context("Failed to read conversation history")?;

    rows.iter().map(row_to_turn_mysql).collect()
}

/// Insert a conversation row inside an open transaction
pub(super) async fn insert_conversation_mysql(
    conn: &mut MySqlConnection,
    id: &str,
    story_id: i64,
    now: DateTime<Utc>,
) -> Result<Conversation> {
    sqlx::query(
        "INSERT INTO conversations (id, story_id, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(story_id)
    .bind(ConversationStatus::Active.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("Failed to create conversation")?;

    Ok(Conversation {
        id: id.to_string(),
        story_id,
        status: ConversationStatus::Active,
        created_at: now,
        updated_at: now,
    })
}

/// Insert turns after the current last turn inside an open transaction
pub(super) async fn insert_turns_mysql(
    conn: &mut MySqlConnection,
    conversation_id: &str,
    turns: &[NewTurn],
    now: DateTime<Utc>,
) -> Result<Vec<Turn>> {
    let last: i64 = sqlx::query(
        "SELECT CAST(COALESCE(MAX(seq), 0) AS SIGNED) AS last_seq FROM conversation_turns WHERE conversation_id = ?",
    )
    .bind(conversation_id)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to read last turn")?
    .get("last_seq");

    let mut stored = Vec::with_capacity(turns.len());
    for (offset, turn) in turns.iter().enumerate() {
        let seq = last + offset as i64 + 1;
        sqlx::query(
            "INSERT INTO conversation_turns (conversation_id, seq, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(seq)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(now)
        .execute(&mut *conn)
        .await
        .context("Failed to append turn")?;

        stored.push(Turn {
            seq,
            role: turn.role,
            content: turn.content.clone(),
            created_at: now,
        });
    }

    Ok(stored)
}

/// Bump `updated_at` of an active conversation; false when it is missing or archived
async fn touch_active_mysql(
    conn: &mut MySqlConnection,
    conversation_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let touched = sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ? AND status = ?")
        .bind(now)
        .bind(conversation_id)
        .bind(ConversationStatus::Active.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to update conversation")?
        .rows_affected();

    Ok(touched > 0)
}

async fn append_mysql(
    pool: &MySqlPool,
    conversation_id: &str,
    turns: &[NewTurn],
    draft: Option<DraftUpdate<'_>>,
) -> Result<Option<Vec<Turn>>> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    if !touch_active_mysql(&mut *tx, conversation_id, now).await? {
        return Ok(None);
    }
    let stored = insert_turns_mysql(&mut *tx, conversation_id, turns, now).await?;

    if let Some(draft) = draft {
        sqlx::query(
            "UPDATE stories SET content = ?, title = COALESCE(?, title), updated_at = ? WHERE id = ?",
        )
        .bind(draft.content)
        .bind(draft.title)
        .bind(now)
        .bind(draft.story_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update story draft")?;
    }

    tx.commit().await.context("Failed to commit turns")?;
    Ok(Some(stored))
}

async fn replace_mysql(
    pool: &MySqlPool,
    conversation_id: &str,
    turns: &[NewTurn],
) -> Result<Option<Vec<Turn>>> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    if !touch_active_mysql(&mut *tx, conversation_id, now).await? {
        return Ok(None);
    }
    sqlx::query("DELETE FROM conversation_turns WHERE conversation_id = ?")
        .bind(conversation_id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear conversation")?;
    let stored = insert_turns_mysql(&mut *tx, conversation_id, turns, now).await?;

    tx.commit().await.context("Failed to commit history")?;
    Ok(Some(stored))
}

fn row_to_conversation_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Conversation> {
    let status: String = row.get("status");
    Ok(Conversation {
        id: row.get("id"),
        story_id: row.get("story_id"),
        status: ConversationStatus::from_str(&status)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_turn_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Turn> {
    let role: String = row.get("role");
    Ok(Turn {
        seq: row.get::<i32, _>("seq") as i64,
        role: TurnRole::from_str(&role)?,
        content: row.get("content"),
        created_at: row.get("created_at"),
    })
}
