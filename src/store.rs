//! Durable, append-only log of chat messages.
//!
//! Rows live in a single SQLite table. The autoincrement id doubles as the
//! chronological order, so `list_all` never has to sort on timestamps.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

use crate::AppResult;

/// `2025-03-01 12:30:05.123456`, the form clients see in chat frames.
const WIRE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]");

/// `2025-03-01 12:30:05`, the form used in exported transcripts.
const TRANSCRIPT_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        use MessageKind::*;
        match self {
            Text => "text",
            Image => "image",
            Video => "video",
            System => "system",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use MessageKind::*;
        match s {
            "text" => Ok(Text),
            "image" => Ok(Image),
            "video" => Ok(Video),
            "system" => Ok(System),
            other => Err(format!("unknown message type {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub sender: String,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: OffsetDateTime,
}

impl Message {
    pub fn wire_timestamp(&self) -> String {
        format_timestamp(self.timestamp, WIRE_FORMAT)
    }

    /// One export line: `[YYYY-MM-DD HH:MM:SS] sender（type）：content`.
    pub fn transcript_line(&self) -> String {
        format!(
            "[{}] {}（{}）：{}",
            format_timestamp(self.timestamp, TRANSCRIPT_FORMAT),
            self.sender,
            self.kind,
            self.content,
        )
    }
}

fn format_timestamp(timestamp: OffsetDateTime, format: &[BorrowedFormatItem<'_>]) -> String {
    // only fails for formats with components the value lacks, which ours never use
    timestamp.format(format).unwrap_or_default()
}

type MessageRow = (i64, String, String, String, OffsetDateTime);

fn from_row((id, sender, content, kind, timestamp): MessageRow) -> AppResult<Message> {
    let kind = kind
        .parse()
        .map_err(|e: String| sqlx::Error::Decode(e.into()))?;

    Ok(Message {
        id,
        sender,
        content,
        kind,
        timestamp,
    })
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    /// Opens (creating if missing) the database at `database_url` and brings the schema up to date.
    pub async fn open(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;

        Self::migrate(pool).await
    }

    /// A private in-memory store. Pinned to one connection that never idles
    /// out, since every SQLite connection gets its own `:memory:` database.
    pub async fn in_memory() -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> AppResult<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(MessageStore { pool })
    }

    /// Persists one message and returns it with its assigned id.
    ///
    /// The insert is committed before this returns, so a `list_all` issued
    /// afterwards always includes it.
    pub async fn append(
        &self,
        sender: &str,
        content: &str,
        kind: MessageKind,
        timestamp: Option<OffsetDateTime>,
    ) -> AppResult<Message> {
        let timestamp = timestamp.unwrap_or_else(OffsetDateTime::now_utc);

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO messages (sender,content,type,timestamp) VALUES (?,?,?,?) RETURNING id",
        )
        .bind(sender)
        .bind(content)
        .bind(kind.as_str())
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(Message {
            id,
            sender: sender.to_owned(),
            content: content.to_owned(),
            kind,
            timestamp,
        })
    }

    /// Every stored message, oldest first.
    pub async fn list_all(&self) -> AppResult<Vec<Message>> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT id,sender,content,type,timestamp FROM messages ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(from_row)
        .collect()
    }

    pub async fn count(&self) -> AppResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Closes the pool. Later calls fail with a storage error.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
