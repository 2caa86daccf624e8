use chrono::Utc;
use rusqlite::{OptionalExtension, Row};

use crate::db::Database;
use crate::error::ServerError;
use crate::models::message::ChatMessage;
use crate::models::thread::{Thread, ThreadState};

#[derive(Clone)]
pub struct ThreadStore {
    db: Database,
}

impl ThreadStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, thread: &Thread) -> Result<(), ServerError> {
        let t = thread.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO threads (id, title, state, chat, stream_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                       title = excluded.title,
                       state = excluded.state,
                       chat = excluded.chat,
                       stream_id = excluded.stream_id,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        t.id,
                        t.title,
                        t.state.as_str(),
                        serde_json::to_string(&t.chat).unwrap_or_else(|_| "[]".to_string()),
                        t.stream_id,
                        t.created_at.timestamp_millis(),
                        t.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Thread>, ServerError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, title, state, chat, stream_id, created_at, updated_at
                     FROM threads WHERE id = ?1",
                )?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_thread(row)))
                    .optional()
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<Thread>, ServerError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, title, state, chat, stream_id, created_at, updated_at
                     FROM threads ORDER BY updated_at DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_thread(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn update_title(&self, id: &str, title: &str) -> Result<(), ServerError> {
        let id = id.to_string();
        let title = title.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE threads SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![title, now, id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn update_state(&self, id: &str, state: ThreadState) -> Result<(), ServerError> {
        let id = id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE threads SET state = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![state.as_str(), now, id],
                )?;
                Ok(())
            })
            .await
    }

    /// Attach the run's resumable stream to the thread so reconnecting
    /// clients can resolve thread → stream → run output.
    pub async fn set_stream(&self, id: &str, stream_id: &str) -> Result<(), ServerError> {
        let id = id.to_string();
        let stream_id = stream_id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE threads SET stream_id = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![stream_id, now, id],
                )?;
                Ok(())
            })
            .await
    }

    /// Full-replace the chat transcript.
    pub async fn save_chat(&self, id: &str, chat: &[ChatMessage]) -> Result<(), ServerError> {
        let id = id.to_string();
        let chat_json = serde_json::to_string(chat).unwrap_or_else(|_| "[]".to_string());
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE threads SET chat = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![chat_json, now, id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ServerError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.execute("DELETE FROM threads WHERE id = ?1", rusqlite::params![id])?;
                Ok(())
            })
            .await
    }
}

fn row_to_thread(row: &Row<'_>) -> Thread {
    let chat_str: String = row.get(3).unwrap_or_default();
    let chat: Vec<ChatMessage> = serde_json::from_str(&chat_str).unwrap_or_default();
    let created_ms: i64 = row.get(5).unwrap_or(0);
    let updated_ms: i64 = row.get(6).unwrap_or(0);

    Thread {
        id: row.get(0).unwrap_or_default(),
        title: row.get(1).unwrap_or_default(),
        state: ThreadState::from_str(&row.get::<_, String>(2).unwrap_or_default()),
        chat,
        stream_id: row.get(4).unwrap_or_default(),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_get_roundtrip_preserves_chat() {
        let db = Database::open_in_memory().unwrap();
        let store = ThreadStore::new(db);

        let chat = vec![ChatMessage::user("hello"), ChatMessage::assistant("hi")];
        let thread = Thread::new("t-1".to_string(), "New Thread".to_string(), chat);
        store.save(&thread).await.unwrap();

        let loaded = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "New Thread");
        assert_eq!(loaded.state, ThreadState::Planning);
        assert_eq!(loaded.chat.len(), 2);
        assert_eq!(loaded.chat[0].content, "hello");
    }

    #[tokio::test]
    async fn state_and_stream_updates_persist() {
        let db = Database::open_in_memory().unwrap();
        let store = ThreadStore::new(db);

        let thread = Thread::new("t-2".to_string(), "T".to_string(), vec![]);
        store.save(&thread).await.unwrap();

        store
            .update_state("t-2", ThreadState::WaitingForFeedback)
            .await
            .unwrap();
        store.set_stream("t-2", "stream-abc").await.unwrap();

        let loaded = store.get("t-2").await.unwrap().unwrap();
        assert_eq!(loaded.state, ThreadState::WaitingForFeedback);
        assert_eq!(loaded.stream_id.as_deref(), Some("stream-abc"));
    }

    #[tokio::test]
    async fn missing_thread_is_none() {
        let db = Database::open_in_memory().unwrap();
        let store = ThreadStore::new(db);
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
