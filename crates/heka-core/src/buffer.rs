//! Disk buffer / cursor queue (§4.6): an optional durable, at-least-once
//! queue interposed between the router and a single filter or output.
//!
//! Grounded in the SQLite journal pattern used for forwarder event durability
//! (WAL + `synchronous=FULL`, a monotonic sequence, and an explicit ack
//! cursor kept in a side table) — adapted here to a single `buffer` log per
//! consumer plus a one-row `checkpoint` table holding the most recently
//! advanced cursor.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::message::Message;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to (de)serialise buffered message: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("cursor '{0}' is not a value this buffer issued")]
    InvalidCursor(String),
}

/// Outcome of a consumer's attempt to process a delivered pack, used to
/// decide whether the *read position* advances (§4.6: "drop and success
/// both advance the read position... a retry verdict... causes the buffer
/// to redeliver the same message").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `process_message` returned retry: redeliver the same entry next time.
    Retry,
    /// `process_message` returned success or drop: move past this entry.
    Advance,
}

/// A message read back from the buffer, tagged with the cursor a consumer
/// must eventually pass to [`DiskBuffer::update_cursor`].
#[derive(Debug, Clone)]
pub struct BufferedPack {
    pub cursor: String,
    pub message: Message,
    pub msg_bytes: Vec<u8>,
}

struct BufferState {
    /// Highest id the read side has fully advanced past (retry-free).
    read_pos: i64,
    /// The id currently handed out and awaiting an ack, if any.
    pending: Option<i64>,
}

/// A single-writer (router-facing), single-reader (consumer-facing) durable
/// queue (§4.6, §5).
pub struct DiskBuffer {
    conn: Mutex<Connection>,
    state: Mutex<BufferState>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS buffer (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_json TEXT NOT NULL,
    msg_bytes BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS checkpoint (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    cursor_id INTEGER NOT NULL
);
";

impl DiskBuffer {
    /// Open (or create) the buffer at `path`, resuming read position from
    /// the most recently advanced cursor (§4.6 "On restart, the consumer
    /// resumes from the most recently advanced cursor").
    pub fn open(path: &Path) -> Result<Self, BufferError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.execute_batch(SCHEMA)?;

        let read_pos = checkpoint_cursor_id(&conn)?.unwrap_or(0);

        Ok(DiskBuffer {
            conn: Mutex::new(conn),
            state: Mutex::new(BufferState { read_pos, pending: None }),
        })
    }

    pub fn open_in_memory() -> Result<Self, BufferError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(DiskBuffer {
            conn: Mutex::new(conn),
            state: Mutex::new(BufferState { read_pos: 0, pending: None }),
        })
    }

    /// Append one message to the durable log, returning its cursor.
    pub async fn append(&self, message: &Message, msg_bytes: &[u8]) -> Result<String, BufferError> {
        let json = serde_json::to_string(message)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO buffer (message_json, msg_bytes) VALUES (?1, ?2)",
            params![json, msg_bytes],
        )?;
        Ok(id_to_cursor(conn.last_insert_rowid()))
    }

    /// Return the next pending entry without consuming it. Calling this
    /// repeatedly without an intervening [`ack_read`](Self::ack_read) call
    /// returns the same entry (it is idempotent on the read side).
    pub async fn next_pack(&self) -> Result<Option<BufferedPack>, BufferError> {
        let id = {
            let mut state = self.state.lock().await;
            match state.pending {
                Some(id) => id,
                None => {
                    let candidate = state.read_pos + 1;
                    let conn = self.conn.lock().await;
                    let exists: bool = conn.query_row(
                        "SELECT EXISTS(SELECT 1 FROM buffer WHERE id = ?1)",
                        params![candidate],
                        |r| r.get(0),
                    )?;
                    if !exists {
                        return Ok(None);
                    }
                    state.pending = Some(candidate);
                    candidate
                }
            }
        };

        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT message_json, msg_bytes FROM buffer WHERE id = ?1",
                params![id],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((json, msg_bytes)) => Ok(Some(BufferedPack {
                cursor: id_to_cursor(id),
                message: serde_json::from_str(&json)?,
                msg_bytes,
            })),
        }
    }

    /// Record the consumer's verdict on the pending entry (§4.6).
    pub async fn ack_read(&self, outcome: ReadOutcome) -> Result<(), BufferError> {
        let mut state = self.state.lock().await;
        if let ReadOutcome::Advance = outcome {
            if let Some(id) = state.pending.take() {
                state.read_pos = id;
            }
        }
        Ok(())
    }

    /// Explicitly advance the durable ack cursor (§4.6). A non-increasing
    /// `cursor` is logged and ignored rather than treated as an error (§3,
    /// §8 "an attempted c2 ≤ c1 leaves state unchanged").
    pub async fn update_cursor(&self, cursor: &str) -> Result<(), BufferError> {
        let new_id = cursor_to_id(cursor)?;
        let conn = self.conn.lock().await;
        let current = checkpoint_cursor_id(&conn)?;

        if let Some(current) = current {
            if new_id <= current {
                tracing::warn!(
                    attempted = new_id,
                    current,
                    "buffer cursor advance ignored: not strictly increasing"
                );
                return Ok(());
            }
        }

        conn.execute(
            "INSERT INTO checkpoint (id, cursor_id) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET cursor_id = excluded.cursor_id",
            params![new_id],
        )?;
        // Reclaim space for fully-acknowledged entries in the background is
        // elided here; deleting synchronously on advance is observably
        // equivalent for a single-writer/single-reader buffer.
        conn.execute("DELETE FROM buffer WHERE id <= ?1", params![new_id])?;
        Ok(())
    }

    pub async fn current_cursor(&self) -> Result<Option<String>, BufferError> {
        let conn = self.conn.lock().await;
        Ok(checkpoint_cursor_id(&conn)?.map(id_to_cursor))
    }
}

fn checkpoint_cursor_id(conn: &Connection) -> Result<Option<i64>, BufferError> {
    Ok(conn
        .query_row("SELECT cursor_id FROM checkpoint WHERE id = 0", [], |r| r.get(0))
        .optional()?)
}

fn id_to_cursor(id: i64) -> String {
    format!("{id:020}")
}

fn cursor_to_id(cursor: &str) -> Result<i64, BufferError> {
    cursor
        .parse::<i64>()
        .map_err(|_| BufferError::InvalidCursor(cursor.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn append_and_replay_preserves_order() {
        let buf = DiskBuffer::open_in_memory().unwrap();
        for payload in ["one", "two", "three"] {
            let mut m = Message::new();
            m.payload = payload.to_owned();
            buf.append(&m, payload.as_bytes()).await.unwrap();
        }

        for expected in ["one", "two", "three"] {
            let pack = buf.next_pack().await.unwrap().unwrap();
            assert_eq!(pack.message.payload, expected);
            buf.ack_read(ReadOutcome::Advance).await.unwrap();
        }
        assert!(buf.next_pack().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_redelivers_same_entry() {
        let buf = DiskBuffer::open_in_memory().unwrap();
        let mut m = Message::new();
        m.payload = "once".into();
        buf.append(&m, b"once").await.unwrap();

        let first = buf.next_pack().await.unwrap().unwrap();
        buf.ack_read(ReadOutcome::Retry).await.unwrap();
        let second = buf.next_pack().await.unwrap().unwrap();
        assert_eq!(first.cursor, second.cursor);

        buf.ack_read(ReadOutcome::Advance).await.unwrap();
        assert!(buf.next_pack().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cursor_must_advance_strictly() {
        let buf = DiskBuffer::open_in_memory().unwrap();
        let mut m = Message::new();
        buf.append(&m, b"a").await.unwrap();
        m.payload = "b".into();
        let c2 = buf.append(&m, b"b").await.unwrap();

        buf.update_cursor(&c2).await.unwrap();
        let advanced = buf.current_cursor().await.unwrap().unwrap();
        assert_eq!(advanced, c2);

        // A backward or equal advance is logged and ignored, not an error.
        buf.update_cursor(&c2).await.unwrap();
        assert_eq!(buf.current_cursor().await.unwrap().unwrap(), c2);
    }

    #[tokio::test]
    async fn restart_resumes_from_the_advanced_cursor() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();

        {
            let buf = DiskBuffer::open(&path).unwrap();
            for payload in ["a", "b", "c"] {
                let mut m = Message::new();
                m.payload = payload.to_owned();
                buf.append(&m, payload.as_bytes()).await.unwrap();
            }
            let first = buf.next_pack().await.unwrap().unwrap();
            buf.ack_read(ReadOutcome::Advance).await.unwrap();
            buf.update_cursor(&first.cursor).await.unwrap();
        }

        let reopened = DiskBuffer::open(&path).unwrap();
        let next = reopened.next_pack().await.unwrap().unwrap();
        assert_eq!(next.message.payload, "b");
    }
}
