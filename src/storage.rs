use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::threshold::Transition;

pub type EventId = i64;

/// Processing status of an uploaded video.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(VideoStatus::Pending),
            "processing" => Ok(VideoStatus::Processing),
            "completed" => Ok(VideoStatus::Completed),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(anyhow!("unknown video status '{}'", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub user_id: String,
    pub source: String,
    pub status: VideoStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Detection event as handed to the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub video_id: String,
    pub user_id: String,
    pub event_type: String,
    pub anomaly_score: f64,
    pub confidence: f64,
    pub timestamp_seconds: f64,
    pub frame_number: u64,
    pub description: String,
    pub is_alert: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    #[serde(flatten)]
    pub event: NewEvent,
    pub created_at: i64,
    pub feedback_score: Option<f64>,
    pub is_false_positive: Option<bool>,
    pub feedback_user_id: Option<String>,
}

/// Operator feedback stored on the event row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventFeedback {
    pub user_id: String,
    pub is_false_positive: bool,
    pub feedback_score: f64,
}

pub trait EventStore: Send + Sync {
    fn create_event(&self, event: &NewEvent) -> Result<EventId>;

    fn event(&self, id: EventId) -> Result<Option<EventRecord>>;

    /// Events of one video ordered by timestamp.
    fn events_for_video(&self, video_id: &str) -> Result<Vec<EventRecord>>;

    fn record_feedback(&self, id: EventId, feedback: &EventFeedback) -> Result<()>;
}

pub trait VideoStore: Send + Sync {
    /// Register a new video in `pending` state and return its id.
    fn register_video(&self, user_id: &str, source: &str) -> Result<String>;

    fn update_status(&self, video_id: &str, status: VideoStatus) -> Result<()>;

    fn video(&self, video_id: &str) -> Result<Option<VideoRecord>>;
}

/// Append-only log of controller transitions.
pub trait TrainingJournal: Send + Sync {
    fn record_transition(&self, transition: &Transition) -> Result<()>;

    fn transition_count(&self) -> Result<u64>;
}

pub fn new_video_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_s() -> Result<i64> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    i64::try_from(secs).map_err(|_| anyhow!("system clock exceeds i64 range"))
}

// -------------------- SQLite --------------------

/// Single SQLite connection backing events, videos and the training journal.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS videos (
              video_id TEXT PRIMARY KEY,
              user_id TEXT NOT NULL,
              source TEXT NOT NULL,
              status TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              video_id TEXT NOT NULL,
              user_id TEXT NOT NULL,
              event_type TEXT NOT NULL,
              anomaly_score REAL NOT NULL,
              confidence REAL NOT NULL,
              timestamp_seconds REAL NOT NULL,
              frame_number INTEGER NOT NULL,
              description TEXT NOT NULL,
              is_alert INTEGER NOT NULL,
              created_at INTEGER NOT NULL,
              feedback_score REAL,
              is_false_positive INTEGER,
              feedback_user_id TEXT
            );

            CREATE TABLE IF NOT EXISTS rl_training_data (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              state_vector TEXT NOT NULL,
              action INTEGER NOT NULL,
              reward REAL NOT NULL,
              next_state_vector TEXT NOT NULL,
              done INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_video ON events(video_id, timestamp_seconds);
            "#,
        )?;
        Ok(())
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    let frame_number: i64 = row.get(7)?;
    Ok(EventRecord {
        id: row.get(0)?,
        event: NewEvent {
            video_id: row.get(1)?,
            user_id: row.get(2)?,
            event_type: row.get(3)?,
            anomaly_score: row.get(4)?,
            confidence: row.get(5)?,
            timestamp_seconds: row.get(6)?,
            frame_number: frame_number.max(0) as u64,
            description: row.get(8)?,
            is_alert: row.get(9)?,
        },
        created_at: row.get(10)?,
        feedback_score: row.get(11)?,
        is_false_positive: row.get(12)?,
        feedback_user_id: row.get(13)?,
    })
}

const EVENT_COLUMNS: &str = "id, video_id, user_id, event_type, anomaly_score, confidence, \
     timestamp_seconds, frame_number, description, is_alert, created_at, feedback_score, \
     is_false_positive, feedback_user_id";

impl EventStore for SqliteStore {
    fn create_event(&self, event: &NewEvent) -> Result<EventId> {
        let frame_number = i64::try_from(event.frame_number)
            .map_err(|_| anyhow!("frame number exceeds i64 range"))?;
        let created_at = now_s()?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO events(video_id, user_id, event_type, anomaly_score, confidence,
                               timestamp_seconds, frame_number, description, is_alert, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                event.video_id,
                event.user_id,
                event.event_type,
                event.anomaly_score,
                event.confidence,
                event.timestamp_seconds,
                frame_number,
                event.description,
                event.is_alert,
                created_at
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn event(&self, id: EventId) -> Result<Option<EventRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS);
        let record = conn
            .query_row(&sql, params![id], event_from_row)
            .optional()?;
        Ok(record)
    }

    fn events_for_video(&self, video_id: &str) -> Result<Vec<EventRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM events WHERE video_id = ?1 ORDER BY timestamp_seconds ASC, id ASC",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![video_id], event_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn record_feedback(&self, id: EventId, feedback: &EventFeedback) -> Result<()> {
        let changed = self.lock()?.execute(
            r#"
            UPDATE events
               SET feedback_score = ?1, is_false_positive = ?2, feedback_user_id = ?3
             WHERE id = ?4
            "#,
            params![
                feedback.feedback_score,
                feedback.is_false_positive,
                feedback.user_id,
                id
            ],
        )?;
        if changed == 0 {
            return Err(anyhow!("event {} not found", id));
        }
        Ok(())
    }
}

impl VideoStore for SqliteStore {
    fn register_video(&self, user_id: &str, source: &str) -> Result<String> {
        let video_id = new_video_id();
        let now = now_s()?;
        self.lock()?.execute(
            r#"
            INSERT INTO videos(video_id, user_id, source, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
            params![
                video_id,
                user_id,
                source,
                VideoStatus::Pending.as_str(),
                now
            ],
        )?;
        Ok(video_id)
    }

    fn update_status(&self, video_id: &str, status: VideoStatus) -> Result<()> {
        let changed = self.lock()?.execute(
            "UPDATE videos SET status = ?1, updated_at = ?2 WHERE video_id = ?3",
            params![status.as_str(), now_s()?, video_id],
        )?;
        if changed == 0 {
            return Err(anyhow!("video {} not found", video_id));
        }
        Ok(())
    }

    fn video(&self, video_id: &str) -> Result<Option<VideoRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT video_id, user_id, source, status, created_at, updated_at \
                 FROM videos WHERE video_id = ?1",
                params![video_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((video_id, user_id, source, status, created_at, updated_at)) = row else {
            return Ok(None);
        };
        Ok(Some(VideoRecord {
            video_id,
            user_id,
            source,
            status: VideoStatus::parse(&status)?,
            created_at,
            updated_at,
        }))
    }
}

impl TrainingJournal for SqliteStore {
    fn record_transition(&self, transition: &Transition) -> Result<()> {
        let state_vector = serde_json::to_string(&transition.state_vector)?;
        let next_state_vector = serde_json::to_string(&transition.next_state_vector)?;
        self.lock()?.execute(
            r#"
            INSERT INTO rl_training_data(created_at, state_vector, action, reward, next_state_vector, done)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                now_s()?,
                state_vector,
                transition.action,
                transition.reward,
                next_state_vector,
                transition.done
            ],
        )?;
        Ok(())
    }

    fn transition_count(&self) -> Result<u64> {
        let count: i64 =
            self.lock()?
                .query_row("SELECT COUNT(*) FROM rl_training_data", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

// -------------------- in-memory --------------------

#[derive(Default)]
struct InMemoryTables {
    videos: BTreeMap<String, VideoRecord>,
    events: Vec<EventRecord>,
}

/// Event and video store held in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<InMemoryTables>,
}

impl InMemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, InMemoryTables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    pub fn event_count(&self) -> usize {
        self.lock().map(|t| t.events.len()).unwrap_or(0)
    }
}

impl EventStore for InMemoryStore {
    fn create_event(&self, event: &NewEvent) -> Result<EventId> {
        let created_at = now_s()?;
        let mut tables = self.lock()?;
        let id = tables.events.len() as EventId + 1;
        tables.events.push(EventRecord {
            id,
            event: event.clone(),
            created_at,
            feedback_score: None,
            is_false_positive: None,
            feedback_user_id: None,
        });
        Ok(id)
    }

    fn event(&self, id: EventId) -> Result<Option<EventRecord>> {
        Ok(self.lock()?.events.iter().find(|e| e.id == id).cloned())
    }

    fn events_for_video(&self, video_id: &str) -> Result<Vec<EventRecord>> {
        let mut out: Vec<EventRecord> = self
            .lock()?
            .events
            .iter()
            .filter(|e| e.event.video_id == video_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.event
                .timestamp_seconds
                .total_cmp(&b.event.timestamp_seconds)
                .then(a.id.cmp(&b.id))
        });
        Ok(out)
    }

    fn record_feedback(&self, id: EventId, feedback: &EventFeedback) -> Result<()> {
        let mut tables = self.lock()?;
        let record = tables
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow!("event {} not found", id))?;
        record.feedback_score = Some(feedback.feedback_score);
        record.is_false_positive = Some(feedback.is_false_positive);
        record.feedback_user_id = Some(feedback.user_id.clone());
        Ok(())
    }
}

impl VideoStore for InMemoryStore {
    fn register_video(&self, user_id: &str, source: &str) -> Result<String> {
        let video_id = new_video_id();
        let now = now_s()?;
        self.lock()?.videos.insert(
            video_id.clone(),
            VideoRecord {
                video_id: video_id.clone(),
                user_id: user_id.to_string(),
                source: source.to_string(),
                status: VideoStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(video_id)
    }

    fn update_status(&self, video_id: &str, status: VideoStatus) -> Result<()> {
        let now = now_s()?;
        let mut tables = self.lock()?;
        let record = tables
            .videos
            .get_mut(video_id)
            .ok_or_else(|| anyhow!("video {} not found", video_id))?;
        record.status = status;
        record.updated_at = now;
        Ok(())
    }

    fn video(&self, video_id: &str) -> Result<Option<VideoRecord>> {
        Ok(self.lock()?.videos.get(video_id).cloned())
    }
}

/// Training journal held in process memory.
#[derive(Default)]
pub struct InMemoryJournal {
    transitions: Mutex<Vec<Transition>>,
}

impl InMemoryJournal {
    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

impl TrainingJournal for InMemoryJournal {
    fn record_transition(&self, transition: &Transition) -> Result<()> {
        self.transitions
            .lock()
            .map_err(|_| anyhow!("journal lock poisoned"))?
            .push(transition.clone());
        Ok(())
    }

    fn transition_count(&self) -> Result<u64> {
        let transitions = self
            .transitions
            .lock()
            .map_err(|_| anyhow!("journal lock poisoned"))?;
        Ok(transitions.len() as u64)
    }
}
