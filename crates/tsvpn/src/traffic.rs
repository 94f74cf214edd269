//! Traffic sample persistence.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use chrono::{Local, NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One stored sample: cumulative interface counters at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficRecord {
    pub profile: String,
    pub timestamp: NaiveDateTime,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

pub trait TrafficStore: Send + Sync {
    fn insert(&self, profile: &str, bytes_sent: u64, bytes_recv: u64) -> anyhow::Result<()>;

    /// The most recent sample for `profile`.
    fn latest(&self, profile: &str) -> anyhow::Result<Option<TrafficRecord>>;

    /// Bytes moved on `date`: last sample minus first sample of that day,
    /// clamped at zero when the counters were reset in between.
    fn daily_total(&self, profile: &str, date: NaiveDate) -> anyhow::Result<(u64, u64)>;
}

/// SQLite-backed store with a single `traffic_data` table.
pub struct SqliteTrafficStore {
    conn: Mutex<Connection>,
}

impl SqliteTrafficStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening traffic database {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// A private in-memory database.
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        init_schema(&conn).context("creating traffic_data table")?;
        log::debug!("Table 'traffic_data' ensured.");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS traffic_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            profile TEXT NOT NULL,
            date TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            bytes_sent INTEGER,
            bytes_recv INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_traffic_profile_date ON traffic_data(profile, date);
        ",
    )
}

// SQLite integers are signed; counters beyond i64::MAX saturate.
fn to_sql(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

fn from_sql(value: Option<i64>) -> u64 {
    value.map(|v| v.max(0) as u64).unwrap_or(0)
}

impl TrafficStore for SqliteTrafficStore {
    fn insert(&self, profile: &str, bytes_sent: u64, bytes_recv: u64) -> anyhow::Result<()> {
        let now = Local::now().naive_local();
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO traffic_data (profile, date, timestamp, bytes_sent, bytes_recv)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                profile,
                now.format(DATE_FORMAT).to_string(),
                timestamp,
                to_sql(bytes_sent),
                to_sql(bytes_recv)
            ],
        )
        .context("inserting traffic sample")?;

        log::debug!(
            "Logged data for '{}': sent={} received={} at {}",
            profile,
            bytes_sent,
            bytes_recv,
            timestamp
        );
        Ok(())
    }

    fn latest(&self, profile: &str) -> anyhow::Result<Option<TrafficRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT timestamp, bytes_sent, bytes_recv FROM traffic_data
                 WHERE profile = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![profile],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((timestamp, sent, recv)) = row else {
            return Ok(None);
        };
        Ok(Some(TrafficRecord {
            profile: profile.to_string(),
            timestamp: NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
                .with_context(|| format!("bad traffic timestamp '{}'", timestamp))?,
            bytes_sent: from_sql(sent),
            bytes_recv: from_sql(recv),
        }))
    }

    fn daily_total(&self, profile: &str, date: NaiveDate) -> anyhow::Result<(u64, u64)> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT bytes_sent, bytes_recv FROM traffic_data
             WHERE date = ?1 AND profile = ?2
             ORDER BY timestamp ASC, id ASC",
        )?;
        let samples = stmt
            .query_map(
                params![date.format(DATE_FORMAT).to_string(), profile],
                |row| Ok((from_sql(row.get(0)?), from_sql(row.get(1)?))),
            )?
            .collect::<rusqlite::Result<Vec<(u64, u64)>>>()?;

        Ok(match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => (
                last.0.saturating_sub(first.0),
                last.1.saturating_sub(first.1),
            ),
            _ => (0, 0),
        })
    }
}
