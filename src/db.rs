use std::{path::Path, sync::Mutex};

use anyhow::Context;
use chrono::{DateTime, Local};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;

use crate::dorm::{DormRecord, FieldUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dorm with {field} {value:?} already exists")]
    Duplicate { field: &'static str, value: String },
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode members: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid timestamp in database: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Point lookups and point updates of dorm records keyed by `dorm_id`.
pub trait DormStore: Send + Sync {
    fn insert(&self, dorm: &DormRecord) -> Result<(), StoreError>;

    fn find(&self, dorm_id: &str) -> Result<Option<DormRecord>, StoreError>;

    fn list(&self) -> Result<Vec<DormRecord>, StoreError>;

    /// Applies `update` to the record with `dorm_id` and returns the update as
    /// recorded, which for a door opening may carry a clamped timestamp.
    /// Returns `None` when no record matched.
    fn apply(
        &self,
        dorm_id: &str,
        update: &FieldUpdate,
    ) -> Result<Option<FieldUpdate>, StoreError>;
}

#[derive(Debug)]
pub struct DB {
    conn: Mutex<Connection>,
}

impl DB {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let conn = Connection::open(path).context("Failed to open database file")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, anyhow::Error> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn init(&self) -> Result<(), anyhow::Error> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database connection lock poisoned"))?;
        conn.execute_batch(
            r"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS dorms (
                dorm_id TEXT PRIMARY KEY NOT NULL,
                dorm_name TEXT NOT NULL UNIQUE,
                temperature REAL NOT NULL,
                humidity REAL NOT NULL,
                members TEXT NOT NULL,
                status TEXT NOT NULL,
                door_last_opened TEXT,
                description TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS door_openings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dorm_id TEXT NOT NULL REFERENCES dorms(dorm_id),
                opened_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS door_openings_dorm_id ON door_openings (dorm_id);
            ",
        )
        .context("Failed to create tables")?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl DormStore for DB {
    fn insert(&self, dorm: &DormRecord) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            r"
            INSERT INTO dorms (dorm_id, dorm_name, temperature, humidity, members, status, door_last_opened, description)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                dorm.dorm_id,
                dorm.dorm_name,
                dorm.temperature,
                dorm.humidity,
                serde_json::to_string(&dorm.members)?,
                dorm.status,
                dorm.door_last_opened.map(|t| t.to_rfc3339()),
                dorm.description,
            ],
        );
        match inserted {
            Err(rusqlite::Error::SqliteFailure(e, msg)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(if msg.is_some_and(|m| m.contains("dorms.dorm_name")) {
                    StoreError::Duplicate {
                        field: "dormName",
                        value: dorm.dorm_name.clone(),
                    }
                } else {
                    StoreError::Duplicate {
                        field: "dormId",
                        value: dorm.dorm_id.clone(),
                    }
                });
            }
            other => other?,
        };

        for opened_at in &dorm.door_opened_times {
            tx.execute(
                "INSERT INTO door_openings (dorm_id, opened_at) VALUES (?1, ?2)",
                rusqlite::params![dorm.dorm_id, opened_at.to_rfc3339()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn find(&self, dorm_id: &str) -> Result<Option<DormRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT dorm_id, dorm_name, temperature, humidity, members, status, door_last_opened, description FROM dorms WHERE dorm_id = ?1",
                [dorm_id],
                DormRow::from_row,
            )
            .optional()?;

        match row {
            Some(row) => {
                let door_opened_times = load_door_openings(&conn, dorm_id)?;
                Ok(Some(row.into_record(door_opened_times)?))
            }
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<DormRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT dorm_id, dorm_name, temperature, humidity, members, status, door_last_opened, description FROM dorms ORDER BY dorm_id",
        )?;
        let rows = stmt
            .query_map([], DormRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let door_opened_times = load_door_openings(&conn, &row.dorm_id)?;
                row.into_record(door_opened_times)
            })
            .collect()
    }

    fn apply(
        &self,
        dorm_id: &str,
        update: &FieldUpdate,
    ) -> Result<Option<FieldUpdate>, StoreError> {
        let mut conn = self.lock()?;

        let changed = match update {
            FieldUpdate::Status(status) => conn.execute(
                "UPDATE dorms SET status = ?1 WHERE dorm_id = ?2",
                rusqlite::params![status, dorm_id],
            )?,
            FieldUpdate::Humidity(humidity) => conn.execute(
                "UPDATE dorms SET humidity = ?1 WHERE dorm_id = ?2",
                rusqlite::params![humidity, dorm_id],
            )?,
            FieldUpdate::Temperature(temperature) => conn.execute(
                "UPDATE dorms SET temperature = ?1 WHERE dorm_id = ?2",
                rusqlite::params![temperature, dorm_id],
            )?,
            FieldUpdate::DoorOpened(at) => {
                let tx = conn.transaction()?;
                let last: Option<Option<String>> = tx
                    .query_row(
                        "SELECT door_last_opened FROM dorms WHERE dorm_id = ?1",
                        [dorm_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(last) = last else {
                    return Ok(None);
                };

                let at = match last.as_deref().map(parse_timestamp).transpose()? {
                    Some(last) if last > *at => last,
                    _ => *at,
                };
                let raw = at.to_rfc3339();

                tx.execute(
                    "INSERT INTO door_openings (dorm_id, opened_at) VALUES (?1, ?2)",
                    rusqlite::params![dorm_id, raw],
                )?;
                tx.execute(
                    "UPDATE dorms SET door_last_opened = ?1 WHERE dorm_id = ?2",
                    rusqlite::params![raw, dorm_id],
                )?;
                tx.commit()?;
                return Ok(Some(FieldUpdate::DoorOpened(at)));
            }
        };

        Ok((changed > 0).then(|| update.clone()))
    }
}

struct DormRow {
    dorm_id: String,
    dorm_name: String,
    temperature: f64,
    humidity: f64,
    members: String,
    status: String,
    door_last_opened: Option<String>,
    description: String,
}

impl DormRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            dorm_id: row.get(0)?,
            dorm_name: row.get(1)?,
            temperature: row.get(2)?,
            humidity: row.get(3)?,
            members: row.get(4)?,
            status: row.get(5)?,
            door_last_opened: row.get(6)?,
            description: row.get(7)?,
        })
    }

    fn into_record(
        self,
        door_opened_times: Vec<DateTime<Local>>,
    ) -> Result<DormRecord, StoreError> {
        Ok(DormRecord {
            dorm_id: self.dorm_id,
            dorm_name: self.dorm_name,
            temperature: self.temperature,
            humidity: self.humidity,
            members: serde_json::from_str(&self.members)?,
            status: self.status,
            door_last_opened: self
                .door_last_opened
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            door_opened_times,
            description: self.description,
        })
    }
}

fn load_door_openings(
    conn: &Connection,
    dorm_id: &str,
) -> Result<Vec<DateTime<Local>>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT opened_at FROM door_openings WHERE dorm_id = ?1 ORDER BY id")?;
    let raw = stmt
        .query_map([dorm_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.iter().map(|s| parse_timestamp(s)).collect()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Local>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Local))
}
