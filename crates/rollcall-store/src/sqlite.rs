//! SQLite identity and attendance storage.
//!
//! One connection, driven on `tokio-rusqlite`'s background thread. Images
//! are stored as PNG blobs; dates as ISO `YYYY-MM-DD` text.

use async_trait::async_trait;
use chrono::{Local, NaiveDate, Utc};
use rollcall_core::{
    AttendanceCalendar, AttendanceStatus, AttendanceStore, Frame, Identity, IdentityAttributes,
    IdentityStore, NewEnrollment, StoreError,
};
use rusqlite::{params, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio_rusqlite::Connection;
use uuid::Uuid;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS identities (
        label      TEXT PRIMARY KEY,
        class      TEXT NOT NULL DEFAULT '',
        roll_no    TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS identity_images (
        id    TEXT PRIMARY KEY,
        label TEXT NOT NULL REFERENCES identities(label)
              ON UPDATE CASCADE ON DELETE CASCADE,
        seq   INTEGER NOT NULL,
        png   BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_identity_images_label
        ON identity_images(label, seq);

    CREATE TABLE IF NOT EXISTS attendance (
        label     TEXT NOT NULL REFERENCES identities(label)
                  ON UPDATE CASCADE ON DELETE CASCADE,
        date      TEXT NOT NULL,
        status    TEXT NOT NULL,
        marked_at TEXT NOT NULL,
        PRIMARY KEY (label, date)
    );
";

fn backend(e: tokio_rusqlite::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    s.parse()
        .map_err(|_| StoreError::Invalid(format!("bad stored date: {s}")))
}

enum Rename {
    Done,
    Missing,
    Taken,
}

pub struct SqliteStore {
    conn: Connection,
    calendar: AttendanceCalendar,
    today: Option<NaiveDate>,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>, calendar: AttendanceCalendar) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).await.map_err(backend)?;
        conn.call(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            Ok(())
        })
        .await
        .map_err(backend)?;
        let store = Self::init(conn, calendar).await?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Ok(store)
    }

    pub async fn open_in_memory(calendar: AttendanceCalendar) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(backend)?;
        Self::init(conn, calendar).await
    }

    async fn init(conn: Connection, calendar: AttendanceCalendar) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(backend)?;
        Ok(Self {
            conn,
            calendar,
            today: None,
        })
    }

    /// Resolve statuses against a fixed "today" instead of the local date.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn calendar(&self) -> &AttendanceCalendar {
        &self.calendar
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    async fn identity_exists(&self, label: &str) -> Result<bool, StoreError> {
        let label = label.to_string();
        self.conn
            .call(move |conn| {
                let found = conn
                    .query_row("SELECT 1 FROM identities WHERE label = ?1", [&label], |_| Ok(()))
                    .optional()?;
                Ok(found.is_some())
            })
            .await
            .map_err(backend)
    }
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let (rows, blobs) = self
            .conn
            .call(|conn| {
                let rows = conn
                    .prepare("SELECT label, class, roll_no FROM identities ORDER BY created_at, label")?
                    .query_map([], |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                let blobs = conn
                    .prepare("SELECT label, png FROM identity_images ORDER BY label, seq")?
                    .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((rows, blobs))
            })
            .await
            .map_err(backend)?;

        let mut images: HashMap<String, Vec<Frame>> = HashMap::new();
        for (label, png) in blobs {
            match Frame::decode(&png) {
                Ok(frame) => images.entry(label).or_default().push(frame),
                Err(e) => tracing::warn!(label = %label, error = %e, "skipping unreadable stored image"),
            }
        }

        Ok(rows
            .into_iter()
            .map(|(label, class, roll_no)| Identity {
                images: images.remove(&label).unwrap_or_default(),
                label,
                attributes: IdentityAttributes { class, roll_no },
            })
            .collect())
    }

    async fn create_or_append_identity(&self, enrollment: NewEnrollment) -> Result<(), StoreError> {
        let label = enrollment.label.trim().to_string();
        if label.is_empty() {
            return Err(StoreError::Invalid("identity label must not be empty".into()));
        }
        let blobs = enrollment
            .images
            .iter()
            .map(Frame::encode_png)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let count = blobs.len();
        let attributes = enrollment.attributes;

        let label_for_log = label.clone();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO identities (label, class, roll_no, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(label) DO UPDATE
                     SET class = excluded.class, roll_no = excluded.roll_no",
                    params![label, attributes.class, attributes.roll_no, Utc::now().to_rfc3339()],
                )?;
                let next: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(seq) + 1, 0) FROM identity_images WHERE label = ?1",
                    [&label],
                    |r| r.get(0),
                )?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO identity_images (id, label, seq, png) VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for (i, png) in blobs.iter().enumerate() {
                        stmt.execute(params![
                            Uuid::new_v4().to_string(),
                            label,
                            next + i as i64,
                            png
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(backend)?;

        tracing::info!(label = %label_for_log, images = count, "identity saved");
        Ok(())
    }

    async fn update_identity(
        &self,
        label: &str,
        attributes: IdentityAttributes,
    ) -> Result<(), StoreError> {
        let key = label.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE identities SET class = ?1, roll_no = ?2 WHERE label = ?3",
                    params![attributes.class, attributes.roll_no, key],
                )?)
            })
            .await
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound(label.to_string()));
        }
        Ok(())
    }

    async fn rename_identity(&self, label: &str, new_label: &str) -> Result<(), StoreError> {
        let new_label = new_label.trim().to_string();
        if new_label.is_empty() {
            return Err(StoreError::Invalid("identity label must not be empty".into()));
        }
        let old = label.to_string();
        let target = new_label.clone();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists = |l: &str| {
                    tx.query_row("SELECT 1 FROM identities WHERE label = ?1", [l], |_| Ok(()))
                        .optional()
                        .map(|r| r.is_some())
                };
                if !exists(&old)? {
                    return Ok(Rename::Missing);
                }
                if old != target && exists(&target)? {
                    return Ok(Rename::Taken);
                }
                tx.execute("UPDATE identities SET label = ?1 WHERE label = ?2", params![target, old])?;
                tx.commit()?;
                Ok(Rename::Done)
            })
            .await
            .map_err(backend)?;

        match outcome {
            Rename::Done => {
                tracing::info!(from = label, to = %new_label, "identity renamed");
                Ok(())
            }
            Rename::Missing => Err(StoreError::NotFound(label.to_string())),
            Rename::Taken => Err(StoreError::Invalid(format!("identity {new_label} already exists"))),
        }
    }

    async fn delete_identity(&self, label: &str) -> Result<(), StoreError> {
        let key = label.to_string();
        let removed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM identities WHERE label = ?1", [&key])?))
            .await
            .map_err(backend)?;
        if removed == 0 {
            return Err(StoreError::NotFound(label.to_string()));
        }
        tracing::info!(label, "identity deleted");
        Ok(())
    }
}

#[async_trait]
impl AttendanceStore for SqliteStore {
    async fn mark_attendance(
        &self,
        label: &str,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> Result<(), StoreError> {
        if !status.is_recordable() {
            return Err(StoreError::Invalid(format!("cannot record status {status}")));
        }
        let key = label.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                // Inserts nothing when the identity does not exist.
                Ok(conn.execute(
                    "INSERT INTO attendance (label, date, status, marked_at)
                     SELECT label, ?2, ?3, ?4 FROM identities WHERE label = ?1
                     ON CONFLICT(label, date) DO UPDATE
                     SET status = excluded.status, marked_at = excluded.marked_at",
                    params![key, date.to_string(), status.as_str(), Utc::now().to_rfc3339()],
                )?)
            })
            .await
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound(label.to_string()));
        }
        tracing::info!(label, %date, status = %status, "attendance recorded");
        Ok(())
    }

    async fn attendance_status(
        &self,
        label: &str,
        date: NaiveDate,
    ) -> Result<AttendanceStatus, StoreError> {
        if !self.identity_exists(label).await? {
            return Err(StoreError::NotFound(label.to_string()));
        }
        let key = label.to_string();
        let recorded = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT status FROM attendance WHERE label = ?1 AND date = ?2",
                        params![key, date.to_string()],
                        |r| r.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await
            .map_err(backend)?;
        let recorded = recorded.map(|s| s.parse::<AttendanceStatus>()).transpose()?;
        Ok(self.calendar.resolve(recorded, date, self.today()))
    }

    async fn attendance_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, AttendanceStatus>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .prepare(
                        "SELECT i.label, a.status FROM identities i
                         LEFT JOIN attendance a ON a.label = i.label AND a.date = ?1",
                    )?
                    .query_map([date.to_string()], |r| {
                        Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(backend)?;

        let today = self.today();
        rows.into_iter()
            .map(|(label, recorded)| -> Result<_, StoreError> {
                let recorded = recorded.map(|s| s.parse::<AttendanceStatus>()).transpose()?;
                Ok((label, self.calendar.resolve(recorded, date, today)))
            })
            .collect()
    }

    async fn attendance_history(
        &self,
        label: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, AttendanceStatus)>, StoreError> {
        if from > to {
            return Err(StoreError::Invalid(format!("empty range {from}..{to}")));
        }
        if !self.identity_exists(label).await? {
            return Err(StoreError::NotFound(label.to_string()));
        }
        let key = label.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .prepare(
                        "SELECT date, status FROM attendance
                         WHERE label = ?1 AND date BETWEEN ?2 AND ?3",
                    )?
                    .query_map(params![key, from.to_string(), to.to_string()], |r| {
                        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(backend)?;

        let mut recorded = HashMap::with_capacity(rows.len());
        for (date, status) in rows {
            recorded.insert(parse_date(&date)?, status.parse::<AttendanceStatus>()?);
        }

        let today = self.today();
        Ok(from
            .iter_days()
            .take_while(|d| *d <= to)
            .map(|d| (d, self.calendar.resolve(recorded.get(&d).copied(), d, today)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Holiday;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn calendar() -> AttendanceCalendar {
        AttendanceCalendar {
            session_start: Some(d(2025, 8, 1)),
            holidays: vec![Holiday {
                date: d(2025, 8, 15),
                name: "Independence Day".into(),
            }],
        }
    }

    async fn store() -> SqliteStore {
        SqliteStore::open_in_memory(calendar())
            .await
            .unwrap()
            .with_today(d(2025, 9, 10))
    }

    fn image(shade: u8) -> Frame {
        Frame::from_rgb(vec![shade; 2 * 2 * 3], 2, 2, 0).unwrap()
    }

    fn enrollment(label: &str, class: &str, images: Vec<Frame>) -> NewEnrollment {
        NewEnrollment {
            label: label.into(),
            attributes: IdentityAttributes {
                class: class.into(),
                roll_no: "12".into(),
            },
            images,
        }
    }

    #[tokio::test]
    async fn test_create_then_append() {
        let store = store().await;
        store
            .create_or_append_identity(enrollment("alice", "9B", vec![image(10), image(20)]))
            .await
            .unwrap();
        store
            .create_or_append_identity(enrollment("alice", "10A", vec![image(30)]))
            .await
            .unwrap();

        let identities = store.list_identities().await.unwrap();
        assert_eq!(identities.len(), 1);
        let alice = &identities[0];
        assert_eq!(alice.attributes.class, "10A");
        let shades: Vec<u8> = alice.images.iter().map(|f| f.pixels[0]).collect();
        assert_eq!(shades, vec![10, 20, 30]);
        assert_eq!(alice.images[0], image(10));
    }

    #[tokio::test]
    async fn test_empty_label_rejected() {
        let store = store().await;
        let err = store
            .create_or_append_identity(enrollment("   ", "9B", vec![image(1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown_are_not_found() {
        let store = store().await;
        let err = store
            .update_identity("nobody", IdentityAttributes::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref l) if l == "nobody"));
        assert!(matches!(
            store.delete_identity("nobody").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_update_attributes() {
        let store = store().await;
        store
            .create_or_append_identity(enrollment("alice", "9B", vec![image(1)]))
            .await
            .unwrap();
        let attributes = IdentityAttributes {
            class: "11C".into(),
            roll_no: "3".into(),
        };
        store.update_identity("alice", attributes.clone()).await.unwrap();
        let identities = store.list_identities().await.unwrap();
        assert_eq!(identities[0].attributes, attributes);
        assert_eq!(identities[0].images.len(), 1);
    }

    #[tokio::test]
    async fn test_rename_carries_images_and_attendance() {
        let store = store().await;
        store
            .create_or_append_identity(enrollment("alice", "9B", vec![image(1)]))
            .await
            .unwrap();
        store
            .create_or_append_identity(enrollment("bob", "9B", vec![image(2)]))
            .await
            .unwrap();
        store
            .mark_attendance("alice", d(2025, 9, 1), AttendanceStatus::Present)
            .await
            .unwrap();

        let err = store.rename_identity("alice", "bob").await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        store.rename_identity("alice", "alicia").await.unwrap();
        let identities = store.list_identities().await.unwrap();
        let alicia = identities.iter().find(|i| i.label == "alicia").unwrap();
        assert_eq!(alicia.images.len(), 1);
        assert!(identities.iter().all(|i| i.label != "alice"));
        assert_eq!(
            store.attendance_status("alicia", d(2025, 9, 1)).await.unwrap(),
            AttendanceStatus::Present
        );
    }

    #[tokio::test]
    async fn test_delete_removes_identity_and_attendance() {
        let store = store().await;
        store
            .create_or_append_identity(enrollment("alice", "9B", vec![image(1)]))
            .await
            .unwrap();
        store
            .mark_attendance("alice", d(2025, 9, 1), AttendanceStatus::Present)
            .await
            .unwrap();
        store.delete_identity("alice").await.unwrap();

        assert!(store.list_identities().await.unwrap().is_empty());
        assert!(store.attendance_for_date(d(2025, 9, 1)).await.unwrap().is_empty());

        // Re-enrolling under the same label starts clean.
        store
            .create_or_append_identity(enrollment("alice", "9B", vec![image(1)]))
            .await
            .unwrap();
        assert_eq!(
            store.attendance_status("alice", d(2025, 9, 1)).await.unwrap(),
            AttendanceStatus::Absent
        );
    }

    #[tokio::test]
    async fn test_status_follows_calendar() {
        let store = store().await;
        store
            .create_or_append_identity(enrollment("alice", "9B", vec![image(1)]))
            .await
            .unwrap();
        store
            .mark_attendance("alice", d(2025, 9, 1), AttendanceStatus::Present)
            .await
            .unwrap();

        let status = |date| store.attendance_status("alice", date);
        assert_eq!(status(d(2025, 9, 1)).await.unwrap(), AttendanceStatus::Present);
        assert_eq!(status(d(2025, 9, 2)).await.unwrap(), AttendanceStatus::Absent);
        assert_eq!(status(d(2025, 9, 7)).await.unwrap(), AttendanceStatus::Holiday);
        assert_eq!(status(d(2025, 8, 15)).await.unwrap(), AttendanceStatus::Holiday);
        assert_eq!(status(d(2025, 9, 20)).await.unwrap(), AttendanceStatus::NotMarked);
        assert_eq!(status(d(2025, 7, 30)).await.unwrap(), AttendanceStatus::NotMarked);
    }

    #[tokio::test]
    async fn test_mark_overwrites_and_validates() {
        let store = store().await;
        store
            .create_or_append_identity(enrollment("alice", "9B", vec![image(1)]))
            .await
            .unwrap();
        let day = d(2025, 9, 3);
        store.mark_attendance("alice", day, AttendanceStatus::Present).await.unwrap();
        store.mark_attendance("alice", day, AttendanceStatus::Leave).await.unwrap();
        assert_eq!(
            store.attendance_status("alice", day).await.unwrap(),
            AttendanceStatus::Leave
        );

        let err = store
            .mark_attendance("alice", day, AttendanceStatus::Holiday)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        let err = store
            .mark_attendance("nobody", day, AttendanceStatus::Present)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_daily_report_covers_every_identity() {
        let store = store().await;
        for label in ["alice", "bob", "carol"] {
            store
                .create_or_append_identity(enrollment(label, "9B", vec![image(1)]))
                .await
                .unwrap();
        }
        let day = d(2025, 9, 4);
        store.mark_attendance("bob", day, AttendanceStatus::Present).await.unwrap();
        store.mark_attendance("carol", day, AttendanceStatus::Leave).await.unwrap();

        let report = store.attendance_for_date(day).await.unwrap();
        assert_eq!(report.len(), 3);
        assert_eq!(report["alice"], AttendanceStatus::Absent);
        assert_eq!(report["bob"], AttendanceStatus::Present);
        assert_eq!(report["carol"], AttendanceStatus::Leave);
    }

    #[tokio::test]
    async fn test_history_range() {
        let store = store().await;
        store
            .create_or_append_identity(enrollment("alice", "9B", vec![image(1)]))
            .await
            .unwrap();
        store
            .mark_attendance("alice", d(2025, 9, 5), AttendanceStatus::Present)
            .await
            .unwrap();

        let history = store
            .attendance_history("alice", d(2025, 9, 5), d(2025, 9, 11))
            .await
            .unwrap();
        let statuses: Vec<AttendanceStatus> = history.iter().map(|(_, s)| *s).collect();
        assert_eq!(
            statuses,
            vec![
                AttendanceStatus::Present,   // Fri
                AttendanceStatus::Absent,    // Sat
                AttendanceStatus::Holiday,   // Sun
                AttendanceStatus::Absent,    // Mon
                AttendanceStatus::Absent,    // Tue
                AttendanceStatus::Absent,    // Wed (today)
                AttendanceStatus::NotMarked, // Thu
            ]
        );

        let err = store
            .attendance_history("alice", d(2025, 9, 11), d(2025, 9, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let path = std::env::temp_dir().join(format!("rollcall-test-{}.db", Uuid::new_v4()));
        {
            let store = SqliteStore::open(&path, calendar()).await.unwrap();
            store
                .create_or_append_identity(enrollment("alice", "9B", vec![image(5)]))
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path, calendar()).await.unwrap();
        let identities = store.list_identities().await.unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].images[0].pixels[0], 5);

        drop(store);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }
}
