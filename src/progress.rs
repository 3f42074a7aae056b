use crate::db;
use crate::error::{ReconcileError, Result};
use crate::status::ProgressStatus;
use rusqlite::{Connection, Row};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Who or what last changed a progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    Teacher,
    Parent,
    Backfill,
    Import,
    Sync,
}

impl Attribution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Parent => "parent",
            Self::Backfill => "backfill",
            Self::Import => "import",
            Self::Sync => "sync",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teacher" => Some(Self::Teacher),
            "parent" => Some(Self::Parent),
            "backfill" => Some(Self::Backfill),
            "import" => Some(Self::Import),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }

    /// Engine-written notes only fill a blank; they never replace what a
    /// person wrote.
    fn is_system(self) -> bool {
        matches!(self, Self::Backfill | Self::Import | Self::Sync)
    }
}

/// `Set` stores the requested status as-is (teachers may correct
/// downwards). `Promote` only ever raises an existing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Set,
    Promote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn wrote(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// How the store guarantees one row per (child, work).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// `INSERT .. ON CONFLICT(child_id, work_id)` against the unique index.
    Constraint,
    /// Existence check followed by insert or update. Not race-free: two
    /// concurrent writers for the same pair can both insert.
    CheckThenWrite,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub id: String,
    pub child_id: String,
    pub work_id: String,
    pub status: ProgressStatus,
    pub presented_at: Option<String>,
    pub practicing_at: Option<String>,
    pub mastered_at: Option<String>,
    pub notes: Option<String>,
    pub updated_at: String,
    pub updated_by: String,
}

#[derive(Debug, Clone)]
pub struct ProgressWrite<'a> {
    pub child_id: &'a str,
    pub work_id: &'a str,
    pub status: ProgressStatus,
    pub attribution: Attribution,
    pub notes: Option<&'a str>,
    pub mode: WriteMode,
}

const RECORD_COLUMNS: &str = "id, child_id, work_id, status, presented_at, practicing_at, \
                              mastered_at, notes, updated_at, updated_by";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ProgressRecord> {
    Ok(ProgressRecord {
        id: row.get(0)?,
        child_id: row.get(1)?,
        work_id: row.get(2)?,
        status: ProgressStatus::from_ordinal(row.get(3)?),
        presented_at: row.get(4)?,
        practicing_at: row.get(5)?,
        mastered_at: row.get(6)?,
        notes: row.get(7)?,
        updated_at: row.get(8)?,
        updated_by: row.get(9)?,
    })
}

/// Timestamp a stage gets on first reaching it, or None if not reached.
fn stage_stamp(status: ProgressStatus, stage: ProgressStatus, now: &str) -> Option<String> {
    (status >= stage).then(|| now.to_string())
}

/// Progress Upsert Store. One per request; the strategy is picked once
/// from the live schema.
#[derive(Debug, Clone, Copy)]
pub struct ProgressStore {
    strategy: KeyStrategy,
}

impl ProgressStore {
    pub fn detect(conn: &Connection) -> Result<Self> {
        let strategy = if db::progress_has_unique_key(conn)? {
            KeyStrategy::Constraint
        } else {
            warn!("no unique (child_id, work_id) key on progress; using check-then-write");
            KeyStrategy::CheckThenWrite
        };
        Ok(Self { strategy })
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    pub fn get(&self, conn: &Connection, child_id: &str, work_id: &str) -> Result<Option<ProgressRecord>> {
        let mut rows = self.load_pair(conn, child_id, work_id)?;
        Ok(rows.pop())
    }

    fn load_pair(&self, conn: &Connection, child_id: &str, work_id: &str) -> Result<Vec<ProgressRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM child_work_progress WHERE child_id = ? AND work_id = ? LIMIT 2",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map((child_id, work_id), record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_for_child(&self, conn: &Connection, child_id: &str) -> Result<Vec<ProgressRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM child_work_progress WHERE child_id = ? ORDER BY updated_at, id",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map([child_id], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Create or update the single record for (child, work).
    ///
    /// History timestamps are write-once: a stage's timestamp is set the
    /// first time the status reaches it and is never cleared, including on
    /// a downward correction.
    pub fn upsert(
        &self,
        conn: &Connection,
        write: &ProgressWrite<'_>,
    ) -> Result<(ProgressRecord, UpsertOutcome)> {
        let conflict = |reason: String| ReconcileError::PersistenceConflict {
            child_id: write.child_id.to_string(),
            work_id: write.work_id.to_string(),
            reason,
        };

        let existing = self.load_pair(conn, write.child_id, write.work_id)?;
        if existing.len() > 1 {
            return Err(conflict(
                "more than one progress row exists for this pair".to_string(),
            ));
        }
        let existing = existing.into_iter().next();

        if let Some(current) = &existing {
            let unchanged = match write.mode {
                WriteMode::Promote => current.status >= write.status,
                // A parent re-confirming a teacher's status is still a write.
                WriteMode::Set => {
                    current.status == write.status
                        && current.updated_by == write.attribution.as_str()
                        && write.notes.map_or(true, |n| current.notes.as_deref() == Some(n))
                }
            };
            if unchanged {
                return Ok((current.clone(), UpsertOutcome::Unchanged));
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let written = match self.strategy {
            KeyStrategy::Constraint => self.write_on_conflict(conn, write, &now),
            KeyStrategy::CheckThenWrite => self.write_checked(conn, write, existing.as_ref(), &now),
        }
        .map_err(|e| conflict(e.to_string()))?;

        let record = self
            .get(conn, write.child_id, write.work_id)?
            .ok_or_else(|| conflict("record missing after write".to_string()))?;

        let outcome = match (written, &existing) {
            (0, _) => UpsertOutcome::Unchanged,
            (_, None) => UpsertOutcome::Created,
            (_, Some(_)) => UpsertOutcome::Updated,
        };
        debug!(
            child = %write.child_id,
            work = %write.work_id,
            status = write.status.as_str(),
            by = write.attribution.as_str(),
            ?outcome,
            "progress upsert"
        );
        Ok((record, outcome))
    }

    fn write_on_conflict(
        &self,
        conn: &Connection,
        write: &ProgressWrite<'_>,
        now: &str,
    ) -> rusqlite::Result<usize> {
        // Promote re-checks the status inside the statement so a concurrent
        // writer that got there first is never lowered.
        let notes = if write.attribution.is_system() {
            "COALESCE(child_work_progress.notes, excluded.notes)"
        } else {
            "COALESCE(excluded.notes, child_work_progress.notes)"
        };
        let guard = match write.mode {
            WriteMode::Set => "",
            WriteMode::Promote => " WHERE excluded.status > child_work_progress.status",
        };
        let sql = format!(
            "INSERT INTO child_work_progress(
               id, child_id, work_id, status, presented_at, practicing_at, mastered_at,
               notes, updated_at, updated_by)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(child_id, work_id) DO UPDATE SET
               status = excluded.status,
               presented_at = COALESCE(child_work_progress.presented_at, excluded.presented_at),
               practicing_at = COALESCE(child_work_progress.practicing_at, excluded.practicing_at),
               mastered_at = COALESCE(child_work_progress.mastered_at, excluded.mastered_at),
               notes = {},
               updated_at = excluded.updated_at,
               updated_by = excluded.updated_by{}",
            notes, guard
        );
        conn.execute(
            &sql,
            (
                Uuid::new_v4().to_string(),
                write.child_id,
                write.work_id,
                write.status.ordinal(),
                stage_stamp(write.status, ProgressStatus::Presented, now),
                stage_stamp(write.status, ProgressStatus::Practicing, now),
                stage_stamp(write.status, ProgressStatus::Mastered, now),
                write.notes,
                now,
                write.attribution.as_str(),
            ),
        )
    }

    fn write_checked(
        &self,
        conn: &Connection,
        write: &ProgressWrite<'_>,
        existing: Option<&ProgressRecord>,
        now: &str,
    ) -> rusqlite::Result<usize> {
        let Some(current) = existing else {
            return conn.execute(
                "INSERT INTO child_work_progress(
                   id, child_id, work_id, status, presented_at, practicing_at, mastered_at,
                   notes, updated_at, updated_by)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    write.child_id,
                    write.work_id,
                    write.status.ordinal(),
                    stage_stamp(write.status, ProgressStatus::Presented, now),
                    stage_stamp(write.status, ProgressStatus::Practicing, now),
                    stage_stamp(write.status, ProgressStatus::Mastered, now),
                    write.notes,
                    now,
                    write.attribution.as_str(),
                ),
            );
        };

        let supplied = write.notes.map(str::to_string);
        let notes = if write.attribution.is_system() {
            current.notes.clone().or(supplied)
        } else {
            supplied.or_else(|| current.notes.clone())
        };
        let keep = |old: &Option<String>, stage: ProgressStatus| {
            old.clone().or_else(|| stage_stamp(write.status, stage, now))
        };
        conn.execute(
            "UPDATE child_work_progress SET
               status = ?, presented_at = ?, practicing_at = ?, mastered_at = ?,
               notes = ?, updated_at = ?, updated_by = ?
             WHERE id = ?",
            (
                write.status.ordinal(),
                keep(&current.presented_at, ProgressStatus::Presented),
                keep(&current.practicing_at, ProgressStatus::Practicing),
                keep(&current.mastered_at, ProgressStatus::Mastered),
                notes,
                now,
                write.attribution.as_str(),
                &current.id,
            ),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusWork {
    pub area_id: String,
    pub work_id: String,
    pub set_at: String,
}

/// One active focus work per (child, area); a new one replaces the old.
pub fn set_focus_work(conn: &Connection, child_id: &str, area_id: &str, work_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO focus_works(child_id, area_id, work_id, set_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(child_id, area_id) DO UPDATE SET
           work_id = excluded.work_id,
           set_at = excluded.set_at",
        (child_id, area_id, work_id, chrono::Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

pub fn list_focus_works(conn: &Connection, child_id: &str) -> Result<Vec<FocusWork>> {
    let mut stmt = conn.prepare(
        "SELECT area_id, work_id, set_at FROM focus_works WHERE child_id = ? ORDER BY area_id",
    )?;
    let rows = stmt
        .query_map([child_id], |r| {
            Ok(FocusWork {
                area_id: r.get(0)?,
                work_id: r.get(1)?,
                set_at: r.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_pair_rows(conn: &Connection, child_id: &str, work_id: &str) -> rusqlite::Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM child_work_progress WHERE child_id = ? AND work_id = ?",
            (child_id, work_id),
            |r| r.get(0),
        )
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO classrooms(id, name) VALUES('room', 'Whale');
             INSERT INTO children(id, classroom_id, name, created_at) VALUES('kid', 'room', 'Amy', 'now');
             INSERT INTO curriculum_areas(id, classroom_id, area_key, name, sequence)
               VALUES('pl', 'room', 'practical_life', 'Practical Life', 0);
             INSERT INTO curriculum_works(id, classroom_id, area_id, work_key, name, sequence)
               VALUES('w1', 'room', 'pl', 'spooning', 'Spooning', 1);",
        )
        .expect("fixtures");
        conn
    }

    /// Same schema, minus the unique index, as found in older workspaces.
    fn setup_without_unique_key() -> Connection {
        let conn = setup();
        conn.execute("DROP INDEX ux_progress_child_work", [])
            .expect("drop index");
        conn
    }

    fn write(status: ProgressStatus, mode: WriteMode) -> ProgressWrite<'static> {
        ProgressWrite {
            child_id: "kid",
            work_id: "w1",
            status,
            attribution: Attribution::Teacher,
            notes: None,
            mode,
        }
    }

    #[test]
    fn strategy_follows_schema() {
        assert_eq!(
            ProgressStore::detect(&setup()).expect("detect").strategy(),
            KeyStrategy::Constraint
        );
        assert_eq!(
            ProgressStore::detect(&setup_without_unique_key())
                .expect("detect")
                .strategy(),
            KeyStrategy::CheckThenWrite
        );
    }

    #[test]
    fn upserting_twice_keeps_one_row_on_both_paths() {
        for conn in [setup(), setup_without_unique_key()] {
            let store = ProgressStore::detect(&conn).expect("detect");
            let w = write(ProgressStatus::Practicing, WriteMode::Set);
            let (_, first) = store.upsert(&conn, &w).expect("first");
            let (rec, second) = store.upsert(&conn, &w).expect("second");
            assert_eq!(first, UpsertOutcome::Created);
            assert_eq!(second, UpsertOutcome::Unchanged);
            assert_eq!(rec.status, ProgressStatus::Practicing);
            assert_eq!(count_pair_rows(&conn, "kid", "w1").expect("count"), 1);
        }
    }

    #[test]
    fn timestamps_are_set_once_and_never_cleared() {
        for conn in [setup(), setup_without_unique_key()] {
            let store = ProgressStore::detect(&conn).expect("detect");
            let (rec, _) = store
                .upsert(&conn, &write(ProgressStatus::Presented, WriteMode::Set))
                .expect("presented");
            assert!(rec.presented_at.is_some());
            assert!(rec.practicing_at.is_none());
            assert!(rec.mastered_at.is_none());
            let presented_at = rec.presented_at.clone();

            let (rec, _) = store
                .upsert(&conn, &write(ProgressStatus::Mastered, WriteMode::Set))
                .expect("mastered");
            let mastered_at = rec.mastered_at.clone();
            assert!(mastered_at.is_some());
            assert!(rec.practicing_at.is_some());
            assert_eq!(rec.presented_at, presented_at);

            // Teacher corrects downwards: history stays.
            let (rec, outcome) = store
                .upsert(&conn, &write(ProgressStatus::Practicing, WriteMode::Set))
                .expect("correct");
            assert_eq!(outcome, UpsertOutcome::Updated);
            assert_eq!(rec.status, ProgressStatus::Practicing);
            assert_eq!(rec.mastered_at, mastered_at);

            let (rec, _) = store
                .upsert(&conn, &write(ProgressStatus::Mastered, WriteMode::Set))
                .expect("mastered again");
            assert_eq!(rec.mastered_at, mastered_at);
        }
    }

    #[test]
    fn promote_never_lowers_status() {
        for conn in [setup(), setup_without_unique_key()] {
            let store = ProgressStore::detect(&conn).expect("detect");
            store
                .upsert(&conn, &write(ProgressStatus::Mastered, WriteMode::Set))
                .expect("mastered");
            let (rec, outcome) = store
                .upsert(&conn, &write(ProgressStatus::Practicing, WriteMode::Promote))
                .expect("promote");
            assert_eq!(outcome, UpsertOutcome::Unchanged);
            assert_eq!(rec.status, ProgressStatus::Mastered);
        }
    }

    #[test]
    fn notes_are_kept_when_not_supplied() {
        let conn = setup();
        let store = ProgressStore::detect(&conn).expect("detect");
        let mut w = write(ProgressStatus::Presented, WriteMode::Set);
        w.notes = Some("loves it");
        store.upsert(&conn, &w).expect("with notes");
        let (rec, _) = store
            .upsert(&conn, &write(ProgressStatus::Practicing, WriteMode::Set))
            .expect("without notes");
        assert_eq!(rec.notes.as_deref(), Some("loves it"));
        assert_eq!(rec.updated_by, "teacher");
    }

    #[test]
    fn same_status_from_someone_else_updates_attribution() {
        for conn in [setup(), setup_without_unique_key()] {
            let store = ProgressStore::detect(&conn).expect("detect");
            store
                .upsert(&conn, &write(ProgressStatus::Practicing, WriteMode::Set))
                .expect("teacher");
            let mut parent = write(ProgressStatus::Practicing, WriteMode::Set);
            parent.attribution = Attribution::Parent;
            let (rec, outcome) = store.upsert(&conn, &parent).expect("parent");
            assert_eq!(outcome, UpsertOutcome::Updated);
            assert_eq!(rec.updated_by, "parent");
            assert_eq!(rec.status, ProgressStatus::Practicing);

            let (_, again) = store.upsert(&conn, &parent).expect("parent again");
            assert_eq!(again, UpsertOutcome::Unchanged);
            assert_eq!(count_pair_rows(&conn, "kid", "w1").expect("count"), 1);
        }
    }

    #[test]
    fn system_notes_never_replace_teacher_notes() {
        for conn in [setup(), setup_without_unique_key()] {
            let store = ProgressStore::detect(&conn).expect("detect");
            let mut w = write(ProgressStatus::Practicing, WriteMode::Set);
            w.notes = Some("needs help with grip");
            store.upsert(&conn, &w).expect("teacher");
            let backfill = ProgressWrite {
                child_id: "kid",
                work_id: "w1",
                status: ProgressStatus::Mastered,
                attribution: Attribution::Backfill,
                notes: Some("Backfilled"),
                mode: WriteMode::Promote,
            };
            let (rec, outcome) = store.upsert(&conn, &backfill).expect("backfill");
            assert_eq!(outcome, UpsertOutcome::Updated);
            assert_eq!(rec.status, ProgressStatus::Mastered);
            assert_eq!(rec.notes.as_deref(), Some("needs help with grip"));
            assert_eq!(rec.updated_by, "backfill");
        }
    }

    #[test]
    fn duplicate_rows_in_fallback_mode_surface_as_conflict() {
        let conn = setup_without_unique_key();
        conn.execute_batch(
            "INSERT INTO child_work_progress(id, child_id, work_id, status, updated_at, updated_by)
               VALUES('a', 'kid', 'w1', 1, 't', 'teacher'), ('b', 'kid', 'w1', 2, 't', 'teacher');",
        )
        .expect("duplicates");
        let store = ProgressStore::detect(&conn).expect("detect");
        let err = store
            .upsert(&conn, &write(ProgressStatus::Mastered, WriteMode::Set))
            .unwrap_err();
        assert_eq!(err.code(), "persistence_conflict");
    }

    #[test]
    fn write_failure_is_a_persistence_conflict() {
        let conn = setup();
        let store = ProgressStore::detect(&conn).expect("detect");
        let w = ProgressWrite {
            child_id: "kid",
            work_id: "missing-work",
            status: ProgressStatus::Presented,
            attribution: Attribution::Teacher,
            notes: None,
            mode: WriteMode::Set,
        };
        let err = store.upsert(&conn, &w).unwrap_err();
        assert_eq!(err.code(), "persistence_conflict");
    }

    #[test]
    fn focus_work_is_one_per_area() {
        let conn = setup();
        conn.execute(
            "INSERT INTO curriculum_works(id, classroom_id, area_id, work_key, name, sequence)
             VALUES('w2', 'room', 'pl', 'pouring', 'Pouring', 2)",
            [],
        )
        .expect("w2");
        set_focus_work(&conn, "kid", "pl", "w1").expect("focus w1");
        set_focus_work(&conn, "kid", "pl", "w2").expect("focus w2");
        let focus = list_focus_works(&conn, "kid").expect("list");
        assert_eq!(focus.len(), 1);
        assert_eq!(focus[0].work_id, "w2");
    }

    #[test]
    fn attribution_parses_known_values_only() {
        assert_eq!(Attribution::parse("Parent"), Some(Attribution::Parent));
        assert_eq!(Attribution::parse("robot"), None);
    }
}
