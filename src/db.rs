use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::warn;

pub const DB_FILE_NAME: &str = "montree.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS children(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            name TEXT NOT NULL,
            age REAL,
            name_chinese TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(classroom_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_children_classroom ON children(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS curriculum_areas(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            area_key TEXT NOT NULL,
            name TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(classroom_id, area_key)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS curriculum_works(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            area_id TEXT NOT NULL,
            work_key TEXT NOT NULL,
            name TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            is_custom INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(area_id) REFERENCES curriculum_areas(id),
            UNIQUE(classroom_id, area_id, work_key),
            UNIQUE(area_id, sequence)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_curriculum_works_classroom ON curriculum_works(classroom_id)",
        [],
    )?;

    // No inline UNIQUE here: workspaces created before the constraint may
    // already hold duplicate pairs. See ensure_progress_unique_index.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS child_work_progress(
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL,
            work_id TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            presented_at TEXT,
            practicing_at TEXT,
            mastered_at TEXT,
            notes TEXT,
            updated_at TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            FOREIGN KEY(child_id) REFERENCES children(id),
            FOREIGN KEY(work_id) REFERENCES curriculum_works(id)
        )",
        [],
    )?;
    ensure_progress_practicing_at(conn)?;
    ensure_progress_unique_index(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_progress_child ON child_work_progress(child_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weekly_assignments(
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL,
            work_id TEXT,
            work_name TEXT,
            area TEXT,
            progress_status TEXT,
            week_start TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(child_id) REFERENCES children(id),
            FOREIGN KEY(work_id) REFERENCES curriculum_works(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_assignments_child ON weekly_assignments(child_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS focus_works(
            child_id TEXT NOT NULL,
            area_id TEXT NOT NULL,
            work_id TEXT NOT NULL,
            set_at TEXT NOT NULL,
            PRIMARY KEY(child_id, area_id),
            FOREIGN KEY(child_id) REFERENCES children(id),
            FOREIGN KEY(area_id) REFERENCES curriculum_areas(id),
            FOREIGN KEY(work_id) REFERENCES curriculum_works(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_progress_practicing_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "child_work_progress", "practicing_at")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE child_work_progress ADD COLUMN practicing_at TEXT",
        [],
    )?;
    Ok(())
}

fn ensure_progress_unique_index(conn: &Connection) -> anyhow::Result<()> {
    if progress_has_unique_key(conn)? {
        return Ok(());
    }
    // Fails when legacy data already holds duplicate pairs. The workspace
    // must still open; the progress store then runs check-then-write.
    if let Err(e) = conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_progress_child_work
         ON child_work_progress(child_id, work_id)",
        [],
    ) {
        warn!(
            error = %e,
            "child_work_progress has duplicate (child_id, work_id) rows; unique index not created"
        );
    }
    Ok(())
}

/// True when some unique index covers exactly (child_id, work_id).
pub fn progress_has_unique_key(conn: &Connection) -> rusqlite::Result<bool> {
    let mut list = conn.prepare("PRAGMA index_list(child_work_progress)")?;
    let indexes = list
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let unique: i64 = row.get(2)?;
            Ok((name, unique != 0))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (name, unique) in indexes {
        if !unique {
            continue;
        }
        let mut info = conn.prepare(&format!("PRAGMA index_info(\"{}\")", name))?;
        let mut cols = info
            .query_map([], |row| row.get::<_, String>(2))?
            .collect::<Result<Vec<_>, _>>()?;
        cols.sort();
        if cols == ["child_id", "work_id"] {
            return Ok(true);
        }
    }
    Ok(false)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
