//! Classrooms, children and weekly assignments: the records the engine
//! reads and links but does not own.

use crate::curriculum::{ensure_default_areas, CurriculumArea};
use crate::error::{ReconcileError, Result};
use crate::status::ProgressStatus;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub id: String,
    pub classroom_id: String,
    pub name: String,
    pub age: Option<f64>,
    pub name_chinese: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewChild<'a> {
    pub name: &'a str,
    pub age: Option<f64>,
    pub name_chinese: Option<&'a str>,
}

/// A teacher's free-text "working on X this week" entry. `work_id` is
/// filled once by sync and never changed afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyAssignment {
    pub id: String,
    pub child_id: String,
    pub work_id: Option<String>,
    pub work_name: Option<String>,
    pub area: Option<String>,
    pub progress_status: Option<String>,
    pub week_start: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewAssignment<'a> {
    pub work_name: Option<&'a str>,
    pub area: Option<&'a str>,
    pub progress_status: Option<ProgressStatus>,
    pub week_start: Option<&'a str>,
}

pub fn create_classroom(conn: &Connection, name: &str) -> Result<(Classroom, Vec<CurriculumArea>)> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ReconcileError::validation("name must not be empty"));
    }
    let classroom = Classroom {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
    };
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO classrooms(id, name) VALUES(?, ?)",
        (&classroom.id, &classroom.name),
    )?;
    let areas = ensure_default_areas(&tx, &classroom.id)?;
    tx.commit()?;
    Ok((classroom, areas))
}

pub fn list_classrooms(conn: &Connection) -> Result<Vec<Classroom>> {
    let mut stmt = conn.prepare("SELECT id, name FROM classrooms ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Classroom {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn child_from_row(row: &Row<'_>) -> rusqlite::Result<Child> {
    Ok(Child {
        id: row.get(0)?,
        classroom_id: row.get(1)?,
        name: row.get(2)?,
        age: row.get(3)?,
        name_chinese: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Inserts one child. Fails on a duplicate name within the classroom.
pub fn create_child(conn: &Connection, classroom_id: &str, child: &NewChild<'_>) -> Result<Child> {
    let name = child.name.trim();
    if name.is_empty() {
        return Err(ReconcileError::validation("child name must not be empty"));
    }
    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    let name_chinese = child
        .name_chinese
        .map(str::trim)
        .filter(|s| !s.is_empty());
    conn.execute(
        "INSERT INTO children(id, classroom_id, name, age, name_chinese, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, classroom_id, name, child.age, name_chinese, &created_at),
    )?;
    Ok(Child {
        id,
        classroom_id: classroom_id.to_string(),
        name: name.to_string(),
        age: child.age,
        name_chinese: name_chinese.map(str::to_string),
        created_at,
    })
}

pub fn list_children(conn: &Connection, classroom_id: &str) -> Result<Vec<Child>> {
    let mut stmt = conn.prepare(
        "SELECT id, classroom_id, name, age, name_chinese, created_at
         FROM children WHERE classroom_id = ? ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([classroom_id], child_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The child must belong to `classroom_id`; a child from another
/// classroom is reported as not found.
pub fn require_child(conn: &Connection, classroom_id: &str, child_id: &str) -> Result<Child> {
    conn.query_row(
        "SELECT id, classroom_id, name, age, name_chinese, created_at
         FROM children WHERE id = ? AND classroom_id = ?",
        (child_id, classroom_id),
        child_from_row,
    )
    .optional()?
    .ok_or_else(|| ReconcileError::not_found("child", child_id))
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<WeeklyAssignment> {
    Ok(WeeklyAssignment {
        id: row.get(0)?,
        child_id: row.get(1)?,
        work_id: row.get(2)?,
        work_name: row.get(3)?,
        area: row.get(4)?,
        progress_status: row.get(5)?,
        week_start: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn create_assignment(
    conn: &Connection,
    child_id: &str,
    new: &NewAssignment<'_>,
) -> Result<WeeklyAssignment> {
    let assignment = WeeklyAssignment {
        id: Uuid::new_v4().to_string(),
        child_id: child_id.to_string(),
        work_id: None,
        work_name: new.work_name.map(str::to_string),
        area: new.area.map(str::to_string),
        progress_status: new.progress_status.map(|s| s.as_str().to_string()),
        week_start: new.week_start.map(str::to_string),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    conn.execute(
        "INSERT INTO weekly_assignments(id, child_id, work_id, work_name, area, progress_status, week_start, created_at)
         VALUES(?, ?, NULL, ?, ?, ?, ?, ?)",
        (
            &assignment.id,
            &assignment.child_id,
            &assignment.work_name,
            &assignment.area,
            &assignment.progress_status,
            &assignment.week_start,
            &assignment.created_at,
        ),
    )?;
    Ok(assignment)
}

/// Assignments of a classroom (or of one child in it), oldest first per
/// child so sync processes a child's history in order.
pub fn list_assignments(
    conn: &Connection,
    classroom_id: &str,
    child_id: Option<&str>,
) -> Result<Vec<WeeklyAssignment>> {
    let mut sql = String::from(
        "SELECT a.id, a.child_id, a.work_id, a.work_name, a.area, a.progress_status, a.week_start, a.created_at
         FROM weekly_assignments a
         JOIN children c ON c.id = a.child_id
         WHERE c.classroom_id = ?",
    );
    if child_id.is_some() {
        sql.push_str(" AND a.child_id = ?");
    }
    sql.push_str(" ORDER BY a.child_id, a.week_start, a.created_at, a.id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = match child_id {
        Some(child_id) => stmt
            .query_map((classroom_id, child_id), assignment_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
        None => stmt
            .query_map([classroom_id], assignment_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

/// Write-once link. Returns false when the assignment was already linked
/// (possibly by a concurrent sync) and leaves the existing link alone.
pub fn link_assignment(conn: &Connection, assignment_id: &str, work_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE weekly_assignments SET work_id = ? WHERE id = ? AND work_id IS NULL",
        (work_id, assignment_id),
    )?;
    Ok(changed == 1)
}
