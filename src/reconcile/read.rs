use crate::curriculum::{require_classroom, Catalogue};
use crate::error::{ReconcileError, Result};
use crate::progress::{list_focus_works, ProgressRecord, ProgressStore};
use crate::roster::require_child;
use crate::status::ProgressStatus;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRow {
    pub work_id: String,
    pub work_name: String,
    pub work_key: String,
    pub area_key: String,
    pub sequence: i64,
    pub status: ProgressStatus,
    pub label: &'static str,
    pub presented_at: Option<String>,
    pub practicing_at: Option<String>,
    pub mastered_at: Option<String>,
    pub notes: Option<String>,
    pub updated_at: String,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusRow {
    pub area_key: String,
    pub work_id: String,
    pub work_name: String,
    pub set_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressCounts {
    pub total: usize,
    pub mastered: usize,
    pub practicing: usize,
    pub presented: usize,
    pub not_started: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOverview {
    pub child_id: String,
    pub records: Vec<ProgressRow>,
    pub focus_works: Vec<FocusRow>,
    pub summary: ProgressCounts,
}

/// A child's progress over the classroom catalogue, optionally one area.
/// Catalogue works without a record count as not started.
pub fn progress_overview(
    conn: &Connection,
    classroom_id: &str,
    child_id: &str,
    area: Option<&str>,
) -> Result<ProgressOverview> {
    require_classroom(conn, classroom_id)?;
    require_child(conn, classroom_id, child_id)?;
    let catalogue = Catalogue::load(conn, classroom_id)?;
    let area_filter = match area.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            catalogue
                .area_by_key(raw)
                .ok_or_else(|| ReconcileError::not_found("area", raw))?,
        ),
        None => None,
    };
    let works = match area_filter {
        Some(a) => catalogue.works_in_area(&a.id),
        None => catalogue.all_works(),
    };

    // Latest write wins if a legacy workspace still holds duplicates.
    let store = ProgressStore::detect(conn)?;
    let mut by_work: HashMap<String, ProgressRecord> = HashMap::new();
    for record in store.list_for_child(conn, child_id)? {
        by_work.insert(record.work_id.clone(), record);
    }

    let mut summary = ProgressCounts {
        total: works.len(),
        ..Default::default()
    };
    let mut records = Vec::new();
    for work in works {
        let Some(record) = by_work.remove(&work.id) else {
            continue;
        };
        match record.status {
            ProgressStatus::Mastered => summary.mastered += 1,
            ProgressStatus::Practicing => summary.practicing += 1,
            ProgressStatus::Presented => summary.presented += 1,
            ProgressStatus::NotStarted => {}
        }
        let area_key = catalogue
            .area_by_id(&work.area_id)
            .map(|a| a.area_key.clone())
            .unwrap_or_default();
        records.push(ProgressRow {
            work_id: work.id.clone(),
            work_name: work.name.clone(),
            work_key: work.work_key.clone(),
            area_key,
            sequence: work.sequence,
            status: record.status,
            label: record.status.label(),
            presented_at: record.presented_at,
            practicing_at: record.practicing_at,
            mastered_at: record.mastered_at,
            notes: record.notes,
            updated_at: record.updated_at,
            updated_by: record.updated_by,
        });
    }
    summary.not_started = summary.total - summary.mastered - summary.practicing - summary.presented;

    let focus_works = list_focus_works(conn, child_id)?
        .into_iter()
        .filter(|f| area_filter.map_or(true, |a| a.id == f.area_id))
        .filter_map(|f| {
            let work = catalogue.work_by_id(&f.work_id)?;
            let area = catalogue.area_by_id(&f.area_id)?;
            Some(FocusRow {
                area_key: area.area_key.clone(),
                work_id: f.work_id,
                work_name: work.name.clone(),
                set_at: f.set_at,
            })
        })
        .collect();

    Ok(ProgressOverview {
        child_id: child_id.to_string(),
        records,
        focus_works,
        summary,
    })
}
