use super::provision_into;
use crate::config::ReconcileSettings;
use crate::curriculum::{require_classroom, Catalogue, CurriculumWork};
use crate::error::{ReconcileError, Result};
use crate::matcher::MatchTier;
use crate::progress::{
    set_focus_work, Attribution, ProgressRecord, ProgressStore, ProgressWrite, UpsertOutcome,
    WriteMode,
};
use crate::roster::require_child;
use crate::status::ProgressStatus;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

/// How the caller names the work being updated.
#[derive(Debug, Clone)]
pub enum WorkRef {
    Id(String),
    Name { name: String, area: Option<String> },
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub classroom_id: String,
    pub child_id: String,
    pub work: WorkRef,
    pub status: ProgressStatus,
    pub notes: Option<String>,
    pub updated_by: Attribution,
    pub is_focus: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub record: ProgressRecord,
    pub label: &'static str,
    pub work: CurriculumWork,
    pub match_tier: Option<MatchTier>,
    pub auto_added: bool,
    pub outcome: UpsertOutcome,
    pub focus_set: bool,
    pub warnings: Vec<String>,
}

fn resolve_work(
    conn: &Connection,
    settings: &ReconcileSettings,
    catalogue: &mut Catalogue,
    classroom_id: &str,
    work: &WorkRef,
) -> Result<(CurriculumWork, Option<MatchTier>, bool)> {
    let (name, area) = match work {
        WorkRef::Id(id) => {
            return catalogue
                .work_by_id(id)
                .cloned()
                .map(|w| (w, None, false))
                .ok_or_else(|| ReconcileError::not_found("work", id.as_str()));
        }
        WorkRef::Name { name, area } => (name.trim(), area.as_deref().map(str::trim)),
    };
    if name.is_empty() {
        return Err(ReconcileError::validation("workName must not be empty"));
    }
    let area = match area.filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            catalogue
                .area_by_key(raw)
                .cloned()
                .ok_or_else(|| ReconcileError::not_found("area", raw))?,
        ),
        None => None,
    };

    let pool = match &area {
        Some(a) => catalogue.works_in_area(&a.id),
        None => catalogue.all_works(),
    };
    if let Some(hit) = settings.matcher().find_best_match(name, pool) {
        return Ok((hit.work.clone(), Some(hit.tier), false));
    }
    if !settings.auto_provision {
        return Err(ReconcileError::not_found("work", name));
    }
    let area = match area {
        Some(a) => a,
        None => catalogue
            .area_by_key(&settings.default_area)
            .cloned()
            .ok_or_else(|| ReconcileError::not_found("area", settings.default_area.as_str()))?,
    };
    let (work, created) = provision_into(conn, catalogue, classroom_id, &area.id, name)?;
    Ok((work, None, created))
}

/// A teacher or parent sets one child's status on one work. No backfill:
/// routine edits are incremental. The progress write is the only hard
/// failure; a focus pointer that cannot be stored comes back as a warning.
pub fn update(
    conn: &Connection,
    settings: &ReconcileSettings,
    req: &UpdateRequest,
) -> Result<UpdateResult> {
    if !matches!(req.updated_by, Attribution::Teacher | Attribution::Parent) {
        return Err(ReconcileError::validation("updatedBy must be teacher or parent"));
    }
    require_classroom(conn, &req.classroom_id)?;
    require_child(conn, &req.classroom_id, &req.child_id)?;

    let mut catalogue = Catalogue::load(conn, &req.classroom_id)?;
    let (work, match_tier, auto_added) =
        resolve_work(conn, settings, &mut catalogue, &req.classroom_id, &req.work)?;

    let store = ProgressStore::detect(conn)?;
    let (record, outcome) = store.upsert(
        conn,
        &ProgressWrite {
            child_id: &req.child_id,
            work_id: &work.id,
            status: req.status,
            attribution: req.updated_by,
            notes: req.notes.as_deref(),
            mode: WriteMode::Set,
        },
    )?;

    let mut warnings = Vec::new();
    let mut focus_set = false;
    if req.is_focus {
        match set_focus_work(conn, &req.child_id, &work.area_id, &work.id) {
            Ok(()) => focus_set = true,
            Err(e) => {
                warn!(child = %req.child_id, work = %work.name, error = %e, "focus work not saved");
                warnings.push(format!("Focus work not saved: {}", e));
            }
        }
    }

    info!(
        child = %req.child_id,
        work = %work.name,
        status = req.status.as_str(),
        by = req.updated_by.as_str(),
        ?outcome,
        "progress updated"
    );
    Ok(UpdateResult {
        label: record.status.label(),
        record,
        work,
        match_tier,
        auto_added,
        outcome,
        focus_set,
        warnings,
    })
}
