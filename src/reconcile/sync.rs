use super::provision_into;
use crate::backfill::{backfill_child, BackfillSummary, SYNC_BACKFILL_NOTE};
use crate::config::ReconcileSettings;
use crate::curriculum::{require_classroom, Catalogue, CurriculumWork};
use crate::error::{ReconcileError, Result};
use crate::matcher::NameMatcher;
use crate::progress::{Attribution, ProgressStore, ProgressWrite, WriteMode};
use crate::roster::{link_assignment, list_assignments, require_child, WeeklyAssignment};
use crate::status::ProgressStatus;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    /// Assignments linked to a work by this run, auto-added ones included.
    pub matched: usize,
    pub already_linked: usize,
    pub auto_added: usize,
    pub not_found: usize,
    pub backfilled: usize,
}

/// An assignment sync could not carry through, kept for a human to fix.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unresolved {
    pub assignment_id: String,
    pub child_id: String,
    pub work_name: Option<String>,
    pub area: Option<String>,
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub counts: SyncCounts,
    pub unresolved: Vec<Unresolved>,
    /// Non-fatal backfill failures.
    pub errors: Vec<String>,
}

impl Unresolved {
    fn of(assignment: &WeeklyAssignment, reason: &'static str, message: Option<String>) -> Self {
        Self {
            assignment_id: assignment.id.clone(),
            child_id: assignment.child_id.clone(),
            work_name: assignment.work_name.clone(),
            area: assignment.area.clone(),
            reason,
            message,
        }
    }
}

struct Resolver<'a> {
    conn: &'a Connection,
    settings: &'a ReconcileSettings,
    matcher: NameMatcher,
    classroom_id: &'a str,
}

impl Resolver<'_> {
    /// Finds (or provisions) the work an unlinked assignment refers to.
    /// The bool is true when the work was created for this assignment.
    fn resolve(
        &self,
        catalogue: &mut Catalogue,
        assignment: &WeeklyAssignment,
    ) -> std::result::Result<(CurriculumWork, bool), Unresolved> {
        let Some(name) = assignment
            .work_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Err(Unresolved::of(assignment, "missing_work_name", None));
        };
        let area_raw = assignment
            .area
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.settings.default_area);
        let area = catalogue.area_by_key(area_raw).cloned();

        // An area the classroom does not have cannot narrow the search.
        let pool = match &area {
            Some(a) => catalogue.works_in_area(&a.id),
            None => catalogue.all_works(),
        };
        if let Some(hit) = self.matcher.find_best_match(name, pool) {
            debug!(query = %name, work = %hit.work.name, tier = ?hit.tier, "assignment matched");
            return Ok((hit.work.clone(), false));
        }

        let Some(area) = area else {
            return Err(Unresolved::of(assignment, "unknown_area", None));
        };
        if !self.settings.auto_provision {
            return Err(Unresolved::of(assignment, "no_match", None));
        }
        provision_into(self.conn, catalogue, self.classroom_id, &area.id, name).map_err(|e| {
            warn!(work = %name, error = %e, "sync could not auto-add work");
            Unresolved::of(assignment, "provisioning_failed", Some(e.to_string()))
        })
    }
}

struct Applied {
    linked: bool,
    backfill: BackfillSummary,
}

/// Link, then backfill, then the assignment's own progress, as one unit.
/// A failed primary write rolls the link back so a re-run retries it.
fn apply(
    conn: &Connection,
    store: &ProgressStore,
    catalogue: &Catalogue,
    assignment: &WeeklyAssignment,
    work: &CurriculumWork,
    status: ProgressStatus,
) -> Result<Applied> {
    let tx = conn.unchecked_transaction()?;
    if !link_assignment(&tx, &assignment.id, &work.id)? {
        // Linked by someone else since we read it.
        return Ok(Applied {
            linked: false,
            backfill: BackfillSummary::default(),
        });
    }
    let backfill = backfill_child(
        &tx,
        store,
        &assignment.child_id,
        work,
        catalogue.works_in_area(&work.area_id),
        Attribution::Backfill,
        SYNC_BACKFILL_NOTE,
    );
    store.upsert(
        &tx,
        &ProgressWrite {
            child_id: &assignment.child_id,
            work_id: &work.id,
            status,
            attribution: Attribution::Sync,
            notes: None,
            mode: WriteMode::Promote,
        },
    )?;
    tx.commit()?;
    Ok(Applied {
        linked: true,
        backfill,
    })
}

/// Status the assignment's work is recorded at. Statuses are canonical
/// from `assignments.create`; a row written some other way with a value
/// the codec does not know still counts as practicing, but is reported.
fn assignment_status(assignment: &WeeklyAssignment, errors: &mut Vec<String>) -> ProgressStatus {
    let Some(raw) = assignment
        .progress_status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return ProgressStatus::Practicing;
    };
    ProgressStatus::parse(raw).unwrap_or_else(|| {
        warn!(assignment = %assignment.id, status = %raw, "unrecognized assignment status");
        errors.push(format!(
            "Assignment \"{}\" has unrecognized status \"{}\"; recorded as practicing",
            assignment.work_name.as_deref().unwrap_or(&assignment.id),
            raw
        ));
        ProgressStatus::Practicing
    })
}

/// Resolves every unlinked weekly assignment of a classroom (or of one
/// child) against the classroom catalogue. Safe to re-run: linked
/// assignments are counted and skipped.
pub fn sync(
    conn: &Connection,
    settings: &ReconcileSettings,
    classroom_id: &str,
    child_id: Option<&str>,
) -> Result<SyncSummary> {
    require_classroom(conn, classroom_id)?;
    if let Some(child_id) = child_id {
        require_child(conn, classroom_id, child_id)?;
    }
    let mut catalogue = Catalogue::load(conn, classroom_id)?;
    if catalogue.areas().is_empty() {
        return Err(ReconcileError::not_found("curriculum areas for classroom", classroom_id));
    }
    let store = ProgressStore::detect(conn)?;
    let resolver = Resolver {
        conn,
        settings,
        matcher: settings.matcher(),
        classroom_id,
    };

    let mut summary = SyncSummary::default();
    for assignment in list_assignments(conn, classroom_id, child_id)? {
        if assignment.work_id.is_some() {
            summary.counts.already_linked += 1;
            continue;
        }
        let (work, auto_added) = match resolver.resolve(&mut catalogue, &assignment) {
            Ok(resolved) => resolved,
            Err(unresolved) => {
                debug!(assignment = %assignment.id, reason = unresolved.reason, "assignment unresolved");
                summary.counts.not_found += 1;
                summary.unresolved.push(unresolved);
                continue;
            }
        };
        if auto_added {
            summary.counts.auto_added += 1;
        }

        let status = assignment_status(&assignment, &mut summary.errors);
        match apply(conn, &store, &catalogue, &assignment, &work, status) {
            Ok(applied) if applied.linked => {
                summary.counts.matched += 1;
                summary.counts.backfilled += applied.backfill.backfilled;
                summary.errors.extend(applied.backfill.errors);
            }
            Ok(_) => summary.counts.already_linked += 1,
            Err(e) => {
                warn!(assignment = %assignment.id, error = %e, "sync write failed");
                summary.unresolved.push(Unresolved::of(
                    &assignment,
                    e.code(),
                    Some(e.to_string()),
                ));
            }
        }
    }

    info!(
        classroom = %classroom_id,
        matched = summary.counts.matched,
        already_linked = summary.counts.already_linked,
        auto_added = summary.counts.auto_added,
        not_found = summary.counts.not_found,
        backfilled = summary.counts.backfilled,
        "sync finished"
    );
    Ok(summary)
}
