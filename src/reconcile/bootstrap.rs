use crate::backfill::{earlier_works, IMPORT_BACKFILL_NOTE};
use crate::config::ReconcileSettings;
use crate::curriculum::{
    normalize_area_key, require_classroom, seed_standard_catalogue, Catalogue, CurriculumWork,
    DEFAULT_AREAS,
};
use crate::error::{ReconcileError, Result};
use crate::matcher::MatchTier;
use crate::progress::{Attribution, ProgressStore, ProgressWrite, WriteMode};
use crate::roster::{create_child, NewChild};
use crate::status::ProgressStatus;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

const CURRENT_WORK_NOTE: &str = "Current work - imported via bootstrap";

/// One free-text entry per area, as extracted from a teacher's document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEntry {
    pub area: String,
    #[serde(default)]
    pub raw_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewChild {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_chinese: Option<String>,
    #[serde(default)]
    pub age: Option<f64>,
    #[serde(default)]
    pub works: Vec<PreviewEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewWork {
    pub area: String,
    pub area_label: String,
    pub raw_text: Option<String>,
    /// `matched`, `unmatched` or `missing`.
    pub status: &'static str,
    pub tier: Option<MatchTier>,
    pub work_id: Option<String>,
    pub work_key: Option<String>,
    pub work_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewedChild {
    pub name: String,
    pub name_chinese: Option<String>,
    pub age: Option<f64>,
    pub works: Vec<PreviewWork>,
    pub warnings: Vec<String>,
    pub matched: usize,
    pub unmatched: usize,
    pub missing: usize,
    pub ready_to_import: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSummary {
    pub children: Vec<PreviewedChild>,
    pub total_children: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub missing: usize,
    pub total_warnings: usize,
    pub ready_to_import: bool,
}

fn standard_area_rank(area_key: &str) -> usize {
    DEFAULT_AREAS
        .iter()
        .position(|(key, _)| *key == area_key)
        .unwrap_or(DEFAULT_AREAS.len())
}

fn area_label(catalogue: &Catalogue, area_key: &str) -> String {
    if let Some(area) = catalogue.area_by_key(area_key) {
        return area.name.clone();
    }
    DEFAULT_AREAS
        .iter()
        .find(|(key, _)| *key == area_key)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| area_key.to_string())
}

fn missing_work(area: String, area_label: String) -> PreviewWork {
    PreviewWork {
        area,
        area_label,
        raw_text: None,
        status: "missing",
        tier: None,
        work_id: None,
        work_key: None,
        work_name: None,
    }
}

/// Matches each child's free-text entries against the classroom catalogue
/// so a human can review them before `bootstrap`. Writes nothing.
pub fn bootstrap_preview(
    conn: &Connection,
    settings: &ReconcileSettings,
    classroom_id: &str,
    children: &[PreviewChild],
) -> Result<PreviewSummary> {
    require_classroom(conn, classroom_id)?;
    let catalogue = Catalogue::load(conn, classroom_id)?;
    let matcher = settings.matcher();

    let mut previewed = Vec::with_capacity(children.len());
    for child in children {
        let mut works = Vec::new();
        let mut warnings = Vec::new();
        let mut seen_areas = HashSet::new();

        for entry in &child.works {
            let area_key = normalize_area_key(&entry.area);
            let label = area_label(&catalogue, &area_key);
            seen_areas.insert(area_key.clone());

            let raw = entry
                .raw_text
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty());
            let Some(raw) = raw else {
                warnings.push(format!("{}: No work in document", label));
                works.push(missing_work(area_key, label));
                continue;
            };

            let area = catalogue.area_by_key(&area_key);
            if area.is_none() {
                warnings.push(format!("{}: area is not set up in this classroom", label));
            }
            let pool = match area {
                Some(a) => catalogue.works_in_area(&a.id),
                None => catalogue.all_works(),
            };
            match matcher.find_best_match(raw, pool) {
                Some(hit) => {
                    if hit.tier == MatchTier::WordOverlap {
                        warnings.push(format!(
                            "{}: \"{}\" loosely matched \"{}\", please confirm",
                            label, raw, hit.work.name
                        ));
                    }
                    works.push(PreviewWork {
                        area: area_key,
                        area_label: label,
                        raw_text: Some(raw.to_string()),
                        status: "matched",
                        tier: Some(hit.tier),
                        work_id: Some(hit.work.id.clone()),
                        work_key: Some(hit.work.work_key.clone()),
                        work_name: Some(hit.work.name.clone()),
                    });
                }
                None => {
                    warnings.push(format!("{}: \"{}\" - manual selection required", label, raw));
                    works.push(PreviewWork {
                        area: area_key,
                        area_label: label,
                        raw_text: Some(raw.to_string()),
                        status: "unmatched",
                        tier: None,
                        work_id: None,
                        work_key: None,
                        work_name: None,
                    });
                }
            }
        }

        for (key, _) in DEFAULT_AREAS {
            if !seen_areas.contains(key) {
                let label = area_label(&catalogue, key);
                warnings.push(format!("{}: Not found in document", label));
                works.push(missing_work(key.to_string(), label));
            }
        }
        works.sort_by_key(|w| standard_area_rank(&w.area));

        let count = |status: &str| works.iter().filter(|w| w.status == status).count();
        let (matched, unmatched, missing) = (count("matched"), count("unmatched"), count("missing"));
        let name = child.name.trim();
        previewed.push(PreviewedChild {
            name: if name.is_empty() { "Unknown".to_string() } else { name.to_string() },
            name_chinese: child.name_chinese.clone(),
            age: child.age,
            works,
            warnings,
            matched,
            unmatched,
            missing,
            ready_to_import: unmatched == 0 && missing == 0,
        });
    }

    let sum = |f: fn(&PreviewedChild) -> usize| previewed.iter().map(f).sum::<usize>();
    let (matched, unmatched, missing) = (
        sum(|c| c.matched),
        sum(|c| c.unmatched),
        sum(|c| c.missing),
    );
    let total_warnings = sum(|c| c.warnings.len());
    Ok(PreviewSummary {
        total_children: previewed.len(),
        children: previewed,
        matched,
        unmatched,
        missing,
        total_warnings,
        ready_to_import: unmatched == 0 && missing == 0,
    })
}

/// A reviewed pick from the preview: a catalogue work by id or key.
/// Both absent means the teacher chose to skip the area. A key is looked
/// up in `area` when given; without it the key must be unique across areas.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkSelection {
    #[serde(default)]
    pub work_id: Option<String>,
    #[serde(default)]
    pub work_key: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapChild {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age: Option<f64>,
    #[serde(default)]
    pub name_chinese: Option<String>,
    #[serde(default)]
    pub works: Vec<WorkSelection>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrappedChild {
    pub id: String,
    pub name: String,
    pub current_works: usize,
    pub mastered_works: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapSummary {
    pub children_created: usize,
    pub progress_written: usize,
    pub mastered_backfilled: usize,
    pub children: Vec<BootstrappedChild>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedWrite {
    work_id: String,
    status: ProgressStatus,
    note: &'static str,
}

fn resolve_selection<'a>(
    catalogue: &'a Catalogue,
    child_name: &str,
    sel: &WorkSelection,
) -> std::result::Result<&'a CurriculumWork, String> {
    let not_found = |label: &str| {
        format!(
            "Work \"{}\" not found in curriculum for \"{}\"",
            label, child_name
        )
    };
    if let Some(id) = sel.work_id.as_deref().filter(|s| !s.is_empty()) {
        return catalogue.work_by_id(id).ok_or_else(|| not_found(id));
    }
    let key = sel.work_key.as_deref().unwrap_or_default();
    match sel.area.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw_area) => {
            let area = catalogue.area_by_key(raw_area).ok_or_else(|| {
                format!(
                    "Area \"{}\" not found in curriculum for \"{}\"",
                    raw_area, child_name
                )
            })?;
            catalogue.work_by_key(&area.id, key).ok_or_else(|| not_found(key))
        }
        None => {
            let candidates = catalogue.works_with_key(key);
            match candidates.as_slice() {
                [work] => Ok(*work),
                [] => Err(not_found(key)),
                _ => Err(format!(
                    "Work \"{}\" is in more than one area; give its area for \"{}\"",
                    key, child_name
                )),
            }
        }
    }
}

/// Every selected work at `practicing`, preceded by its area's earlier
/// works at `mastered`. Each work appears once; a selected work stays
/// `practicing` even when another selection would backfill it.
fn plan_child_writes(
    catalogue: &Catalogue,
    child_name: &str,
    selections: &[WorkSelection],
    errors: &mut Vec<String>,
) -> Vec<PlannedWrite> {
    let mut plan: Vec<PlannedWrite> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for sel in selections {
        if sel.work_id.is_none() && sel.work_key.is_none() {
            continue;
        }
        let work = match resolve_selection(catalogue, child_name, sel) {
            Ok(work) => work,
            Err(message) => {
                errors.push(message);
                continue;
            }
        };

        for earlier in earlier_works(catalogue.works_in_area(&work.area_id), work) {
            if index.contains_key(&earlier.id) {
                continue;
            }
            index.insert(earlier.id.clone(), plan.len());
            plan.push(PlannedWrite {
                work_id: earlier.id.clone(),
                status: ProgressStatus::Mastered,
                note: IMPORT_BACKFILL_NOTE,
            });
        }

        let current = PlannedWrite {
            work_id: work.id.clone(),
            status: ProgressStatus::Practicing,
            note: CURRENT_WORK_NOTE,
        };
        match index.get(&work.id) {
            Some(&i) => plan[i] = current,
            None => {
                index.insert(work.id.clone(), plan.len());
                plan.push(current);
            }
        }
    }
    plan
}

fn write_chunk(
    conn: &Connection,
    store: &ProgressStore,
    child_id: &str,
    chunk: &[PlannedWrite],
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for w in chunk {
        store.upsert(
            &tx,
            &ProgressWrite {
                child_id,
                work_id: &w.work_id,
                status: w.status,
                attribution: Attribution::Import,
                notes: Some(w.note),
                mode: WriteMode::Promote,
            },
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Creates each child and seeds their progress from the reviewed
/// selections. One child's failure is reported and the batch continues.
pub fn bootstrap(
    conn: &Connection,
    settings: &ReconcileSettings,
    classroom_id: &str,
    children: &[BootstrapChild],
) -> Result<BootstrapSummary> {
    if children.is_empty() {
        return Err(ReconcileError::validation("children must not be empty"));
    }
    require_classroom(conn, classroom_id)?;
    let mut catalogue = Catalogue::load(conn, classroom_id)?;
    if catalogue.all_works().is_empty() {
        info!(classroom = %classroom_id, "seeding standard catalogue before import");
        seed_standard_catalogue(conn, classroom_id)?;
        catalogue = Catalogue::load(conn, classroom_id)?;
    }
    let store = ProgressStore::detect(conn)?;
    let chunk_size = settings.bootstrap_chunk_size.max(1);

    let mut summary = BootstrapSummary::default();
    for child in children {
        let name = child.name.trim();
        if name.is_empty() {
            summary.errors.push("Skipped child with empty name".to_string());
            continue;
        }
        let created = match create_child(
            conn,
            classroom_id,
            &NewChild {
                name,
                age: child.age,
                name_chinese: child.name_chinese.as_deref(),
            },
        ) {
            Ok(c) => c,
            Err(e) => {
                warn!(child = %name, error = %e, "bootstrap could not create child");
                summary
                    .errors
                    .push(format!("Failed to create \"{}\": {}", name, e));
                continue;
            }
        };

        let plan = plan_child_writes(&catalogue, name, &child.works, &mut summary.errors);
        let mut current_works = 0;
        let mut mastered_works = 0;
        for (n, chunk) in plan.chunks(chunk_size).enumerate() {
            if let Err(e) = write_chunk(conn, &store, &created.id, chunk) {
                warn!(child = %name, batch = n + 1, error = %e, "bootstrap batch rolled back");
                summary.errors.push(format!(
                    "Batch {} for \"{}\" failed: {}",
                    n + 1,
                    name,
                    e
                ));
                continue;
            }
            for w in chunk {
                match w.status {
                    ProgressStatus::Mastered => mastered_works += 1,
                    _ => current_works += 1,
                }
            }
        }

        summary.children_created += 1;
        summary.progress_written += current_works + mastered_works;
        summary.mastered_backfilled += mastered_works;
        summary.children.push(BootstrappedChild {
            id: created.id,
            name: created.name,
            current_works,
            mastered_works,
        });
    }

    info!(
        classroom = %classroom_id,
        created = summary.children_created,
        backfilled = summary.mastered_backfilled,
        errors = summary.errors.len(),
        "bootstrap finished"
    );
    Ok(summary)
}
