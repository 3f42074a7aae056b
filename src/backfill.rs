//! Sequence backfill: a child working on work N has already mastered every
//! work sequenced before N in the same area.

use crate::curriculum::CurriculumWork;
use crate::progress::{Attribution, ProgressStore, ProgressWrite, WriteMode};
use crate::status::ProgressStatus;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

pub const SYNC_BACKFILL_NOTE: &str = "Backfilled - mastered before current work";
pub const IMPORT_BACKFILL_NOTE: &str = "Backfilled on import - mastered before current work";

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillSummary {
    /// Records created or raised to mastered by this run.
    pub backfilled: usize,
    /// Records that were already mastered.
    pub unchanged: usize,
    pub errors: Vec<String>,
}

/// Works in the target's area with a strictly smaller sequence, in order.
pub fn earlier_works<'a>(
    area_works: &'a [CurriculumWork],
    target: &'a CurriculumWork,
) -> impl Iterator<Item = &'a CurriculumWork> + 'a {
    area_works.iter().filter(move |w| {
        w.area_id == target.area_id
            && w.classroom_id == target.classroom_id
            && w.id != target.id
            && w.sequence < target.sequence
    })
}

/// Upserts `mastered` for every earlier work. Idempotent: a re-run finds
/// everything already mastered and reports zero backfilled.
///
/// Per-work failures are collected, not returned; the caller decides
/// whether the surrounding item still counts.
pub fn backfill_child(
    conn: &Connection,
    store: &ProgressStore,
    child_id: &str,
    target: &CurriculumWork,
    area_works: &[CurriculumWork],
    attribution: Attribution,
    note: &str,
) -> BackfillSummary {
    let mut summary = BackfillSummary::default();
    for work in earlier_works(area_works, target) {
        let write = ProgressWrite {
            child_id,
            work_id: &work.id,
            status: ProgressStatus::Mastered,
            attribution,
            notes: Some(note),
            mode: WriteMode::Promote,
        };
        match store.upsert(conn, &write) {
            Ok((_, outcome)) if outcome.wrote() => summary.backfilled += 1,
            Ok(_) => summary.unchanged += 1,
            Err(e) => {
                warn!(child = %child_id, work = %work.name, error = %e, "backfill write failed");
                summary
                    .errors
                    .push(format!("Backfill of \"{}\" failed: {}", work.name, e));
            }
        }
    }
    if summary.backfilled > 0 {
        info!(
            child = %child_id,
            target = %target.name,
            backfilled = summary.backfilled,
            "backfilled earlier works"
        );
    }
    summary
}
