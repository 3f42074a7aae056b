//! Reconciliation entry points: batch sync of weekly assignments, classroom
//! bootstrap from a reviewed import, and single progress updates.

mod bootstrap;
mod read;
mod sync;
mod update;

pub use bootstrap::{bootstrap, bootstrap_preview, BootstrapChild, PreviewChild};
pub use read::progress_overview;
pub use sync::sync;
pub use update::{update, UpdateRequest, WorkRef};

use crate::curriculum::{provision_work, Catalogue, CurriculumWork};
use crate::error::Result;
use rusqlite::Connection;

/// Pushes a newly provisioned work into the request catalogue so later
/// items in the same batch can match it. Returns (work, created).
fn provision_into(
    conn: &Connection,
    catalogue: &mut Catalogue,
    classroom_id: &str,
    area_id: &str,
    name: &str,
) -> Result<(CurriculumWork, bool)> {
    let provisioned = provision_work(conn, classroom_id, area_id, name)?;
    if catalogue.work_by_id(&provisioned.work.id).is_none() {
        catalogue.push(provisioned.work.clone());
    }
    Ok((provisioned.work, provisioned.created))
}
