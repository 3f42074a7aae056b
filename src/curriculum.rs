use crate::error::{ReconcileError, Result};
use crate::matcher::normalize_name;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_AREAS: [(&str, &str); 5] = [
    ("practical_life", "Practical Life"),
    ("sensorial", "Sensorial"),
    ("mathematics", "Mathematics"),
    ("language", "Language"),
    ("cultural", "Cultural"),
];

/// Starter works per standard area, in presentation order. Seeded into a
/// classroom whose catalogue is still empty so imports have keys to
/// resolve against.
pub const STANDARD_WORKS: [(&str, &[(&str, &str)]); 5] = [
    (
        "practical_life",
        &[
            ("pl_carrying_a_chair", "Carrying a Chair"),
            ("pl_rolling_a_mat", "Rolling a Mat"),
            ("pl_spooning", "Spooning"),
            ("pl_dry_pouring", "Dry Pouring"),
            ("pl_water_pouring", "Water Pouring"),
            ("pl_folding_cloths", "Folding Cloths"),
            ("pl_dressing_frames", "Dressing Frames"),
            ("pl_hand_washing", "Hand Washing"),
        ],
    ),
    (
        "sensorial",
        &[
            ("se_cylinder_blocks", "Cylinder Blocks"),
            ("se_pink_tower", "Pink Tower"),
            ("se_brown_stair", "Brown Stair"),
            ("se_red_rods", "Red Rods"),
            ("se_color_tablets", "Color Tablets"),
            ("se_geometric_cabinet", "Geometric Cabinet"),
            ("se_sound_cylinders", "Sound Cylinders"),
        ],
    ),
    (
        "mathematics",
        &[
            ("ma_number_rods", "Number Rods"),
            ("ma_sandpaper_numerals", "Sandpaper Numerals"),
            ("ma_spindle_boxes", "Spindle Boxes"),
            ("ma_cards_and_counters", "Cards and Counters"),
            ("ma_golden_beads", "Golden Beads"),
            ("ma_teen_boards", "Teen Boards"),
            ("ma_ten_boards", "Ten Boards"),
        ],
    ),
    (
        "language",
        &[
            ("la_sound_games", "Sound Games"),
            ("la_sandpaper_letters", "Sandpaper Letters"),
            ("la_moveable_alphabet", "Moveable Alphabet"),
            ("la_object_box", "Object Box"),
            ("la_pink_series", "Pink Series"),
            ("la_blue_series", "Blue Series"),
            ("la_green_series", "Green Series"),
        ],
    ),
    (
        "cultural",
        &[
            ("cu_land_and_water_globe", "Land and Water Globe"),
            ("cu_globe_of_continents", "Globe of Continents"),
            ("cu_puzzle_maps", "Puzzle Maps"),
            ("cu_living_and_nonliving", "Living and Non-living"),
            ("cu_parts_of_a_plant", "Parts of a Plant"),
            ("cu_land_forms", "Land and Water Forms"),
        ],
    ),
];

const WORK_KEY_MAX_SLUG: usize = 40;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumArea {
    pub id: String,
    pub classroom_id: String,
    pub area_key: String,
    pub name: String,
    pub sequence: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumWork {
    pub id: String,
    pub classroom_id: String,
    pub area_id: String,
    pub work_key: String,
    pub name: String,
    pub sequence: i64,
    pub is_custom: bool,
}

/// Result of a provisioning attempt. `created` is false when the
/// constraint told us another writer already added the same key.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub work: CurriculumWork,
    pub created: bool,
}

/// Canonical area key. Spelling variants must collapse to one key before
/// any lookup or insert.
pub fn normalize_area_key(raw: &str) -> String {
    let key = raw
        .trim()
        .to_ascii_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    match key.as_str() {
        "math" | "maths" => "mathematics".to_string(),
        "culture" | "science" => "cultural".to_string(),
        "sensory" => "sensorial".to_string(),
        "practical" | "practicallife" => "practical_life".to_string(),
        _ => key,
    }
}

/// Stable catalogue key for an auto-added work.
pub fn make_work_key(name: &str) -> String {
    let normalized = normalize_name(name);
    let mut slug = String::with_capacity(normalized.len());
    for c in normalized.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if !slug.is_empty() && slug.len() <= WORK_KEY_MAX_SLUG {
        return format!("custom_{}", slug);
    }
    // Non-ASCII names slug to nothing; the digest keeps them apart.
    let digest = Sha256::digest(normalized.as_bytes());
    let suffix: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    let head = slug[..slug.len().min(WORK_KEY_MAX_SLUG)].trim_end_matches('_');
    if head.is_empty() {
        format!("custom_{}", suffix)
    } else {
        format!("custom_{}_{}", head, suffix)
    }
}

fn area_from_row(row: &Row<'_>) -> rusqlite::Result<CurriculumArea> {
    Ok(CurriculumArea {
        id: row.get(0)?,
        classroom_id: row.get(1)?,
        area_key: row.get(2)?,
        name: row.get(3)?,
        sequence: row.get(4)?,
    })
}

fn work_from_row(row: &Row<'_>) -> rusqlite::Result<CurriculumWork> {
    Ok(CurriculumWork {
        id: row.get(0)?,
        classroom_id: row.get(1)?,
        area_id: row.get(2)?,
        work_key: row.get(3)?,
        name: row.get(4)?,
        sequence: row.get(5)?,
        is_custom: row.get::<_, i64>(6)? != 0,
    })
}

const WORK_COLUMNS: &str = "id, classroom_id, area_id, work_key, name, sequence, is_custom";

pub fn classroom_exists(conn: &Connection, classroom_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classrooms WHERE id = ?",
            [classroom_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn require_classroom(conn: &Connection, classroom_id: &str) -> Result<()> {
    if classroom_exists(conn, classroom_id)? {
        Ok(())
    } else {
        Err(ReconcileError::not_found("classroom", classroom_id))
    }
}

pub fn list_areas(conn: &Connection, classroom_id: &str) -> Result<Vec<CurriculumArea>> {
    let mut stmt = conn.prepare(
        "SELECT id, classroom_id, area_key, name, sequence
         FROM curriculum_areas
         WHERE classroom_id = ? AND is_active = 1
         ORDER BY sequence, area_key",
    )?;
    let areas = stmt
        .query_map([classroom_id], area_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(areas)
}

/// Insert-if-missing for one area. The key is normalized first so that
/// `math` and `mathematics` land on the same row.
pub fn ensure_area(
    conn: &Connection,
    classroom_id: &str,
    raw_key: &str,
    name: &str,
) -> Result<CurriculumArea> {
    let area_key = normalize_area_key(raw_key);
    if area_key.is_empty() {
        return Err(ReconcileError::validation("area key must not be empty"));
    }
    conn.execute(
        "INSERT INTO curriculum_areas(id, classroom_id, area_key, name, sequence, is_active)
         SELECT ?, ?, ?, ?, COALESCE(MAX(sequence), -1) + 1, 1
         FROM curriculum_areas WHERE classroom_id = ?
         ON CONFLICT(classroom_id, area_key) DO NOTHING",
        (
            Uuid::new_v4().to_string(),
            classroom_id,
            &area_key,
            name,
            classroom_id,
        ),
    )?;
    let area = conn.query_row(
        "SELECT id, classroom_id, area_key, name, sequence
         FROM curriculum_areas WHERE classroom_id = ? AND area_key = ?",
        (classroom_id, &area_key),
        area_from_row,
    )?;
    Ok(area)
}

pub fn ensure_default_areas(conn: &Connection, classroom_id: &str) -> Result<Vec<CurriculumArea>> {
    for (key, name) in DEFAULT_AREAS {
        ensure_area(conn, classroom_id, key, name)?;
    }
    list_areas(conn, classroom_id)
}

pub fn list_works(
    conn: &Connection,
    classroom_id: &str,
    area_id: Option<&str>,
) -> Result<Vec<CurriculumWork>> {
    let works = match area_id {
        Some(area_id) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM curriculum_works
                 WHERE classroom_id = ? AND area_id = ?
                 ORDER BY sequence",
                WORK_COLUMNS
            ))?;
            let rows = stmt
                .query_map((classroom_id, area_id), work_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT w.id, w.classroom_id, w.area_id, w.work_key, w.name, w.sequence, w.is_custom
                 FROM curriculum_works w
                 JOIN curriculum_areas a ON a.id = w.area_id
                 WHERE w.classroom_id = ?
                 ORDER BY a.sequence, w.sequence",
            )?;
            let rows = stmt
                .query_map([classroom_id], work_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(works)
}

pub fn get_work(conn: &Connection, classroom_id: &str, work_id: &str) -> Result<Option<CurriculumWork>> {
    let work = conn
        .query_row(
            &format!(
                "SELECT {} FROM curriculum_works WHERE classroom_id = ? AND id = ?",
                WORK_COLUMNS
            ),
            (classroom_id, work_id),
            work_from_row,
        )
        .optional()?;
    Ok(work)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}

/// Catalogue Provisioner: adds `raw_name` to the end of `area_id`'s
/// sequence. Existing works are never renumbered.
pub fn provision_work(
    conn: &Connection,
    classroom_id: &str,
    area_id: &str,
    raw_name: &str,
) -> Result<Provisioned> {
    let name = raw_name.trim();
    if name.is_empty() {
        return Err(ReconcileError::ProvisioningFailed {
            name: raw_name.to_string(),
            reason: "empty work name".to_string(),
        });
    }
    let work_key = make_work_key(name);
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let inserted = conn.execute(
        "INSERT INTO curriculum_works(id, classroom_id, area_id, work_key, name, sequence, is_custom, created_at)
         SELECT ?, ?, ?, ?, ?, COALESCE(MAX(sequence), 0) + 1, 1, ?
         FROM curriculum_works WHERE area_id = ?",
        (&id, classroom_id, area_id, &work_key, name, &now, area_id),
    );

    match inserted {
        Ok(_) => {
            let work = get_work(conn, classroom_id, &id)?.ok_or_else(|| {
                ReconcileError::ProvisioningFailed {
                    name: name.to_string(),
                    reason: "inserted work could not be read back".to_string(),
                }
            })?;
            info!(
                work = %work.name,
                key = %work.work_key,
                sequence = work.sequence,
                "auto-added work to catalogue"
            );
            Ok(Provisioned {
                work,
                created: true,
            })
        }
        Err(e) if is_constraint_violation(&e) => {
            debug!(key = %work_key, "work key already present, re-fetching");
            let existing = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM curriculum_works
                         WHERE classroom_id = ? AND area_id = ? AND work_key = ?",
                        WORK_COLUMNS
                    ),
                    (classroom_id, area_id, &work_key),
                    work_from_row,
                )
                .optional()?;
            match existing {
                Some(work) => Ok(Provisioned {
                    work,
                    created: false,
                }),
                None => Err(ReconcileError::ProvisioningFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                }),
            }
        }
        Err(e) => {
            warn!(work = %name, error = %e, "provisioning failed");
            Err(ReconcileError::ProvisioningFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Admin path: add a catalogue work with an explicit key and optional
/// sequence. Without a sequence it is appended like a provisioned work.
pub fn create_work(
    conn: &Connection,
    classroom_id: &str,
    area_id: &str,
    work_key: &str,
    name: &str,
    sequence: Option<i64>,
) -> Result<CurriculumWork> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    match sequence {
        Some(seq) => {
            conn.execute(
                "INSERT INTO curriculum_works(id, classroom_id, area_id, work_key, name, sequence, is_custom, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
                (&id, classroom_id, area_id, work_key, name, seq, &now),
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO curriculum_works(id, classroom_id, area_id, work_key, name, sequence, is_custom, created_at)
                 SELECT ?, ?, ?, ?, ?, COALESCE(MAX(sequence), 0) + 1, 0, ?
                 FROM curriculum_works WHERE area_id = ?",
                (&id, classroom_id, area_id, work_key, name, &now, area_id),
            )?;
        }
    }
    get_work(conn, classroom_id, &id)?.ok_or_else(|| ReconcileError::not_found("work", id))
}

/// Seeds the standard areas, then the starter works into every standard
/// area that has none yet. Returns the number of works added. Areas that
/// already hold works are left alone.
pub fn seed_standard_catalogue(conn: &Connection, classroom_id: &str) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let areas = ensure_default_areas(&tx, classroom_id)?;
    let mut added = 0;
    for (area_key, works) in STANDARD_WORKS {
        let Some(area) = areas.iter().find(|a| a.area_key == area_key) else {
            continue;
        };
        if !list_works(&tx, classroom_id, Some(&area.id))?.is_empty() {
            continue;
        }
        for (i, (work_key, name)) in works.iter().enumerate() {
            create_work(&tx, classroom_id, &area.id, work_key, name, Some(i as i64 + 1))?;
            added += 1;
        }
    }
    tx.commit()?;
    info!(classroom = %classroom_id, added, "seeded standard catalogue");
    Ok(added)
}

/// In-memory view of one classroom's catalogue for the duration of a
/// request. Works provisioned mid-request are pushed so later items see
/// them.
#[derive(Debug, Default)]
pub struct Catalogue {
    areas: Vec<CurriculumArea>,
    by_area: HashMap<String, Vec<CurriculumWork>>,
    all: Vec<CurriculumWork>,
}

impl Catalogue {
    pub fn load(conn: &Connection, classroom_id: &str) -> Result<Self> {
        let areas = list_areas(conn, classroom_id)?;
        let mut catalogue = Catalogue {
            areas,
            ..Default::default()
        };
        for work in list_works(conn, classroom_id, None)? {
            catalogue.push(work);
        }
        Ok(catalogue)
    }

    pub fn areas(&self) -> &[CurriculumArea] {
        &self.areas
    }

    pub fn area_by_key(&self, raw_key: &str) -> Option<&CurriculumArea> {
        let key = normalize_area_key(raw_key);
        self.areas.iter().find(|a| a.area_key == key)
    }

    pub fn area_by_id(&self, area_id: &str) -> Option<&CurriculumArea> {
        self.areas.iter().find(|a| a.id == area_id)
    }

    /// Works in one area, ordered by sequence.
    pub fn works_in_area(&self, area_id: &str) -> &[CurriculumWork] {
        self.by_area.get(area_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_works(&self) -> &[CurriculumWork] {
        &self.all
    }

    pub fn work_by_id(&self, work_id: &str) -> Option<&CurriculumWork> {
        self.all.iter().find(|w| w.id == work_id)
    }

    /// Keys are unique per area only.
    pub fn work_by_key(&self, area_id: &str, work_key: &str) -> Option<&CurriculumWork> {
        self.works_in_area(area_id).iter().find(|w| w.work_key == work_key)
    }

    /// Every work carrying `work_key`, across areas, in catalogue order.
    pub fn works_with_key(&self, work_key: &str) -> Vec<&CurriculumWork> {
        self.all.iter().filter(|w| w.work_key == work_key).collect()
    }

    pub fn push(&mut self, work: CurriculumWork) {
        let area_works = self.by_area.entry(work.area_id.clone()).or_default();
        let pos = area_works.partition_point(|w| w.sequence <= work.sequence);
        area_works.insert(pos, work.clone());
        self.all.push(work);
    }
}
