use crate::curriculum::normalize_area_key;
use crate::db;
use crate::matcher::NameMatcher;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

pub const RECONCILE_SECTION_KEY: &str = "setup.reconcile";

/// Per-workspace knobs for the reconciliation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSettings {
    /// Area used when an assignment or update names none.
    pub default_area: String,
    /// When false, unmatched names are reported instead of added.
    pub auto_provision: bool,
    pub bootstrap_chunk_size: usize,
    /// Jaro-Winkler threshold for fuzzy token hits, as a percent.
    pub fuzzy_token_threshold: u32,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            default_area: "practical_life".to_string(),
            auto_provision: true,
            bootstrap_chunk_size: 50,
            fuzzy_token_threshold: 85,
        }
    }
}

impl ReconcileSettings {
    pub fn matcher(&self) -> NameMatcher {
        NameMatcher::new(f64::from(self.fuzzy_token_threshold) / 100.0)
    }

    pub fn load(conn: &rusqlite::Connection) -> anyhow::Result<Self> {
        let section = load_section(conn)?;
        Ok(serde_json::from_value(section)?)
    }
}

pub fn default_section() -> Value {
    json!({
        "defaultArea": "practical_life",
        "autoProvision": true,
        "bootstrapChunkSize": 50,
        "fuzzyTokenThreshold": 85
    })
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

/// Validates every field of `patch` before applying it to `current`.
pub fn merge_section_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "defaultArea" => {
                let raw = v
                    .as_str()
                    .ok_or_else(|| "defaultArea must be string".to_string())?;
                let key = normalize_area_key(raw);
                if key.is_empty() || key.len() > 40 {
                    return Err("defaultArea must be a non-empty area key".into());
                }
                obj.insert(k.clone(), Value::String(key));
            }
            "autoProvision" => {
                obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
            }
            "bootstrapChunkSize" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 500)?));
            }
            "fuzzyTokenThreshold" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 70, 99)?));
            }
            _ => return Err(format!("unknown reconcile field: {}", k)),
        }
    }
    Ok(())
}

pub fn load_section(conn: &rusqlite::Connection) -> anyhow::Result<Value> {
    let mut current = default_section();
    if let Some(saved) = db::settings_get_json(conn, RECONCILE_SECTION_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // A bad stored value must not lock the workspace out of reconciling.
            if let Err(e) = merge_section_patch(&mut current, saved_obj) {
                warn!(error = %e, "ignoring malformed stored reconcile settings");
                current = default_section();
            }
        }
    }
    Ok(current)
}

/// Applies a validated patch and persists the merged section.
pub fn update_section(conn: &rusqlite::Connection, patch: &Map<String, Value>) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn)?;
    if let Err(msg) = merge_section_patch(&mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, RECONCILE_SECTION_KEY, &current)?;
    Ok(Ok(current))
}
