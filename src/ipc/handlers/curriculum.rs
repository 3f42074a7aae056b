use crate::curriculum::{
    create_work, ensure_default_areas, list_areas, list_works, make_work_key, require_classroom,
    Catalogue,
};
use crate::error::ReconcileError;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn areas_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    require_classroom(conn, classroom_id)?;
    Ok(json!({ "areas": list_areas(conn, classroom_id)? }))
}

fn areas_ensure_defaults(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    require_classroom(conn, classroom_id)?;
    Ok(json!({ "areas": ensure_default_areas(conn, classroom_id)? }))
}

fn works_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    require_classroom(conn, classroom_id)?;
    let area_id = match get_optional_str(params, "area")?.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            let catalogue = Catalogue::load(conn, classroom_id)?;
            let area = catalogue
                .area_by_key(raw)
                .ok_or_else(|| ReconcileError::not_found("area", raw))?;
            Some(area.id.clone())
        }
        None => None,
    };
    Ok(json!({ "works": list_works(conn, classroom_id, area_id.as_deref())? }))
}

fn works_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let area = get_required_str(params, "area")?;
    let name = get_required_str(params, "name")?;
    let sequence = match params.get("sequence") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) if n >= 1 => Some(n),
            _ => return Err(HandlerErr::bad_params("sequence must be a positive integer")),
        },
    };
    require_classroom(conn, classroom_id)?;

    let catalogue = Catalogue::load(conn, classroom_id)?;
    let area = catalogue
        .area_by_key(area)
        .ok_or_else(|| ReconcileError::not_found("area", area))?;
    let work_key = match get_optional_str(params, "workKey")?.map(str::trim).filter(|s| !s.is_empty()) {
        Some(key) => key.to_string(),
        None => make_work_key(name),
    };

    match create_work(conn, classroom_id, &area.id, &work_key, name, sequence) {
        Ok(work) => Ok(json!({ "work": work })),
        Err(ReconcileError::Database(e)) => Err(HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "curriculum_works", "workKey": work_key })),
        }),
        Err(e) => Err(e.into()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "curriculum.areas.list" => Some(with_db(state, req, areas_list)),
        "curriculum.areas.ensureDefaults" => Some(with_db(state, req, areas_ensure_defaults)),
        "curriculum.works.list" => Some(with_db(state, req, works_list)),
        "curriculum.works.create" => Some(with_db(state, req, works_create)),
        _ => None,
    }
}
