use crate::config::ReconcileSettings;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_str, get_required_vec, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::progress::Attribution;
use crate::reconcile::{self, BootstrapChild, PreviewChild, UpdateRequest, WorkRef};
use crate::status::ProgressStatus;
use rusqlite::Connection;
use serde_json::{json, Value};

fn progress_sync(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let child_id = get_optional_str(params, "childId")?
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let settings = ReconcileSettings::load(conn)?;
    let summary = reconcile::sync(conn, &settings, classroom_id, child_id)?;
    Ok(json!({
        "success": true,
        "summary": summary.counts,
        "unresolved": summary.unresolved,
        "errors": summary.errors,
    }))
}

fn bootstrap_preview(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let children: Vec<PreviewChild> = get_required_vec(params, "children")?;
    let settings = ReconcileSettings::load(conn)?;
    let preview = reconcile::bootstrap_preview(conn, &settings, classroom_id, &children)?;
    Ok(json!({ "success": true, "preview": preview }))
}

fn bootstrap(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let children: Vec<BootstrapChild> = get_required_vec(params, "children")?;
    let settings = ReconcileSettings::load(conn)?;
    let summary = reconcile::bootstrap(conn, &settings, classroom_id, &children)?;
    Ok(json!({
        "success": true,
        "summary": {
            "childrenCreated": summary.children_created,
            "progressWritten": summary.progress_written,
            "masteredBackfilled": summary.mastered_backfilled,
        },
        "children": summary.children,
        "errors": summary.errors,
    }))
}

fn parse_update(params: &Value) -> Result<UpdateRequest, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let child_id = get_required_str(params, "childId")?;
    let status = params
        .get("status")
        .and_then(ProgressStatus::from_json)
        .ok_or_else(|| HandlerErr::bad_params("status must be 0..3 or a status name"))?;

    let work_id = get_optional_str(params, "workId")?
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let work_name = get_optional_str(params, "workName")?
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let work = match (work_id, work_name) {
        (Some(id), _) => WorkRef::Id(id.to_string()),
        (None, Some(name)) => WorkRef::Name {
            name: name.to_string(),
            area: get_optional_str(params, "area")?.map(str::to_string),
        },
        (None, None) => return Err(HandlerErr::bad_params("missing workId or workName")),
    };

    let updated_by = match get_optional_str(params, "updatedBy")? {
        None => Attribution::Teacher,
        Some(raw) => match Attribution::parse(raw) {
            Some(a @ (Attribution::Teacher | Attribution::Parent)) => a,
            _ => return Err(HandlerErr::bad_params("updatedBy must be teacher or parent")),
        },
    };

    Ok(UpdateRequest {
        classroom_id: classroom_id.to_string(),
        child_id: child_id.to_string(),
        work,
        status,
        notes: get_optional_str(params, "notes")?.map(str::to_string),
        updated_by,
        is_focus: get_optional_bool(params, "isFocus")?.unwrap_or(false),
    })
}

fn progress_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let req = parse_update(params)?;
    let settings = ReconcileSettings::load(conn)?;
    let result = reconcile::update(conn, &settings, &req)?;
    Ok(json!({
        "success": true,
        "progress": result.record,
        "label": result.label,
        "work": result.work,
        "matchTier": result.match_tier,
        "autoAdded": result.auto_added,
        "outcome": result.outcome,
        "focusSet": result.focus_set,
        "warnings": result.warnings,
    }))
}

fn progress_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let child_id = get_required_str(params, "childId")?;
    let area = get_optional_str(params, "area")?;
    let overview = reconcile::progress_overview(conn, classroom_id, child_id, area)?;
    Ok(json!(overview))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "progress.sync" => Some(with_db(state, req, progress_sync)),
        "progress.update" => Some(with_db(state, req, progress_update)),
        "progress.get" => Some(with_db(state, req, progress_get)),
        "classroom.bootstrapPreview" => Some(with_db(state, req, bootstrap_preview)),
        "classroom.bootstrap" => Some(with_db(state, req, bootstrap)),
        _ => None,
    }
}
