use crate::curriculum::require_classroom;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_status, get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::roster::{create_assignment, list_assignments, require_child, NewAssignment};
use rusqlite::Connection;
use serde_json::{json, Value};

fn assignments_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let child_id = get_required_str(params, "childId")?;
    // workName may be blank here; sync reports such rows instead of rejecting them up front.
    let new = NewAssignment {
        work_name: get_optional_str(params, "workName")?,
        area: get_optional_str(params, "area")?,
        progress_status: get_optional_status(params, "progressStatus")?,
        week_start: get_optional_str(params, "weekStart")?,
    };
    require_classroom(conn, classroom_id)?;
    require_child(conn, classroom_id, child_id)?;
    Ok(json!({ "assignment": create_assignment(conn, child_id, &new)? }))
}

fn assignments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let child_id = get_optional_str(params, "childId")?;
    require_classroom(conn, classroom_id)?;
    if let Some(child_id) = child_id {
        require_child(conn, classroom_id, child_id)?;
    }
    Ok(json!({ "assignments": list_assignments(conn, classroom_id, child_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "assignments.create" => Some(with_db(state, req, assignments_create)),
        "assignments.list" => Some(with_db(state, req, assignments_list)),
        _ => None,
    }
}
