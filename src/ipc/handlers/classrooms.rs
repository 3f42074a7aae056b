use crate::curriculum::require_classroom;
use crate::error::ReconcileError;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_f64, get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::roster::{create_child, create_classroom, list_children, list_classrooms, NewChild};
use rusqlite::Connection;
use serde_json::{json, Value};

fn classrooms_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let (classroom, areas) = create_classroom(conn, name)?;
    Ok(json!({
        "classroomId": classroom.id,
        "name": classroom.name,
        "areas": areas,
    }))
}

fn classrooms_list(conn: &Connection) -> Result<Value, HandlerErr> {
    Ok(json!({ "classrooms": list_classrooms(conn)? }))
}

fn children_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let name = get_required_str(params, "name")?;
    let age = get_optional_f64(params, "age")?;
    let name_chinese = get_optional_str(params, "nameChinese")?;
    require_classroom(conn, classroom_id)?;

    let new = NewChild {
        name,
        age,
        name_chinese,
    };
    match create_child(conn, classroom_id, &new) {
        Ok(child) => Ok(json!({ "child": child })),
        Err(ReconcileError::Database(e)) => Err(HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "children" })),
        }),
        Err(e) => Err(e.into()),
    }
}

fn children_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    require_classroom(conn, classroom_id)?;
    Ok(json!({ "children": list_children(conn, classroom_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "classrooms.create" => Some(with_db(state, req, classrooms_create)),
        "classrooms.list" => Some(with_db(state, req, |conn, _| classrooms_list(conn))),
        "children.create" => Some(with_db(state, req, children_create)),
        "children.list" => Some(with_db(state, req, children_list)),
        _ => None,
    }
}
