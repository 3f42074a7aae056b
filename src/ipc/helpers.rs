use super::error::{ok, HandlerErr};
use super::types::{AppState, Request};
use crate::status::ProgressStatus;
use rusqlite::Connection;
use serde_json::Value;

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent and null are both None; any other non-string is rejected.
pub fn get_optional_str<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be string", key))),
    }
}

pub fn get_optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn get_optional_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be number", key))),
    }
}

/// Status params go through the codec here, at the boundary. Absent and
/// null are None; anything the codec does not recognize is rejected.
pub fn get_optional_status(params: &Value, key: &str) -> Result<Option<ProgressStatus>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => ProgressStatus::from_json(v).map(Some).ok_or_else(|| {
            HandlerErr::bad_params(format!("{} must be 0..3 or a status name", key))
        }),
    }
}

/// Deserializes a required array param into typed rows.
pub fn get_required_vec<T: serde::de::DeserializeOwned>(
    params: &Value,
    key: &str,
) -> Result<Vec<T>, HandlerErr> {
    let Some(raw) = params.get(key).filter(|v| v.is_array()) else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid {}: {}", key, e)))
}

/// Runs a handler body against the open workspace and wraps the outcome
/// in the response envelope.
pub fn with_db(
    state: &AppState,
    req: &Request,
    body: impl FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    let result = require_db(state).and_then(|conn| body(conn, &req.params));
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}
