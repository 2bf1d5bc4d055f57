use rusqlite::Connection;

use crate::calc::CalcError;
use crate::ipc::error::{err, fail, ok};
use crate::ipc::types::{AppState, Request};
use crate::semester::{SemesterKey, SemesterType};

/// Runs an operation against the open workspace, mapping both the missing
/// workspace and any core failure onto the wire.
pub fn with_db(
    state: &mut AppState,
    req: &Request,
    f: impl Fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, CalcError>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => fail(&req.id, &e),
    }
}

fn bad_params(message: impl Into<String>) -> CalcError {
    CalcError::new("bad_params", message)
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, CalcError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, CalcError> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| bad_params(format!("{} must be a string", key))),
    }
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> Result<i64, CalcError> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

pub fn optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, CalcError> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| bad_params(format!("{} must be an integer", key))),
    }
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, CalcError> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

pub fn bool_flag(params: &serde_json::Value, key: &str) -> Result<bool, CalcError> {
    match params.get(key) {
        None => Ok(false),
        Some(v) if v.is_null() => Ok(false),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn str_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, CalcError> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(bad_params(format!("missing {}", key)));
    };
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| bad_params(format!("{} must contain strings", key)))
        })
        .collect()
}

pub fn semester_key(params: &serde_json::Value) -> Result<SemesterKey, CalcError> {
    let year = required_i64(params, "year")? as i32;
    let type_str = required_str(params, "semesterType")?;
    let semester_type = SemesterType::parse(&type_str)
        .ok_or_else(|| bad_params(format!("unknown semesterType {:?}", type_str)))?;
    Ok(SemesterKey {
        year,
        semester_type,
    })
}
