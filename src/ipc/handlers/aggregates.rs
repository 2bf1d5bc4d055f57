use rusqlite::Connection;
use serde_json::json;

use crate::calc::{self, CalcError};
use crate::db;
use crate::ipc::helpers::{bool_flag, semester_key, with_db};
use crate::ipc::types::{AppState, Request};

/// Per student x course x component, in stored order. Eligibility is computed
/// over the full table before any display filtering, so an EXL filter cannot
/// change which LEC/LAB rows fail.
fn aggregate_student_course(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, CalcError> {
    let key = semester_key(params)?;
    let filter_exl = bool_flag(params, "filterExl")?;

    let records = db::fetch_semester_rows(conn, key)?;
    let mut rows = calc::build_student_course_rows(&records)?;
    if filter_exl {
        rows.retain(|r| r.component != "EXL");
    }

    Ok(json!({
        "rowCount": rows.len(),
        "rows": serde_json::to_value(&rows)
            .map_err(|e| CalcError::new("invalid_data", e.to_string()))?
    }))
}

fn aggregate_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, CalcError> {
    let key = semester_key(params)?;
    let records = db::fetch_semester_rows(conn, key)?;
    let course_rows = calc::build_student_course_rows(&records)?;
    let rows = calc::build_student_rows(&course_rows)?;

    Ok(json!({
        "rowCount": rows.len(),
        "rows": serde_json::to_value(&rows)
            .map_err(|e| CalcError::new("invalid_data", e.to_string()))?
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "aggregate.studentCourse" => Some(with_db(state, req, aggregate_student_course)),
        "aggregate.student" => Some(with_db(state, req, aggregate_student)),
        _ => None,
    }
}
