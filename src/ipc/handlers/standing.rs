use rusqlite::Connection;
use serde_json::json;

use crate::calc::CalcError;
use crate::db;
use crate::ingest;
use crate::ipc::helpers::{required_i64, required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::standing::{self, Period, TermPoint};

fn standing_ingest(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let path = required_str(params, "path")?;
    let bytes = std::fs::read(&path).map_err(|e| {
        CalcError::new("file_read_failed", format!("cannot read {}: {}", path, e))
    })?;
    let records = ingest::read_admission_csv(&bytes)?;
    db::replace_admission_records(conn, &records)?;
    Ok(json!({ "rowCount": records.len() }))
}

fn standing_classify(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let year = required_i64(params, "year")? as i32;
    let period_digit = required_i64(params, "period")?;
    let period = u8::try_from(period_digit)
        .ok()
        .and_then(Period::from_digit)
        .ok_or_else(|| CalcError::new("bad_params", "period must be 1 or 2"))?;
    let eval = TermPoint { year, period };

    let records = db::fetch_admission_records(conn)?;
    let rows = standing::classify_admission_batch(&records, eval);

    Ok(json!({
        "rowCount": rows.len(),
        "rows": serde_json::to_value(&rows)
            .map_err(|e| CalcError::new("invalid_data", e.to_string()))?
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "standing.ingest" => Some(with_db(state, req, standing_ingest)),
        "standing.classify" => Some(with_db(state, req, standing_classify)),
        _ => None,
    }
}
