use rusqlite::Connection;
use serde_json::json;
use std::path::Path;

use crate::calc::CalcError;
use crate::db;
use crate::ingest::{self, IngestOptions, SchemaVariant};
use crate::ipc::helpers::{bool_flag, optional_str, required_str, semester_key, with_db};
use crate::ipc::types::{AppState, Request};
use crate::semester;

fn upload_ingest(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let path = required_str(params, "path")?;
    let file_name = match optional_str(params, "fileName")? {
        Some(name) => name,
        None => Path::new(&path)
            .file_name()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| CalcError::new("bad_params", "params.path has no file name"))?,
    };
    let variant = match optional_str(params, "schema")? {
        None => SchemaVariant::Aggregated,
        Some(s) => SchemaVariant::parse(&s)
            .ok_or_else(|| CalcError::new("bad_params", format!("unknown schema {:?}", s)))?,
    };
    let opts = IngestOptions {
        keep_zero_session_rows: bool_flag(params, "keepZeroSessionRows")?,
    };

    let key = semester::key_for_upload_filename(&file_name)?;
    let bytes = std::fs::read(&path).map_err(|e| {
        CalcError::new("file_read_failed", format!("cannot read {}: {}", path, e))
    })?;
    let records = ingest::read_attendance_csv(&bytes, variant, opts)?;
    db::replace_semester_table(conn, key, &file_name, &records)?;

    Ok(json!({
        "year": key.year,
        "semesterType": key.semester_type.as_str(),
        "rowCount": records.len()
    }))
}

fn semesters_list(conn: &Connection) -> Result<serde_json::Value, CalcError> {
    let keys = db::list_semester_keys(conn)?;
    let semesters: Vec<serde_json::Value> = keys
        .iter()
        .map(|k| {
            json!({
                "year": k.year,
                "semesterType": k.semester_type.as_str(),
                "label": k.label()
            })
        })
        .collect();
    Ok(json!({ "semesters": semesters }))
}

fn semesters_table(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let key = semester_key(params)?;
    let filter_component = optional_str(params, "filterComponent")?;
    let major_contains = optional_str(params, "majorContains")?.map(|s| s.to_lowercase());

    let mut rows = db::fetch_semester_rows(conn, key)?;
    if let Some(component) = filter_component {
        rows.retain(|r| r.component != component);
    }
    if let Some(term) = major_contains {
        rows.retain(|r| r.major.to_lowercase().contains(&term));
    }

    Ok(json!({
        "rowCount": rows.len(),
        "rows": serde_json::to_value(&rows)
            .map_err(|e| CalcError::new("invalid_data", e.to_string()))?
    }))
}

fn semesters_export(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let key = semester_key(params)?;
    let out_path = required_str(params, "outPath")?;
    let rows = db::fetch_semester_rows(conn, key)?;
    let bytes = ingest::write_attendance_csv(&rows)?;
    std::fs::write(&out_path, &bytes).map_err(|e| {
        CalcError::new("file_write_failed", format!("cannot write {}: {}", out_path, e))
    })?;
    Ok(json!({ "path": out_path, "byteCount": bytes.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "upload.ingest" => Some(with_db(state, req, upload_ingest)),
        "semesters.list" => Some(with_db(state, req, |c, _| semesters_list(c))),
        "semesters.table" => Some(with_db(state, req, semesters_table)),
        "semesters.export" => Some(with_db(state, req, semesters_export)),
        _ => None,
    }
}
