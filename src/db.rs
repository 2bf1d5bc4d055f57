use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use crate::calc::CalcError;
use crate::ingest::AttendanceRecord;
use crate::semester::{SemesterKey, SemesterType};
use crate::standing::{AdmissionRecord, BinusTerm, PdptTerm, ProgramStatus};

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("attendance.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            year INTEGER NOT NULL,
            semester_type TEXT NOT NULL,
            source_name TEXT,
            uploaded_at TEXT,
            UNIQUE(year, semester_type)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            semester_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            nim INTEGER NOT NULL,
            name TEXT NOT NULL,
            major TEXT NOT NULL,
            course_code TEXT NOT NULL,
            course_name TEXT NOT NULL,
            class_section TEXT NOT NULL,
            component TEXT NOT NULL,
            credit_units INTEGER NOT NULL,
            total_sessions INTEGER NOT NULL,
            sessions_done INTEGER NOT NULL,
            total_absence INTEGER NOT NULL,
            max_absence INTEGER NOT NULL,
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_semester ON attendance_records(semester_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_semester_seq ON attendance_records(semester_id, seq)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_nim ON attendance_records(nim)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_course ON attendance_records(course_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admission_records(
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            external_id TEXT NOT NULL,
            nim INTEGER NOT NULL,
            full_name TEXT NOT NULL,
            program TEXT NOT NULL,
            program_status TEXT NOT NULL,
            admit_term TEXT NOT NULL,
            intake_pdpt TEXT,
            student_type TEXT NOT NULL,
            total_scu INTEGER
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_admission_seq ON admission_records(seq)",
        [],
    )?;

    Ok(conn)
}

fn query_failed(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

fn update_failed(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_update_failed", e.to_string())
}

/// Resolves a semester key to its stored table. Exactly one match is
/// expected; zero is `not_found` and several is `ambiguous_state`.
pub fn find_semester_id(conn: &Connection, key: SemesterKey) -> Result<String, CalcError> {
    let mut stmt = conn
        .prepare("SELECT id FROM semesters WHERE year = ? AND semester_type = ?")
        .map_err(query_failed)?;
    let mut ids: Vec<String> = stmt
        .query_map((key.year, key.semester_type.as_str()), |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    match ids.len() {
        0 => Err(CalcError::new(
            "not_found",
            format!("no stored table for {}", key.label()),
        )),
        1 => Ok(ids.pop().unwrap()),
        n => Err(CalcError::new(
            "ambiguous_state",
            format!("{} stored tables found for {}", n, key.label()),
        )),
    }
}

/// Replaces a semester's table wholesale. The delete and the inserts share a
/// transaction, so a concurrent reader sees the old rows or the new rows but
/// never a mix.
pub fn replace_semester_table(
    conn: &Connection,
    key: SemesterKey,
    source_name: &str,
    records: &[AttendanceRecord],
) -> Result<(), CalcError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;

    let uploaded_at = chrono::Utc::now().to_rfc3339();
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM semesters WHERE year = ? AND semester_type = ?",
            (key.year, key.semester_type.as_str()),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let semester_id = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE semesters SET source_name = ?, uploaded_at = ? WHERE id = ?",
                (source_name, &uploaded_at, &id),
            )
            .map_err(update_failed)?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO semesters(id, year, semester_type, source_name, uploaded_at)
                 VALUES(?, ?, ?, ?, ?)",
                (&id, key.year, key.semester_type.as_str(), source_name, &uploaded_at),
            )
            .map_err(update_failed)?;
            id
        }
    };

    tx.execute(
        "DELETE FROM attendance_records WHERE semester_id = ?",
        [&semester_id],
    )
    .map_err(update_failed)?;

    {
        let mut insert = tx
            .prepare(
                "INSERT INTO attendance_records(
                    id, semester_id, seq, nim, name, major, course_code, course_name,
                    class_section, component, credit_units, total_sessions, sessions_done,
                    total_absence, max_absence)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .map_err(update_failed)?;
        for (seq, rec) in records.iter().enumerate() {
            insert
                .execute((
                    Uuid::new_v4().to_string(),
                    &semester_id,
                    seq as i64,
                    rec.nim,
                    &rec.name,
                    &rec.major,
                    &rec.course_code,
                    &rec.course_name,
                    &rec.class_section,
                    &rec.component,
                    rec.credit_units,
                    rec.total_sessions,
                    rec.sessions_done,
                    rec.total_absence,
                    rec.max_absence,
                ))
                .map_err(update_failed)?;
        }
    }

    tx.commit()
        .map_err(|e| CalcError::new("db_commit_failed", e.to_string()))
}

pub fn fetch_semester_rows(
    conn: &Connection,
    key: SemesterKey,
) -> Result<Vec<AttendanceRecord>, CalcError> {
    let semester_id = find_semester_id(conn, key)?;
    let mut stmt = conn
        .prepare(
            "SELECT nim, name, major, course_code, course_name, class_section, component,
                    credit_units, total_sessions, sessions_done, total_absence, max_absence
             FROM attendance_records
             WHERE semester_id = ?
             ORDER BY seq",
        )
        .map_err(query_failed)?;
    stmt.query_map([&semester_id], |r| {
        Ok(AttendanceRecord {
            nim: r.get(0)?,
            name: r.get(1)?,
            major: r.get(2)?,
            course_code: r.get(3)?,
            course_name: r.get(4)?,
            class_section: r.get(5)?,
            component: r.get(6)?,
            credit_units: r.get(7)?,
            total_sessions: r.get(8)?,
            sessions_done: r.get(9)?,
            total_absence: r.get(10)?,
            max_absence: r.get(11)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_failed)
}

/// All stored semester keys in chronological order.
pub fn list_semester_keys(conn: &Connection) -> Result<Vec<SemesterKey>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT year, semester_type FROM semesters")
        .map_err(query_failed)?;
    let raw: Vec<(i32, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let mut keys = Vec::with_capacity(raw.len());
    for (year, type_str) in raw {
        let semester_type = SemesterType::parse(&type_str).ok_or_else(|| {
            CalcError::new(
                "invalid_data",
                format!("stored semester has unknown type {:?}", type_str),
            )
        })?;
        keys.push(SemesterKey {
            year,
            semester_type,
        });
    }
    keys.sort();
    Ok(keys)
}

/// Every stored semester with its rows, in chronological order. The series
/// operations walk this.
pub fn fetch_all_semester_tables(
    conn: &Connection,
) -> Result<Vec<(SemesterKey, Vec<AttendanceRecord>)>, CalcError> {
    let keys = list_semester_keys(conn)?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let rows = fetch_semester_rows(conn, key)?;
        out.push((key, rows));
    }
    Ok(out)
}

/// Replaces the admission table wholesale, mirroring the per-semester
/// attendance swap.
pub fn replace_admission_records(
    conn: &Connection,
    records: &[AdmissionRecord],
) -> Result<(), CalcError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM admission_records", [])
        .map_err(update_failed)?;
    {
        let mut insert = tx
            .prepare(
                "INSERT INTO admission_records(
                    id, seq, external_id, nim, full_name, program, program_status,
                    admit_term, intake_pdpt, student_type, total_scu)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .map_err(update_failed)?;
        for (seq, rec) in records.iter().enumerate() {
            insert
                .execute((
                    Uuid::new_v4().to_string(),
                    seq as i64,
                    &rec.external_id,
                    rec.nim,
                    &rec.full_name,
                    &rec.program,
                    rec.program_status.as_str(),
                    rec.admit_term.encode(),
                    rec.intake_pdpt.map(|t| t.encode()),
                    &rec.student_type,
                    rec.total_scu,
                ))
                .map_err(update_failed)?;
        }
    }
    tx.commit()
        .map_err(|e| CalcError::new("db_commit_failed", e.to_string()))
}

pub fn fetch_admission_records(conn: &Connection) -> Result<Vec<AdmissionRecord>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT external_id, nim, full_name, program, program_status, admit_term,
                    intake_pdpt, student_type, total_scu
             FROM admission_records
             ORDER BY seq",
        )
        .map_err(query_failed)?;
    let raw: Vec<(
        String,
        i64,
        String,
        String,
        String,
        String,
        Option<String>,
        String,
        Option<i64>,
    )> = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
                r.get(7)?,
                r.get(8)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let mut out = Vec::with_capacity(raw.len());
    for (external_id, nim, full_name, program, status_str, admit_str, pdpt_str, student_type, total_scu) in raw
    {
        let program_status = ProgramStatus::parse(&status_str).ok_or_else(|| {
            CalcError::new(
                "invalid_data",
                format!("stored admission record has unknown status {:?}", status_str),
            )
        })?;
        let intake_pdpt = match pdpt_str {
            Some(s) => Some(PdptTerm::parse(&s)?),
            None => None,
        };
        out.push(AdmissionRecord {
            external_id,
            nim,
            full_name,
            program,
            program_status,
            admit_term: BinusTerm::parse(&admit_str)?,
            intake_pdpt,
            student_type,
            total_scu,
        });
    }
    Ok(out)
}
