use std::collections::HashMap;

use serde::Serialize;

use crate::calc::CalcError;
use crate::codec;
use crate::standing::{AdmissionRecord, BinusTerm, PdptTerm, ProgramStatus};

/// Administrative courses that never carry credit and are dropped on ingest.
pub const EXCLUDED_COURSES: [&str; 4] = [
    "Excellence Program I",
    "English Plus Stage One",
    "English Plus Stage Two",
    "Academic Advisory",
];

pub const NON_DEGREE_MAJOR: &str = "Non Degree Program";

const AGGREGATED_COLUMNS: [&str; 12] = [
    "NIM",
    "NAME",
    "MAJOR",
    "COURSE CODE",
    "COURSE NAME",
    "CLASS",
    "COMPONENT",
    "SKS",
    "TOTAL SESSION",
    "SESSION DONE",
    "TOTAL ABSENCE",
    "MAX ABSENCE",
];

const SESSION_LEVEL_COLUMNS: [&str; 11] = [
    "NIM",
    "NAME",
    "MAJOR",
    "COURSE CODE",
    "COURSE NAME",
    "CLASS",
    "COMPONENT",
    "SKS",
    "TOTAL SESSION",
    "MAX ABSENCE",
    "PRESENT",
];

const ADMISSION_COLUMNS: [&str; 9] = [
    "EXTERNAL ID",
    "NIM",
    "FULL NAME",
    "PROGRAM",
    "STATUS",
    "ADMIT TERM",
    "PDPT INTAKE",
    "STUDENT TYPE",
    "TOTAL SCU",
];

/// Which shape the export carries. Selected once per upload; there is no
/// per-row column sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVariant {
    /// One row per student x course-component with absence counts.
    Aggregated,
    /// One row per held session with a Y/N presence flag; collapsed to the
    /// aggregated shape during ingestion.
    SessionLevel,
}

impl SchemaVariant {
    pub fn parse(s: &str) -> Option<SchemaVariant> {
        match s.trim() {
            "aggregated" => Some(SchemaVariant::Aggregated),
            "sessionLevel" => Some(SchemaVariant::SessionLevel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// The aggregated export can carry courses that have not met yet. By
    /// default those rows are dropped; session-level uploads cannot produce
    /// them.
    pub keep_zero_session_rows: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub nim: i64,
    pub name: String,
    pub major: String,
    pub course_code: String,
    pub course_name: String,
    pub class_section: String,
    pub component: String,
    pub credit_units: i64,
    pub total_sessions: i64,
    pub sessions_done: i64,
    pub total_absence: i64,
    pub max_absence: i64,
}

struct ColumnMap {
    idx: HashMap<String, usize>,
}

impl ColumnMap {
    fn require(headers: &csv::StringRecord, names: &[&str]) -> Result<ColumnMap, CalcError> {
        let mut idx = HashMap::new();
        for (i, h) in headers.iter().enumerate() {
            idx.insert(h.trim().to_string(), i);
        }
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| !idx.contains_key(*n))
            .collect();
        if !missing.is_empty() {
            return Err(CalcError::new(
                "invalid_data",
                format!(
                    "Required columns are missing from the CSV file: {}",
                    missing.join(", ")
                ),
            ));
        }
        Ok(ColumnMap { idx })
    }

    fn text(&self, row: &csv::StringRecord, name: &str) -> Result<String, CalcError> {
        let i = self.idx[name];
        row.get(i)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| CalcError::new("invalid_data", format!("row is missing {}", name)))
    }

    fn int(&self, row: &csv::StringRecord, name: &str) -> Result<i64, CalcError> {
        let raw = self.text(row, name)?;
        raw.parse::<i64>().map_err(|_| {
            CalcError::new(
                "invalid_data",
                format!("non-numeric {} value: {:?}", name, raw),
            )
        })
    }

    /// Like `int`, but an empty cell reads as zero. Used for TOTAL SESSION,
    /// which some exports leave blank when the timetable is not final.
    fn int_or_zero(&self, row: &csv::StringRecord, name: &str) -> Result<i64, CalcError> {
        let raw = self.text(row, name)?;
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse::<i64>().map_err(|_| {
            CalcError::new(
                "invalid_data",
                format!("non-numeric {} value: {:?}", name, raw),
            )
        })
    }
}

fn reader_for(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_reader(text.as_bytes())
}

fn canonical_major(major: String) -> String {
    // Fashion Design and Fashion Management report as one major.
    if major == "Fashion Design" || major == "Fashion Management" {
        "Fashion".to_string()
    } else {
        major
    }
}

fn row_is_kept(course_name: &str, major: &str) -> bool {
    !EXCLUDED_COURSES.contains(&course_name) && major != NON_DEGREE_MAJOR
}

/// Decodes and normalizes one attendance upload into stored records.
pub fn read_attendance_csv(
    bytes: &[u8],
    variant: SchemaVariant,
    opts: IngestOptions,
) -> Result<Vec<AttendanceRecord>, CalcError> {
    let text = codec::decode_windows_1252(bytes);
    match variant {
        SchemaVariant::Aggregated => read_aggregated(&text, opts),
        SchemaVariant::SessionLevel => read_session_level(&text),
    }
}

fn read_aggregated(text: &str, opts: IngestOptions) -> Result<Vec<AttendanceRecord>, CalcError> {
    let mut rdr = reader_for(text);
    let headers = rdr
        .headers()
        .map_err(|e| CalcError::new("invalid_data", e.to_string()))?
        .clone();
    let cols = ColumnMap::require(&headers, &AGGREGATED_COLUMNS)?;

    let mut out = Vec::new();
    for row in rdr.records() {
        let row = row.map_err(|e| CalcError::new("invalid_data", e.to_string()))?;
        let course_name = cols.text(&row, "COURSE NAME")?;
        let major = cols.text(&row, "MAJOR")?;
        if !row_is_kept(&course_name, &major) {
            continue;
        }
        let sessions_done = cols.int(&row, "SESSION DONE")?;
        if sessions_done == 0 && !opts.keep_zero_session_rows {
            continue;
        }
        out.push(AttendanceRecord {
            nim: cols.int(&row, "NIM")?,
            name: cols.text(&row, "NAME")?,
            major: canonical_major(major),
            course_code: cols.text(&row, "COURSE CODE")?,
            course_name,
            class_section: cols.text(&row, "CLASS")?,
            component: cols.text(&row, "COMPONENT")?,
            credit_units: cols.int(&row, "SKS")?,
            total_sessions: cols.int_or_zero(&row, "TOTAL SESSION")?,
            sessions_done,
            total_absence: cols.int(&row, "TOTAL ABSENCE")?,
            max_absence: cols.int(&row, "MAX ABSENCE")?,
        });
    }
    Ok(out)
}

fn read_session_level(text: &str) -> Result<Vec<AttendanceRecord>, CalcError> {
    let mut rdr = reader_for(text);
    let headers = rdr
        .headers()
        .map_err(|e| CalcError::new("invalid_data", e.to_string()))?
        .clone();
    let cols = ColumnMap::require(&headers, &SESSION_LEVEL_COLUMNS)?;

    let mut out: Vec<AttendanceRecord> = Vec::new();
    let mut group_of: HashMap<(i64, String, String), usize> = HashMap::new();
    for row in rdr.records() {
        let row = row.map_err(|e| CalcError::new("invalid_data", e.to_string()))?;
        let course_name = cols.text(&row, "COURSE NAME")?;
        let major = cols.text(&row, "MAJOR")?;
        if !row_is_kept(&course_name, &major) {
            continue;
        }

        let nim = cols.int(&row, "NIM")?;
        let course_code = cols.text(&row, "COURSE CODE")?;
        let component = cols.text(&row, "COMPONENT")?;
        let present = match cols.text(&row, "PRESENT")?.as_str() {
            "Y" => true,
            "N" => false,
            other => {
                return Err(CalcError::new(
                    "invalid_data",
                    format!(
                        "unrecognized presence code {:?} for NIM {} in {} {}",
                        other, nim, course_code, component
                    ),
                ))
            }
        };

        let key = (nim, course_code.clone(), component.clone());
        let idx = match group_of.get(&key).copied() {
            Some(i) => i,
            None => {
                out.push(AttendanceRecord {
                    nim,
                    name: cols.text(&row, "NAME")?,
                    major: canonical_major(major),
                    course_code,
                    course_name,
                    class_section: cols.text(&row, "CLASS")?,
                    component,
                    credit_units: cols.int(&row, "SKS")?,
                    total_sessions: cols.int_or_zero(&row, "TOTAL SESSION")?,
                    sessions_done: 0,
                    total_absence: 0,
                    max_absence: cols.int(&row, "MAX ABSENCE")?,
                });
                group_of.insert(key, out.len() - 1);
                out.len() - 1
            }
        };
        out[idx].sessions_done += 1;
        if !present {
            out[idx].total_absence += 1;
        }
    }
    Ok(out)
}

/// Re-encodes stored records to the export wire format: `;`-separated,
/// Windows-1252, canonical column order.
pub fn write_attendance_csv(records: &[AttendanceRecord]) -> Result<Vec<u8>, CalcError> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());
    wtr.write_record(AGGREGATED_COLUMNS)
        .map_err(|e| CalcError::new("invalid_data", e.to_string()))?;
    for rec in records {
        wtr.write_record([
            rec.nim.to_string(),
            rec.name.clone(),
            rec.major.clone(),
            rec.course_code.clone(),
            rec.course_name.clone(),
            rec.class_section.clone(),
            rec.component.clone(),
            rec.credit_units.to_string(),
            rec.total_sessions.to_string(),
            rec.sessions_done.to_string(),
            rec.total_absence.to_string(),
            rec.max_absence.to_string(),
        ])
        .map_err(|e| CalcError::new("invalid_data", e.to_string()))?;
    }
    let text = String::from_utf8(
        wtr.into_inner()
            .map_err(|e| CalcError::new("invalid_data", e.to_string()))?,
    )
    .map_err(|e| CalcError::new("invalid_data", e.to_string()))?;
    codec::encode_windows_1252(&text)
}

/// Decodes an admission upload. Rows whose status is neither AC nor LA are
/// dropped; `-` marks an absent PDPT intake and an empty TOTAL SCU is null.
pub fn read_admission_csv(bytes: &[u8]) -> Result<Vec<AdmissionRecord>, CalcError> {
    let text = codec::decode_windows_1252(bytes);
    let mut rdr = reader_for(&text);
    let headers = rdr
        .headers()
        .map_err(|e| CalcError::new("invalid_data", e.to_string()))?
        .clone();
    let cols = ColumnMap::require(&headers, &ADMISSION_COLUMNS)?;

    let mut out = Vec::new();
    for row in rdr.records() {
        let row = row.map_err(|e| CalcError::new("invalid_data", e.to_string()))?;
        let Some(program_status) = ProgramStatus::parse(&cols.text(&row, "STATUS")?) else {
            continue;
        };

        let intake_raw = cols.text(&row, "PDPT INTAKE")?;
        let intake_pdpt = if intake_raw.is_empty() || intake_raw == "-" {
            None
        } else {
            Some(PdptTerm::parse(&intake_raw)?)
        };

        let scu_raw = cols.text(&row, "TOTAL SCU")?;
        let total_scu = if scu_raw.is_empty() {
            None
        } else {
            Some(scu_raw.parse::<i64>().map_err(|_| {
                CalcError::new(
                    "invalid_data",
                    format!("non-numeric TOTAL SCU value: {:?}", scu_raw),
                )
            })?)
        };

        out.push(AdmissionRecord {
            external_id: cols.text(&row, "EXTERNAL ID")?,
            nim: cols.int(&row, "NIM")?,
            full_name: cols.text(&row, "FULL NAME")?,
            program: cols.text(&row, "PROGRAM")?,
            program_status,
            admit_term: BinusTerm::parse(&cols.text(&row, "ADMIT TERM")?)?,
            intake_pdpt,
            student_type: cols.text(&row, "STUDENT TYPE")?,
            total_scu,
        });
    }
    Ok(out)
}
