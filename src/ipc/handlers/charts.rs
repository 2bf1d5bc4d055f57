use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;

use crate::calc::{self, CalcError, DivisorPolicy};
use crate::db;
use crate::ingest::AttendanceRecord;
use crate::ipc::helpers::{
    optional_i64, required_f64, required_i64, required_str, semester_key, str_array, with_db,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueMode {
    Number,
    Percentage,
}

fn value_mode(params: &serde_json::Value) -> Result<ValueMode, CalcError> {
    let s = required_str(params, "value")?;
    match s.as_str() {
        "Number" => Ok(ValueMode::Number),
        "Percentage" => Ok(ValueMode::Percentage),
        _ => Err(CalcError::new(
            "bad_params",
            format!("value must be Number or Percentage, got {:?}", s),
        )),
    }
}

fn divisor(params: &serde_json::Value) -> Result<DivisorPolicy, CalcError> {
    let s = required_str(params, "divisor")?;
    DivisorPolicy::parse(&s)
        .ok_or_else(|| CalcError::new("bad_params", format!("unknown divisor {:?}", s)))
}

/// The threshold is meaningless under `Max`, so it may be omitted there.
fn threshold_for(params: &serde_json::Value, policy: DivisorPolicy) -> Result<f64, CalcError> {
    if policy == DivisorPolicy::Max {
        Ok(params
            .get("threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0))
    } else {
        required_f64(params, "threshold")
    }
}

fn ratio_value(mode: ValueMode, count: usize, total: usize) -> serde_json::Value {
    match mode {
        ValueMode::Number => json!(count),
        ValueMode::Percentage => {
            if total > 0 {
                json!(calc::round_off_2_decimals(count as f64 / total as f64 * 100.0))
            } else {
                json!(0.0)
            }
        }
    }
}

/// Students of one major split into below/above the attendance threshold.
fn attendance_pie(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let key = semester_key(params)?;
    let major = required_str(params, "major")?;
    let mode = value_mode(params)?;
    let policy = divisor(params)?;
    let threshold = required_f64(params, "threshold")?;

    let records: Vec<AttendanceRecord> = db::fetch_semester_rows(conn, key)?
        .into_iter()
        .filter(|r| r.major == major)
        .collect();
    let per_student = calc::student_attendance_percent(&records, policy)?;

    let below = per_student.iter().filter(|(_, pct)| *pct < threshold).count();
    let above = per_student.len() - below;
    let total = per_student.len();
    if mode == ValueMode::Percentage && total == 0 {
        return Err(CalcError::new(
            "division_by_zero",
            format!("no students found for major {:?} in {}", major, key.label()),
        ));
    }

    Ok(json!({
        "belowThreshold": ratio_value(mode, below, total),
        "aboveThreshold": ratio_value(mode, above, total),
    }))
}

/// Below-threshold students per major, bar-chart shaped. Majors with no
/// students in the table are omitted.
fn major_bars(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let key = semester_key(params)?;
    let majors = str_array(params, "majors")?;
    let mode = value_mode(params)?;
    let policy = divisor(params)?;
    let threshold = required_f64(params, "threshold")?;

    let wanted: HashSet<&str> = majors.iter().map(|s| s.as_str()).collect();
    let records: Vec<AttendanceRecord> = db::fetch_semester_rows(conn, key)?
        .into_iter()
        .filter(|r| wanted.contains(r.major.as_str()))
        .collect();
    let per_student = calc::student_attendance_percent(&records, policy)?;

    let mut results: Vec<serde_json::Value> = Vec::new();
    for major in &majors {
        let students: HashSet<i64> = records
            .iter()
            .filter(|r| &r.major == major)
            .map(|r| r.nim)
            .collect();
        if students.is_empty() {
            continue;
        }
        let below = per_student
            .iter()
            .filter(|(nim, pct)| students.contains(nim) && *pct < threshold)
            .count();
        results.push(json!({
            "major": major,
            "belowThreshold": ratio_value(mode, below, students.len()),
        }));
    }

    Ok(json!({ "results": results }))
}

/// Per semester, how many of one student's course rows fall below the
/// threshold. Semesters before the student first appears are trimmed, and
/// the series is windowed to the most recent N.
fn series_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let nim = required_i64(params, "nim")?;
    let policy = divisor(params)?;
    let threshold = threshold_for(params, policy)?;
    let max_semesters = optional_i64(params, "maxSemesters")?.unwrap_or(21);
    if max_semesters <= 0 {
        return Err(CalcError::new("bad_params", "maxSemesters must be positive"));
    }

    let tables = db::fetch_all_semester_tables(conn)?;
    let mut points: Vec<(String, i64)> = Vec::new();
    let mut not_enrolled: Vec<String> = Vec::new();
    let mut student_name: Option<String> = None;

    for (key, rows) in &tables {
        let label = key.label();
        let mine: Vec<&AttendanceRecord> = rows.iter().filter(|r| r.nim == nim).collect();
        if mine.is_empty() {
            points.push((label.clone(), 0));
            not_enrolled.push(label);
            continue;
        }
        if student_name.is_none() {
            student_name = Some(mine[0].name.clone());
        }
        let mut count = 0;
        for rec in mine {
            if calc::row_below_threshold(rec, policy, threshold)? {
                count += 1;
            }
        }
        points.push((label, count));
    }

    let Some(first_enrolled) = points.iter().position(|(l, _)| !not_enrolled.contains(l)) else {
        return Err(CalcError::new(
            "not_found",
            "Student not found in any semester.",
        ));
    };
    let mut kept = points.split_off(first_enrolled);
    if kept.len() > max_semesters as usize {
        kept.drain(..kept.len() - max_semesters as usize);
    }

    Ok(json!({
        "name": student_name,
        "notEnrolled": not_enrolled,
        "data": kept
            .iter()
            .map(|(semester, count)| json!({ "semester": semester, "count": count }))
            .collect::<Vec<_>>()
    }))
}

/// Per semester, failing students of one course split by component. LEC and
/// LAB are unioned by distinct student; EXL and BLK report on their own.
/// Components absent in a semester report N/A.
fn series_course(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, CalcError> {
    let course = required_str(params, "course")?;
    let mut components = str_array(params, "components")?;
    let mode = value_mode(params)?;
    let semester_count = required_i64(params, "semesterCount")?;
    if semester_count <= 0 {
        return Err(CalcError::new("bad_params", "semesterCount must be positive"));
    }
    let policy = divisor(params)?;
    let threshold = threshold_for(params, policy)?;

    if let Some(i) = components.iter().position(|c| c == "LEC/LAB") {
        components.remove(i);
        components.push("LEC".to_string());
        components.push("LAB".to_string());
    }
    for c in &components {
        if !matches!(c.as_str(), "LEC" | "LAB" | "EXL" | "BLK") {
            return Err(CalcError::new(
                "bad_params",
                format!("unknown component {:?}", c),
            ));
        }
    }

    let tables = db::fetch_all_semester_tables(conn)?;
    let mut entries: Vec<(String, serde_json::Value, Option<serde_json::Value>, Option<serde_json::Value>)> =
        Vec::new();
    let mut course_name: Option<String> = None;
    let mut course_has_lab = false;
    let mut any_found = false;

    for (key, rows) in &tables {
        let course_rows: Vec<&AttendanceRecord> =
            rows.iter().filter(|r| r.course_code == course).collect();

        let mut lec_lab_failing: HashSet<i64> = HashSet::new();
        let mut lec_lab_total: Option<usize> = None;
        let mut exl_value: Option<serde_json::Value> = None;
        let mut blk_value: Option<serde_json::Value> = None;

        for component in &components {
            let comp_rows: Vec<AttendanceRecord> = course_rows
                .iter()
                .filter(|r| &r.component == component)
                .map(|r| (*r).clone())
                .collect();
            if comp_rows.is_empty() {
                continue;
            }
            any_found = true;
            if component == "LAB" {
                course_has_lab = true;
            }
            if course_name.is_none() {
                course_name = Some(comp_rows[0].course_name.clone());
            }

            let failing = calc::failing_students(&comp_rows, policy, threshold)?;
            let total: usize = comp_rows
                .iter()
                .map(|r| r.nim)
                .collect::<HashSet<_>>()
                .len();

            if component == "LEC" || component == "LAB" {
                if lec_lab_total.is_none() {
                    lec_lab_total = Some(total);
                }
                lec_lab_failing.extend(failing);
            } else {
                let v = ratio_value(mode, failing.len(), total);
                if component == "EXL" {
                    exl_value = Some(v);
                } else {
                    blk_value = Some(v);
                }
            }
        }

        let lec_lab_value = match lec_lab_total {
            None => json!("N/A"),
            Some(total) => ratio_value(mode, lec_lab_failing.len(), total),
        };
        entries.push((key.label(), lec_lab_value, exl_value, blk_value));
    }

    if !any_found {
        return Err(CalcError::new(
            "not_found",
            "Course not found in any semester.",
        ));
    }

    if entries.len() > semester_count as usize {
        entries.drain(..entries.len() - semester_count as usize);
    }

    let wants_lec_lab = components.iter().any(|c| c == "LEC");
    let wants_exl = components.iter().any(|c| c == "EXL");
    let wants_blk = components.iter().any(|c| c == "BLK");
    let data: Vec<serde_json::Value> = entries
        .into_iter()
        .map(|(semester, lec_lab, exl, blk)| {
            let mut points: Vec<serde_json::Value> = Vec::new();
            if wants_lec_lab {
                points.push(json!({
                    "component": if course_has_lab { "LEC/LAB" } else { "LEC" },
                    "count": lec_lab
                }));
            }
            if wants_exl {
                points.push(json!({ "component": "EXL", "count": exl.unwrap_or(json!("N/A")) }));
            }
            if wants_blk {
                points.push(json!({ "component": "BLK", "count": blk.unwrap_or(json!("N/A")) }));
            }
            json!({ "semester": semester, "data": points })
        })
        .collect();

    Ok(json!({ "name": course_name, "data": data }))
}

/// One student x course x component across semesters: present-session count
/// or attendance percentage. Leading semesters before the first enrollment
/// are trimmed out of the window.
fn series_student_course(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, CalcError> {
    let nim = required_i64(params, "nim")?;
    let course = required_str(params, "course")?;
    let component = required_str(params, "component")?;
    let mode = value_mode(params)?;
    let max_semesters = required_i64(params, "maxSemesters")?;
    if max_semesters <= 0 {
        return Err(CalcError::new("bad_params", "maxSemesters must be positive"));
    }

    let tables = db::fetch_all_semester_tables(conn)?;
    let mut results: Vec<(String, serde_json::Value)> = Vec::new();
    let mut not_enrolled: Vec<String> = Vec::new();
    let mut course_name: Option<String> = None;
    let mut student_name: Option<String> = None;

    for (key, rows) in &tables {
        let label = key.label();
        let row = rows
            .iter()
            .find(|r| r.nim == nim && r.course_code == course && r.component == component);
        let Some(rec) = row else {
            results.push((label.clone(), json!(0)));
            not_enrolled.push(label);
            continue;
        };
        if course_name.is_none() {
            course_name = Some(rec.course_name.clone());
            student_name = Some(rec.name.clone());
        }
        let present = rec.sessions_done - rec.total_absence;
        let value = match mode {
            ValueMode::Number => json!(present),
            ValueMode::Percentage => {
                if rec.sessions_done == 0 {
                    return Err(CalcError::new(
                        "division_by_zero",
                        format!("sessions done is zero for NIM {} in {}", nim, label),
                    ));
                }
                json!(calc::round_off_2_decimals(
                    present as f64 / rec.sessions_done as f64 * 100.0
                ))
            }
        };
        results.push((label, value));
    }

    let Some(first_enrolled) = results.iter().position(|(l, _)| !not_enrolled.contains(l)) else {
        return Err(CalcError::new(
            "not_found",
            "Course and student combination not found in any semester.",
        ));
    };

    let mut start = results.len().saturating_sub(max_semesters as usize);
    while start < results.len() && start < first_enrolled && not_enrolled.contains(&results[start].0)
    {
        let label = results[start].0.clone();
        not_enrolled.retain(|l| *l != label);
        start += 1;
    }

    Ok(json!({
        "courseName": course_name,
        "studentName": student_name,
        "notEnrolled": not_enrolled,
        "data": results[start..]
            .iter()
            .map(|(semester, count)| json!({ "semester": semester, "count": count }))
            .collect::<Vec<_>>()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "charts.attendancePie" => Some(with_db(state, req, attendance_pie)),
        "charts.majorBars" => Some(with_db(state, req, major_bars)),
        "series.student" => Some(with_db(state, req, series_student)),
        "series.course" => Some(with_db(state, req, series_course)),
        "series.studentCourse" => Some(with_db(state, req, series_student_course)),
        _ => None,
    }
}
