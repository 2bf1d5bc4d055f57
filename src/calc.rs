use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::ingest::AttendanceRecord;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Half-up 2-decimal rounding used for every percentage the service reports:
/// `Int(100*x + 0.5) / 100`, matching the legacy report formatting.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// How a "below threshold" attendance figure is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivisorPolicy {
    /// Share of sessions attended among the sessions held so far.
    Present,
    /// Share of the whole semester attended, assuming every future session
    /// will be attended.
    Projected,
    /// Not a percentage: a row fails when its absences exceed the allowed
    /// maximum.
    Max,
}

impl DivisorPolicy {
    pub fn parse(s: &str) -> Option<DivisorPolicy> {
        match s.trim() {
            "Present" => Some(DivisorPolicy::Present),
            "Projected" => Some(DivisorPolicy::Projected),
            "Max" => Some(DivisorPolicy::Max),
            _ => None,
        }
    }
}

/// Total semester sessions for a row. Exports occasionally omit the column;
/// the timetable convention is 13 meetings per 2 credit units.
pub fn semester_session_count(rec: &AttendanceRecord) -> i64 {
    if rec.total_sessions > 0 {
        rec.total_sessions
    } else {
        (rec.credit_units / 2) * 13
    }
}

fn division_by_zero(rec: &AttendanceRecord, what: &str) -> CalcError {
    CalcError::new(
        "division_by_zero",
        format!(
            "{} is zero for NIM {} in {} {}",
            what, rec.nim, rec.course_code, rec.component
        ),
    )
}

/// Unrounded attendance so far: present sessions over sessions held.
pub fn present_percent(rec: &AttendanceRecord) -> Result<f64, CalcError> {
    if rec.sessions_done == 0 {
        return Err(division_by_zero(rec, "sessions done"));
    }
    Ok((1.0 - rec.total_absence as f64 / rec.sessions_done as f64) * 100.0)
}

/// Unrounded projected attendance: assumes every remaining session attended.
pub fn projected_percent(rec: &AttendanceRecord) -> Result<f64, CalcError> {
    let total = semester_session_count(rec);
    if total == 0 {
        return Err(division_by_zero(rec, "total semester sessions"));
    }
    Ok((1.0 - rec.total_absence as f64 / total as f64) * 100.0)
}

fn semester_percent(rec: &AttendanceRecord) -> Result<f64, CalcError> {
    let total = semester_session_count(rec);
    if total == 0 {
        return Err(division_by_zero(rec, "total semester sessions"));
    }
    let present = rec.sessions_done - rec.total_absence;
    Ok(present as f64 / total as f64 * 100.0)
}

/// Whether one row counts as "below threshold" under the given policy.
pub fn row_below_threshold(
    rec: &AttendanceRecord,
    policy: DivisorPolicy,
    threshold: f64,
) -> Result<bool, CalcError> {
    match policy {
        DivisorPolicy::Max => Ok(rec.total_absence > rec.max_absence),
        DivisorPolicy::Present => Ok(present_percent(rec)? < threshold),
        DivisorPolicy::Projected => Ok(projected_percent(rec)? < threshold),
    }
}

/// Per-student attendance over all of a student's rows, in first-seen order.
/// Absences and sessions are summed before dividing, so heavier courses weigh
/// more. `Max` has no percentage meaning here and is rejected.
pub fn student_attendance_percent(
    records: &[AttendanceRecord],
    policy: DivisorPolicy,
) -> Result<Vec<(i64, f64)>, CalcError> {
    if policy == DivisorPolicy::Max {
        return Err(CalcError::new(
            "invalid_data",
            "Invalid divisor for attendance calculation",
        ));
    }

    let mut order: Vec<i64> = Vec::new();
    let mut sums: HashMap<i64, (i64, i64)> = HashMap::new();
    for rec in records {
        let entry = sums.entry(rec.nim).or_insert_with(|| {
            order.push(rec.nim);
            (0, 0)
        });
        entry.0 += rec.total_absence;
        entry.1 += match policy {
            DivisorPolicy::Present => rec.sessions_done,
            DivisorPolicy::Projected => semester_session_count(rec),
            DivisorPolicy::Max => unreachable!(),
        };
    }

    let mut out = Vec::with_capacity(order.len());
    for nim in order {
        let (absence, denom) = sums[&nim];
        if denom == 0 {
            return Err(CalcError::new(
                "division_by_zero",
                format!("session total is zero for NIM {}", nim),
            ));
        }
        out.push((nim, (1.0 - absence as f64 / denom as f64) * 100.0));
    }
    Ok(out)
}

/// Distinct students in `records` whose row fails the threshold test.
pub fn failing_students(
    records: &[AttendanceRecord],
    policy: DivisorPolicy,
    threshold: f64,
) -> Result<HashSet<i64>, CalcError> {
    let mut failing = HashSet::new();
    for rec in records {
        if row_below_threshold(rec, policy, threshold)? {
            failing.insert(rec.nim);
        }
    }
    Ok(failing)
}

#[derive(Debug, Clone, Copy)]
pub struct EligibilityMark {
    pub eligible: bool,
    pub indirect_fail: bool,
}

/// Two-pass eligibility. Pass one is row-local: a row is eligible while its
/// absences stay within the allowed maximum. Pass two links the LEC and LAB
/// components of a course: failing either side fails both. Rows flipped by the
/// second pass carry `indirect_fail`; rows that already failed on their own do
/// not. Other components (EXL, BLK) and courses with only one of LEC/LAB are
/// never propagated.
pub fn eligibility_marks(records: &[AttendanceRecord]) -> Vec<EligibilityMark> {
    let mut marks: Vec<EligibilityMark> = records
        .iter()
        .map(|r| EligibilityMark {
            eligible: r.total_absence <= r.max_absence,
            indirect_fail: false,
        })
        .collect();

    let mut seen: HashMap<&str, (bool, bool)> = HashMap::new();
    for rec in records {
        let entry = seen.entry(rec.course_code.as_str()).or_insert((false, false));
        match rec.component.as_str() {
            "LEC" => entry.0 = true,
            "LAB" => entry.1 = true,
            _ => {}
        }
    }
    let linked: HashSet<&str> = seen
        .iter()
        .filter(|(_, &(lec, lab))| lec && lab)
        .map(|(&code, _)| code)
        .collect();

    let mut failed_pairs: HashSet<(i64, &str)> = HashSet::new();
    for (rec, mark) in records.iter().zip(marks.iter()) {
        if !mark.eligible
            && linked.contains(rec.course_code.as_str())
            && matches!(rec.component.as_str(), "LEC" | "LAB")
        {
            failed_pairs.insert((rec.nim, rec.course_code.as_str()));
        }
    }

    for (rec, mark) in records.iter().zip(marks.iter_mut()) {
        if matches!(rec.component.as_str(), "LEC" | "LAB")
            && failed_pairs.contains(&(rec.nim, rec.course_code.as_str()))
        {
            if mark.eligible {
                mark.indirect_fail = true;
            }
            mark.eligible = false;
        }
    }

    marks
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentCourseRow {
    pub nim: i64,
    pub name: String,
    pub major: String,
    pub course_code: String,
    pub course_name: String,
    pub class_section: String,
    pub component: String,
    pub total_semester_sessions: i64,
    pub sessions_done: i64,
    pub total_present: i64,
    pub attendance_pct: f64,
    pub attendance_semester_pct: f64,
    pub projected_attendance_pct: f64,
    pub eligible: bool,
    pub indirect_fail: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub nim: i64,
    pub name: String,
    pub major: String,
    pub enrolled_course_count: i64,
    pub failed_course_count: i64,
    pub failed_course_pct: f64,
}

/// One output row per stored record, in stored order, carrying the three
/// attendance figures and the final eligibility flags.
pub fn build_student_course_rows(
    records: &[AttendanceRecord],
) -> Result<Vec<StudentCourseRow>, CalcError> {
    let marks = eligibility_marks(records);

    let mut rows = Vec::with_capacity(records.len());
    for (rec, mark) in records.iter().zip(marks.iter()) {
        let present = rec.sessions_done - rec.total_absence;
        rows.push(StudentCourseRow {
            nim: rec.nim,
            name: rec.name.clone(),
            major: rec.major.clone(),
            course_code: rec.course_code.clone(),
            course_name: rec.course_name.clone(),
            class_section: rec.class_section.clone(),
            component: rec.component.clone(),
            total_semester_sessions: semester_session_count(rec),
            sessions_done: rec.sessions_done,
            total_present: present,
            attendance_pct: round_off_2_decimals(present_percent(rec)?),
            attendance_semester_pct: round_off_2_decimals(semester_percent(rec)?),
            projected_attendance_pct: round_off_2_decimals(projected_percent(rec)?),
            eligible: mark.eligible,
            indirect_fail: mark.indirect_fail,
        });
    }
    Ok(rows)
}

/// Collapses the per-course table per student: enrolled and failed counts go
/// by distinct course code, and a course counts as failed when any of its
/// components is ineligible. Students with no failed course are kept.
pub fn build_student_rows(rows: &[StudentCourseRow]) -> Result<Vec<StudentRow>, CalcError> {
    struct Acc {
        name: String,
        major: String,
        enrolled: HashSet<String>,
        failed: HashSet<String>,
    }

    let mut order: Vec<i64> = Vec::new();
    let mut by_nim: HashMap<i64, Acc> = HashMap::new();
    for row in rows {
        let acc = by_nim.entry(row.nim).or_insert_with(|| {
            order.push(row.nim);
            Acc {
                name: row.name.clone(),
                major: row.major.clone(),
                enrolled: HashSet::new(),
                failed: HashSet::new(),
            }
        });
        acc.enrolled.insert(row.course_code.clone());
        if !row.eligible {
            acc.failed.insert(row.course_code.clone());
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for nim in order {
        let acc = &by_nim[&nim];
        let enrolled = acc.enrolled.len() as i64;
        let failed = acc.failed.len() as i64;
        if enrolled == 0 {
            return Err(CalcError::new(
                "division_by_zero",
                format!("NIM {} has no enrolled courses", nim),
            ));
        }
        out.push(StudentRow {
            nim,
            name: acc.name.clone(),
            major: acc.major.clone(),
            enrolled_course_count: enrolled,
            failed_course_count: failed,
            failed_course_pct: round_off_2_decimals(failed as f64 / enrolled as f64 * 100.0),
        });
    }
    Ok(out)
}
