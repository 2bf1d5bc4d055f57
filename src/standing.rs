use serde::Serialize;

use crate::calc::CalcError;

/// Credit floor a student must keep after deduction to stay on the normal
/// track at an evaluation point.
const MIN_CONTINUING_SCU: i64 = 42;

/// Half of an academic year. The first period covers the odd semester, the
/// second covers the even and compact semesters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    First,
    Second,
}

impl Period {
    pub fn digit(self) -> u8 {
        match self {
            Period::First => 1,
            Period::Second => 2,
        }
    }

    pub fn from_digit(d: u8) -> Option<Period> {
        match d {
            1 => Some(Period::First),
            2 => Some(Period::Second),
            _ => None,
        }
    }
}

/// A calendar-neutral point in time: one period of one academic year. Both
/// term encodings convert to this for arithmetic and comparison, so no digit
/// slicing happens outside the two parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TermPoint {
    pub year: i32,
    pub period: Period,
}

impl TermPoint {
    pub fn plus_years(self, n: i32) -> TermPoint {
        TermPoint {
            year: self.year + n,
            period: self.period,
        }
    }

    pub fn next_period(self) -> TermPoint {
        match self.period {
            Period::First => TermPoint {
                year: self.year,
                period: Period::Second,
            },
            Period::Second => TermPoint {
                year: self.year + 1,
                period: Period::First,
            },
        }
    }
}

fn split_term_code(s: &str, calendar: &str) -> Result<(i32, u8, u8), CalcError> {
    let bad = || {
        CalcError::new(
            "invalid_data",
            format!("malformed {} term code: {:?}", calendar, s),
        )
    };
    let (year_part, digits) = s.trim().split_once('.').ok_or_else(bad)?;
    let year = year_part.parse::<i32>().map_err(|_| bad())?;
    let d: Vec<u8> = digits
        .chars()
        .map(|c| c.to_digit(10).map(|v| v as u8))
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(bad)?;
    if d.len() != 2 {
        return Err(bad());
    }
    Ok((year, d[0], d[1]))
}

/// Native term code, written `YYYY.1P`: the first fraction digit is a fixed
/// marker and the second carries the period. `2020.11` is the first period of
/// 2020, `2020.12` the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinusTerm(TermPoint);

impl BinusTerm {
    pub fn parse(s: &str) -> Result<BinusTerm, CalcError> {
        let (year, d1, d2) = split_term_code(s, "Binus")?;
        let period = if d1 == 1 { Period::from_digit(d2) } else { None };
        let period = period.ok_or_else(|| {
            CalcError::new(
                "invalid_data",
                format!("malformed Binus term code: {:?}", s),
            )
        })?;
        Ok(BinusTerm(TermPoint { year, period }))
    }

    pub fn from_point(p: TermPoint) -> BinusTerm {
        BinusTerm(p)
    }

    pub fn point(self) -> TermPoint {
        self.0
    }

    pub fn encode(self) -> String {
        format!("{}.1{}", self.0.year, self.0.period.digit())
    }
}

/// National PDPT term code, written `YYYY.P1`: the period moves to the first
/// fraction digit. `2020.11` is the first period of 2020, `2020.21` the
/// second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdptTerm(TermPoint);

impl PdptTerm {
    pub fn parse(s: &str) -> Result<PdptTerm, CalcError> {
        let (year, d1, d2) = split_term_code(s, "PDPT")?;
        let period = if d2 == 1 { Period::from_digit(d1) } else { None };
        let period = period.ok_or_else(|| {
            CalcError::new(
                "invalid_data",
                format!("malformed PDPT term code: {:?}", s),
            )
        })?;
        Ok(PdptTerm(TermPoint { year, period }))
    }

    pub fn from_point(p: TermPoint) -> PdptTerm {
        PdptTerm(p)
    }

    pub fn point(self) -> TermPoint {
        self.0
    }

    pub fn encode(self) -> String {
        format!("{}.{}1", self.0.year, self.0.period.digit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStatus {
    Active,
    LeaveOfAbsence,
}

impl ProgramStatus {
    pub fn parse(s: &str) -> Option<ProgramStatus> {
        match s.trim() {
            "AC" => Some(ProgramStatus::Active),
            "LA" => Some(ProgramStatus::LeaveOfAbsence),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProgramStatus::Active => "AC",
            ProgramStatus::LeaveOfAbsence => "LA",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionRecord {
    pub external_id: String,
    pub nim: i64,
    pub full_name: String,
    pub program: String,
    pub program_status: ProgramStatus,
    pub admit_term: BinusTerm,
    pub intake_pdpt: Option<PdptTerm>,
    pub student_type: String,
    pub total_scu: Option<i64>,
}

/// The three study-period limits: the base maximum, then one and two
/// extension periods past it.
#[derive(Debug, Clone, Copy)]
pub struct StudyDeadlines {
    pub base: TermPoint,
    pub first_extension: TermPoint,
    pub second_extension: TermPoint,
}

pub fn study_deadlines(admit: TermPoint) -> StudyDeadlines {
    let base = admit.plus_years(3);
    let first_extension = base.next_period();
    let second_extension = first_extension.next_period();
    StudyDeadlines {
        base,
        first_extension,
        second_extension,
    }
}

/// Credits withheld from the recorded SCU before rule evaluation. Leave
/// semesters earn nothing, so LA records lose a full period's worth (16) when
/// the evaluation lands on their admit period and half that one period off;
/// active low-credit students with a PDPT intake lose half a period on an
/// exact period match.
pub fn scu_deduction(rec: &AdmissionRecord, eval: TermPoint) -> i64 {
    let offset = if rec.admit_term.point().period == eval.period {
        0
    } else {
        1
    };
    match rec.program_status {
        ProgramStatus::LeaveOfAbsence => {
            if offset == 0 {
                16
            } else {
                8
            }
        }
        ProgramStatus::Active => {
            let low_credit = rec.total_scu.map(|s| s < MIN_CONTINUING_SCU).unwrap_or(false);
            if rec.intake_pdpt.is_some() && low_credit && offset == 0 {
                8
            } else {
                0
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionClassification {
    pub external_id: String,
    pub nim: i64,
    pub full_name: String,
    pub program: String,
    pub program_status: String,
    pub student_type: String,
    pub total_scu: Option<i64>,
    pub deducted_scu: Option<i64>,
    pub action: String,
    pub base_max_study_period: String,
    pub first_extension: String,
    pub second_extension: String,
    pub base_max_study_period_pdpt: Option<String>,
    pub first_extension_pdpt: Option<String>,
    pub second_extension_pdpt: Option<String>,
}

fn stage_label(eval: TermPoint, deadlines: &StudyDeadlines, meets: Option<bool>) -> Option<&'static str> {
    if eval == deadlines.base {
        return Some(match meets {
            None => "DO depends on SCU in this period",
            Some(true) => "Confirm with operation",
            Some(false) => "Recommend for resignation",
        });
    }
    if eval == deadlines.first_extension {
        return Some(if meets == Some(true) {
            "1st Extension"
        } else {
            "Recommend for resignation"
        });
    }
    if eval == deadlines.second_extension {
        return Some(if meets == Some(true) {
            "2nd Extension"
        } else {
            "Add to DO list"
        });
    }
    if eval > deadlines.second_extension {
        return Some("Add to DO list");
    }
    None
}

/// Classifies one record against an evaluation period. First match wins: the
/// PDPT deadlines are checked before the native ones, and within a calendar
/// the base limit is checked before the extensions. Records whose evaluation
/// falls before every limit produce no row. Records without a PDPT intake can
/// only be matched on the native calendar and their label says so.
pub fn classify(rec: &AdmissionRecord, eval: TermPoint) -> Option<ActionClassification> {
    let deduction = scu_deduction(rec, eval);
    let deducted_scu = rec.total_scu.map(|s| s - deduction);
    let meets = deducted_scu.map(|s| s >= MIN_CONTINUING_SCU);

    let binus = study_deadlines(rec.admit_term.point());
    let pdpt = rec.intake_pdpt.map(|t| study_deadlines(t.point()));

    let action = if let Some(label) = pdpt.as_ref().and_then(|d| stage_label(eval, d, meets)) {
        format!("{} (PDPT)", label)
    } else if let Some(label) = stage_label(eval, &binus, meets) {
        if rec.intake_pdpt.is_some() {
            label.to_string()
        } else {
            format!("{} (confirm with operation)", label)
        }
    } else {
        return None;
    };

    Some(ActionClassification {
        external_id: rec.external_id.clone(),
        nim: rec.nim,
        full_name: rec.full_name.clone(),
        program: rec.program.clone(),
        program_status: rec.program_status.as_str().to_string(),
        student_type: rec.student_type.clone(),
        total_scu: rec.total_scu,
        deducted_scu,
        action,
        base_max_study_period: BinusTerm::from_point(binus.base).encode(),
        first_extension: BinusTerm::from_point(binus.first_extension).encode(),
        second_extension: BinusTerm::from_point(binus.second_extension).encode(),
        base_max_study_period_pdpt: pdpt.map(|d| PdptTerm::from_point(d.base).encode()),
        first_extension_pdpt: pdpt.map(|d| PdptTerm::from_point(d.first_extension).encode()),
        second_extension_pdpt: pdpt.map(|d| PdptTerm::from_point(d.second_extension).encode()),
    })
}

pub fn classify_admission_batch(
    records: &[AdmissionRecord],
    eval: TermPoint,
) -> Vec<ActionClassification> {
    records.iter().filter_map(|r| classify(r, eval)).collect()
}
