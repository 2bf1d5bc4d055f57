use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::calc::CalcError;

/// Academic semester kind. Odd runs Sept-Jan, Even Feb-June, Compact July-Aug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SemesterType {
    Odd,
    Even,
    Compact,
}

impl SemesterType {
    pub fn rank(self) -> u8 {
        match self {
            SemesterType::Odd => 1,
            SemesterType::Even => 2,
            SemesterType::Compact => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SemesterType::Odd => "Odd",
            SemesterType::Even => "Even",
            SemesterType::Compact => "Compact",
        }
    }

    pub fn parse(s: &str) -> Option<SemesterType> {
        match s.trim() {
            "Odd" => Some(SemesterType::Odd),
            "Even" => Some(SemesterType::Even),
            "Compact" => Some(SemesterType::Compact),
            _ => None,
        }
    }
}

impl fmt::Display for SemesterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one stored attendance table. The year is the academic year the
/// semester belongs to, so a January or July export counts toward the previous
/// calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemesterKey {
    pub year: i32,
    pub semester_type: SemesterType,
}

impl SemesterKey {
    pub fn label(&self) -> String {
        format!("{} {}", self.semester_type, self.year)
    }
}

impl Ord for SemesterKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.year, self.semester_type.rank()).cmp(&(other.year, other.semester_type.rank()))
    }
}

impl PartialOrd for SemesterKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn semester_type_for_month(month: u32) -> Option<SemesterType> {
    match month {
        9..=12 | 1 => Some(SemesterType::Odd),
        2..=6 => Some(SemesterType::Even),
        7 | 8 => Some(SemesterType::Compact),
        _ => None,
    }
}

/// Derives the semester key from an upload name such as
/// `Attendance Report 15-10-2024.csv`: the last space-separated token carries
/// a DD-MM-YYYY date, optionally prefixed with a dash.
pub fn key_for_upload_filename(name: &str) -> Result<SemesterKey, CalcError> {
    let last = name.rsplit(' ').next().unwrap_or(name);

    let lower = last.to_ascii_lowercase();
    let date_part = if lower.ends_with(".csv") {
        &last[..last.len() - 4]
    } else {
        return Err(CalcError::new(
            "invalid_filename",
            format!("upload name does not end in .csv: {}", name),
        ));
    };
    let date_part = date_part.trim_start_matches('-');

    let mut it = date_part.split('-');
    let (day, month, mut year) = match (it.next(), it.next(), it.next(), it.next()) {
        (Some(d), Some(m), Some(y), None) => {
            let parse = |s: &str, what: &str| {
                s.parse::<i64>().map_err(|_| {
                    CalcError::new(
                        "invalid_filename",
                        format!("non-numeric {} in upload name: {}", what, name),
                    )
                })
            };
            (parse(d, "day")?, parse(m, "month")?, parse(y, "year")?)
        }
        _ => {
            return Err(CalcError::new(
                "invalid_filename",
                format!("upload name does not carry a DD-MM-YYYY date: {}", name),
            ))
        }
    };

    if NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32).is_none() {
        return Err(CalcError::new(
            "invalid_filename",
            format!("upload name carries an impossible date: {}", name),
        ));
    }

    // January and the mid-year months belong to the academic year that started
    // the previous September.
    if month < 9 {
        year -= 1;
    }

    let semester_type = semester_type_for_month(month as u32).ok_or_else(|| {
        CalcError::new(
            "invalid_filename",
            format!("no semester maps to month {} in upload name: {}", month, name),
        )
    })?;

    Ok(SemesterKey {
        year: year as i32,
        semester_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chronological_order_cycles_odd_even_compact() {
        let odd = SemesterKey {
            year: 2024,
            semester_type: SemesterType::Odd,
        };
        let even = SemesterKey {
            year: 2024,
            semester_type: SemesterType::Even,
        };
        let compact = SemesterKey {
            year: 2024,
            semester_type: SemesterType::Compact,
        };
        let next_odd = SemesterKey {
            year: 2025,
            semester_type: SemesterType::Odd,
        };
        assert!(odd < even);
        assert!(even < compact);
        assert!(compact < next_odd);
    }

    #[test]
    fn filename_in_october_keeps_its_year() {
        let key = key_for_upload_filename("Attendance Report 15-10-2024.csv").expect("parse");
        assert_eq!(key.year, 2024);
        assert_eq!(key.semester_type, SemesterType::Odd);
    }

    #[test]
    fn filename_in_january_belongs_to_previous_year() {
        let key = key_for_upload_filename("Mockdata Attendance 24.2 sd 11-01-2018.csv")
            .expect("parse");
        assert_eq!(key.year, 2017);
        assert_eq!(key.semester_type, SemesterType::Odd);
    }

    #[test]
    fn filename_in_july_is_compact() {
        let key = key_for_upload_filename("Export 20-07-2025.csv").expect("parse");
        assert_eq!(key.year, 2024);
        assert_eq!(key.semester_type, SemesterType::Compact);
    }

    #[test]
    fn filename_with_dash_prefix_parses() {
        let key = key_for_upload_filename("Export -15-10-2024.csv").expect("parse");
        assert_eq!(key.year, 2024);
    }

    #[test]
    fn bad_filenames_are_rejected() {
        for name in [
            "Export.csv",
            "Export 2024-10-15.csv",
            "Export 31-02-2024.csv",
            "Export 15-10-2024.txt",
        ] {
            let err = key_for_upload_filename(name).expect_err("should fail");
            assert_eq!(err.code, "invalid_filename", "{}", name);
        }
    }
}
