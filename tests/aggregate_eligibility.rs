
use serde_json::json;
use test_support::{fixture_path, request_ok, spawn_sidecar, temp_dir};

fn find_row<'a>(
    rows: &'a [serde_json::Value],
    nim: i64,
    course: &str,
    component: &str,
) -> &'a serde_json::Value {
    rows.iter()
        .find(|r| {
            r.get("nim").and_then(|v| v.as_i64()) == Some(nim)
                && r.get("courseCode").and_then(|v| v.as_str()) == Some(course)
                && r.get("component").and_then(|v| v.as_str()) == Some(component)
        })
        .unwrap_or_else(|| panic!("no row for {} {} {}", nim, course, component))
}

fn setup(
    name: &str,
) -> (
    std::process::Child,
    std::process::ChildStdin,
    std::io::BufReader<std::process::ChildStdout>,
) {
    let workspace = temp_dir(name);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "upload.ingest",
        json!({
            "path": fixture_path("fixtures/attendance/Attendance Report 15-10-2024.csv")
                .to_string_lossy()
        }),
    );
    (child, stdin, reader)
}

#[test]
fn student_course_rows_carry_metrics_and_propagated_eligibility() {
    let (_child, mut stdin, mut reader) = setup("attendanced-aggregate-student-course-rows-carry-metrics-and-propagated-eligibility");

    let agg = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "aggregate.studentCourse",
        json!({ "year": 2024, "semesterType": "Odd" }),
    );
    let rows = agg
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(rows.len(), 7);

    // An eligible LEC dragged down by its failing LAB is an indirect fail.
    let lec = find_row(&rows, 2301, "CS101", "LEC");
    assert_eq!(lec.get("eligible").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        lec.get("indirectFail").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(lec.get("totalPresent").and_then(|v| v.as_i64()), Some(9));
    assert_eq!(
        lec.get("attendancePct").and_then(|v| v.as_f64()),
        Some(90.0)
    );
    assert_eq!(
        lec.get("attendanceSemesterPct").and_then(|v| v.as_f64()),
        Some(34.62)
    );
    assert_eq!(
        lec.get("projectedAttendancePct").and_then(|v| v.as_f64()),
        Some(96.15)
    );

    // The LAB failed on its own absences.
    let lab = find_row(&rows, 2301, "CS101", "LAB");
    assert_eq!(lab.get("eligible").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        lab.get("indirectFail").and_then(|v| v.as_bool()),
        Some(false)
    );

    // EXL fails alone and never propagates.
    let exl = find_row(&rows, 2301, "CS101", "EXL");
    assert_eq!(exl.get("eligible").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        exl.get("indirectFail").and_then(|v| v.as_bool()),
        Some(false)
    );
    let ma = find_row(&rows, 2301, "MA201", "LEC");
    assert_eq!(ma.get("eligible").and_then(|v| v.as_bool()), Some(true));

    // Both components failing directly: neither is an indirect fail.
    let lec2 = find_row(&rows, 2306, "CS101", "LEC");
    let lab2 = find_row(&rows, 2306, "CS101", "LAB");
    assert_eq!(lec2.get("eligible").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        lec2.get("indirectFail").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(lab2.get("eligible").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        lab2.get("indirectFail").and_then(|v| v.as_bool()),
        Some(false)
    );
}

#[test]
fn exl_filter_hides_rows_without_changing_eligibility() {
    let (_child, mut stdin, mut reader) = setup("attendanced-aggregate-exl-filter-hides-rows-without-changing-eligibility");

    let agg = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "aggregate.studentCourse",
        json!({ "year": 2024, "semesterType": "Odd", "filterExl": true }),
    );
    let rows = agg
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(rows.len(), 6);
    assert!(rows
        .iter()
        .all(|r| r.get("component").and_then(|v| v.as_str()) != Some("EXL")));

    // Propagation still computed over the full table.
    let lec = find_row(&rows, 2301, "CS101", "LEC");
    assert_eq!(
        lec.get("indirectFail").and_then(|v| v.as_bool()),
        Some(true)
    );
}

#[test]
fn student_aggregate_counts_distinct_courses() {
    let (_child, mut stdin, mut reader) = setup("attendanced-aggregate-student-aggregate-counts-distinct-courses");

    let agg = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "aggregate.student",
        json!({ "year": 2024, "semesterType": "Odd" }),
    );
    let rows = agg
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(rows.len(), 3);

    let by_nim = |nim: i64| {
        rows.iter()
            .find(|r| r.get("nim").and_then(|v| v.as_i64()) == Some(nim))
            .unwrap_or_else(|| panic!("no summary for {}", nim))
    };

    let jose = by_nim(2301);
    assert_eq!(
        jose.get("enrolledCourseCount").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        jose.get("failedCourseCount").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        jose.get("failedCoursePct").and_then(|v| v.as_f64()),
        Some(50.0)
    );

    // A clean record stays in the table.
    let budi = by_nim(2302);
    assert_eq!(
        budi.get("failedCourseCount").and_then(|v| v.as_i64()),
        Some(0)
    );
    assert_eq!(
        budi.get("failedCoursePct").and_then(|v| v.as_f64()),
        Some(0.0)
    );

    let fajar = by_nim(2306);
    assert_eq!(
        fajar.get("failedCoursePct").and_then(|v| v.as_f64()),
        Some(100.0)
    );
}

#[test]
fn aggregation_is_idempotent() {
    let (_child, mut stdin, mut reader) = setup("attendanced-aggregate-aggregation-is-idempotent");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "aggregate.studentCourse",
        json!({ "year": 2024, "semesterType": "Odd" }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "aggregate.studentCourse",
        json!({ "year": 2024, "semesterType": "Odd" }),
    );
    assert_eq!(first, second);

    let students_first = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "aggregate.student",
        json!({ "year": 2024, "semesterType": "Odd" }),
    );
    let students_second = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "aggregate.student",
        json!({ "year": 2024, "semesterType": "Odd" }),
    );
    assert_eq!(students_first, students_second);
}
