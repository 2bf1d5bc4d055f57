
use serde_json::json;
use test_support::{fixture_path, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn aggregated_upload_normalizes_and_stores() {
    let workspace = temp_dir("attendanced-upload-aggregated");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ingest = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "upload.ingest",
        json!({
            "path": fixture_path("fixtures/attendance/Attendance Report 15-10-2024.csv")
                .to_string_lossy()
        }),
    );
    assert_eq!(ingest.get("year").and_then(|v| v.as_i64()), Some(2024));
    assert_eq!(
        ingest.get("semesterType").and_then(|v| v.as_str()),
        Some("Odd")
    );
    // Ten raw rows minus the excluded course, the non-degree major, and the
    // zero-session row.
    assert_eq!(ingest.get("rowCount").and_then(|v| v.as_i64()), Some(7));

    let listed = request_ok(&mut stdin, &mut reader, "3", "semesters.list", json!({}));
    let semesters = listed
        .get("semesters")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(semesters.len(), 1);
    assert_eq!(
        semesters[0].get("label").and_then(|v| v.as_str()),
        Some("Odd 2024")
    );

    let table = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "semesters.table",
        json!({ "year": 2024, "semesterType": "Odd" }),
    );
    let rows = table
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(rows.len(), 7);

    // The legacy Western encoding decoded correctly.
    assert!(rows
        .iter()
        .any(|r| r.get("name").and_then(|v| v.as_str()) == Some("Jos\u{e9} Tan")));
    // Major aliases merged, exclusions applied.
    let majors: Vec<&str> = rows
        .iter()
        .filter_map(|r| r.get("major").and_then(|v| v.as_str()))
        .collect();
    assert!(majors.contains(&"Fashion"));
    assert!(!majors.contains(&"Fashion Design"));
    assert!(!majors.contains(&"Non Degree Program"));
    assert!(!rows
        .iter()
        .any(|r| r.get("courseName").and_then(|v| v.as_str()) == Some("Excellence Program I")));
    assert!(!rows
        .iter()
        .any(|r| r.get("nim").and_then(|v| v.as_i64()) == Some(2305)));

    // Component and major filters on the stored view.
    let filtered = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "semesters.table",
        json!({ "year": 2024, "semesterType": "Odd", "filterComponent": "EXL" }),
    );
    assert_eq!(filtered.get("rowCount").and_then(|v| v.as_i64()), Some(6));

    let by_major = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "semesters.table",
        json!({ "year": 2024, "semesterType": "Odd", "majorContains": "fashion" }),
    );
    assert_eq!(by_major.get("rowCount").and_then(|v| v.as_i64()), Some(1));
}

#[test]
fn session_level_upload_collapses_per_component() {
    let workspace = temp_dir("attendanced-upload-session");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ingest = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "upload.ingest",
        json!({
            "path": fixture_path("fixtures/attendance/Session Export 05-11-2024.csv")
                .to_string_lossy(),
            "schema": "sessionLevel"
        }),
    );
    assert_eq!(ingest.get("rowCount").and_then(|v| v.as_i64()), Some(2));

    let table = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "semesters.table",
        json!({ "year": 2024, "semesterType": "Odd" }),
    );
    let rows = table
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let lec = rows
        .iter()
        .find(|r| r.get("component").and_then(|v| v.as_str()) == Some("LEC"))
        .expect("LEC row");
    assert_eq!(lec.get("sessionsDone").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(lec.get("totalAbsence").and_then(|v| v.as_i64()), Some(1));
    let lab = rows
        .iter()
        .find(|r| r.get("component").and_then(|v| v.as_str()) == Some("LAB"))
        .expect("LAB row");
    assert_eq!(lab.get("sessionsDone").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(lab.get("totalAbsence").and_then(|v| v.as_i64()), Some(0));
}

#[test]
fn bad_presence_code_rejects_the_upload() {
    let workspace = temp_dir("attendanced-upload-bad-code");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "upload.ingest",
        json!({
            "path": fixture_path("fixtures/attendance/Session Export Bad 06-11-2024.csv")
                .to_string_lossy(),
            "schema": "sessionLevel"
        }),
    );
    assert_eq!(code, "invalid_data");

    // Nothing was stored for the semester.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "semesters.table",
        json!({ "year": 2024, "semesterType": "Odd" }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn unparseable_upload_names_are_rejected() {
    let workspace = temp_dir("attendanced-upload-bad-name");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "upload.ingest",
        json!({
            "path": fixture_path("fixtures/attendance/Attendance Report 15-10-2024.csv")
                .to_string_lossy(),
            "fileName": "Attendance Report.csv"
        }),
    );
    assert_eq!(code, "invalid_filename");
}

#[test]
fn reupload_replaces_the_semester_wholesale() {
    let workspace = temp_dir("attendanced-upload-replace");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "upload.ingest",
        json!({
            "path": fixture_path("fixtures/attendance/Attendance Report 15-10-2024.csv")
                .to_string_lossy()
        }),
    );
    assert_eq!(first.get("rowCount").and_then(|v| v.as_i64()), Some(7));

    // Same semester key, different content: the session-level export lands
    // on Odd 2024 as well and must fully replace the previous table.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "upload.ingest",
        json!({
            "path": fixture_path("fixtures/attendance/Session Export 05-11-2024.csv")
                .to_string_lossy(),
            "schema": "sessionLevel"
        }),
    );
    assert_eq!(second.get("rowCount").and_then(|v| v.as_i64()), Some(2));

    let table = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "semesters.table",
        json!({ "year": 2024, "semesterType": "Odd" }),
    );
    assert_eq!(table.get("rowCount").and_then(|v| v.as_i64()), Some(2));
}
