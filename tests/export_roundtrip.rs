
use serde_json::json;
use test_support::{fixture_path, request_ok, spawn_sidecar, temp_dir};

#[test]
fn exported_tables_round_trip_byte_for_byte() {
    let workspace = temp_dir("attendanced-export");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

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

    let first_path = workspace.join("export-1.csv");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "semesters.export",
        json!({
            "year": 2024,
            "semesterType": "Odd",
            "outPath": first_path.to_string_lossy()
        }),
    );
    let byte_count = exported.get("byteCount").and_then(|v| v.as_u64()).unwrap();
    let first_bytes = std::fs::read(&first_path).expect("read export");
    assert_eq!(first_bytes.len() as u64, byte_count);

    // The wire encoding is the legacy single-byte one: the accented name
    // comes back as its 1252 byte, not as UTF-8.
    assert!(first_bytes.windows(4).any(|w| w == b"Jos\xe9"));

    // Ingesting our own export and exporting again must reproduce the bytes.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "upload.ingest",
        json!({
            "path": first_path.to_string_lossy(),
            "fileName": "Attendance Report 15-10-2024.csv"
        }),
    );
    let second_path = workspace.join("export-2.csv");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "semesters.export",
        json!({
            "year": 2024,
            "semesterType": "Odd",
            "outPath": second_path.to_string_lossy()
        }),
    );
    let second_bytes = std::fs::read(&second_path).expect("read second export");
    assert_eq!(first_bytes, second_bytes);
}
