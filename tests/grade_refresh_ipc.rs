use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_pecheckd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn pecheckd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

struct Fixture {
    student_id: String,
    section_id: String,
    semester_id: String,
}

/// Opens a workspace, seeds one enrolled student in a section with the given
/// attendance thresholds, and leaves the admin session open.
fn setup(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
    min_attendance: i64,
    max_attendance: i64,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(stdin, reader, "s2", "session.open", json!({ "userId": "admin" }));

    let student = request_ok(
        stdin,
        reader,
        "s3",
        "users.create",
        json!({
            "firstName": "Ivan",
            "lastName": "Petrov",
            "email": "i.petrov@grade.test",
            "role": "student"
        }),
    );
    let semester = request_ok(
        stdin,
        reader,
        "s4",
        "semesters.create",
        json!({
            "name": "Spring 2026",
            "startDate": "2026-02-01",
            "endDate": "2026-05-31"
        }),
    );
    let section = request_ok(
        stdin,
        reader,
        "s5",
        "sections.create",
        json!({
            "name": "Basketball",
            "capacity": 15,
            "minAttendanceForGrade": min_attendance,
            "maxAttendance": max_attendance
        }),
    );

    let fixture = Fixture {
        student_id: student["user"]["id"].as_str().expect("student id").to_string(),
        section_id: section["section"]["id"].as_str().expect("section id").to_string(),
        semester_id: semester["semester"]["id"]
            .as_str()
            .expect("semester id")
            .to_string(),
    };
    let _ = request_ok(
        stdin,
        reader,
        "s6",
        "enrollments.enroll",
        json!({
            "studentId": fixture.student_id,
            "sectionId": fixture.section_id,
            "semesterId": fixture.semester_id
        }),
    );
    fixture
}

#[test]
fn attendance_and_normatives_drive_the_stored_final_grade() {
    let workspace = temp_dir("pecheck-grade-refresh");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    // min 0, max 20: every present day is worth 2 points above the base 60.
    let f = setup(&mut stdin, &mut reader, &workspace, 0, 20);

    let recorded = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.record",
        json!({
            "studentId": f.student_id,
            "sectionId": f.section_id,
            "semesterId": f.semester_id,
            "date": "2026-02-02",
            "present": true
        }),
    );
    assert_eq!(recorded["finalGrade"].as_f64(), Some(62.0));
    let present_attendance_id = recorded["attendance"]["id"]
        .as_str()
        .expect("attendance id")
        .to_string();

    // An absence is recorded but does not move the grade.
    let absent = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.record",
        json!({
            "studentId": f.student_id,
            "sectionId": f.section_id,
            "semesterId": f.semester_id,
            "date": "2026-02-04",
            "present": false
        }),
    );
    assert_eq!(absent["finalGrade"].as_f64(), Some(62.0));

    let normative = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "normatives.create",
        json!({ "sectionId": f.section_id, "name": "Free throws" }),
    );
    let normative_id = normative["normative"]["id"]
        .as_str()
        .expect("normative id")
        .to_string();

    // 62 * 0.7 + 80 * 0.3 rounds to 67.4.
    let with_result = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "normatives.recordResult",
        json!({
            "studentId": f.student_id,
            "sectionId": f.section_id,
            "semesterId": f.semester_id,
            "normativeId": normative_id,
            "result": "8/10",
            "grade": 80.0
        }),
    );
    assert_eq!(with_result["finalGrade"].as_f64(), Some(67.4));
    let result_id = with_result["result"]["id"]
        .as_str()
        .expect("result id")
        .to_string();

    // Removing the result falls back to the pure attendance grade.
    let without_result = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "normatives.deleteResult",
        json!({ "resultId": result_id }),
    );
    assert_eq!(without_result["finalGrade"].as_f64(), Some(62.0));

    // Removing the present day leaves zero attendance, which with min 0
    // still sits at the base of the above-minimum curve.
    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.delete",
        json!({ "attendanceId": present_attendance_id }),
    );
    assert_eq!(deleted["finalGrade"].as_f64(), Some(60.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn below_minimum_attendance_scales_proportionally_toward_sixty() {
    let workspace = temp_dir("pecheck-grade-below-min");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let f = setup(&mut stdin, &mut reader, &workspace, 10, 20);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.record",
        json!({
            "studentId": f.student_id,
            "sectionId": f.section_id,
            "semesterId": f.semester_id,
            "date": "2026-02-02",
            "present": true
        }),
    );
    // 1 of 10 required days: 60 * 1/10.
    assert_eq!(first["finalGrade"].as_f64(), Some(6.0));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.record",
        json!({
            "studentId": f.student_id,
            "sectionId": f.section_id,
            "semesterId": f.semester_id,
            "date": "2026-02-09",
            "present": true
        }),
    );
    assert_eq!(second["finalGrade"].as_f64(), Some(12.0));

    let refreshed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.refreshGrade",
        json!({
            "studentId": f.student_id,
            "sectionId": f.section_id,
            "semesterId": f.semester_id
        }),
    );
    assert_eq!(refreshed["finalGrade"].as_f64(), Some(12.0));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.listBySection",
        json!({ "sectionId": f.section_id }),
    );
    let rows = listed["enrollments"].as_array().expect("enrollments");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["finalGrade"].as_f64(), Some(12.0));
    assert_eq!(rows[0]["attendanceCount"].as_i64(), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
