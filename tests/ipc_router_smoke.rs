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

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("pecheck-router-smoke");
    let restored = temp_dir("pecheck-router-smoke-restored");
    let bundle_out = workspace.join("smoke-backup.pecheck.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.open",
        json!({ "userId": "admin" }),
    );

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({
            "firstName": "Tamara",
            "lastName": "Orlova",
            "email": "t.orlova@smoke.test",
            "role": "teacher"
        }),
    );
    let teacher_id = teacher["user"]["id"].as_str().expect("teacher id").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.create",
        json!({
            "firstName": "Pavel",
            "lastName": "Smirnov",
            "email": "p.smirnov@smoke.test",
            "role": "student"
        }),
    );
    let student_id = student["user"]["id"].as_str().expect("student id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "users.list",
        json!({ "role": "student" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6b",
        "users.update",
        json!({ "userId": student_id, "lastName": "Smirnov-Petrov" }),
    );

    let semester = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "semesters.create",
        json!({
            "name": "Fall 2026",
            "startDate": "2026-09-01",
            "endDate": "2026-12-20"
        }),
    );
    let semester_id = semester["semester"]["id"]
        .as_str()
        .expect("semester id")
        .to_string();
    let _ = request_ok(&mut stdin, &mut reader, "8", "semesters.list", json!({}));

    let section = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "sections.create",
        json!({
            "name": "Swimming",
            "teacherId": teacher_id,
            "capacity": 20,
            "cost": 120.0,
            "minAttendanceForGrade": 0,
            "maxAttendance": 20
        }),
    );
    let section_id = section["section"]["id"].as_str().expect("section id").to_string();
    let _ = request_ok(&mut stdin, &mut reader, "10", "sections.list", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "sections.get",
        json!({ "sectionId": section_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "sections.schedule.set",
        json!({
            "sectionId": section_id,
            "entries": [
                { "dayOfWeek": 1, "startTime": "18:00", "endTime": "19:30", "location": "Pool A" }
            ]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "sections.schedule.list",
        json!({ "sectionId": section_id }),
    );

    let normative = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "normatives.create",
        json!({ "sectionId": section_id, "name": "100m freestyle" }),
    );
    let normative_id = normative["normative"]["id"]
        .as_str()
        .expect("normative id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "normatives.list",
        json!({ "sectionId": section_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "enrollments.enroll",
        json!({
            "studentId": student_id,
            "sectionId": section_id,
            "semesterId": semester_id
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "enrollments.listBySection",
        json!({ "sectionId": section_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "enrollments.listByStudent",
        json!({ "studentId": student_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "attendance.record",
        json!({
            "studentId": student_id,
            "sectionId": section_id,
            "semesterId": semester_id,
            "date": "2026-09-07",
            "present": true
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "attendance.list",
        json!({ "sectionId": section_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "normatives.recordResult",
        json!({
            "studentId": student_id,
            "sectionId": section_id,
            "semesterId": semester_id,
            "normativeId": normative_id,
            "result": "1:25",
            "grade": 80.0
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "normatives.listResults",
        json!({
            "studentId": student_id,
            "sectionId": section_id,
            "semesterId": semester_id
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "23",
        "payments.record",
        json!({
            "studentId": student_id,
            "sectionId": section_id,
            "semesterId": semester_id,
            "amount": 120.0,
            "paid": true
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "24",
        "payments.list",
        json!({ "sectionId": section_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "25",
        "stats.section",
        json!({ "sectionId": section_id, "semesterId": semester_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "26",
        "stats.student",
        json!({ "studentId": student_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "27",
        "stats.semester",
        json!({ "semesterId": semester_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "28",
        "enrollments.refreshGrade",
        json!({
            "studentId": student_id,
            "sectionId": section_id,
            "semesterId": semester_id
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "29",
        "backup.export",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "30",
        "backup.import",
        json!({
            "bundlePath": bundle_out.to_string_lossy(),
            "workspacePath": restored.to_string_lossy()
        }),
    );
    // Import drops the session with the old database handle.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "31",
        "session.open",
        json!({ "userId": "admin" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "32", "sections.list", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "33", "session.close", json!({}));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(restored);
}
