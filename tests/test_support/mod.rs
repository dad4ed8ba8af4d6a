#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_scolard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn scolard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error payload")
}

pub fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).expect("code")
}

/// Ids created by [`seed_school`]: one year with one period, one level with
/// two subjects assigned, one class.
pub struct Seeded {
    pub year_id: String,
    pub period_id: String,
    pub level_id: String,
    pub math_id: String,
    pub french_id: String,
    pub class_id: String,
}

fn result_id(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, result))
        .to_string()
}

/// Seeds a minimal school over the wire, the same way the desk application
/// would on first run. Math has coefficient 4, French 3.
pub fn seed_school(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Seeded {
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let year = request_ok(
        stdin,
        reader,
        "seed-year",
        "years.create",
        json!({ "name": "2025-2026", "startDate": "2025-09-01", "endDate": "2026-06-30" }),
    );
    let year_id = result_id(&year, "yearId");
    let _ = request_ok(
        stdin,
        reader,
        "seed-activate",
        "years.activate",
        json!({ "yearId": year_id }),
    );
    let period = request_ok(
        stdin,
        reader,
        "seed-period",
        "periods.create",
        json!({
            "yearId": year_id,
            "name": "Trimestre 1",
            "orderNumber": 1,
            "startDate": "2025-09-01",
            "endDate": "2025-12-15"
        }),
    );
    let period_id = result_id(&period, "periodId");
    let level = request_ok(
        stdin,
        reader,
        "seed-level",
        "levels.create",
        json!({ "name": "6ème", "orderNumber": 1, "annualFees": 150000.0 }),
    );
    let level_id = result_id(&level, "levelId");
    let math = request_ok(
        stdin,
        reader,
        "seed-math",
        "subjects.create",
        json!({ "name": "Mathématiques", "coefficient": 4.0 }),
    );
    let math_id = result_id(&math, "subjectId");
    let french = request_ok(
        stdin,
        reader,
        "seed-french",
        "subjects.create",
        json!({ "name": "Français", "coefficient": 3.0 }),
    );
    let french_id = result_id(&french, "subjectId");
    for (rid, subject) in [("seed-asn-m", &math_id), ("seed-asn-f", &french_id)] {
        let _ = request_ok(
            stdin,
            reader,
            rid,
            "subjects.assignLevel",
            json!({ "subjectId": subject, "levelId": level_id }),
        );
    }
    let class = request_ok(
        stdin,
        reader,
        "seed-class",
        "classes.create",
        json!({ "name": "6ème A", "yearId": year_id, "levelId": level_id }),
    );
    let class_id = result_id(&class, "classId");

    Seeded {
        year_id,
        period_id,
        level_id,
        math_id,
        french_id,
        class_id,
    }
}

/// Creates a student and an active enrollment in the seeded class.
pub fn enroll_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    seeded: &Seeded,
    tag: &str,
    first_name: &str,
    last_name: &str,
    total_fees: f64,
) -> (String, String) {
    let student = request_ok(
        stdin,
        reader,
        &format!("student-{}", tag),
        "students.create",
        json!({ "firstName": first_name, "lastName": last_name }),
    );
    let student_id = student
        .get("student")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();
    let enrollment = request_ok(
        stdin,
        reader,
        &format!("enroll-{}", tag),
        "enrollments.enroll",
        json!({
            "studentId": student_id,
            "classId": seeded.class_id,
            "academicYearId": seeded.year_id,
            "totalFees": total_fees
        }),
    );
    let enrollment_id = enrollment
        .get("enrollment")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("enrollment id")
        .to_string();
    (student_id, enrollment_id)
}
