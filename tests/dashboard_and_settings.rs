mod test_support;

use serde_json::json;
use test_support::{enroll_student, request_ok, seed_school, spawn_sidecar, temp_dir};

#[test]
fn dashboard_stats_summarize_the_active_year() {
    let workspace = temp_dir("scolard-dashboard");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);

    let (_s1, e1) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Aminata",
        "Diallo",
        150_000.0,
    );
    let (_s2, _e2) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "b",
        "Moussa",
        "Traoré",
        100_000.0,
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "payments.record",
        json!({ "enrollmentId": e1, "amount": 150_000.0, "method": "Virement" }),
    );

    // No yearId: the active year is implied.
    let stats = request_ok(&mut stdin, &mut reader, "d1", "dashboard.stats", json!({}));
    assert_eq!(
        stats.get("yearId").and_then(|v| v.as_str()),
        Some(seeded.year_id.as_str())
    );
    assert_eq!(stats.get("totalStudents").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(stats.get("totalClasses").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(stats.get("totalPaid").and_then(|v| v.as_f64()), Some(150_000.0));
    assert_eq!(
        stats.get("totalOutstanding").and_then(|v| v.as_f64()),
        Some(100_000.0)
    );
    let counts = stats.get("paymentStatusCounts").expect("counts");
    assert_eq!(counts.get("À jour").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(counts.get("Partiel").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(counts.get("En retard").and_then(|v| v.as_i64()), Some(0));
}

#[test]
fn grace_days_setting_drives_the_payment_status() {
    let workspace = temp_dir("scolard-settings-grace");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);

    // With no grace at all, an enrollment dated yesterday with nothing paid
    // is already in arrears.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set",
        "settings.update",
        json!({ "key": "ledger.graceDays", "value": 0 }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "settings.get",
        json!({ "key": "ledger.graceDays" }),
    );
    assert_eq!(fetched.get("value").and_then(|v| v.as_i64()), Some(0));

    let yesterday = (chrono::Utc::now().date_naive() - chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "students.create",
        json!({ "firstName": "Fatou", "lastName": "Ndiaye" }),
    );
    let student_id = student
        .get("student")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("id");
    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "enrollments.enroll",
        json!({
            "studentId": student_id,
            "classId": seeded.class_id,
            "academicYearId": seeded.year_id,
            "totalFees": 150_000.0,
            "enrollmentDate": yesterday
        }),
    );
    assert_eq!(
        enrolled
            .get("enrollment")
            .and_then(|v| v.get("paymentStatus"))
            .and_then(|v| v.as_str()),
        Some("En retard")
    );
}
