mod test_support;

use serde_json::json;
use test_support::{
    enroll_student, error_code, request_err, request_ok, seed_school, spawn_sidecar, temp_dir,
};

// Receipt scenario from the cashier desk: 150 000 total fees, a first
// installment of 50 000, the closing 100 000, then the closing payment is
// cancelled after a bounced cheque.
#[test]
fn record_then_cancel_replays_the_full_ledger() {
    let workspace = temp_dir("scolard-ledger-lifecycle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let (_student_id, enrollment_id) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Aminata",
        "Diallo",
        150_000.0,
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "payments.record",
        json!({ "enrollmentId": enrollment_id, "amount": 50_000.0, "method": "Espèces" }),
    );
    let receipt = first.get("receipt").expect("receipt");
    assert_eq!(receipt.get("paidAmount").and_then(|v| v.as_f64()), Some(50_000.0));
    assert_eq!(
        receipt.get("outstandingAmount").and_then(|v| v.as_f64()),
        Some(100_000.0)
    );
    assert_eq!(
        receipt.get("paymentStatus").and_then(|v| v.as_str()),
        Some("Partiel")
    );

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "payments.record",
        json!({ "enrollmentId": enrollment_id, "amount": 100_000.0, "method": "Chèque" }),
    );
    let receipt = second.get("receipt").expect("receipt");
    let closing_payment_id = receipt
        .get("paymentId")
        .and_then(|v| v.as_str())
        .expect("paymentId")
        .to_string();
    assert_eq!(
        receipt.get("paymentStatus").and_then(|v| v.as_str()),
        Some("À jour")
    );
    assert_eq!(receipt.get("outstandingAmount").and_then(|v| v.as_f64()), Some(0.0));

    let cancelled = request_ok(
        &mut stdin,
        &mut reader,
        "p3",
        "payments.cancel",
        json!({ "paymentId": closing_payment_id }),
    );
    let receipt = cancelled.get("receipt").expect("receipt");
    assert_eq!(receipt.get("paidAmount").and_then(|v| v.as_f64()), Some(50_000.0));
    assert_eq!(
        receipt.get("outstandingAmount").and_then(|v| v.as_f64()),
        Some(100_000.0)
    );
    assert_eq!(
        receipt.get("paymentStatus").and_then(|v| v.as_str()),
        Some("Partiel")
    );

    // The cancelled row stays in the history with its flipped status.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "p4",
        "payments.listForEnrollment",
        json!({ "enrollmentId": enrollment_id }),
    );
    let payments = listed
        .get("payments")
        .and_then(|v| v.as_array())
        .expect("payments");
    assert_eq!(payments.len(), 2);
    let statuses: Vec<&str> = payments
        .iter()
        .filter_map(|p| p.get("status").and_then(|v| v.as_str()))
        .collect();
    assert!(statuses.contains(&"Confirmé"));
    assert!(statuses.contains(&"Annulé"));

    // A second cancel of the same receipt has nothing left to cancel.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "p5",
        "payments.cancel",
        json!({ "paymentId": closing_payment_id }),
    );
    assert_eq!(error_code(&error), "not_found");
}

#[test]
fn payment_amount_must_be_positive() {
    let workspace = temp_dir("scolard-ledger-amount");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let (_student_id, enrollment_id) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Moussa",
        "Traoré",
        100_000.0,
    );

    for (rid, amount) in [("p1", 0.0), ("p2", -500.0)] {
        let error = request_err(
            &mut stdin,
            &mut reader,
            rid,
            "payments.record",
            json!({ "enrollmentId": enrollment_id, "amount": amount, "method": "Espèces" }),
        );
        assert_eq!(error_code(&error), "validation");
    }
}

#[test]
fn payments_are_refused_on_a_suspended_enrollment() {
    let workspace = temp_dir("scolard-ledger-suspended");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let (_student_id, enrollment_id) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Fatou",
        "Ndiaye",
        100_000.0,
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "enrollments.suspend",
        json!({ "enrollmentId": enrollment_id, "reason": "Impayés" }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "p1",
        "payments.record",
        json!({ "enrollmentId": enrollment_id, "amount": 10_000.0, "method": "Espèces" }),
    );
    assert_eq!(error_code(&error), "validation");
}

#[test]
fn balance_is_a_projection_of_confirmed_payments() {
    let workspace = temp_dir("scolard-ledger-balance");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let (_student_id, enrollment_id) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Oumar",
        "Sow",
        200_000.0,
    );

    for (rid, amount) in [("p1", 75_000.0), ("p2", 25_000.0)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            rid,
            "payments.record",
            json!({ "enrollmentId": enrollment_id, "amount": amount, "method": "Espèces" }),
        );
    }

    let balance = request_ok(
        &mut stdin,
        &mut reader,
        "b1",
        "payments.balance",
        json!({ "enrollmentId": enrollment_id }),
    );
    assert_eq!(balance.get("paidAmount").and_then(|v| v.as_f64()), Some(100_000.0));
    assert_eq!(
        balance.get("outstandingAmount").and_then(|v| v.as_f64()),
        Some(100_000.0)
    );
    assert_eq!(
        balance.get("paymentStatus").and_then(|v| v.as_str()),
        Some("Partiel")
    );
}

#[test]
fn backdated_last_payment_puts_the_account_in_arrears() {
    let workspace = temp_dir("scolard-ledger-arrears");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);

    // Enrollment and only payment both dated 90 days back, far past the
    // 30-day grace window.
    let old = (chrono::Utc::now().date_naive() - chrono::Duration::days(90))
        .format("%Y-%m-%d")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "st1",
        "students.create",
        json!({ "firstName": "Awa", "lastName": "Ba" }),
    );
    let student_id = student
        .get("student")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();
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
            "enrollmentDate": old,
            "initialPayment": { "amount": 50_000.0, "method": "Espèces", "paymentDate": old }
        }),
    );
    assert_eq!(
        enrolled
            .get("enrollment")
            .and_then(|v| v.get("paymentStatus"))
            .and_then(|v| v.as_str()),
        Some("En retard")
    );

    // A fresh installment restarts the grace clock.
    let enrollment_id = enrolled
        .get("enrollment")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("enrollment id")
        .to_string();
    let fresh = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "payments.record",
        json!({ "enrollmentId": enrollment_id, "amount": 25_000.0, "method": "Espèces" }),
    );
    assert_eq!(
        fresh
            .get("receipt")
            .and_then(|v| v.get("paymentStatus"))
            .and_then(|v| v.as_str()),
        Some("Partiel")
    );
}

#[test]
fn outstanding_report_lists_open_debtors_largest_first() {
    let workspace = temp_dir("scolard-ledger-outstanding");
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
        json!({ "enrollmentId": e1, "amount": 120_000.0, "method": "Espèces" }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "payments.outstanding",
        json!({ "yearId": seeded.year_id }),
    );
    let rows = report
        .get("outstanding")
        .and_then(|v| v.as_array())
        .expect("outstanding");
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0].get("outstandingAmount").and_then(|v| v.as_f64()),
        Some(100_000.0)
    );
    assert_eq!(
        rows[1].get("outstandingAmount").and_then(|v| v.as_f64()),
        Some(30_000.0)
    );
}
