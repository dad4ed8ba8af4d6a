mod test_support;

use serde_json::json;
use test_support::{
    enroll_student, error_code, request_err, request_ok, seed_school, spawn_sidecar, temp_dir,
};

#[test]
fn suspend_reactivate_complete_walk_the_status_machine() {
    let workspace = temp_dir("scolard-enroll-machine");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let (_s, enrollment_id) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Aminata",
        "Diallo",
        150_000.0,
    );

    let suspended = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "enrollments.suspend",
        json!({ "enrollmentId": enrollment_id, "reason": "Impayés" }),
    );
    let model = suspended.get("enrollment").expect("enrollment");
    assert_eq!(model.get("status").and_then(|v| v.as_str()), Some("Suspendu"));
    assert_eq!(
        model.get("statusReason").and_then(|v| v.as_str()),
        Some("Impayés")
    );

    // Suspendu -> Suspendu is not a legal move.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "t2",
        "enrollments.suspend",
        json!({ "enrollmentId": enrollment_id }),
    );
    assert_eq!(error_code(&error), "invalid_transition");

    let reactivated = request_ok(
        &mut stdin,
        &mut reader,
        "t3",
        "enrollments.reactivate",
        json!({ "enrollmentId": enrollment_id }),
    );
    assert_eq!(
        reactivated
            .get("enrollment")
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str()),
        Some("Actif")
    );

    let completed = request_ok(
        &mut stdin,
        &mut reader,
        "t4",
        "enrollments.complete",
        json!({ "enrollmentId": enrollment_id }),
    );
    let model = completed.get("enrollment").expect("enrollment");
    assert_eq!(model.get("status").and_then(|v| v.as_str()), Some("Terminé"));
    assert_eq!(
        model.get("statusReason").and_then(|v| v.as_str()),
        Some("Année terminée")
    );

    // Terminé is terminal.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "t5",
        "enrollments.reactivate",
        json!({ "enrollmentId": enrollment_id }),
    );
    assert_eq!(error_code(&error), "invalid_transition");
}

#[test]
fn one_open_enrollment_per_student_and_year() {
    let workspace = temp_dir("scolard-enroll-unique");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let (student_id, _e) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Moussa",
        "Traoré",
        150_000.0,
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "dup",
        "enrollments.enroll",
        json!({
            "studentId": student_id,
            "classId": seeded.class_id,
            "academicYearId": seeded.year_id,
            "totalFees": 150_000.0
        }),
    );
    assert_eq!(error_code(&error), "validation");
}

#[test]
fn transfer_closes_the_source_and_carries_the_balance() {
    let workspace = temp_dir("scolard-enroll-transfer");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let other_class = request_ok(
        &mut stdin,
        &mut reader,
        "class-b",
        "classes.create",
        json!({ "name": "6ème B", "yearId": seeded.year_id, "levelId": seeded.level_id }),
    );
    let other_class_id = other_class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let (student_id, enrollment_id) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Fatou",
        "Ndiaye",
        150_000.0,
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "payments.record",
        json!({ "enrollmentId": enrollment_id, "amount": 60_000.0, "method": "Espèces" }),
    );

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "tr",
        "enrollments.transfer",
        json!({ "enrollmentId": enrollment_id, "newClassId": other_class_id }),
    );
    let closed = outcome.get("closedEnrollment").expect("closed");
    assert_eq!(closed.get("status").and_then(|v| v.as_str()), Some("Transféré"));
    assert_eq!(
        closed.get("statusReason").and_then(|v| v.as_str()),
        Some("Transfert")
    );

    let fresh = outcome.get("newEnrollment").expect("new");
    assert_eq!(fresh.get("status").and_then(|v| v.as_str()), Some("Actif"));
    assert_eq!(
        fresh.get("classId").and_then(|v| v.as_str()),
        Some(other_class_id.as_str())
    );
    assert_eq!(fresh.get("paidAmount").and_then(|v| v.as_f64()), Some(60_000.0));
    assert_eq!(
        fresh.get("outstandingAmount").and_then(|v| v.as_f64()),
        Some(90_000.0)
    );

    // History keeps both rows for the student.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "hist",
        "enrollments.forStudent",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        listed
            .get("enrollments")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );
}

#[test]
fn transfer_moves_the_ledger_to_the_destination() {
    let workspace = temp_dir("scolard-transfer-ledger");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let other_class = request_ok(
        &mut stdin,
        &mut reader,
        "class-b",
        "classes.create",
        json!({ "name": "6ème B", "yearId": seeded.year_id, "levelId": seeded.level_id }),
    );
    let other_class_id = other_class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let (_s, enrollment_id) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Mariama",
        "Camara",
        150_000.0,
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "payments.record",
        json!({ "enrollmentId": enrollment_id, "amount": 60_000.0, "method": "Espèces" }),
    );

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "tr",
        "enrollments.transfer",
        json!({ "enrollmentId": enrollment_id, "newClassId": other_class_id }),
    );
    let new_enrollment_id = outcome
        .get("newEnrollment")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("new enrollment id")
        .to_string();

    // Replaying the destination's own payments reproduces the carried balance.
    let balance = request_ok(
        &mut stdin,
        &mut reader,
        "b1",
        "payments.balance",
        json!({ "enrollmentId": new_enrollment_id }),
    );
    assert_eq!(
        balance.get("paidAmount").and_then(|v| v.as_f64()),
        Some(60_000.0)
    );
    assert_eq!(
        balance.get("outstandingAmount").and_then(|v| v.as_f64()),
        Some(90_000.0)
    );

    // A payment after the transfer folds on top of the history.
    let receipt = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "payments.record",
        json!({ "enrollmentId": new_enrollment_id, "amount": 10_000.0, "method": "Espèces" }),
    );
    let receipt = receipt.get("receipt").expect("receipt");
    assert_eq!(
        receipt.get("paidAmount").and_then(|v| v.as_f64()),
        Some(70_000.0)
    );
    assert_eq!(
        receipt.get("outstandingAmount").and_then(|v| v.as_f64()),
        Some(80_000.0)
    );

    // The full ledger now lists under the destination enrollment.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "payments.listForEnrollment",
        json!({ "enrollmentId": new_enrollment_id }),
    );
    assert_eq!(
        listed
            .get("payments")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );
}

#[test]
fn transfer_refuses_same_class_and_other_years() {
    let workspace = temp_dir("scolard-enroll-transfer-bad");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let (_s, enrollment_id) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Oumar",
        "Sow",
        150_000.0,
    );

    let same = request_err(
        &mut stdin,
        &mut reader,
        "t1",
        "enrollments.transfer",
        json!({ "enrollmentId": enrollment_id, "newClassId": seeded.class_id }),
    );
    assert_eq!(error_code(&same), "validation");

    // A class hanging off a different academic year.
    let other_year = request_ok(
        &mut stdin,
        &mut reader,
        "y2",
        "years.create",
        json!({ "name": "2026-2027", "startDate": "2026-09-01", "endDate": "2027-06-30" }),
    );
    let other_year_id = other_year
        .get("yearId")
        .and_then(|v| v.as_str())
        .expect("yearId");
    let foreign_class = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "classes.create",
        json!({ "name": "5ème A", "yearId": other_year_id, "levelId": seeded.level_id }),
    );
    let foreign_class_id = foreign_class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId");

    let cross = request_err(
        &mut stdin,
        &mut reader,
        "t2",
        "enrollments.transfer",
        json!({ "enrollmentId": enrollment_id, "newClassId": foreign_class_id }),
    );
    assert_eq!(error_code(&cross), "cross_year_transfer");
}

#[test]
fn enroll_requires_the_class_to_belong_to_the_given_year() {
    let workspace = temp_dir("scolard-enroll-year-check");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let other_year = request_ok(
        &mut stdin,
        &mut reader,
        "y2",
        "years.create",
        json!({ "name": "2026-2027", "startDate": "2026-09-01", "endDate": "2027-06-30" }),
    );
    let other_year_id = other_year
        .get("yearId")
        .and_then(|v| v.as_str())
        .expect("yearId");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "students.create",
        json!({ "firstName": "Awa", "lastName": "Ba" }),
    );
    let student_id = student
        .get("student")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("id");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "e1",
        "enrollments.enroll",
        json!({
            "studentId": student_id,
            "classId": seeded.class_id,
            "academicYearId": other_year_id,
            "totalFees": 150_000.0
        }),
    );
    assert_eq!(error_code(&error), "validation");
}
