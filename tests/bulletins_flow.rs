mod test_support;

use serde_json::json;
use test_support::{
    enroll_student, error_code, request_err, request_ok, seed_school, spawn_sidecar, temp_dir,
};

fn record_math_grade(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    rid: &str,
    seeded: &test_support::Seeded,
    student_id: &str,
    grade: f64,
) {
    let _ = request_ok(
        stdin,
        reader,
        rid,
        "grades.record",
        json!({
            "studentId": student_id,
            "subjectId": seeded.math_id,
            "classId": seeded.class_id,
            "periodId": seeded.period_id,
            "grade": grade,
            "evaluationType": "Composition",
            "evaluationDate": "2025-11-20"
        }),
    );
}

#[test]
fn bulletin_snapshots_average_rank_and_roster_size() {
    let workspace = temp_dir("scolard-bulletin-generate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);

    let mut first_student = String::new();
    for (i, (tag, first, last, grade)) in [
        ("a", "Aminata", "Diallo", 16.0),
        ("b", "Moussa", "Traoré", 12.0),
        ("c", "Fatou", "Ndiaye", 9.0),
    ]
    .into_iter()
    .enumerate()
    {
        let (student_id, _e) =
            enroll_student(&mut stdin, &mut reader, &seeded, tag, first, last, 150_000.0);
        record_math_grade(
            &mut stdin,
            &mut reader,
            &format!("g-{}", tag),
            &seeded,
            &student_id,
            grade,
        );
        if i == 0 {
            first_student = student_id;
        }
    }

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "gen",
        "bulletins.generate",
        json!({
            "studentId": first_student,
            "classId": seeded.class_id,
            "periodId": seeded.period_id,
            "conductGrade": "Très bien",
            "teacherComment": "Excellent trimestre"
        }),
    );
    let bulletin = generated.get("bulletin").expect("bulletin");
    assert_eq!(
        bulletin.get("generalAverage").and_then(|v| v.as_f64()),
        Some(16.0)
    );
    assert_eq!(bulletin.get("classRank").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        bulletin.get("totalStudents").and_then(|v| v.as_i64()),
        Some(3)
    );
    assert_eq!(
        bulletin.get("sentToParents").and_then(|v| v.as_bool()),
        Some(false)
    );

    // Regeneration after more grades lands on the same row.
    let bulletin_id = bulletin
        .get("id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();
    record_math_grade(&mut stdin, &mut reader, "g-more", &seeded, &first_student, 10.0);
    let regenerated = request_ok(
        &mut stdin,
        &mut reader,
        "regen",
        "bulletins.generate",
        json!({
            "studentId": first_student,
            "classId": seeded.class_id,
            "periodId": seeded.period_id
        }),
    );
    let second = regenerated.get("bulletin").expect("bulletin");
    assert_eq!(
        second.get("id").and_then(|v| v.as_str()),
        Some(bulletin_id.as_str())
    );
    assert_eq!(
        second.get("generalAverage").and_then(|v| v.as_f64()),
        Some(13.0)
    );
}

#[test]
fn sent_bulletins_are_frozen() {
    let workspace = temp_dir("scolard-bulletin-frozen");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);
    let (student_id, _e) = enroll_student(
        &mut stdin,
        &mut reader,
        &seeded,
        "a",
        "Oumar",
        "Sow",
        150_000.0,
    );
    record_math_grade(&mut stdin, &mut reader, "g1", &seeded, &student_id, 14.0);

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "gen",
        "bulletins.generate",
        json!({
            "studentId": student_id,
            "classId": seeded.class_id,
            "periodId": seeded.period_id
        }),
    );
    let bulletin_id = generated
        .get("bulletin")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();

    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "send",
        "bulletins.markSent",
        json!({ "bulletinId": bulletin_id }),
    );
    assert_eq!(
        sent.get("bulletin")
            .and_then(|v| v.get("sentToParents"))
            .and_then(|v| v.as_bool()),
        Some(true)
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "regen",
        "bulletins.generate",
        json!({
            "studentId": student_id,
            "classId": seeded.class_id,
            "periodId": seeded.period_id
        }),
    );
    assert_eq!(error_code(&error), "validation");

    // The frozen snapshot is still readable.
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "bulletins.get",
        json!({ "studentId": student_id, "periodId": seeded.period_id }),
    );
    assert_eq!(
        fetched
            .get("bulletin")
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_str()),
        Some(bulletin_id.as_str())
    );
}

#[test]
fn bulletins_need_an_open_enrollment_and_some_grades() {
    let workspace = temp_dir("scolard-bulletin-eligibility");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_school(&mut stdin, &mut reader, &workspace);

    // A student never enrolled in the class.
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "students.create",
        json!({ "firstName": "Awa", "lastName": "Ba" }),
    );
    let outsider = student
        .get("student")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("id");
    let error = request_err(
        &mut stdin,
        &mut reader,
        "gen1",
        "bulletins.generate",
        json!({
            "studentId": outsider,
            "classId": seeded.class_id,
            "periodId": seeded.period_id
        }),
    );
    assert_eq!(error_code(&error), "ineligible_student");

    // Enrolled but never graded.
    let (ungraded, _e) = enroll_student(
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
        "gen2",
        "bulletins.generate",
        json!({
            "studentId": ungraded,
            "classId": seeded.class_id,
            "periodId": seeded.period_id
        }),
    );
    assert_eq!(error_code(&error), "no_data");
}
