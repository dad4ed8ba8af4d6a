use crate::db;
use crate::gradebook;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p = &req.params;
    let (student_id, subject_id, class_id, period_id) = match (
        p.get("studentId").and_then(|v| v.as_str()),
        p.get("subjectId").and_then(|v| v.as_str()),
        p.get("classId").and_then(|v| v.as_str()),
        p.get("periodId").and_then(|v| v.as_str()),
    ) {
        (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "missing studentId/subjectId/classId/periodId",
                None,
            )
        }
    };
    let grade = match p.get("grade").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing grade", None),
    };
    let evaluation_type = match p.get("evaluationType").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing evaluationType", None),
    };
    let evaluation_date = match p.get("evaluationDate").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing evaluationDate", None),
    };

    let input = gradebook::GradeInput {
        student_id,
        subject_id,
        class_id,
        period_id,
        grade,
        coefficient: p.get("coefficient").and_then(|v| v.as_f64()).unwrap_or(1.0),
        evaluation_type,
        evaluation_title: p.get("evaluationTitle").and_then(|v| v.as_str()),
        evaluation_date,
        teacher_comment: p.get("teacherComment").and_then(|v| v.as_str()),
    };
    let scale_max = db::grade_scale_max(conn);
    let now = chrono::Utc::now().to_rfc3339();
    match gradebook::record_grade(conn, &input, scale_max, &now) {
        Ok(grade_id) => ok(&req.id, json!({ "gradeId": grade_id })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_enter_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p = &req.params;
    let (class_id, subject_id, period_id) = match (
        p.get("classId").and_then(|v| v.as_str()),
        p.get("subjectId").and_then(|v| v.as_str()),
        p.get("periodId").and_then(|v| v.as_str()),
    ) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "missing classId/subjectId/periodId",
                None,
            )
        }
    };
    let evaluation_type = match p.get("evaluationType").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing evaluationType", None),
    };
    let evaluation_title = match p.get("evaluationTitle").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing evaluationTitle", None),
    };
    let evaluation_date = match p.get("evaluationDate").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing evaluationDate", None),
    };
    let Some(raw_entries) = p.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries", None);
    };

    let mut entries = Vec::with_capacity(raw_entries.len());
    for (i, raw) in raw_entries.iter().enumerate() {
        let student_id = match raw.get("studentId").and_then(|v| v.as_str()) {
            Some(v) => v.to_string(),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "entry missing studentId",
                    Some(json!({ "entryIndex": i })),
                )
            }
        };
        let grade = match raw.get("grade").and_then(|v| v.as_f64()) {
            Some(v) => v,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "entry missing grade",
                    Some(json!({ "entryIndex": i })),
                )
            }
        };
        entries.push(gradebook::ClassGradeEntry {
            student_id,
            grade,
            teacher_comment: raw
                .get("teacherComment")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        });
    }

    let eval = gradebook::ClassEvaluation {
        class_id,
        subject_id,
        period_id,
        evaluation_type,
        evaluation_title,
        evaluation_date,
        coefficient: p.get("coefficient").and_then(|v| v.as_f64()).unwrap_or(1.0),
    };
    let scale_max = db::grade_scale_max(conn);
    let now = chrono::Utc::now().to_rfc3339();
    match gradebook::enter_class_grades(conn, &eval, &entries, scale_max, &now) {
        Ok(grade_ids) => ok(
            &req.id,
            json!({ "gradeIds": grade_ids, "count": grade_ids.len() }),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grade_id = match req.params.get("gradeId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing gradeId", None),
    };
    match gradebook::delete_grade(conn, grade_id) {
        Ok(()) => ok(&req.id, json!({ "gradeId": grade_id, "deleted": true })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_subject_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p = &req.params;
    let (student_id, subject_id, period_id) = match (
        p.get("studentId").and_then(|v| v.as_str()),
        p.get("subjectId").and_then(|v| v.as_str()),
        p.get("periodId").and_then(|v| v.as_str()),
    ) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "missing studentId/subjectId/periodId",
                None,
            )
        }
    };
    match gradebook::subject_average(conn, student_id, subject_id, period_id) {
        Ok(average) => ok(
            &req.id,
            json!({
                "studentId": student_id,
                "subjectId": subject_id,
                "periodId": period_id,
                "average": average
            }),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_general_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p = &req.params;
    let (student_id, class_id, period_id) = match (
        p.get("studentId").and_then(|v| v.as_str()),
        p.get("classId").and_then(|v| v.as_str()),
        p.get("periodId").and_then(|v| v.as_str()),
    ) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "missing studentId/classId/periodId",
                None,
            )
        }
    };
    match gradebook::general_average(conn, student_id, class_id, period_id) {
        Ok(average) => ok(
            &req.id,
            json!({
                "studentId": student_id,
                "classId": class_id,
                "periodId": period_id,
                "generalAverage": average
            }),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_class_ranking(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p = &req.params;
    let (class_id, period_id) = match (
        p.get("classId").and_then(|v| v.as_str()),
        p.get("periodId").and_then(|v| v.as_str()),
    ) {
        (Some(a), Some(b)) => (a, b),
        _ => return err(&req.id, "bad_params", "missing classId/periodId", None),
    };
    match gradebook::class_ranking(conn, class_id, period_id) {
        Ok(ranking) => ok(
            &req.id,
            json!({ "classId": class_id, "periodId": period_id, "ranking": ranking }),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_list_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "grades": [] }));
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let period_id = req.params.get("periodId").and_then(|v| v.as_str());

    let sql = "SELECT id, subject_id, class_id, academic_period_id, grade, coefficient,
                      evaluation_type, evaluation_title, evaluation_date, teacher_comment
               FROM grade_entries
               WHERE student_id = ?1 AND (?2 IS NULL OR academic_period_id = ?2)
               ORDER BY evaluation_date, created_at, id";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([Some(student_id), period_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "subjectId": row.get::<_, String>(1)?,
                "classId": row.get::<_, String>(2)?,
                "periodId": row.get::<_, String>(3)?,
                "grade": row.get::<_, f64>(4)?,
                "coefficient": row.get::<_, f64>(5)?,
                "evaluationType": row.get::<_, String>(6)?,
                "evaluationTitle": row.get::<_, Option<String>>(7)?,
                "evaluationDate": row.get::<_, String>(8)?,
                "teacherComment": row.get::<_, Option<String>>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.record" => Some(handle_record(state, req)),
        "grades.enterClass" => Some(handle_enter_class(state, req)),
        "grades.delete" => Some(handle_delete(state, req)),
        "grades.subjectAverage" => Some(handle_subject_average(state, req)),
        "grades.generalAverage" => Some(handle_general_average(state, req)),
        "grades.classRanking" => Some(handle_class_ranking(state, req)),
        "grades.listForStudent" => Some(handle_list_for_student(state, req)),
        _ => None,
    }
}
