use crate::db;
use crate::enrollment;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use serde_json::json;

fn handle_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let academic_year_id = match req.params.get("academicYearId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing academicYearId", None),
    };
    let total_fees = match req.params.get("totalFees").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing totalFees", None),
    };

    let today = chrono::Utc::now().date_naive();
    let enrollment_date = match req.params.get("enrollmentDate").and_then(|v| v.as_str()) {
        Some(raw) => match ledger::parse_wire_date(raw, "enrollmentDate") {
            Ok(d) => d,
            Err(e) => return err(&req.id, &e.code, e.message, e.details),
        },
        None => today,
    };

    let grace_days = db::grace_days(conn);
    let now = chrono::Utc::now().to_rfc3339();
    let input = enrollment::EnrollInput {
        student_id,
        class_id,
        academic_year_id,
        total_fees,
        enrollment_date,
    };
    let enrolled = match enrollment::enroll(conn, &input, today, grace_days, &now) {
        Ok(m) => m,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    // Optional first installment taken at the desk during enrollment. The
    // enrollment row already exists, so this is an ordinary payment.
    let mut receipt = None;
    if let Some(initial) = req.params.get("initialPayment") {
        let amount = match initial.get("amount").and_then(|v| v.as_f64()) {
            Some(v) => v,
            None => {
                return err(&req.id, "bad_params", "missing initialPayment.amount", None)
            }
        };
        let method = initial
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("Espèces");
        let payment_date = match initial.get("paymentDate").and_then(|v| v.as_str()) {
            Some(raw) => match ledger::parse_wire_date(raw, "initialPayment.paymentDate") {
                Ok(d) => d,
                Err(e) => return err(&req.id, &e.code, e.message, e.details),
            },
            None => enrollment_date,
        };
        let pay_input = ledger::RecordPaymentInput {
            enrollment_id: &enrolled.id,
            amount,
            method,
            payment_type: initial
                .get("paymentType")
                .and_then(|v| v.as_str())
                .unwrap_or("Scolarité"),
            payment_date,
            reference_number: initial.get("referenceNumber").and_then(|v| v.as_str()),
            notes: initial.get("notes").and_then(|v| v.as_str()),
        };
        match ledger::record_payment(conn, &pay_input, today, grace_days, &now) {
            Ok(r) => receipt = Some(r),
            Err(e) => return err(&req.id, &e.code, e.message, e.details),
        }
    }

    // Re-read so the response carries the balance after the first payment.
    match enrollment::enrollment_model(conn, &enrolled.id) {
        Ok(model) => ok(
            &req.id,
            json!({ "enrollment": model, "initialPayment": receipt }),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_suspend(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let enrollment_id = match req.params.get("enrollmentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing enrollmentId", None),
    };
    let reason = req.params.get("reason").and_then(|v| v.as_str());
    let now = chrono::Utc::now().to_rfc3339();
    match enrollment::suspend(conn, enrollment_id, reason, &now) {
        Ok(model) => ok(&req.id, json!({ "enrollment": model })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_reactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let enrollment_id = match req.params.get("enrollmentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing enrollmentId", None),
    };
    let now = chrono::Utc::now().to_rfc3339();
    match enrollment::reactivate(conn, enrollment_id, &now) {
        Ok(model) => ok(&req.id, json!({ "enrollment": model })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_complete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let enrollment_id = match req.params.get("enrollmentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing enrollmentId", None),
    };
    let now = chrono::Utc::now().to_rfc3339();
    match enrollment::complete(conn, enrollment_id, &now) {
        Ok(model) => ok(&req.id, json!({ "enrollment": model })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_transfer(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let enrollment_id = match req.params.get("enrollmentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing enrollmentId", None),
    };
    let new_class_id = match req.params.get("newClassId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing newClassId", None),
    };
    let now = chrono::Utc::now().to_rfc3339();
    match enrollment::transfer(conn, enrollment_id, new_class_id, &now) {
        Ok(outcome) => ok(&req.id, serde_json::to_value(outcome).unwrap_or_default()),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn enrollment_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    args: [Option<&str>; 2],
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    stmt.query_map(args, |row| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "studentId": row.get::<_, String>(1)?,
            "classId": row.get::<_, String>(2)?,
            "academicYearId": row.get::<_, String>(3)?,
            "enrollmentDate": row.get::<_, String>(4)?,
            "totalFees": row.get::<_, f64>(5)?,
            "paidAmount": row.get::<_, f64>(6)?,
            "outstandingAmount": row.get::<_, f64>(7)?,
            "paymentStatus": row.get::<_, String>(8)?,
            "status": row.get::<_, String>(9)?,
            "statusReason": row.get::<_, Option<String>>(10)?,
            "version": row.get::<_, i64>(11)?
        }))
    })
    .and_then(|it| it.collect())
}

const ENROLLMENT_COLUMNS: &str = "id, student_id, class_id, academic_year_id, enrollment_date,
     total_fees, paid_amount, outstanding_amount, payment_status,
     status, status_reason, version";

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "enrollments": [] }));
    };
    let class_id = req.params.get("classId").and_then(|v| v.as_str());
    let year_id = req.params.get("yearId").and_then(|v| v.as_str());
    let sql = format!(
        "SELECT {} FROM enrollments
         WHERE (?1 IS NULL OR class_id = ?1)
           AND (?2 IS NULL OR academic_year_id = ?2)
         ORDER BY enrollment_date, id",
        ENROLLMENT_COLUMNS
    );
    match enrollment_rows(conn, &sql, [class_id, year_id]) {
        Ok(rows) => ok(&req.id, json!({ "enrollments": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "enrollments": [] }));
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let sql = format!(
        "SELECT {} FROM enrollments
         WHERE student_id = ?1 AND (?2 IS NULL OR academic_year_id = ?2)
         ORDER BY enrollment_date, id",
        ENROLLMENT_COLUMNS
    );
    let year_id = req.params.get("yearId").and_then(|v| v.as_str());
    match enrollment_rows(conn, &sql, [Some(student_id), year_id]) {
        Ok(rows) => ok(&req.id, json!({ "enrollments": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.enroll" => Some(handle_enroll(state, req)),
        "enrollments.suspend" => Some(handle_suspend(state, req)),
        "enrollments.reactivate" => Some(handle_reactivate(state, req)),
        "enrollments.complete" => Some(handle_complete(state, req)),
        "enrollments.transfer" => Some(handle_transfer(state, req)),
        "enrollments.list" => Some(handle_list(state, req)),
        "enrollments.forStudent" => Some(handle_for_student(state, req)),
        _ => None,
    }
}
