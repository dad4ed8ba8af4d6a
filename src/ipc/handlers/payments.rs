use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use serde_json::json;

fn handle_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let enrollment_id = match req.params.get("enrollmentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing enrollmentId", None),
    };
    let amount = match req.params.get("amount").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing amount", None),
    };
    let method = match req.params.get("method").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing method", None),
    };

    let today = chrono::Utc::now().date_naive();
    let payment_date = match req.params.get("paymentDate").and_then(|v| v.as_str()) {
        Some(raw) => match ledger::parse_wire_date(raw, "paymentDate") {
            Ok(d) => d,
            Err(e) => return err(&req.id, &e.code, e.message, e.details),
        },
        None => today,
    };

    let input = ledger::RecordPaymentInput {
        enrollment_id,
        amount,
        method,
        payment_type: req
            .params
            .get("paymentType")
            .and_then(|v| v.as_str())
            .unwrap_or("Scolarité"),
        payment_date,
        reference_number: req.params.get("referenceNumber").and_then(|v| v.as_str()),
        notes: req.params.get("notes").and_then(|v| v.as_str()),
    };
    let grace_days = db::grace_days(conn);
    let now = chrono::Utc::now().to_rfc3339();
    match ledger::record_payment(conn, &input, today, grace_days, &now) {
        Ok(receipt) => ok(&req.id, json!({ "receipt": receipt })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let payment_id = match req.params.get("paymentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing paymentId", None),
    };
    let today = chrono::Utc::now().date_naive();
    let grace_days = db::grace_days(conn);
    let now = chrono::Utc::now().to_rfc3339();
    match ledger::cancel_payment(conn, payment_id, today, grace_days, &now) {
        Ok(receipt) => ok(&req.id, json!({ "receipt": receipt })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_balance(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let enrollment_id = match req.params.get("enrollmentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing enrollmentId", None),
    };
    let today = chrono::Utc::now().date_naive();
    let grace_days = db::grace_days(conn);
    match ledger::get_balance(conn, enrollment_id, today, grace_days) {
        Ok(balance) => ok(
            &req.id,
            json!({
                "enrollmentId": enrollment_id,
                "paidAmount": balance.paid,
                "outstandingAmount": balance.outstanding,
                "paymentStatus": balance.status.as_str()
            }),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_list_for_enrollment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "payments": [] }));
    };
    let enrollment_id = match req.params.get("enrollmentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing enrollmentId", None),
    };

    // Cancelled rows stay visible; the ledger is append-only.
    let sql = "SELECT id, amount, payment_date, payment_method, payment_type,
                      reference_number, notes, status, created_at
               FROM payments
               WHERE enrollment_id = ?
               ORDER BY payment_date, created_at, id";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([enrollment_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "amount": row.get::<_, f64>(1)?,
                "paymentDate": row.get::<_, String>(2)?,
                "method": row.get::<_, String>(3)?,
                "paymentType": row.get::<_, String>(4)?,
                "referenceNumber": row.get::<_, Option<String>>(5)?,
                "notes": row.get::<_, Option<String>>(6)?,
                "status": row.get::<_, String>(7)?,
                "createdAt": row.get::<_, String>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(payments) => ok(&req.id, json!({ "payments": payments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_outstanding(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "outstanding": [] }));
    };
    let year_id = req.params.get("yearId").and_then(|v| v.as_str());

    let sql = "SELECT e.id, e.student_id, s.last_name, s.first_name, e.class_id,
                      e.total_fees, e.paid_amount, e.outstanding_amount, e.payment_status
               FROM enrollments e
               JOIN students s ON s.id = e.student_id
               WHERE e.status IN ('Actif', 'Suspendu')
                 AND e.outstanding_amount > 0.000001
                 AND (?1 IS NULL OR e.academic_year_id = ?1)
               ORDER BY e.outstanding_amount DESC, s.last_name, s.first_name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([year_id], |row| {
            let last: String = row.get(2)?;
            let first: String = row.get(3)?;
            Ok(json!({
                "enrollmentId": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "displayName": format!("{}, {}", last, first),
                "classId": row.get::<_, String>(4)?,
                "totalFees": row.get::<_, f64>(5)?,
                "paidAmount": row.get::<_, f64>(6)?,
                "outstandingAmount": row.get::<_, f64>(7)?,
                "paymentStatus": row.get::<_, String>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(outstanding) => ok(&req.id, json!({ "outstanding": outstanding })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.record" => Some(handle_record(state, req)),
        "payments.cancel" => Some(handle_cancel(state, req)),
        "payments.balance" => Some(handle_balance(state, req)),
        "payments.listForEnrollment" => Some(handle_list_for_enrollment(state, req)),
        "payments.outstanding" => Some(handle_outstanding(state, req)),
        _ => None,
    }
}
