use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

// One back-office landing screen snapshot: open roster, class count, money
// collected and still due, and the payment-status breakdown for one year.
fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let picked = match req.params.get("yearId").and_then(|v| v.as_str()) {
        Some(v) => conn
            .query_row(
                "SELECT id, name FROM academic_years WHERE id = ?",
                [v],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT id, name FROM academic_years WHERE is_active = 1",
                [],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
            )
            .optional(),
    };
    let (year_id, year_name) = match picked {
        Ok(Some(pair)) => pair,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "no active academic year and no yearId given",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let totals = conn.query_row(
        "SELECT
           COUNT(*),
           COALESCE(SUM(paid_amount), 0),
           COALESCE(SUM(outstanding_amount), 0),
           COALESCE(SUM(CASE WHEN payment_status = 'À jour' THEN 1 ELSE 0 END), 0),
           COALESCE(SUM(CASE WHEN payment_status = 'Partiel' THEN 1 ELSE 0 END), 0),
           COALESCE(SUM(CASE WHEN payment_status = 'En retard' THEN 1 ELSE 0 END), 0)
         FROM enrollments
         WHERE academic_year_id = ? AND status IN ('Actif', 'Suspendu')",
        [&year_id],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        },
    );
    let (total_students, total_paid, total_outstanding, up_to_date, partial, overdue) =
        match totals {
            Ok(t) => t,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

    let total_classes: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM classes WHERE academic_year_id = ?",
        [&year_id],
        |r| r.get(0),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Confirmed receipts dated in the current calendar month, for the
    // revenue card on the landing screen.
    let month_prefix = chrono::Utc::now().date_naive().format("%Y-%m").to_string();
    let monthly_revenue: f64 = match conn.query_row(
        "SELECT COALESCE(SUM(p.amount), 0)
         FROM payments p
         JOIN enrollments e ON e.id = p.enrollment_id
         WHERE p.status = 'Confirmé'
           AND e.academic_year_id = ?
           AND p.payment_date LIKE ? || '%'",
        (&year_id, &month_prefix),
        |r| r.get(0),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "yearId": year_id,
            "yearName": year_name,
            "monthlyRevenue": monthly_revenue,
            "totalStudents": total_students,
            "totalClasses": total_classes,
            "totalPaid": total_paid,
            "totalOutstanding": total_outstanding,
            "paymentStatusCounts": {
                "À jour": up_to_date,
                "Partiel": partial,
                "En retard": overdue
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(handle_stats(state, req)),
        _ => None,
    }
}
