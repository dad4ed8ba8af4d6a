use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn parse_date_param(raw: &str, field: &str) -> Result<NaiveDate, serde_json::Value> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| json!({ "field": field, "value": raw }))
}

fn handle_years_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let start = match req.params.get("startDate").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing startDate", None),
    };
    let end = match req.params.get("endDate").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing endDate", None),
    };
    let (start_d, end_d) = match (
        parse_date_param(&start, "startDate"),
        parse_date_param(&end, "endDate"),
    ) {
        (Ok(s), Ok(e)) => (s, e),
        (Err(d), _) | (_, Err(d)) => {
            return err(&req.id, "validation", "dates must be YYYY-MM-DD", Some(d))
        }
    };
    if end_d <= start_d {
        return err(
            &req.id,
            "validation",
            "endDate must be after startDate",
            Some(json!({ "startDate": start, "endDate": end })),
        );
    }

    let year_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO academic_years(id, name, start_date, end_date, is_active)
         VALUES(?, ?, ?, ?, 0)",
        (&year_id, &name, &start, &end),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "academic_years" })),
        );
    }

    ok(&req.id, json!({ "yearId": year_id, "name": name }))
}

fn handle_years_activate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let year_id = match req.params.get("yearId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing yearId", None),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(
            &req.id,
            "not_found",
            "academic year not found",
            Some(json!({ "yearId": year_id })),
        );
    }

    // At most one active year; activation swaps atomically.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("UPDATE academic_years SET is_active = 0", []) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute(
        "UPDATE academic_years SET is_active = 1 WHERE id = ?",
        [&year_id],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "yearId": year_id, "isActive": true }))
}

fn handle_years_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "years": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, start_date, end_date, is_active
         FROM academic_years ORDER BY start_date",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "startDate": row.get::<_, String>(2)?,
                "endDate": row.get::<_, String>(3)?,
                "isActive": row.get::<_, i64>(4)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(years) => ok(&req.id, json!({ "years": years })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_periods_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let year_id = match req.params.get("yearId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing yearId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let order_number = match req.params.get("orderNumber").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing orderNumber", None),
    };
    let start = match req.params.get("startDate").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing startDate", None),
    };
    let end = match req.params.get("endDate").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing endDate", None),
    };
    let (start_d, end_d) = match (
        parse_date_param(&start, "startDate"),
        parse_date_param(&end, "endDate"),
    ) {
        (Ok(s), Ok(e)) => (s, e),
        (Err(d), _) | (_, Err(d)) => {
            return err(&req.id, "validation", "dates must be YYYY-MM-DD", Some(d))
        }
    };
    if end_d <= start_d {
        return err(
            &req.id,
            "validation",
            "endDate must be after startDate",
            Some(json!({ "startDate": start, "endDate": end })),
        );
    }

    let year_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if year_exists.is_none() {
        return err(
            &req.id,
            "not_found",
            "academic year not found",
            Some(json!({ "yearId": year_id })),
        );
    }

    // Periods inside one year must not overlap.
    let overlap: Option<String> = match conn
        .query_row(
            "SELECT name FROM academic_periods
             WHERE academic_year_id = ? AND start_date < ? AND end_date > ?",
            (&year_id, &end, &start),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(other) = overlap {
        return err(
            &req.id,
            "validation",
            "period overlaps an existing period",
            Some(json!({ "overlapsWith": other })),
        );
    }

    let period_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO academic_periods(id, academic_year_id, name, order_number, start_date, end_date)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&period_id, &year_id, &name, order_number, &start, &end),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "academic_periods" })),
        );
    }

    ok(&req.id, json!({ "periodId": period_id, "name": name }))
}

fn handle_periods_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "periods": [] }));
    };
    let year_id = req.params.get("yearId").and_then(|v| v.as_str());

    let sql = "SELECT id, academic_year_id, name, order_number, start_date, end_date
               FROM academic_periods
               WHERE (?1 IS NULL OR academic_year_id = ?1)
               ORDER BY order_number";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([year_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "yearId": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "orderNumber": row.get::<_, i64>(3)?,
                "startDate": row.get::<_, String>(4)?,
                "endDate": row.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(periods) => ok(&req.id, json!({ "periods": periods })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_levels_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let order_number = req
        .params
        .get("orderNumber")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let annual_fees = req
        .params
        .get("annualFees")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    if annual_fees < 0.0 {
        return err(
            &req.id,
            "validation",
            "annualFees must be >= 0",
            Some(json!({ "annualFees": annual_fees })),
        );
    }

    let level_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO levels(id, name, order_number, annual_fees) VALUES(?, ?, ?, ?)",
        (&level_id, &name, order_number, annual_fees),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "levels" })),
        );
    }
    ok(&req.id, json!({ "levelId": level_id, "name": name }))
}

fn handle_levels_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "levels": [] }));
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, order_number, annual_fees FROM levels ORDER BY order_number",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "orderNumber": row.get::<_, i64>(2)?,
                "annualFees": row.get::<_, f64>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(levels) => ok(&req.id, json!({ "levels": levels })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let coefficient = req
        .params
        .get("coefficient")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.0);
    if coefficient <= 0.0 {
        return err(
            &req.id,
            "validation",
            "coefficient must be > 0",
            Some(json!({ "coefficient": coefficient })),
        );
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, coefficient) VALUES(?, ?, ?)",
        (&subject_id, &name, coefficient),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    ok(&req.id, json!({ "subjectId": subject_id, "name": name }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };
    let mut stmt =
        match conn.prepare("SELECT id, name, coefficient FROM subjects ORDER BY name") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "coefficient": row.get::<_, f64>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_assign_level(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let level_id = match req.params.get("levelId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing levelId", None),
    };
    let is_mandatory = req
        .params
        .get("isMandatory")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    for (table, id, field) in [
        ("subjects", &subject_id, "subjectId"),
        ("levels", &level_id, "levelId"),
    ] {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        let exists: Option<i64> = match conn.query_row(&sql, [id], |r| r.get(0)).optional() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(
                &req.id,
                "not_found",
                format!("{} not found", field),
                Some(json!({ field: id })),
            );
        }
    }

    if let Err(e) = conn.execute(
        "INSERT INTO level_subjects(level_id, subject_id, is_mandatory)
         VALUES(?, ?, ?)
         ON CONFLICT(level_id, subject_id) DO UPDATE SET is_mandatory = excluded.is_mandatory",
        (&level_id, &subject_id, is_mandatory as i64),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "level_subjects" })),
        );
    }
    ok(
        &req.id,
        json!({ "subjectId": subject_id, "levelId": level_id, "isMandatory": is_mandatory }),
    )
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let year_id = match req.params.get("yearId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing yearId", None),
    };
    let level_id = match req.params.get("levelId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing levelId", None),
    };
    let capacity = req
        .params
        .get("capacity")
        .and_then(|v| v.as_i64())
        .unwrap_or(40);

    for (table, id, field) in [
        ("academic_years", &year_id, "yearId"),
        ("levels", &level_id, "levelId"),
    ] {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        let exists: Option<i64> = match conn.query_row(&sql, [id], |r| r.get(0)).optional() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(
                &req.id,
                "not_found",
                format!("{} not found", field),
                Some(json!({ field: id })),
            );
        }
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, academic_year_id, level_id, name, capacity)
         VALUES(?, ?, ?, ?, ?)",
        (&class_id, &year_id, &level_id, &name, capacity),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }
    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };
    let year_id = req.params.get("yearId").and_then(|v| v.as_str());

    // Correlated subquery keeps the roster count join-free.
    let sql = "SELECT
                 c.id, c.name, c.academic_year_id, c.level_id, c.capacity, c.teacher_id,
                 (SELECT COUNT(*) FROM enrollments e
                  WHERE e.class_id = c.id AND e.status IN ('Actif', 'Suspendu')) AS open_count
               FROM classes c
               WHERE (?1 IS NULL OR c.academic_year_id = ?1)
               ORDER BY c.name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([year_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "yearId": row.get::<_, String>(2)?,
                "levelId": row.get::<_, String>(3)?,
                "capacity": row.get::<_, i64>(4)?,
                "teacherId": row.get::<_, Option<String>>(5)?,
                "enrolledCount": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let key = match req.params.get("key").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing key", None),
    };
    match db::settings_get_json(conn, &key) {
        Ok(value) => ok(
            &req.id,
            json!({ "key": key, "value": value.unwrap_or(serde_json::Value::Null) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let key = match req.params.get("key").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing key", None),
    };
    let Some(value) = req.params.get("value") else {
        return err(&req.id, "bad_params", "missing value", None);
    };
    match db::settings_set_json(conn, &key, value) {
        Ok(()) => ok(&req.id, json!({ "key": key, "value": value })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "years.create" => Some(handle_years_create(state, req)),
        "years.activate" => Some(handle_years_activate(state, req)),
        "years.list" => Some(handle_years_list(state, req)),
        "periods.create" => Some(handle_periods_create(state, req)),
        "periods.list" => Some(handle_periods_list(state, req)),
        "levels.create" => Some(handle_levels_create(state, req)),
        "levels.list" => Some(handle_levels_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.assignLevel" => Some(handle_subjects_assign_level(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
