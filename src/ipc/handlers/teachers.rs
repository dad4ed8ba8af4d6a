use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn teacher_json(conn: &Connection, id: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        "SELECT id, first_name, last_name, email, phone, qualification,
                hire_date, status, created_at, updated_at
         FROM teachers WHERE id = ?",
        [id],
        |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "firstName": row.get::<_, String>(1)?,
                "lastName": row.get::<_, String>(2)?,
                "email": row.get::<_, Option<String>>(3)?,
                "phone": row.get::<_, Option<String>>(4)?,
                "qualification": row.get::<_, Option<String>>(5)?,
                "hireDate": row.get::<_, Option<String>>(6)?,
                "status": row.get::<_, String>(7)?,
                "createdAt": row.get::<_, String>(8)?,
                "updatedAt": row.get::<_, Option<String>>(9)?
            }))
        },
    )
    .optional()
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let opt = |key: &str| {
        req.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };

    let teacher_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, first_name, last_name, email, phone,
                              qualification, hire_date, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'Actif', ?)",
        (
            &teacher_id,
            &first_name,
            &last_name,
            opt("email"),
            opt("phone"),
            opt("qualification"),
            opt("hireDate"),
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    match teacher_json(conn, &teacher_id) {
        Ok(Some(teacher)) => ok(&req.id, json!({ "teacher": teacher })),
        Ok(None) => err(&req.id, "db_query_failed", "teacher row vanished", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    // Only the fields present in params change; absent keys keep their value.
    let mut sets: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();
    let fields = [
        ("firstName", "first_name"),
        ("lastName", "last_name"),
        ("email", "email"),
        ("phone", "phone"),
        ("qualification", "qualification"),
        ("hireDate", "hire_date"),
        ("status", "status"),
    ];
    for (key, column) in fields {
        if let Some(v) = req.params.get(key) {
            match v.as_str() {
                Some(s) => {
                    if (key == "firstName" || key == "lastName" || key == "status")
                        && s.trim().is_empty()
                    {
                        return err(
                            &req.id,
                            "validation",
                            format!("{} must not be empty", key),
                            Some(json!({ "field": key })),
                        );
                    }
                    sets.push(format!("{} = ?", column));
                    bind_values.push(Value::Text(s.trim().to_string()));
                }
                None if v.is_null() => {
                    sets.push(format!("{} = NULL", column));
                }
                None => {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("{} must be a string or null", key),
                        None,
                    )
                }
            }
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "no fields to update", None);
    }
    sets.push("updated_at = ?".to_string());
    bind_values.push(Value::Text(chrono::Utc::now().to_rfc3339()));
    bind_values.push(Value::Text(teacher_id.clone()));

    let sql = format!("UPDATE teachers SET {} WHERE id = ?", sets.join(", "));
    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(
            &req.id,
            "not_found",
            "teacher not found",
            Some(json!({ "teacherId": teacher_id })),
        );
    }

    match teacher_json(conn, &teacher_id) {
        Ok(Some(teacher)) => ok(&req.id, json!({ "teacher": teacher })),
        Ok(None) => err(&req.id, "db_query_failed", "teacher row vanished", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let teacher = match teacher_json(conn, &teacher_id) {
        Ok(Some(t)) => t,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "teacher not found",
                Some(json!({ "teacherId": teacher_id })),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare("SELECT id FROM classes WHERE teacher_id = ? ORDER BY name")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let class_ids = stmt
        .query_map([&teacher_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match class_ids {
        Ok(ids) => ok(&req.id, json!({ "teacher": teacher, "classIds": ids })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };
    let mut stmt = match conn.prepare(
        "SELECT id, first_name, last_name, email, phone, qualification,
                hire_date, status, created_at, updated_at
         FROM teachers ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "firstName": row.get::<_, String>(1)?,
                "lastName": row.get::<_, String>(2)?,
                "email": row.get::<_, Option<String>>(3)?,
                "phone": row.get::<_, Option<String>>(4)?,
                "qualification": row.get::<_, Option<String>>(5)?,
                "hireDate": row.get::<_, Option<String>>(6)?,
                "status": row.get::<_, String>(7)?,
                "createdAt": row.get::<_, String>(8)?,
                "updatedAt": row.get::<_, Option<String>>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assign_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    for (table, id, field) in [
        ("teachers", &teacher_id, "teacherId"),
        ("classes", &class_id, "classId"),
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
        "UPDATE classes SET teacher_id = ? WHERE id = ?",
        (&teacher_id, &class_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "teacherId": teacher_id, "classId": class_id }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(handle_create(state, req)),
        "teachers.update" => Some(handle_update(state, req)),
        "teachers.get" => Some(handle_get(state, req)),
        "teachers.list" => Some(handle_list(state, req)),
        "teachers.assignClass" => Some(handle_assign_class(state, req)),
        _ => None,
    }
}
