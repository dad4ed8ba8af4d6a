use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn student_json(conn: &Connection, id: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        "SELECT id, first_name, last_name, gender, date_of_birth,
                parent_email, parent_phone, address, created_at, updated_at
         FROM students WHERE id = ?",
        [id],
        |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "firstName": row.get::<_, String>(1)?,
                "lastName": row.get::<_, String>(2)?,
                "gender": row.get::<_, Option<String>>(3)?,
                "dateOfBirth": row.get::<_, Option<String>>(4)?,
                "parentEmail": row.get::<_, Option<String>>(5)?,
                "parentPhone": row.get::<_, Option<String>>(6)?,
                "address": row.get::<_, Option<String>>(7)?,
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

    let student_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, first_name, last_name, gender, date_of_birth,
                              parent_email, parent_phone, address, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &first_name,
            &last_name,
            opt("gender"),
            opt("dateOfBirth"),
            opt("parentEmail"),
            opt("parentPhone"),
            opt("address"),
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    match student_json(conn, &student_id) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "db_query_failed", "student row vanished", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    // Only the fields present in params change; absent keys keep their value.
    let mut sets: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();
    let fields = [
        ("firstName", "first_name"),
        ("lastName", "last_name"),
        ("gender", "gender"),
        ("dateOfBirth", "date_of_birth"),
        ("parentEmail", "parent_email"),
        ("parentPhone", "parent_phone"),
        ("address", "address"),
    ];
    for (key, column) in fields {
        if let Some(v) = req.params.get(key) {
            match v.as_str() {
                Some(s) => {
                    if (key == "firstName" || key == "lastName") && s.trim().is_empty() {
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
    bind_values.push(Value::Text(student_id.clone()));

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        );
    }

    match student_json(conn, &student_id) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "db_query_failed", "student row vanished", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    match student_json(conn, &student_id) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    let search = req
        .params
        .get("search")
        .and_then(|v| v.as_str())
        .map(|s| format!("%{}%", s.trim()));

    let sql = "SELECT id, first_name, last_name, gender, date_of_birth,
                      parent_email, parent_phone, address, created_at, updated_at
               FROM students
               WHERE (?1 IS NULL OR first_name LIKE ?1 OR last_name LIKE ?1)
               ORDER BY last_name, first_name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([search], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "firstName": row.get::<_, String>(1)?,
                "lastName": row.get::<_, String>(2)?,
                "gender": row.get::<_, Option<String>>(3)?,
                "dateOfBirth": row.get::<_, Option<String>>(4)?,
                "parentEmail": row.get::<_, Option<String>>(5)?,
                "parentPhone": row.get::<_, Option<String>>(6)?,
                "address": row.get::<_, Option<String>>(7)?,
                "createdAt": row.get::<_, String>(8)?,
                "updatedAt": row.get::<_, Option<String>>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.get" => Some(handle_get(state, req)),
        "students.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
