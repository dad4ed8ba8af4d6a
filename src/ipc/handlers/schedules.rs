use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveTime;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Normalizes a wire `HH:MM` time so stored values compare lexicographically.
fn parse_time_param(raw: &str, field: &str) -> Result<String, serde_json::Value> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map(|t| t.format("%H:%M").to_string())
        .map_err(|_| json!({ "field": field, "value": raw }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p = &req.params;
    let (class_id, subject_id, teacher_id) = match (
        p.get("classId").and_then(|v| v.as_str()),
        p.get("subjectId").and_then(|v| v.as_str()),
        p.get("teacherId").and_then(|v| v.as_str()),
    ) {
        (Some(a), Some(b), Some(c)) => (a.to_string(), b.to_string(), c.to_string()),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "missing classId/subjectId/teacherId",
                None,
            )
        }
    };
    let day_of_week = match p.get("dayOfWeek").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing dayOfWeek", None),
    };
    if !(1..=7).contains(&day_of_week) {
        return err(
            &req.id,
            "validation",
            "dayOfWeek must be between 1 (Monday) and 7",
            Some(json!({ "dayOfWeek": day_of_week })),
        );
    }
    let start = match p.get("startTime").and_then(|v| v.as_str()) {
        Some(raw) => match parse_time_param(raw, "startTime") {
            Ok(t) => t,
            Err(d) => return err(&req.id, "validation", "times must be HH:MM", Some(d)),
        },
        None => return err(&req.id, "bad_params", "missing startTime", None),
    };
    let end = match p.get("endTime").and_then(|v| v.as_str()) {
        Some(raw) => match parse_time_param(raw, "endTime") {
            Ok(t) => t,
            Err(d) => return err(&req.id, "validation", "times must be HH:MM", Some(d)),
        },
        None => return err(&req.id, "bad_params", "missing endTime", None),
    };
    if end <= start {
        return err(
            &req.id,
            "validation",
            "endTime must be after startTime",
            Some(json!({ "startTime": start, "endTime": end })),
        );
    }

    for (table, id, field) in [
        ("classes", &class_id, "classId"),
        ("subjects", &subject_id, "subjectId"),
        ("teachers", &teacher_id, "teacherId"),
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

    // Neither the teacher nor the class can be in two places at once.
    let conflict: Option<String> = match conn
        .query_row(
            "SELECT id FROM schedules
             WHERE day_of_week = ? AND start_time < ? AND end_time > ?
               AND (teacher_id = ? OR class_id = ?)",
            (day_of_week, &end, &start, &teacher_id, &class_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(other) = conflict {
        return err(
            &req.id,
            "validation",
            "slot overlaps an existing schedule entry",
            Some(json!({ "conflictsWith": other })),
        );
    }

    let schedule_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schedules(id, class_id, subject_id, teacher_id, day_of_week,
                               start_time, end_time, classroom, notes)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &schedule_id,
            &class_id,
            &subject_id,
            &teacher_id,
            day_of_week,
            &start,
            &end,
            p.get("classroom").and_then(|v| v.as_str()),
            p.get("notes").and_then(|v| v.as_str()),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schedules" })),
        );
    }

    ok(
        &req.id,
        json!({
            "scheduleId": schedule_id,
            "dayOfWeek": day_of_week,
            "startTime": start,
            "endTime": end
        }),
    )
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let schedule_id = match req.params.get("scheduleId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing scheduleId", None),
    };
    let deleted = match conn.execute("DELETE FROM schedules WHERE id = ?", [schedule_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(
            &req.id,
            "not_found",
            "schedule entry not found",
            Some(json!({ "scheduleId": schedule_id })),
        );
    }
    ok(&req.id, json!({ "scheduleId": schedule_id, "deleted": true }))
}

fn schedule_rows(
    conn: &Connection,
    filter_column: &str,
    filter_value: &str,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let sql = format!(
        "SELECT sc.id, sc.class_id, c.name, sc.subject_id, su.name,
                sc.teacher_id, t.last_name, t.first_name,
                sc.day_of_week, sc.start_time, sc.end_time, sc.classroom, sc.notes
         FROM schedules sc
         JOIN classes c ON c.id = sc.class_id
         JOIN subjects su ON su.id = sc.subject_id
         JOIN teachers t ON t.id = sc.teacher_id
         WHERE sc.{} = ?
         ORDER BY sc.day_of_week, sc.start_time",
        filter_column
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map([filter_value], |row| {
        let last: String = row.get(6)?;
        let first: String = row.get(7)?;
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "classId": row.get::<_, String>(1)?,
            "className": row.get::<_, String>(2)?,
            "subjectId": row.get::<_, String>(3)?,
            "subjectName": row.get::<_, String>(4)?,
            "teacherId": row.get::<_, String>(5)?,
            "teacherName": format!("{}, {}", last, first),
            "dayOfWeek": row.get::<_, i64>(8)?,
            "startTime": row.get::<_, String>(9)?,
            "endTime": row.get::<_, String>(10)?,
            "classroom": row.get::<_, Option<String>>(11)?,
            "notes": row.get::<_, Option<String>>(12)?
        }))
    })
    .and_then(|it| it.collect())
}

fn handle_for_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "schedules": [] }));
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    match schedule_rows(conn, "class_id", class_id) {
        Ok(rows) => ok(&req.id, json!({ "schedules": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_for_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "schedules": [] }));
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    match schedule_rows(conn, "teacher_id", teacher_id) {
        Ok(rows) => ok(&req.id, json!({ "schedules": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedules.create" => Some(handle_create(state, req)),
        "schedules.delete" => Some(handle_delete(state, req)),
        "schedules.forClass" => Some(handle_for_class(state, req)),
        "schedules.forTeacher" => Some(handle_for_teacher(state, req)),
        _ => None,
    }
}
