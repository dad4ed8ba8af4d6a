use crate::bulletin;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let input = bulletin::GenerateInput {
        student_id,
        class_id,
        period_id,
        conduct_grade: p.get("conductGrade").and_then(|v| v.as_str()),
        decision: p.get("decision").and_then(|v| v.as_str()),
        teacher_comment: p.get("teacherComment").and_then(|v| v.as_str()),
    };
    let now = chrono::Utc::now().to_rfc3339();
    match bulletin::generate(conn, &input, &now) {
        Ok(model) => ok(&req.id, json!({ "bulletin": model })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_mark_sent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let bulletin_id = match req.params.get("bulletinId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing bulletinId", None),
    };
    match bulletin::mark_sent(conn, bulletin_id) {
        Ok(model) => ok(&req.id, json!({ "bulletin": model })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p = &req.params;
    let (student_id, period_id) = match (
        p.get("studentId").and_then(|v| v.as_str()),
        p.get("periodId").and_then(|v| v.as_str()),
    ) {
        (Some(a), Some(b)) => (a, b),
        _ => return err(&req.id, "bad_params", "missing studentId/periodId", None),
    };
    match bulletin::get(conn, student_id, period_id) {
        Ok(model) => ok(&req.id, json!({ "bulletin": model })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bulletins.generate" => Some(handle_generate(state, req)),
        "bulletins.markSent" => Some(handle_mark_sent(state, req)),
        "bulletins.get" => Some(handle_get(state, req)),
        _ => None,
    }
}
