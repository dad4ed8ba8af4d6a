use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

use crate::gradebook::{self, GradeError};

#[derive(Debug, Clone, Serialize)]
pub struct BulletinError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl BulletinError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Some(details),
        }
    }
}

impl From<GradeError> for BulletinError {
    fn from(e: GradeError) -> Self {
        Self {
            code: e.code,
            message: e.message,
            details: e.details,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletinModel {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub academic_period_id: String,
    pub general_average: f64,
    pub class_rank: i64,
    pub total_students: i64,
    pub conduct_grade: Option<String>,
    pub decision: Option<String>,
    pub teacher_comment: Option<String>,
    pub generated_at: String,
    pub sent_to_parents: bool,
}

fn load_bulletin_row(conn: &Connection, id: &str) -> Result<BulletinModel, BulletinError> {
    let row = conn
        .query_row(
            "SELECT id, student_id, class_id, academic_period_id, general_average,
                    class_rank, total_students, conduct_grade, decision, teacher_comment,
                    generated_at, sent_to_parents
             FROM bulletins WHERE id = ?",
            [id],
            |r| {
                Ok(BulletinModel {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    class_id: r.get(2)?,
                    academic_period_id: r.get(3)?,
                    general_average: r.get(4)?,
                    class_rank: r.get(5)?,
                    total_students: r.get(6)?,
                    conduct_grade: r.get(7)?,
                    decision: r.get(8)?,
                    teacher_comment: r.get(9)?,
                    generated_at: r.get(10)?,
                    sent_to_parents: r.get::<_, i64>(11)? != 0,
                })
            },
        )
        .optional()
        .map_err(|e| BulletinError::new("db_query_failed", e.to_string()))?;
    row.ok_or_else(|| {
        BulletinError::with_details(
            "not_found",
            "bulletin not found",
            json!({ "bulletinId": id }),
        )
    })
}

#[derive(Debug, Clone)]
pub struct GenerateInput<'a> {
    pub student_id: &'a str,
    pub class_id: &'a str,
    pub period_id: &'a str,
    pub conduct_grade: Option<&'a str>,
    pub decision: Option<&'a str>,
    pub teacher_comment: Option<&'a str>,
}

/// Assembles the period snapshot: general average and class rank from the
/// grade book, the open roster size, and the staff-entered fields. The same
/// inputs always overwrite to the same row; once `sent_to_parents` is set
/// the snapshot is frozen.
pub fn generate(
    conn: &Connection,
    input: &GenerateInput<'_>,
    now: &str,
) -> Result<BulletinModel, BulletinError> {
    let enrollment_status: Option<String> = conn
        .query_row(
            "SELECT status FROM enrollments
             WHERE student_id = ? AND class_id = ? AND status IN ('Actif', 'Suspendu')",
            (input.student_id, input.class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| BulletinError::new("db_query_failed", e.to_string()))?;
    if enrollment_status.is_none() {
        return Err(BulletinError::with_details(
            "ineligible_student",
            "student has no open enrollment in this class",
            json!({ "studentId": input.student_id, "classId": input.class_id }),
        ));
    }

    let existing: Option<(String, i64)> = conn
        .query_row(
            "SELECT id, sent_to_parents FROM bulletins
             WHERE student_id = ? AND academic_period_id = ?",
            (input.student_id, input.period_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| BulletinError::new("db_query_failed", e.to_string()))?;
    if let Some((id, sent)) = &existing {
        if *sent != 0 {
            return Err(BulletinError::with_details(
                "validation",
                "bulletin has been sent to parents and is immutable",
                json!({ "bulletinId": id }),
            ));
        }
    }

    let general_average =
        gradebook::general_average(conn, input.student_id, input.class_id, input.period_id)?;
    let ranking = gradebook::class_ranking(conn, input.class_id, input.period_id)?;
    let class_rank = ranking
        .iter()
        .find(|r| r.student_id == input.student_id)
        .map(|r| r.rank)
        .ok_or_else(|| {
            BulletinError::with_details(
                "no_data",
                "student is absent from the class ranking",
                json!({ "studentId": input.student_id, "periodId": input.period_id }),
            )
        })?;

    let total_students: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM enrollments
             WHERE class_id = ? AND status IN ('Actif', 'Suspendu')",
            [input.class_id],
            |r| r.get(0),
        )
        .map_err(|e| BulletinError::new("db_query_failed", e.to_string()))?;

    let bulletin_id = match existing {
        Some((id, _)) => id,
        None => uuid::Uuid::new_v4().to_string(),
    };
    conn.execute(
        "INSERT INTO bulletins(id, student_id, class_id, academic_period_id, general_average,
                               class_rank, total_students, conduct_grade, decision,
                               teacher_comment, generated_at, sent_to_parents)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
         ON CONFLICT(student_id, academic_period_id) DO UPDATE SET
           class_id = excluded.class_id,
           general_average = excluded.general_average,
           class_rank = excluded.class_rank,
           total_students = excluded.total_students,
           conduct_grade = excluded.conduct_grade,
           decision = excluded.decision,
           teacher_comment = excluded.teacher_comment,
           generated_at = excluded.generated_at",
        (
            &bulletin_id,
            input.student_id,
            input.class_id,
            input.period_id,
            general_average,
            class_rank,
            total_students,
            input.conduct_grade,
            input.decision,
            input.teacher_comment,
            now,
        ),
    )
    .map_err(|e| BulletinError::new("db_insert_failed", e.to_string()))?;

    load_bulletin_row(conn, &bulletin_id)
}

pub fn mark_sent(conn: &Connection, bulletin_id: &str) -> Result<BulletinModel, BulletinError> {
    let changed = conn
        .execute(
            "UPDATE bulletins SET sent_to_parents = 1 WHERE id = ?",
            [bulletin_id],
        )
        .map_err(|e| BulletinError::new("db_update_failed", e.to_string()))?;
    if changed == 0 {
        return Err(BulletinError::with_details(
            "not_found",
            "bulletin not found",
            json!({ "bulletinId": bulletin_id }),
        ));
    }
    load_bulletin_row(conn, bulletin_id)
}

pub fn get(
    conn: &Connection,
    student_id: &str,
    period_id: &str,
) -> Result<BulletinModel, BulletinError> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM bulletins WHERE student_id = ? AND academic_period_id = ?",
            (student_id, period_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| BulletinError::new("db_query_failed", e.to_string()))?;
    match id {
        Some(id) => load_bulletin_row(conn, &id),
        None => Err(BulletinError::with_details(
            "not_found",
            "no bulletin for this student and period",
            json!({ "studentId": student_id, "periodId": period_id }),
        )),
    }
}
