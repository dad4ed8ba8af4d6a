use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

use crate::ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStatus {
    Active,
    Suspended,
    Transferred,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "Actif",
            EnrollmentStatus::Suspended => "Suspendu",
            EnrollmentStatus::Transferred => "Transféré",
            EnrollmentStatus::Completed => "Terminé",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Actif" => Some(EnrollmentStatus::Active),
            "Suspendu" => Some(EnrollmentStatus::Suspended),
            "Transféré" => Some(EnrollmentStatus::Transferred),
            "Terminé" => Some(EnrollmentStatus::Completed),
            _ => None,
        }
    }
}

/// Transition table. Transféré and Terminé are terminal for the row: a
/// transfer closes the source and opens a fresh enrollment, so history keeps
/// its ledger and grade attribution.
pub fn can_transition(from: EnrollmentStatus, to: EnrollmentStatus) -> bool {
    use EnrollmentStatus::*;
    matches!(
        (from, to),
        (Active, Suspended) | (Active, Transferred) | (Active, Completed)
            | (Suspended, Active)
            | (Suspended, Transferred)
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EnrollError {
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

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentModel {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub academic_year_id: String,
    pub enrollment_date: String,
    pub total_fees: f64,
    pub paid_amount: f64,
    pub outstanding_amount: f64,
    pub payment_status: String,
    pub status: String,
    pub status_reason: Option<String>,
    pub version: i64,
}

pub fn enrollment_model(conn: &Connection, id: &str) -> Result<EnrollmentModel, EnrollError> {
    let row = conn
        .query_row(
            "SELECT id, student_id, class_id, academic_year_id, enrollment_date,
                    total_fees, paid_amount, outstanding_amount, payment_status,
                    status, status_reason, version
             FROM enrollments WHERE id = ?",
            [id],
            |r| {
                Ok(EnrollmentModel {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    class_id: r.get(2)?,
                    academic_year_id: r.get(3)?,
                    enrollment_date: r.get(4)?,
                    total_fees: r.get(5)?,
                    paid_amount: r.get(6)?,
                    outstanding_amount: r.get(7)?,
                    payment_status: r.get(8)?,
                    status: r.get(9)?,
                    status_reason: r.get(10)?,
                    version: r.get(11)?,
                })
            },
        )
        .optional()
        .map_err(|e| EnrollError::new("db_query_failed", e.to_string()))?;
    row.ok_or_else(|| {
        EnrollError::with_details(
            "not_found",
            "enrollment not found",
            json!({ "enrollmentId": id }),
        )
    })
}

#[derive(Debug, Clone)]
pub struct EnrollInput<'a> {
    pub student_id: &'a str,
    pub class_id: &'a str,
    pub academic_year_id: &'a str,
    pub total_fees: f64,
    pub enrollment_date: NaiveDate,
}

pub fn enroll(
    conn: &Connection,
    input: &EnrollInput<'_>,
    today: NaiveDate,
    grace_days: i64,
    now: &str,
) -> Result<EnrollmentModel, EnrollError> {
    if input.total_fees < 0.0 {
        return Err(EnrollError::with_details(
            "validation",
            "total fees must be >= 0",
            json!({ "totalFees": input.total_fees }),
        ));
    }

    let student_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ?",
            [input.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| EnrollError::new("db_query_failed", e.to_string()))?;
    if student_exists.is_none() {
        return Err(EnrollError::with_details(
            "not_found",
            "student not found",
            json!({ "studentId": input.student_id }),
        ));
    }

    let class_year: Option<String> = conn
        .query_row(
            "SELECT academic_year_id FROM classes WHERE id = ?",
            [input.class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| EnrollError::new("db_query_failed", e.to_string()))?;
    let Some(class_year) = class_year else {
        return Err(EnrollError::with_details(
            "not_found",
            "class not found",
            json!({ "classId": input.class_id }),
        ));
    };
    // The target year is an explicit parameter, never ambient "active year"
    // state; it must agree with the class.
    if class_year != input.academic_year_id {
        return Err(EnrollError::with_details(
            "validation",
            "class does not belong to the given academic year",
            json!({
                "classId": input.class_id,
                "academicYearId": input.academic_year_id
            }),
        ));
    }

    let status = ledger::derive_payment_status(
        input.total_fees,
        0.0,
        input.enrollment_date,
        None,
        today,
        grace_days,
    );

    let enrollment_id = uuid::Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO enrollments(id, student_id, class_id, academic_year_id, enrollment_date,
                                 total_fees, paid_amount, outstanding_amount, payment_status,
                                 status, version, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 0, ?, ?, 'Actif', 0, ?)",
        (
            &enrollment_id,
            input.student_id,
            input.class_id,
            input.academic_year_id,
            input.enrollment_date.to_string(),
            input.total_fees,
            input.total_fees,
            status.as_str(),
            now,
        ),
    );
    if let Err(e) = inserted {
        // The partial unique index enforces one open enrollment per student
        // per academic year.
        if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
            return Err(EnrollError::with_details(
                "validation",
                "student already has an open enrollment for this academic year",
                json!({
                    "studentId": input.student_id,
                    "academicYearId": input.academic_year_id
                }),
            ));
        }
        return Err(EnrollError::new("db_insert_failed", e.to_string()));
    }

    enrollment_model(conn, &enrollment_id)
}

/// Version-checked status write. Zero rows updated means another writer
/// bumped the version after it was read; the caller's transaction rolls back
/// on drop and nothing is half-applied.
fn apply_status(
    conn: &Connection,
    enrollment_id: &str,
    to: EnrollmentStatus,
    reason: Option<&str>,
    expected_version: i64,
    now: &str,
) -> Result<(), EnrollError> {
    let changed = conn
        .execute(
            "UPDATE enrollments
             SET status = ?, status_reason = ?, version = version + 1, updated_at = ?
             WHERE id = ? AND version = ?",
            (to.as_str(), reason, now, enrollment_id, expected_version),
        )
        .map_err(|e| EnrollError::new("db_update_failed", e.to_string()))?;
    if changed == 0 {
        return Err(EnrollError::with_details(
            "concurrency_conflict",
            "enrollment was modified concurrently; re-fetch and retry",
            json!({ "enrollmentId": enrollment_id }),
        ));
    }
    Ok(())
}

fn transition(
    conn: &Connection,
    enrollment_id: &str,
    to: EnrollmentStatus,
    reason: Option<&str>,
    now: &str,
) -> Result<EnrollmentModel, EnrollError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| EnrollError::new("db_tx_failed", e.to_string()))?;

    let current = enrollment_model(&tx, enrollment_id)?;
    let from = EnrollmentStatus::parse(&current.status).ok_or_else(|| {
        EnrollError::with_details(
            "validation",
            "enrollment has an unknown status",
            json!({ "enrollmentId": enrollment_id, "status": current.status }),
        )
    })?;
    if !can_transition(from, to) {
        return Err(EnrollError::with_details(
            "invalid_transition",
            format!("cannot move from {} to {}", from.as_str(), to.as_str()),
            json!({
                "enrollmentId": enrollment_id,
                "from": from.as_str(),
                "to": to.as_str()
            }),
        ));
    }

    apply_status(&tx, enrollment_id, to, reason, current.version, now)?;

    tx.commit()
        .map_err(|e| EnrollError::new("db_commit_failed", e.to_string()))?;
    enrollment_model(conn, enrollment_id)
}

pub fn suspend(
    conn: &Connection,
    enrollment_id: &str,
    reason: Option<&str>,
    now: &str,
) -> Result<EnrollmentModel, EnrollError> {
    transition(conn, enrollment_id, EnrollmentStatus::Suspended, reason, now)
}

pub fn reactivate(
    conn: &Connection,
    enrollment_id: &str,
    now: &str,
) -> Result<EnrollmentModel, EnrollError> {
    transition(conn, enrollment_id, EnrollmentStatus::Active, None, now)
}

pub fn complete(
    conn: &Connection,
    enrollment_id: &str,
    now: &str,
) -> Result<EnrollmentModel, EnrollError> {
    transition(
        conn,
        enrollment_id,
        EnrollmentStatus::Completed,
        Some("Année terminée"),
        now,
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub closed_enrollment: EnrollmentModel,
    pub new_enrollment: EnrollmentModel,
}

/// Closes the source row as Transféré and opens a fresh enrollment in the
/// destination class carrying the financial state over. Grades already
/// recorded stay attributed to the source class.
pub fn transfer(
    conn: &Connection,
    enrollment_id: &str,
    new_class_id: &str,
    now: &str,
) -> Result<TransferOutcome, EnrollError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| EnrollError::new("db_tx_failed", e.to_string()))?;

    let source = enrollment_model(&tx, enrollment_id)?;
    let from = EnrollmentStatus::parse(&source.status).ok_or_else(|| {
        EnrollError::with_details(
            "validation",
            "enrollment has an unknown status",
            json!({ "enrollmentId": enrollment_id, "status": source.status }),
        )
    })?;
    if !can_transition(from, EnrollmentStatus::Transferred) {
        return Err(EnrollError::with_details(
            "invalid_transition",
            format!("cannot transfer from {}", from.as_str()),
            json!({ "enrollmentId": enrollment_id, "from": from.as_str() }),
        ));
    }
    if new_class_id == source.class_id {
        return Err(EnrollError::with_details(
            "validation",
            "destination class is the same as the source class",
            json!({ "classId": new_class_id }),
        ));
    }

    let dest_year: Option<String> = tx
        .query_row(
            "SELECT academic_year_id FROM classes WHERE id = ?",
            [new_class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| EnrollError::new("db_query_failed", e.to_string()))?;
    let Some(dest_year) = dest_year else {
        return Err(EnrollError::with_details(
            "not_found",
            "destination class not found",
            json!({ "classId": new_class_id }),
        ));
    };
    if dest_year != source.academic_year_id {
        return Err(EnrollError::with_details(
            "cross_year_transfer",
            "cannot transfer across academic years; register a new enrollment instead",
            json!({
                "enrollmentId": enrollment_id,
                "sourceYearId": source.academic_year_id,
                "destinationYearId": dest_year
            }),
        ));
    }

    apply_status(
        &tx,
        enrollment_id,
        EnrollmentStatus::Transferred,
        Some("Transfert"),
        source.version,
        now,
    )?;

    // Financial continuity: the destination row keeps the balances and the
    // original enrollment date so the grace clock carries over.
    let new_id = uuid::Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO enrollments(id, student_id, class_id, academic_year_id, enrollment_date,
                                 total_fees, paid_amount, outstanding_amount, payment_status,
                                 status, version, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 'Actif', 0, ?)",
        (
            &new_id,
            &source.student_id,
            new_class_id,
            &source.academic_year_id,
            &source.enrollment_date,
            source.total_fees,
            source.paid_amount,
            source.outstanding_amount,
            &source.payment_status,
            now,
        ),
    )
    .map_err(|e| EnrollError::new("db_insert_failed", e.to_string()))?;

    // The ledger follows the student: payment rows move to the open
    // enrollment so replaying its own payments reproduces the carried
    // balance, and the next payment folds on top of the history instead of
    // starting from zero.
    tx.execute(
        "UPDATE payments SET enrollment_id = ? WHERE enrollment_id = ?",
        (&new_id, enrollment_id),
    )
    .map_err(|e| EnrollError::new("db_update_failed", e.to_string()))?;

    let closed = enrollment_model(&tx, enrollment_id)?;
    let created = enrollment_model(&tx, &new_id)?;

    tx.commit()
        .map_err(|e| EnrollError::new("db_commit_failed", e.to_string()))?;

    Ok(TransferOutcome {
        closed_enrollment: closed,
        new_enrollment: created,
    })
}
