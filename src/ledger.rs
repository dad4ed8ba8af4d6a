use chrono::{Duration, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

/// Amounts are single-currency REALs; below this they count as settled.
const AMOUNT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    UpToDate,
    Partial,
    Overdue,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::UpToDate => "À jour",
            PaymentStatus::Partial => "Partiel",
            PaymentStatus::Overdue => "En retard",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LedgerError {
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

/// The replay view of one payment row. `created_at` and `id` only matter as
/// tie-breakers so equal-dated payments fold in a stable order.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub id: String,
    pub amount: f64,
    pub payment_date: NaiveDate,
    pub created_at: String,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balance {
    pub paid: f64,
    pub outstanding: f64,
    pub status: PaymentStatus,
}

/// Pure payment-status derivation. The overdue milestone is the latest
/// financial activity (enrollment date or last confirmed payment) plus the
/// configured grace period: each payment restarts the clock.
///
/// An enrollment with nothing paid inside the grace window reports `Partiel`
/// ("awaiting first payment"), not `En retard`.
pub fn derive_payment_status(
    total_fees: f64,
    paid: f64,
    enrollment_date: NaiveDate,
    last_payment_date: Option<NaiveDate>,
    today: NaiveDate,
    grace_days: i64,
) -> PaymentStatus {
    let outstanding = (total_fees - paid).max(0.0);
    if outstanding <= AMOUNT_EPSILON {
        return PaymentStatus::UpToDate;
    }

    let anchor = match last_payment_date {
        Some(d) if d > enrollment_date => d,
        _ => enrollment_date,
    };
    let milestone = anchor + Duration::days(grace_days);
    if today > milestone {
        PaymentStatus::Overdue
    } else {
        PaymentStatus::Partial
    }
}

/// Folds a ledger of payment events from an empty state. Cancelled events
/// contribute nothing. The result is a pure function of the event set:
/// events are sorted by (payment_date, created_at, id) before folding, so
/// input order never matters.
pub fn replay_balance(
    events: &[PaymentEvent],
    total_fees: f64,
    enrollment_date: NaiveDate,
    today: NaiveDate,
    grace_days: i64,
) -> Balance {
    let mut confirmed: Vec<&PaymentEvent> = events.iter().filter(|e| e.confirmed).collect();
    confirmed.sort_by(|a, b| {
        (a.payment_date, a.created_at.as_str(), a.id.as_str()).cmp(&(
            b.payment_date,
            b.created_at.as_str(),
            b.id.as_str(),
        ))
    });

    let mut paid = 0.0_f64;
    let mut last_payment_date: Option<NaiveDate> = None;
    for e in confirmed {
        paid += e.amount;
        last_payment_date = Some(match last_payment_date {
            Some(prev) if prev > e.payment_date => prev,
            _ => e.payment_date,
        });
    }

    let outstanding = (total_fees - paid).max(0.0);
    let status = derive_payment_status(
        total_fees,
        paid,
        enrollment_date,
        last_payment_date,
        today,
        grace_days,
    );
    Balance {
        paid,
        outstanding,
        status,
    }
}

#[derive(Debug, Clone)]
struct EnrollmentRow {
    id: String,
    status: String,
    total_fees: f64,
    enrollment_date: NaiveDate,
    version: i64,
}

fn load_enrollment(conn: &Connection, enrollment_id: &str) -> Result<EnrollmentRow, LedgerError> {
    let row: Option<(String, String, f64, String, i64)> = conn
        .query_row(
            "SELECT id, status, total_fees, enrollment_date, version
             FROM enrollments WHERE id = ?",
            [enrollment_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
        .map_err(|e| LedgerError::new("db_query_failed", e.to_string()))?;

    let Some((id, status, total_fees, enrollment_date, version)) = row else {
        return Err(LedgerError::with_details(
            "not_found",
            "enrollment not found",
            json!({ "enrollmentId": enrollment_id }),
        ));
    };
    let enrollment_date = parse_date(&enrollment_date, "enrollment_date")?;
    Ok(EnrollmentRow {
        id,
        status,
        total_fees,
        enrollment_date,
        version,
    })
}

fn load_events(conn: &Connection, enrollment_id: &str) -> Result<Vec<PaymentEvent>, LedgerError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, amount, payment_date, created_at, status
             FROM payments WHERE enrollment_id = ?",
        )
        .map_err(|e| LedgerError::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([enrollment_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| LedgerError::new("db_query_failed", e.to_string()))?;

    let mut events = Vec::with_capacity(rows.len());
    for (id, amount, payment_date, created_at, status) in rows {
        let payment_date = parse_date(&payment_date, "payment_date")?;
        events.push(PaymentEvent {
            id,
            amount,
            payment_date,
            created_at,
            confirmed: status == "Confirmé",
        });
    }
    Ok(events)
}

/// Writes the replayed balance back onto the enrollment row with an
/// optimistic version check. Zero rows updated means another writer won the
/// race since `expected_version` was read.
fn store_balance(
    conn: &Connection,
    enrollment_id: &str,
    expected_version: i64,
    balance: &Balance,
    now: &str,
) -> Result<(), LedgerError> {
    let changed = conn
        .execute(
            "UPDATE enrollments
             SET paid_amount = ?, outstanding_amount = ?, payment_status = ?,
                 version = version + 1, updated_at = ?
             WHERE id = ? AND version = ?",
            (
                balance.paid,
                balance.outstanding,
                balance.status.as_str(),
                now,
                enrollment_id,
                expected_version,
            ),
        )
        .map_err(|e| LedgerError::new("db_update_failed", e.to_string()))?;
    if changed == 0 {
        return Err(LedgerError::with_details(
            "concurrency_conflict",
            "enrollment was modified concurrently; re-fetch and retry",
            json!({ "enrollmentId": enrollment_id }),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RecordPaymentInput<'a> {
    pub enrollment_id: &'a str,
    pub amount: f64,
    pub method: &'a str,
    pub payment_type: &'a str,
    pub payment_date: NaiveDate,
    pub reference_number: Option<&'a str>,
    pub notes: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub enrollment_id: String,
    pub amount: f64,
    pub paid_amount: f64,
    pub outstanding_amount: f64,
    pub payment_status: String,
}

pub fn record_payment(
    conn: &Connection,
    input: &RecordPaymentInput<'_>,
    today: NaiveDate,
    grace_days: i64,
    now: &str,
) -> Result<PaymentReceipt, LedgerError> {
    if input.amount <= 0.0 {
        return Err(LedgerError::with_details(
            "validation",
            "payment amount must be > 0",
            json!({ "enrollmentId": input.enrollment_id, "amount": input.amount }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| LedgerError::new("db_tx_failed", e.to_string()))?;

    let enrollment = load_enrollment(&tx, input.enrollment_id)?;
    if enrollment.status != "Actif" {
        return Err(LedgerError::with_details(
            "validation",
            "payments can only be recorded on an active enrollment",
            json!({ "enrollmentId": enrollment.id, "status": enrollment.status }),
        ));
    }

    let payment_id = uuid::Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO payments(id, enrollment_id, amount, payment_method, payment_type,
                              payment_date, reference_number, notes, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'Confirmé', ?)",
        (
            &payment_id,
            &enrollment.id,
            input.amount,
            input.method,
            input.payment_type,
            input.payment_date.to_string(),
            input.reference_number,
            input.notes,
            now,
        ),
    )
    .map_err(|e| LedgerError::new("db_insert_failed", e.to_string()))?;

    // The stored balance is always the replay of the full ledger, never an
    // increment on the cached counter.
    let events = load_events(&tx, &enrollment.id)?;
    let balance = replay_balance(
        &events,
        enrollment.total_fees,
        enrollment.enrollment_date,
        today,
        grace_days,
    );
    store_balance(&tx, &enrollment.id, enrollment.version, &balance, now)?;

    tx.commit()
        .map_err(|e| LedgerError::new("db_commit_failed", e.to_string()))?;

    Ok(PaymentReceipt {
        payment_id,
        enrollment_id: enrollment.id,
        amount: input.amount,
        paid_amount: balance.paid,
        outstanding_amount: balance.outstanding,
        payment_status: balance.status.as_str().to_string(),
    })
}

pub fn cancel_payment(
    conn: &Connection,
    payment_id: &str,
    today: NaiveDate,
    grace_days: i64,
    now: &str,
) -> Result<PaymentReceipt, LedgerError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| LedgerError::new("db_tx_failed", e.to_string()))?;

    let row: Option<(String, String, f64)> = tx
        .query_row(
            "SELECT enrollment_id, status, amount FROM payments WHERE id = ?",
            [payment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| LedgerError::new("db_query_failed", e.to_string()))?;
    let Some((enrollment_id, status, amount)) = row else {
        return Err(LedgerError::with_details(
            "not_found",
            "payment not found",
            json!({ "paymentId": payment_id }),
        ));
    };
    if status == "Annulé" {
        return Err(LedgerError::with_details(
            "not_found",
            "payment is already cancelled",
            json!({ "paymentId": payment_id }),
        ));
    }

    let enrollment = load_enrollment(&tx, &enrollment_id)?;

    tx.execute(
        "UPDATE payments SET status = 'Annulé' WHERE id = ?",
        [payment_id],
    )
    .map_err(|e| LedgerError::new("db_update_failed", e.to_string()))?;

    let events = load_events(&tx, &enrollment.id)?;
    let balance = replay_balance(
        &events,
        enrollment.total_fees,
        enrollment.enrollment_date,
        today,
        grace_days,
    );
    store_balance(&tx, &enrollment.id, enrollment.version, &balance, now)?;

    tx.commit()
        .map_err(|e| LedgerError::new("db_commit_failed", e.to_string()))?;

    Ok(PaymentReceipt {
        payment_id: payment_id.to_string(),
        enrollment_id: enrollment.id,
        amount: -amount,
        paid_amount: balance.paid,
        outstanding_amount: balance.outstanding,
        payment_status: balance.status.as_str().to_string(),
    })
}

/// Read-only projection: replays the ledger rather than trusting the stored
/// columns, so a drifted cache can never leak out of this call.
pub fn get_balance(
    conn: &Connection,
    enrollment_id: &str,
    today: NaiveDate,
    grace_days: i64,
) -> Result<Balance, LedgerError> {
    let enrollment = load_enrollment(conn, enrollment_id)?;
    let events = load_events(conn, enrollment_id)?;
    Ok(replay_balance(
        &events,
        enrollment.total_fees,
        enrollment.enrollment_date,
        today,
        grace_days,
    ))
}

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, LedgerError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        LedgerError::with_details(
            "validation",
            format!("{} is not a valid YYYY-MM-DD date", field),
            json!({ "field": field, "value": raw }),
        )
    })
}

/// Parses a wire date param, surfacing the offending field on failure.
pub fn parse_wire_date(raw: &str, field: &str) -> Result<NaiveDate, LedgerError> {
    parse_date(raw, field)
}
