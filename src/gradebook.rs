use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct GradeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GradeError {
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

/// Bulletin-precision rounding, same `Int(n*x + 0.5)/n` scheme the rest of
/// the suite uses, at two decimals.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Coefficient-weighted mean. `None` when there is nothing to average —
/// callers must treat that as "not evaluated", never as zero.
pub fn weighted_mean<I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for (value, weight) in pairs {
        sum += value * weight;
        denom += weight;
    }
    if denom > 0.0 {
        Some(sum / denom)
    } else {
        None
    }
}

/// Standard competition ranking over averages already sorted descending:
/// tied values share a rank and the next distinct value resumes at
/// `tied_rank + tie_group_size` (1, 1, 3).
pub fn competition_ranks(sorted_desc: &[f64]) -> Vec<i64> {
    let mut ranks = Vec::with_capacity(sorted_desc.len());
    for (i, avg) in sorted_desc.iter().enumerate() {
        if i > 0 && *avg == sorted_desc[i - 1] {
            ranks.push(ranks[i - 1]);
        } else {
            ranks.push(i as i64 + 1);
        }
    }
    ranks
}

#[derive(Debug, Clone)]
pub struct GradeInput<'a> {
    pub student_id: &'a str,
    pub subject_id: &'a str,
    pub class_id: &'a str,
    pub period_id: &'a str,
    pub grade: f64,
    pub coefficient: f64,
    pub evaluation_type: &'a str,
    pub evaluation_title: Option<&'a str>,
    pub evaluation_date: &'a str,
    pub teacher_comment: Option<&'a str>,
}

#[derive(Debug, Clone)]
struct ClassRow {
    level_id: String,
    academic_year_id: String,
}

fn load_class(conn: &Connection, class_id: &str) -> Result<ClassRow, GradeError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT level_id, academic_year_id FROM classes WHERE id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    let Some((level_id, academic_year_id)) = row else {
        return Err(GradeError::with_details(
            "not_found",
            "class not found",
            json!({ "classId": class_id }),
        ));
    };
    Ok(ClassRow {
        level_id,
        academic_year_id,
    })
}

fn check_period_in_year(
    conn: &Connection,
    period_id: &str,
    academic_year_id: &str,
) -> Result<(), GradeError> {
    let year: Option<String> = conn
        .query_row(
            "SELECT academic_year_id FROM academic_periods WHERE id = ?",
            [period_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    let Some(year) = year else {
        return Err(GradeError::with_details(
            "not_found",
            "academic period not found",
            json!({ "periodId": period_id }),
        ));
    };
    if year != academic_year_id {
        return Err(GradeError::with_details(
            "validation",
            "academic period belongs to a different academic year than the class",
            json!({ "periodId": period_id }),
        ));
    }
    Ok(())
}

fn check_subject_assigned(
    conn: &Connection,
    subject_id: &str,
    level_id: &str,
) -> Result<(), GradeError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE id = ?",
            [subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    if exists.is_none() {
        return Err(GradeError::with_details(
            "not_found",
            "subject not found",
            json!({ "subjectId": subject_id }),
        ));
    }

    let assigned: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM level_subjects WHERE level_id = ? AND subject_id = ?",
            (level_id, subject_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    if assigned.is_none() {
        return Err(GradeError::with_details(
            "invalid_assignment",
            "subject is not assigned to the class's level",
            json!({ "subjectId": subject_id, "levelId": level_id }),
        ));
    }
    Ok(())
}

fn check_open_enrollment(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
) -> Result<(), GradeError> {
    let open: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM enrollments
             WHERE student_id = ? AND class_id = ? AND status IN ('Actif', 'Suspendu')",
            (student_id, class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    if open.is_none() {
        return Err(GradeError::with_details(
            "validation",
            "student has no open enrollment in this class",
            json!({ "studentId": student_id, "classId": class_id }),
        ));
    }
    Ok(())
}

fn check_grade_value(grade: f64, coefficient: f64, scale_max: f64) -> Result<(), GradeError> {
    if !(0.0..=scale_max).contains(&grade) {
        return Err(GradeError::with_details(
            "validation",
            format!("grade must be within 0..={}", scale_max),
            json!({ "grade": grade, "scaleMax": scale_max }),
        ));
    }
    if coefficient <= 0.0 {
        return Err(GradeError::with_details(
            "validation",
            "coefficient must be > 0",
            json!({ "coefficient": coefficient }),
        ));
    }
    Ok(())
}

fn insert_grade(
    conn: &Connection,
    input: &GradeInput<'_>,
    now: &str,
) -> Result<String, GradeError> {
    let grade_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_entries(id, student_id, subject_id, class_id, academic_period_id,
                                   grade, coefficient, evaluation_type, evaluation_title,
                                   evaluation_date, teacher_comment, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id,
            input.student_id,
            input.subject_id,
            input.class_id,
            input.period_id,
            input.grade,
            input.coefficient,
            input.evaluation_type,
            input.evaluation_title,
            input.evaluation_date,
            input.teacher_comment,
            now,
        ),
    )
    .map_err(|e| GradeError::new("db_insert_failed", e.to_string()))?;
    Ok(grade_id)
}

pub fn record_grade(
    conn: &Connection,
    input: &GradeInput<'_>,
    scale_max: f64,
    now: &str,
) -> Result<String, GradeError> {
    check_grade_value(input.grade, input.coefficient, scale_max)?;
    let class = load_class(conn, input.class_id)?;
    check_period_in_year(conn, input.period_id, &class.academic_year_id)?;
    check_subject_assigned(conn, input.subject_id, &class.level_id)?;
    check_open_enrollment(conn, input.student_id, input.class_id)?;
    insert_grade(conn, input, now)
}

#[derive(Debug, Clone)]
pub struct ClassEvaluation<'a> {
    pub class_id: &'a str,
    pub subject_id: &'a str,
    pub period_id: &'a str,
    pub evaluation_type: &'a str,
    pub evaluation_title: &'a str,
    pub evaluation_date: &'a str,
    pub coefficient: f64,
}

#[derive(Debug, Clone)]
pub struct ClassGradeEntry {
    pub student_id: String,
    pub grade: f64,
    pub teacher_comment: Option<String>,
}

/// Batch entry for a whole class: one transaction, all rows or none. The
/// first invalid row aborts the batch with its index in the error details.
pub fn enter_class_grades(
    conn: &Connection,
    eval: &ClassEvaluation<'_>,
    entries: &[ClassGradeEntry],
    scale_max: f64,
    now: &str,
) -> Result<Vec<String>, GradeError> {
    if entries.is_empty() {
        return Err(GradeError::new("validation", "entries must not be empty"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| GradeError::new("db_tx_failed", e.to_string()))?;

    let class = load_class(&tx, eval.class_id)?;
    check_period_in_year(&tx, eval.period_id, &class.academic_year_id)?;
    check_subject_assigned(&tx, eval.subject_id, &class.level_id)?;

    let mut grade_ids = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let input = GradeInput {
            student_id: &entry.student_id,
            subject_id: eval.subject_id,
            class_id: eval.class_id,
            period_id: eval.period_id,
            grade: entry.grade,
            coefficient: eval.coefficient,
            evaluation_type: eval.evaluation_type,
            evaluation_title: Some(eval.evaluation_title),
            evaluation_date: eval.evaluation_date,
            teacher_comment: entry.teacher_comment.as_deref(),
        };
        let attach_index = |mut e: GradeError| {
            let details = e.details.get_or_insert_with(|| json!({}));
            if let Some(obj) = details.as_object_mut() {
                obj.insert("entryIndex".to_string(), json!(i));
            }
            e
        };
        check_grade_value(input.grade, input.coefficient, scale_max).map_err(attach_index)?;
        check_open_enrollment(&tx, input.student_id, input.class_id).map_err(attach_index)?;
        let id = insert_grade(&tx, &input, now).map_err(attach_index)?;
        grade_ids.push(id);
    }

    tx.commit()
        .map_err(|e| GradeError::new("db_commit_failed", e.to_string()))?;
    Ok(grade_ids)
}

pub fn delete_grade(conn: &Connection, grade_id: &str) -> Result<(), GradeError> {
    let deleted = conn
        .execute("DELETE FROM grade_entries WHERE id = ?", [grade_id])
        .map_err(|e| GradeError::new("db_delete_failed", e.to_string()))?;
    if deleted == 0 {
        return Err(GradeError::with_details(
            "not_found",
            "grade entry not found",
            json!({ "gradeId": grade_id }),
        ));
    }
    Ok(())
}

/// Weighted mean of every evaluation for (student, subject, period), weight =
/// each entry's own coefficient. Computed on demand from the rows; nothing is
/// cached.
pub fn subject_average(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    period_id: &str,
) -> Result<f64, GradeError> {
    let mut stmt = conn
        .prepare(
            "SELECT grade, coefficient FROM grade_entries
             WHERE student_id = ? AND subject_id = ? AND academic_period_id = ?",
        )
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    let pairs: Vec<(f64, f64)> = stmt
        .query_map((student_id, subject_id, period_id), |r| {
            Ok((r.get::<_, f64>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;

    match weighted_mean(pairs) {
        Some(avg) => Ok(round_off_2_decimals(avg)),
        None => Err(GradeError::with_details(
            "no_data",
            "no grade entries for this subject and period",
            json!({
                "studentId": student_id,
                "subjectId": subject_id,
                "periodId": period_id
            }),
        )),
    }
}

/// Subjects assigned to a level, with their averaging coefficients.
fn assigned_subjects(
    conn: &Connection,
    level_id: &str,
) -> Result<HashMap<String, f64>, GradeError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.coefficient
             FROM level_subjects ls
             JOIN subjects s ON s.id = ls.subject_id
             WHERE ls.level_id = ?",
        )
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    let rows: Vec<(String, f64)> = stmt
        .query_map([level_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    Ok(rows.into_iter().collect())
}

/// Per-subject (sum of grade*coef, sum of coef) for one student and period,
/// grouped in a single statement.
fn subject_sums_for_student(
    conn: &Connection,
    student_id: &str,
    period_id: &str,
) -> Result<Vec<(String, f64, f64)>, GradeError> {
    let mut stmt = conn
        .prepare(
            "SELECT subject_id, SUM(grade * coefficient), SUM(coefficient)
             FROM grade_entries
             WHERE student_id = ? AND academic_period_id = ?
             GROUP BY subject_id",
        )
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    stmt.query_map((student_id, period_id), |r| {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| GradeError::new("db_query_failed", e.to_string()))
}

fn general_average_from_sums(
    sums: &[(String, f64, f64)],
    assigned: &HashMap<String, f64>,
) -> Option<f64> {
    // Subjects with no entries are excluded from numerator and denominator;
    // entries for unassigned subjects (stale assignments) are skipped too.
    // Each subject mean is rounded to 2 decimals first, so the published
    // subject averages recompose exactly into the general average.
    weighted_mean(sums.iter().filter_map(|(subject_id, sum, denom)| {
        let subject_coefficient = assigned.get(subject_id)?;
        if *denom <= 0.0 {
            return None;
        }
        Some((round_off_2_decimals(sum / denom), *subject_coefficient))
    }))
}

/// Weighted mean of subject averages across the subjects assigned to the
/// class's level, weight = each subject's coefficient.
pub fn general_average(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
    period_id: &str,
) -> Result<f64, GradeError> {
    let class = load_class(conn, class_id)?;
    check_period_in_year(conn, period_id, &class.academic_year_id)?;
    let assigned = assigned_subjects(conn, &class.level_id)?;
    let sums = subject_sums_for_student(conn, student_id, period_id)?;

    match general_average_from_sums(&sums, &assigned) {
        Some(avg) => Ok(round_off_2_decimals(avg)),
        None => Err(GradeError::with_details(
            "no_data",
            "student has no graded subject for this period",
            json!({
                "studentId": student_id,
                "classId": class_id,
                "periodId": period_id
            }),
        )),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub student_id: String,
    pub display_name: String,
    pub general_average: f64,
    pub rank: i64,
}

/// Fresh, uncached ranking of the class for one period: descending by
/// 2-decimal general average, competition ranks on ties, alphabetical order
/// inside a tie group. Students with no graded subject are left out.
pub fn class_ranking(
    conn: &Connection,
    class_id: &str,
    period_id: &str,
) -> Result<Vec<RankedStudent>, GradeError> {
    let class = load_class(conn, class_id)?;
    check_period_in_year(conn, period_id, &class.academic_year_id)?;
    let assigned = assigned_subjects(conn, &class.level_id)?;

    let mut roster_stmt = conn
        .prepare(
            "SELECT e.student_id, s.last_name, s.first_name
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.class_id = ? AND e.status IN ('Actif', 'Suspendu')
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    let roster: Vec<(String, String)> = roster_stmt
        .query_map([class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok((r.get(0)?, format!("{}, {}", last, first)))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;

    // One grouped statement over the whole roster: the ranking never sees a
    // half-applied batch.
    let mut sums_stmt = conn
        .prepare(
            "SELECT student_id, subject_id, SUM(grade * coefficient), SUM(coefficient)
             FROM grade_entries
             WHERE academic_period_id = ?
             GROUP BY student_id, subject_id",
        )
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;
    let all_sums: Vec<(String, String, f64, f64)> = sums_stmt
        .query_map([period_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;

    let mut sums_by_student: HashMap<&str, Vec<(String, f64, f64)>> = HashMap::new();
    for (student_id, subject_id, sum, denom) in &all_sums {
        sums_by_student
            .entry(student_id.as_str())
            .or_default()
            .push((subject_id.clone(), *sum, *denom));
    }

    let mut rows: Vec<(String, String, f64)> = Vec::new();
    for (student_id, display_name) in &roster {
        let Some(sums) = sums_by_student.get(student_id.as_str()) else {
            continue;
        };
        if let Some(avg) = general_average_from_sums(sums, &assigned) {
            rows.push((
                student_id.clone(),
                display_name.clone(),
                round_off_2_decimals(avg),
            ));
        }
    }

    rows.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    let averages: Vec<f64> = rows.iter().map(|r| r.2).collect();
    let ranks = competition_ranks(&averages);

    Ok(rows
        .into_iter()
        .zip(ranks)
        .map(|((student_id, display_name, general_average), rank)| RankedStudent {
            student_id,
            display_name,
            general_average,
            rank,
        })
        .collect())
}
