use anyhow::Context;
use chrono::{Duration, NaiveDate};
use clap::ValueEnum;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    AssessmentRecord, AssessmentSubject, AttendanceRecord, AttendanceStatus, DisciplineRecord,
    GradeRecord, StudentRecord,
};
use crate::store::StudentStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed [`StudentStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl StudentStore for PgStore {
    async fn all_students(&self) -> anyhow::Result<Vec<StudentRecord>> {
        let rows = sqlx::query(
            "SELECT id, first_name, last_name, grade, homeroom, gender, reference_number \
             FROM student_records.students \
             ORDER BY last_name, first_name",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load students")?;

        Ok(rows
            .into_iter()
            .map(|row| StudentRecord {
                id: row.get("id"),
                first_name: row.get("first_name"),
                last_name: row.get("last_name"),
                grade: row.get("grade"),
                homeroom: row.get("homeroom"),
                gender: row.get("gender"),
                reference_number: row.get("reference_number"),
            })
            .collect())
    }

    async fn attendance_for(&self, student_id: Uuid) -> anyhow::Result<Vec<AttendanceRecord>> {
        let rows = sqlx::query(
            "SELECT attended_on, status FROM student_records.attendance WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load attendance")?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let status: String = row.get("status");
                AttendanceRecord {
                    student_id,
                    attended_on: row.get("attended_on"),
                    status: AttendanceStatus::parse(&status),
                }
            })
            .collect())
    }

    async fn grades_for(&self, student_id: Uuid) -> anyhow::Result<Vec<GradeRecord>> {
        let rows = sqlx::query(
            "SELECT course, value, recorded_on FROM student_records.grades WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load grades")?;

        Ok(rows
            .into_iter()
            .map(|row| GradeRecord {
                student_id,
                course: row.get("course"),
                value: row.get("value"),
                recorded_on: row.get("recorded_on"),
            })
            .collect())
    }

    async fn discipline_for(&self, student_id: Uuid) -> anyhow::Result<Vec<DisciplineRecord>> {
        let rows = sqlx::query(
            "SELECT incident_date, description FROM student_records.discipline \
             WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load discipline records")?;

        Ok(rows
            .into_iter()
            .map(|row| DisciplineRecord {
                student_id,
                incident_date: row.get("incident_date"),
                description: row.get("description"),
            })
            .collect())
    }

    async fn assessments_for(&self, student_id: Uuid) -> anyhow::Result<Vec<AssessmentRecord>> {
        let rows = sqlx::query(
            "SELECT source, subject, test_date, score FROM student_records.assessments \
             WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load assessments")?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let subject: String = row.get("subject");
                AssessmentRecord {
                    student_id,
                    source: row.get("source"),
                    subject: AssessmentSubject::parse(&subject),
                    test_date: row.get("test_date"),
                    score: row.get("score"),
                }
            })
            .collect())
    }
}

async fn upsert_student(
    pool: &PgPool,
    first_name: &str,
    last_name: &str,
    grade: i32,
    homeroom: &str,
    gender: &str,
    reference_number: Option<&str>,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO student_records.students
        (id, first_name, last_name, grade, homeroom, gender, reference_number)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (reference_number) DO UPDATE
        SET first_name = EXCLUDED.first_name,
            last_name = EXCLUDED.last_name,
            grade = EXCLUDED.grade,
            homeroom = EXCLUDED.homeroom,
            gender = EXCLUDED.gender
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(first_name)
    .bind(last_name)
    .bind(grade)
    .bind(homeroom)
    .bind(gender)
    .bind(reference_number)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn student_id_for_reference(pool: &PgPool, reference: &str) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query("SELECT id FROM student_records.students WHERE reference_number = $1")
        .bind(reference)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| row.get("id")))
}

async fn insert_attendance(
    pool: &PgPool,
    student_id: Uuid,
    attended_on: NaiveDate,
    status: AttendanceStatus,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO student_records.attendance (id, student_id, attended_on, status)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (student_id, attended_on) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(attended_on)
    .bind(status.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn insert_grade(
    pool: &PgPool,
    student_id: Uuid,
    course: &str,
    value: f64,
    recorded_on: NaiveDate,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO student_records.grades (id, student_id, course, value, recorded_on)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(course)
    .bind(value)
    .bind(recorded_on)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn insert_discipline(
    pool: &PgPool,
    student_id: Uuid,
    incident_date: NaiveDate,
    description: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO student_records.discipline (id, student_id, incident_date, description)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(incident_date)
    .bind(description)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn insert_assessment(
    pool: &PgPool,
    student_id: Uuid,
    source: &str,
    subject: AssessmentSubject,
    test_date: NaiveDate,
    score: f64,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO student_records.assessments (id, student_id, source, subject, test_date, score)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(source)
    .bind(subject.as_str())
    .bind(test_date)
    .bind(score)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        ("Avery", "Lee", 9, "9A", "F", "41002001"),
        ("Jules", "Moreno", 10, "10B", "M", "41002002"),
        ("Kiara", "Patel", 9, "9A", "F", "41002003"),
    ];

    let start = NaiveDate::from_ymd_opt(2026, 1, 5).context("invalid date")?;
    for (index, (first, last, grade, homeroom, gender, reference)) in
        students.into_iter().enumerate()
    {
        let id = upsert_student(pool, first, last, grade, homeroom, gender, Some(reference)).await?;

        let existing: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM student_records.attendance WHERE student_id = $1")
                .bind(id)
                .fetch_one(pool)
                .await?
                .get("n");
        if existing > 0 {
            continue;
        }

        // Avery misses every fifth day; the others miss one day in twenty.
        let miss_every = if index == 0 { 5 } else { 20 };
        for day in 0..20i64 {
            let status = if (day + 1) % miss_every == 0 {
                AttendanceStatus::Absent
            } else {
                AttendanceStatus::Present
            };
            insert_attendance(pool, id, start + Duration::days(day), status).await?;
        }

        let base = 2.4 + index as f64 * 0.6;
        for (offset, course) in ["Algebra I", "Biology", "English 9"].into_iter().enumerate() {
            insert_grade(pool, id, course, base + offset as f64 * 0.2, start).await?;
        }

        if index == 2 {
            for day in [12, 19, 26] {
                let date = NaiveDate::from_ymd_opt(2026, 1, day).context("invalid date")?;
                insert_discipline(pool, id, date, "Referral for classroom disruption").await?;
            }
        }

        for (subject, fall, winter) in [
            (AssessmentSubject::Reading, 410.0, 455.0 + index as f64 * 40.0),
            (AssessmentSubject::Math, 390.0, 430.0 - index as f64 * 15.0),
        ] {
            let fall_date = NaiveDate::from_ymd_opt(2025, 9, 15).context("invalid date")?;
            let winter_date = NaiveDate::from_ymd_opt(2026, 1, 14).context("invalid date")?;
            insert_assessment(pool, id, "STAR", subject, fall_date, fall).await?;
            insert_assessment(pool, id, "STAR", subject, winter_date, winter).await?;
        }
    }

    info!("seeded sample students and records");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImportKind {
    Students,
    Attendance,
    Grades,
    Discipline,
    Assessments,
}

#[derive(serde::Deserialize)]
struct StudentRow {
    first_name: String,
    last_name: String,
    grade: i32,
    homeroom: String,
    #[serde(default)]
    gender: String,
    reference_number: Option<String>,
}

#[derive(serde::Deserialize)]
struct AttendanceRow {
    reference_number: String,
    attended_on: NaiveDate,
    status: String,
}

#[derive(serde::Deserialize)]
struct GradeRow {
    reference_number: String,
    course: String,
    value: f64,
    recorded_on: NaiveDate,
}

#[derive(serde::Deserialize)]
struct DisciplineRow {
    reference_number: String,
    incident_date: NaiveDate,
    description: String,
}

#[derive(serde::Deserialize)]
struct AssessmentRow {
    reference_number: String,
    source: String,
    subject: String,
    test_date: NaiveDate,
    score: f64,
}

/// Record rows name their student by reference number; unknown students are skipped.
pub async fn import_csv(
    pool: &PgPool,
    kind: ImportKind,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    match kind {
        ImportKind::Students => {
            for result in reader.deserialize::<StudentRow>() {
                let row = result?;
                let reference = row
                    .reference_number
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty());
                upsert_student(
                    pool,
                    &row.first_name,
                    &row.last_name,
                    row.grade,
                    &row.homeroom,
                    &row.gender,
                    reference,
                )
                .await?;
                inserted += 1;
            }
        }
        ImportKind::Attendance => {
            for result in reader.deserialize::<AttendanceRow>() {
                let row = result?;
                let Some(id) = resolve(pool, &row.reference_number).await? else {
                    continue;
                };
                let status = AttendanceStatus::parse(&row.status);
                if insert_attendance(pool, id, row.attended_on, status).await? {
                    inserted += 1;
                }
            }
        }
        ImportKind::Grades => {
            for result in reader.deserialize::<GradeRow>() {
                let row = result?;
                let Some(id) = resolve(pool, &row.reference_number).await? else {
                    continue;
                };
                if insert_grade(pool, id, &row.course, row.value, row.recorded_on).await? {
                    inserted += 1;
                }
            }
        }
        ImportKind::Discipline => {
            for result in reader.deserialize::<DisciplineRow>() {
                let row = result?;
                let Some(id) = resolve(pool, &row.reference_number).await? else {
                    continue;
                };
                if insert_discipline(pool, id, row.incident_date, &row.description).await? {
                    inserted += 1;
                }
            }
        }
        ImportKind::Assessments => {
            for result in reader.deserialize::<AssessmentRow>() {
                let row = result?;
                let Some(id) = resolve(pool, &row.reference_number).await? else {
                    continue;
                };
                let subject = AssessmentSubject::parse(&row.subject);
                if insert_assessment(pool, id, &row.source, subject, row.test_date, row.score)
                    .await?
                {
                    inserted += 1;
                }
            }
        }
    }

    Ok(inserted)
}

async fn resolve(pool: &PgPool, reference: &str) -> anyhow::Result<Option<Uuid>> {
    let reference = reference.trim();
    let id = student_id_for_reference(pool, reference).await?;
    if id.is_none() {
        warn!(reference_number = %reference, "skipping row for unknown student");
    }
    Ok(id)
}
