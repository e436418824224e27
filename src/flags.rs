use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    AssessmentRecord, AssessmentSubject, AttendanceRecord, DisciplineRecord, FlagCategory,
    FlagResult, FlagRule, GradeRecord, StudentFlag, StudentRecord,
};
use crate::store::StudentStore;

/// Aggregated value a rule threshold is compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    AttendanceRate(f64),
    AverageGrade(f64),
    DisciplineCount(usize),
    LatestAssessment(AssessmentRecord),
}

impl Metric {
    pub fn value(&self) -> f64 {
        match self {
            Metric::AttendanceRate(rate) => *rate,
            Metric::AverageGrade(value) => *value,
            Metric::DisciplineCount(count) => *count as f64,
            Metric::LatestAssessment(record) => record.score,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Metric::AttendanceRate(rate) => format!("Attendance rate {rate:.1}%"),
            Metric::AverageGrade(value) => format!("Average grade {value:.2}"),
            Metric::DisciplineCount(1) => "1 discipline record".to_string(),
            Metric::DisciplineCount(count) => format!("{count} discipline records"),
            Metric::LatestAssessment(record) => format!(
                "Latest {} score {} on {}",
                record.subject.as_str(),
                record.score,
                record.test_date
            ),
        }
    }
}

/// Percentage of recorded days the student was in the building.
pub fn attendance_rate(student_id: Uuid, records: &[AttendanceRecord]) -> Option<f64> {
    let mut total = 0usize;
    let mut present = 0usize;

    for record in records.iter().filter(|r| r.student_id == student_id) {
        total += 1;
        if record.status.counts_as_present() {
            present += 1;
        }
    }

    if total == 0 {
        return None;
    }
    Some(present as f64 * 100.0 / total as f64)
}

pub fn average_grade(student_id: Uuid, records: &[GradeRecord]) -> Option<f64> {
    let values: Vec<f64> = records
        .iter()
        .filter(|r| r.student_id == student_id)
        .map(|r| r.value)
        .collect();

    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn discipline_count(student_id: Uuid, records: &[DisciplineRecord]) -> usize {
    records.iter().filter(|r| r.student_id == student_id).count()
}

pub fn latest_assessment<'a>(
    student_id: Uuid,
    subject: AssessmentSubject,
    records: &'a [AssessmentRecord],
) -> Option<&'a AssessmentRecord> {
    records
        .iter()
        .filter(|r| r.student_id == student_id && r.subject == subject)
        .max_by_key(|r| r.test_date)
}

async fn load_metric<S: StudentStore>(
    store: &S,
    student_id: Uuid,
    category: &FlagCategory,
) -> anyhow::Result<Option<Metric>> {
    let metric = match category {
        FlagCategory::Attendance => {
            let records = store.attendance_for(student_id).await?;
            attendance_rate(student_id, &records).map(Metric::AttendanceRate)
        }
        FlagCategory::Grades => {
            let records = store.grades_for(student_id).await?;
            average_grade(student_id, &records).map(Metric::AverageGrade)
        }
        FlagCategory::Discipline => {
            let records = store.discipline_for(student_id).await?;
            match discipline_count(student_id, &records) {
                0 => None,
                count => Some(Metric::DisciplineCount(count)),
            }
        }
        FlagCategory::Unrecognized(label) => {
            debug!(category = %label, "skipping rule with unrecognized category");
            None
        }
        assessment => {
            let Some(subject) = assessment.assessment_subject() else {
                return Ok(None);
            };
            let records = store.assessments_for(student_id).await?;
            latest_assessment(student_id, subject, &records)
                .cloned()
                .map(Metric::LatestAssessment)
        }
    };
    Ok(metric)
}

/// Checks one rule against one student. Store failures are reported as not flagged.
pub async fn evaluate<S: StudentStore>(
    store: &S,
    student: &StudentRecord,
    rule: &FlagRule,
) -> FlagResult {
    match load_metric(store, student.id, &rule.category).await {
        Ok(Some(metric)) => FlagResult {
            is_flagged: rule.condition.matches(metric.value(), rule.threshold),
            message: metric.describe(),
        },
        Ok(None) => FlagResult::quiet(),
        Err(err) => {
            warn!(
                student_id = %student.id,
                rule = %rule.name,
                error = %err,
                "flag evaluation failed; treating as not flagged"
            );
            FlagResult::quiet()
        }
    }
}

/// Empty filter lists match every student.
pub fn rule_applies(rule: &FlagRule, student: &StudentRecord) -> bool {
    let grade_ok = rule.grades.is_empty() || rule.grades.contains(&student.grade);
    let homeroom_ok = rule.homerooms.is_empty()
        || rule
            .homerooms
            .iter()
            .any(|h| h.eq_ignore_ascii_case(&student.homeroom));
    grade_ok && homeroom_ok
}

/// Runs every active rule against the students it applies to and keeps the hits.
pub async fn evaluate_rules<S: StudentStore>(
    store: &S,
    students: &[StudentRecord],
    rules: &[FlagRule],
) -> Vec<StudentFlag> {
    let mut flags = Vec::new();

    for student in students {
        for rule in rules.iter().filter(|r| r.active) {
            if !rule_applies(rule, student) {
                continue;
            }
            let result = evaluate(store, student, rule).await;
            if result.is_flagged {
                flags.push(StudentFlag {
                    student: student.clone(),
                    rule: rule.clone(),
                    result,
                });
            }
        }
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlagCondition, GradeRecord};
    use crate::store::memory::MemoryStore;
    use chrono::NaiveDate;

    fn rule(category: &str, condition: &str, threshold: f64) -> FlagRule {
        FlagRule {
            id: Uuid::new_v4(),
            name: format!("{category} {condition} {threshold}"),
            category: FlagCategory::from(category.to_string()),
            condition: FlagCondition::from(condition.to_string()),
            threshold,
            grades: Vec::new(),
            homerooms: Vec::new(),
            color: "#dc2626".to_string(),
            active: true,
        }
    }

    fn discipline(student_id: Uuid, day: u32) -> DisciplineRecord {
        DisciplineRecord {
            student_id,
            incident_date: NaiveDate::from_ymd_opt(2026, 2, day).expect("date"),
            description: "Disruption in class".to_string(),
        }
    }

    #[tokio::test]
    async fn no_attendance_records_is_quiet() {
        let store = MemoryStore::with_students(&["Avery Lee"]);
        let student = store.student("Avery Lee");

        let result = evaluate(&store, &student, &rule("attendance", "below", 90.0)).await;
        assert!(!result.is_flagged);
        assert!(result.message.is_empty());
    }

    #[tokio::test]
    async fn attendance_below_threshold_flags() {
        let mut store = MemoryStore::with_students(&["Avery Lee", "Jules Moreno"]);
        let avery = store.student("Avery Lee");
        let jules = store.student("Jules Moreno");
        store.add_attendance(avery.id, 17, 3);
        store.add_attendance(jules.id, 19, 1);
        let below = rule("attendance", "below", 90.0);

        let flagged = evaluate(&store, &avery, &below).await;
        assert!(flagged.is_flagged);
        assert_eq!(flagged.message, "Attendance rate 85.0%");

        let fine = evaluate(&store, &jules, &below).await;
        assert!(!fine.is_flagged);
        assert_eq!(fine.message, "Attendance rate 95.0%");
    }

    #[tokio::test]
    async fn attendance_exactly_at_threshold_is_not_below() {
        let mut store = MemoryStore::with_students(&["Avery Lee", "Jules Moreno"]);
        let avery = store.student("Avery Lee");
        let jules = store.student("Jules Moreno");
        store.add_attendance(avery.id, 57, 43);
        store.add_attendance(jules.id, 58, 42);

        let at_57 = evaluate(&store, &avery, &rule("attendance", "below", 57.0)).await;
        assert!(!at_57.is_flagged);
        assert_eq!(at_57.message, "Attendance rate 57.0%");

        let at_58 = evaluate(&store, &jules, &rule("attendance", "below", 58.0)).await;
        assert!(!at_58.is_flagged);
        assert_eq!(at_58.message, "Attendance rate 58.0%");
    }

    #[tokio::test]
    async fn discipline_above_threshold_reports_count() {
        let mut store = MemoryStore::with_students(&["Kiara Patel"]);
        let student = store.student("Kiara Patel");
        for day in 1..=3 {
            store.discipline.push(discipline(student.id, day));
        }

        let result = evaluate(&store, &student, &rule("discipline", "above", 2.0)).await;
        assert!(result.is_flagged);
        assert_eq!(result.message, "3 discipline records");
    }

    #[tokio::test]
    async fn assessment_uses_most_recent_score_for_subject() {
        let mut store = MemoryStore::with_students(&["Avery Lee"]);
        let student = store.student("Avery Lee");
        store.add_assessment(student.id, AssessmentSubject::Reading, (2025, 9, 10), 150.0);
        store.add_assessment(student.id, AssessmentSubject::Reading, (2026, 1, 12), 180.0);
        store.add_assessment(student.id, AssessmentSubject::Math, (2026, 2, 1), 120.0);

        let result = evaluate(&store, &student, &rule("reading-assessment", "below", 160.0)).await;
        assert!(!result.is_flagged);
        assert_eq!(result.message, "Latest reading score 180 on 2026-01-12");

        let math = evaluate(&store, &student, &rule("math-assessment", "below", 160.0)).await;
        assert!(math.is_flagged);

        let science = evaluate(&store, &student, &rule("science-assessment", "below", 160.0)).await;
        assert_eq!(science, FlagResult::quiet());
    }

    #[tokio::test]
    async fn grades_average_and_equals_condition() {
        let mut store = MemoryStore::with_students(&["Jules Moreno"]);
        let student = store.student("Jules Moreno");
        for value in [2.0, 3.0, 4.0] {
            store.grades.push(GradeRecord {
                student_id: student.id,
                course: "Biology".to_string(),
                value,
                recorded_on: NaiveDate::from_ymd_opt(2026, 1, 20).expect("date"),
            });
        }

        let result = evaluate(&store, &student, &rule("grades", "equals", 3.0)).await;
        assert!(result.is_flagged);
        assert_eq!(result.message, "Average grade 3.00");
    }

    #[tokio::test]
    async fn malformed_rules_never_flag() {
        let mut store = MemoryStore::with_students(&["Kiara Patel"]);
        let student = store.student("Kiara Patel");
        for day in 1..=5 {
            store.discipline.push(discipline(student.id, day));
        }

        let unknown_condition = evaluate(&store, &student, &rule("discipline", "between", 1.0)).await;
        assert!(!unknown_condition.is_flagged);

        let unknown_category = evaluate(&store, &student, &rule("behaviour", "above", 1.0)).await;
        assert_eq!(unknown_category, FlagResult::quiet());
    }

    #[tokio::test]
    async fn store_failure_is_not_flagged() {
        let mut store = MemoryStore::with_students(&["Kiara Patel"]);
        let student = store.student("Kiara Patel");
        store.add_attendance(student.id, 1, 9);
        store.fail.set(true);

        let result = evaluate(&store, &student, &rule("attendance", "below", 90.0)).await;
        assert_eq!(result, FlagResult::quiet());
    }

    #[test]
    fn aggregation_ignores_other_students() {
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();
        let records = vec![discipline(mine, 1), discipline(other, 2), discipline(other, 3)];
        assert_eq!(discipline_count(mine, &records), 1);
        assert_eq!(Metric::DisciplineCount(1).describe(), "1 discipline record");
    }

    #[tokio::test]
    async fn filters_and_inactive_rules_are_skipped() {
        let mut store = MemoryStore::with_students(&["Avery Lee", "Jules Moreno"]);
        let avery = store.student("Avery Lee");
        let mut jules = store.student("Jules Moreno");
        jules.grade = 11;
        jules.homeroom = "11C".to_string();
        store.add_attendance(avery.id, 5, 5);
        store.add_attendance(jules.id, 5, 5);

        let mut ninth_only = rule("attendance", "below", 90.0);
        ninth_only.grades = vec![9];
        let mut homeroom_only = rule("attendance", "below", 90.0);
        homeroom_only.homerooms = vec!["11c".to_string()];
        let mut inactive = rule("attendance", "below", 90.0);
        inactive.active = false;

        let flags = evaluate_rules(
            &store,
            &[avery.clone(), jules.clone()],
            &[ninth_only.clone(), homeroom_only.clone(), inactive],
        )
        .await;

        let hits: Vec<(String, Uuid)> = flags
            .iter()
            .map(|f| (f.student.full_name(), f.rule.id))
            .collect();
        assert_eq!(
            hits,
            vec![
                ("Avery Lee".to_string(), ninth_only.id),
                ("Jules Moreno".to_string(), homeroom_only.id),
            ]
        );
    }
}
