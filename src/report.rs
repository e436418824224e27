use std::fmt::Write;

use chrono::NaiveDate;

use crate::flags;
use crate::models::{
    AssessmentSubject, AttendanceRecord, AttendanceStatus, DisciplineRecord, FlagRule,
    GradeRecord, RuleSummary, StudentFlag, StudentProfile, StudentRecord,
};
use crate::store::StudentStore;

const RECENT_INCIDENTS: usize = 3;

pub fn summarize_by_rule(flags: &[StudentFlag], rules: &[FlagRule]) -> Vec<RuleSummary> {
    let mut summaries: Vec<RuleSummary> = rules
        .iter()
        .filter(|rule| rule.active)
        .map(|rule| RuleSummary {
            rule_name: rule.name.clone(),
            category: rule.category.as_str().to_string(),
            flagged_count: flags.iter().filter(|f| f.rule.id == rule.id).count(),
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.flagged_count
            .cmp(&a.flagged_count)
            .then_with(|| a.rule_name.cmp(&b.rule_name))
    });
    summaries
}

pub fn build_flag_report(
    scope: Option<&str>,
    generated_on: NaiveDate,
    flags: &[StudentFlag],
    rules: &[FlagRule],
) -> String {
    let summaries = summarize_by_rule(flags, rules);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all students");

    let _ = writeln!(output, "# Student Flag Report");
    let _ = writeln!(output, "Generated for {} on {}", scope_label, generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Rule Summary");

    if summaries.is_empty() {
        let _ = writeln!(output, "No active flag rules.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {} flagged",
                summary.rule_name, summary.category, summary.flagged_count
            );
        }
    }

    let mut ordered = flags.to_vec();
    ordered.sort_by(|a, b| {
        a.student
            .last_name
            .cmp(&b.student.last_name)
            .then_with(|| a.student.first_name.cmp(&b.student.first_name))
            .then_with(|| a.rule.name.cmp(&b.rule.name))
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Flagged Students");

    if ordered.is_empty() {
        let _ = writeln!(output, "No students flagged.");
    } else {
        for flag in ordered.iter() {
            let _ = writeln!(
                output,
                "- {} (grade {}, {}): {} - {}",
                flag.student.full_name(),
                flag.student.grade,
                flag.student.homeroom,
                flag.rule.name,
                flag.result.message
            );
        }
    }

    output
}

pub async fn load_profile<S: StudentStore>(
    store: &S,
    student: &StudentRecord,
) -> anyhow::Result<StudentProfile> {
    let attendance = store.attendance_for(student.id).await?;
    let grades = store.grades_for(student.id).await?;
    let discipline = store.discipline_for(student.id).await?;
    let assessments = store.assessments_for(student.id).await?;

    let latest_assessments = [
        AssessmentSubject::Reading,
        AssessmentSubject::Math,
        AssessmentSubject::Science,
        AssessmentSubject::Writing,
    ]
    .into_iter()
    .filter_map(|subject| flags::latest_assessment(student.id, subject, &assessments).cloned())
    .collect();

    let own_attendance: Vec<&AttendanceRecord> = attendance
        .iter()
        .filter(|r| r.student_id == student.id)
        .collect();
    let last_absence = own_attendance
        .iter()
        .filter(|r| r.status == AttendanceStatus::Absent)
        .map(|r| r.attended_on)
        .max();

    let mut own_grades: Vec<GradeRecord> = grades
        .iter()
        .filter(|r| r.student_id == student.id)
        .cloned()
        .collect();
    own_grades.sort_by(|a, b| a.course.cmp(&b.course).then(b.recorded_on.cmp(&a.recorded_on)));

    let mut recent_incidents: Vec<DisciplineRecord> = discipline
        .iter()
        .filter(|r| r.student_id == student.id)
        .cloned()
        .collect();
    recent_incidents.sort_by(|a, b| b.incident_date.cmp(&a.incident_date));
    recent_incidents.truncate(RECENT_INCIDENTS);

    Ok(StudentProfile {
        attendance_rate: flags::attendance_rate(student.id, &attendance),
        attendance_days: own_attendance.len(),
        last_absence,
        average_grade: flags::average_grade(student.id, &grades),
        grades: own_grades,
        discipline_count: flags::discipline_count(student.id, &discipline),
        recent_incidents,
        latest_assessments,
    })
}

/// Markdown profile card for one student.
pub fn build_student_profile(
    student: &StudentRecord,
    profile: &StudentProfile,
    flags: &[StudentFlag],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {}", student.full_name());
    let _ = writeln!(
        output,
        "Grade {} · Homeroom {} · Gender {} · Student number {}",
        student.grade,
        student.homeroom,
        if student.gender.is_empty() { "n/a" } else { student.gender.as_str() },
        student.reference_number.as_deref().unwrap_or("n/a")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");

    match profile.attendance_rate {
        Some(rate) => {
            let _ = writeln!(
                output,
                "- Attendance: {:.1}% over {} days",
                rate, profile.attendance_days
            );
        }
        None => {
            let _ = writeln!(output, "- Attendance: no records");
        }
    }
    if let Some(day) = profile.last_absence {
        let _ = writeln!(output, "- Last absence: {}", day);
    }
    match profile.average_grade {
        Some(value) => {
            let _ = writeln!(output, "- Average grade: {:.2}", value);
        }
        None => {
            let _ = writeln!(output, "- Average grade: no records");
        }
    }
    let _ = writeln!(output, "- Discipline records: {}", profile.discipline_count);

    if !profile.grades.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Grades");
        for grade in profile.grades.iter() {
            let _ = writeln!(
                output,
                "- {}: {:.2} ({})",
                grade.course, grade.value, grade.recorded_on
            );
        }
    }

    if !profile.recent_incidents.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Recent Incidents");
        for incident in profile.recent_incidents.iter() {
            let _ = writeln!(output, "- {}: {}", incident.incident_date, incident.description);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Assessments");

    if profile.latest_assessments.is_empty() {
        let _ = writeln!(output, "No assessments recorded.");
    } else {
        for record in profile.latest_assessments.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {} on {}",
                record.subject.as_str(),
                record.source,
                record.score,
                record.test_date
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Flags");

    let own: Vec<&StudentFlag> = flags.iter().filter(|f| f.student.id == student.id).collect();
    if own.is_empty() {
        let _ = writeln!(output, "No active flags.");
    } else {
        for flag in own {
            let _ = writeln!(
                output,
                "- {} [{}]: {}",
                flag.rule.name, flag.rule.color, flag.result.message
            );
        }
    }

    output
}
