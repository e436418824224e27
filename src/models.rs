use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub grade: i32,
    pub homeroom: String,
    pub gender: String,
    pub reference_number: Option<String>,
}

impl StudentRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Tardy,
    Absent,
    Excused,
    Other,
}

impl AttendanceStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "present" | "p" => Self::Present,
            "tardy" | "late" | "t" => Self::Tardy,
            "absent" | "a" => Self::Absent,
            "excused" | "e" => Self::Excused,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Tardy => "tardy",
            Self::Absent => "absent",
            Self::Excused => "excused",
            Self::Other => "other",
        }
    }

    /// Tardy days still count as a day in the building.
    pub fn counts_as_present(&self) -> bool {
        matches!(self, Self::Present | Self::Tardy)
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub student_id: Uuid,
    pub attended_on: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub student_id: Uuid,
    pub course: String,
    pub value: f64,
    pub recorded_on: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct DisciplineRecord {
    pub student_id: Uuid,
    pub incident_date: NaiveDate,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssessmentSubject {
    Reading,
    Math,
    Science,
    Writing,
    Other,
}

impl AssessmentSubject {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "reading" | "ela" | "literacy" => Self::Reading,
            "math" | "mathematics" => Self::Math,
            "science" => Self::Science,
            "writing" => Self::Writing,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Math => "math",
            Self::Science => "science",
            Self::Writing => "writing",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentRecord {
    pub student_id: Uuid,
    pub source: String,
    pub subject: AssessmentSubject,
    pub test_date: NaiveDate,
    pub score: f64,
}

/// Metric domain a rule checks. Unknown labels survive loading so a hand-edited
/// rule file never fails to parse; such rules simply never flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FlagCategory {
    Attendance,
    Grades,
    Discipline,
    ReadingAssessment,
    MathAssessment,
    ScienceAssessment,
    WritingAssessment,
    Unrecognized(String),
}

impl FlagCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Attendance => "attendance",
            Self::Grades => "grades",
            Self::Discipline => "discipline",
            Self::ReadingAssessment => "reading-assessment",
            Self::MathAssessment => "math-assessment",
            Self::ScienceAssessment => "science-assessment",
            Self::WritingAssessment => "writing-assessment",
            Self::Unrecognized(value) => value,
        }
    }

    pub fn assessment_subject(&self) -> Option<AssessmentSubject> {
        match self {
            Self::ReadingAssessment => Some(AssessmentSubject::Reading),
            Self::MathAssessment => Some(AssessmentSubject::Math),
            Self::ScienceAssessment => Some(AssessmentSubject::Science),
            Self::WritingAssessment => Some(AssessmentSubject::Writing),
            _ => None,
        }
    }
}

impl From<String> for FlagCategory {
    fn from(value: String) -> Self {
        match value.as_str() {
            "attendance" => Self::Attendance,
            "grades" => Self::Grades,
            "discipline" => Self::Discipline,
            "reading-assessment" => Self::ReadingAssessment,
            "math-assessment" => Self::MathAssessment,
            "science-assessment" => Self::ScienceAssessment,
            "writing-assessment" => Self::WritingAssessment,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<FlagCategory> for String {
    fn from(value: FlagCategory) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FlagCondition {
    Below,
    Above,
    Equals,
    Unrecognized(String),
}

impl FlagCondition {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Below => "below",
            Self::Above => "above",
            Self::Equals => "equals",
            Self::Unrecognized(value) => value,
        }
    }

    pub fn matches(&self, metric: f64, threshold: f64) -> bool {
        match self {
            Self::Below => metric < threshold,
            Self::Above => metric > threshold,
            Self::Equals => metric == threshold,
            Self::Unrecognized(_) => false,
        }
    }
}

impl From<String> for FlagCondition {
    fn from(value: String) -> Self {
        match value.as_str() {
            "below" => Self::Below,
            "above" => Self::Above,
            "equals" => Self::Equals,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<FlagCondition> for String {
    fn from(value: FlagCondition) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRule {
    pub id: Uuid,
    pub name: String,
    pub category: FlagCategory,
    pub condition: FlagCondition,
    pub threshold: f64,
    #[serde(default)]
    pub grades: Vec<i32>,
    #[serde(default)]
    pub homerooms: Vec<String>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_color() -> String {
    "#d97706".to_string()
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagResult {
    pub is_flagged: bool,
    pub message: String,
}

impl FlagResult {
    pub fn quiet() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct StudentFlag {
    pub student: StudentRecord,
    pub rule: FlagRule,
    pub result: FlagResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameMapping {
    pub student_id: Uuid,
    pub full_name: String,
    pub reference_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub original: String,
    pub student_id: Uuid,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub text: String,
    pub substitutions: Vec<Substitution>,
}

#[derive(Debug, Clone)]
pub struct StudentProfile {
    pub attendance_rate: Option<f64>,
    pub attendance_days: usize,
    pub last_absence: Option<NaiveDate>,
    pub average_grade: Option<f64>,
    pub grades: Vec<GradeRecord>,
    pub discipline_count: usize,
    pub recent_incidents: Vec<DisciplineRecord>,
    pub latest_assessments: Vec<AssessmentRecord>,
}

#[derive(Debug, Clone)]
pub struct RuleSummary {
    pub rule_name: String,
    pub category: String,
    pub flagged_count: usize,
}
