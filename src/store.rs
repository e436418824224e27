use uuid::Uuid;

use crate::models::{
    AssessmentRecord, AttendanceRecord, DisciplineRecord, GradeRecord, StudentRecord,
};

/// Read side of the student records database.
#[allow(async_fn_in_trait)]
pub trait StudentStore {
    async fn all_students(&self) -> anyhow::Result<Vec<StudentRecord>>;

    async fn attendance_for(&self, student_id: Uuid) -> anyhow::Result<Vec<AttendanceRecord>>;

    async fn grades_for(&self, student_id: Uuid) -> anyhow::Result<Vec<GradeRecord>>;

    async fn discipline_for(&self, student_id: Uuid) -> anyhow::Result<Vec<DisciplineRecord>>;

    async fn assessments_for(&self, student_id: Uuid) -> anyhow::Result<Vec<AssessmentRecord>>;
}
