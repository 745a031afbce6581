use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::calc::{
    default_specification, round_off_1_decimal, Conceito, GradeSpecification, APPROVAL_THRESHOLD,
    FINAL_GOAL,
};
use crate::error::{GradebookError, GradebookResult};

/// Strips punctuation so `111.111.111-11` and `11111111111` are one student.
pub fn clean_cpf(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub cpf: String,
    pub name: String,
    pub email: String,
}

impl Student {
    pub fn new(cpf: &str, name: &str, email: &str) -> GradebookResult<Self> {
        let cpf = clean_cpf(cpf);
        if cpf.len() != 11 {
            return Err(GradebookError::validation(
                "CPF must contain exactly 11 digits",
            ));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(GradebookError::validation("name must not be empty"));
        }
        Ok(Self {
            cpf,
            name: name.to_string(),
            email: email.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub goal: String,
    pub grade: Conceito,
}

/// Persisted form of an [`Enrollment`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    pub student_cpf: String,
    #[serde(default)]
    pub evaluations: Vec<Evaluation>,
    #[serde(default)]
    pub nota_final: Option<Conceito>,
    #[serde(default)]
    pub media_pre_final: Option<f64>,
    #[serde(default)]
    pub media_pos_final: Option<f64>,
    #[serde(default)]
    pub reprovado_por_falta: bool,
}

/// One student's grades inside one class.
///
/// The final-exam grade lives only in the `"Final"` evaluation; `nota_final`
/// reads it from there. Cached averages are dropped on every grade change.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    student_cpf: String,
    evaluations: Vec<Evaluation>,
    media_pre_final: Option<f64>,
    media_pos_final: Option<f64>,
    reprovado_por_falta: bool,
}

impl Enrollment {
    pub fn new(student_cpf: impl Into<String>) -> Self {
        Self {
            student_cpf: student_cpf.into(),
            evaluations: Vec::new(),
            media_pre_final: None,
            media_pos_final: None,
            reprovado_por_falta: false,
        }
    }

    pub fn student_cpf(&self) -> &str {
        &self.student_cpf
    }

    pub fn evaluations(&self) -> &[Evaluation] {
        &self.evaluations
    }

    pub fn evaluation_for_goal(&self, goal: &str) -> Option<&Evaluation> {
        self.evaluations.iter().find(|e| e.goal == goal)
    }

    pub fn nota_final(&self) -> Option<Conceito> {
        self.evaluation_for_goal(FINAL_GOAL).map(|e| e.grade)
    }

    pub fn reprovado_por_falta(&self) -> bool {
        self.reprovado_por_falta
    }

    pub fn set_reprovado_por_falta(&mut self, value: bool) {
        self.reprovado_por_falta = value;
    }

    pub fn add_or_update_evaluation(&mut self, goal: &str, grade: Conceito) {
        match self.evaluations.iter_mut().find(|e| e.goal == goal) {
            Some(existing) => existing.grade = grade,
            None => self.evaluations.push(Evaluation {
                goal: goal.to_string(),
                grade,
            }),
        }
        self.invalidate_averages();
    }

    /// Returns whether an evaluation for `goal` existed.
    pub fn remove_evaluation(&mut self, goal: &str) -> bool {
        let before = self.evaluations.len();
        self.evaluations.retain(|e| e.goal != goal);
        let removed = self.evaluations.len() != before;
        if removed {
            self.invalidate_averages();
        }
        removed
    }

    pub fn set_nota_final(&mut self, grade: Option<Conceito>) {
        match grade {
            Some(g) => self.add_or_update_evaluation(FINAL_GOAL, g),
            None => {
                self.remove_evaluation(FINAL_GOAL);
            }
        }
    }

    fn invalidate_averages(&mut self) {
        self.media_pre_final = None;
        self.media_pos_final = None;
    }

    /// Weighted average before the final exam, rounded to one decimal.
    ///
    /// `None` while any required goal is ungraded. An approved student
    /// (>= 7) loses any recorded final-exam grade.
    pub fn calculate_media_pre_final(&mut self, spec: &GradeSpecification) -> Option<f64> {
        let mut grades = Vec::new();
        for goal in spec.required_goals() {
            let Some(ev) = self.evaluation_for_goal(goal) else {
                self.media_pre_final = None;
                return None;
            };
            grades.push((goal, ev.grade));
        }

        let Some(raw) = spec.calc(grades) else {
            self.media_pre_final = None;
            return None;
        };
        let pre = round_off_1_decimal(raw);
        self.media_pre_final = Some(pre);
        if pre >= APPROVAL_THRESHOLD {
            // Exempt: drop the exam grade without touching the cached pre-final.
            self.evaluations.retain(|e| e.goal != FINAL_GOAL);
            self.media_pos_final = None;
        }
        Some(pre)
    }

    pub fn calculate_media_pos_final(&mut self, spec: &GradeSpecification) -> Option<f64> {
        let pre = match self.media_pre_final {
            Some(v) if v.is_finite() => Some(v),
            _ => self.calculate_media_pre_final(spec),
        };
        let Some(pre) = pre else {
            self.media_pos_final = None;
            return None;
        };

        let pos = if pre >= APPROVAL_THRESHOLD {
            pre
        } else {
            match self.nota_final() {
                // Missing exam counts as zero.
                None => pre / 2.0,
                Some(grade) => round_off_1_decimal((pre + spec.value_of(grade)) / 2.0),
            }
        };
        self.media_pos_final = Some(pos);
        Some(pos)
    }

    pub fn media_pre_final(&self) -> Option<f64> {
        self.media_pre_final
    }

    pub fn media_pos_final(&self) -> Option<f64> {
        match self.media_pre_final {
            Some(pre) if pre >= APPROVAL_THRESHOLD => Some(pre),
            _ => self.media_pos_final,
        }
    }

    /// Recomputes both averages and returns the post-final standing.
    pub fn refresh_averages(&mut self, spec: &GradeSpecification) -> Option<f64> {
        self.invalidate_averages();
        self.calculate_media_pre_final(spec);
        self.calculate_media_pos_final(spec)
    }

    pub fn to_record(&self) -> EnrollmentRecord {
        EnrollmentRecord {
            student_cpf: self.student_cpf.clone(),
            evaluations: self.evaluations.clone(),
            nota_final: self.nota_final(),
            media_pre_final: self.media_pre_final,
            media_pos_final: self.media_pos_final,
            reprovado_por_falta: self.reprovado_por_falta,
        }
    }

    pub fn from_record(record: EnrollmentRecord) -> Self {
        let mut enrollment = Enrollment::new(record.student_cpf);
        for ev in record.evaluations {
            enrollment.add_or_update_evaluation(&ev.goal, ev.grade);
        }
        if let Some(grade) = record.nota_final {
            if enrollment.nota_final().is_none() {
                enrollment.set_nota_final(Some(grade));
            }
        }
        enrollment.reprovado_por_falta = record.reprovado_por_falta;
        enrollment.media_pre_final = record.media_pre_final;
        enrollment.media_pos_final = record.media_pos_final;
        enrollment
    }
}

/// A class offering identified by (topic, semester, year).
#[derive(Debug, Clone)]
pub struct Class {
    topic: String,
    semester: u8,
    year: i32,
    specification: Arc<GradeSpecification>,
    custom_specification: bool,
    enrollments: Vec<Enrollment>,
}

impl Class {
    pub fn new(
        topic: &str,
        semester: u8,
        year: i32,
        specification: Option<GradeSpecification>,
    ) -> GradebookResult<Self> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(GradebookError::validation("topic must not be empty"));
        }
        if !(1..=2).contains(&semester) {
            return Err(GradebookError::validation("semester must be 1 or 2"));
        }
        let custom_specification = specification.is_some();
        let specification = specification
            .map(Arc::new)
            .unwrap_or_else(default_specification);
        Ok(Self {
            topic: topic.to_string(),
            semester,
            year,
            specification,
            custom_specification,
            enrollments: Vec::new(),
        })
    }

    pub fn class_id_for(topic: &str, semester: u8, year: i32) -> String {
        format!("{}-{}-{}", topic.trim(), year, semester)
    }

    pub fn id(&self) -> String {
        Self::class_id_for(&self.topic, self.semester, self.year)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn semester(&self) -> u8 {
        self.semester
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn specification(&self) -> &GradeSpecification {
        &self.specification
    }

    /// The override, if this class was created with one.
    pub fn custom_specification(&self) -> Option<&GradeSpecification> {
        self.custom_specification.then(|| self.specification.as_ref())
    }

    pub fn enrollments(&self) -> &[Enrollment] {
        &self.enrollments
    }

    pub fn find_enrollment(&self, cpf: &str) -> Option<&Enrollment> {
        self.enrollments.iter().find(|e| e.student_cpf == cpf)
    }

    pub fn is_enrolled(&self, cpf: &str) -> bool {
        self.find_enrollment(cpf).is_some()
    }

    pub fn add_enrollment(&mut self, cpf: &str) -> GradebookResult<&Enrollment> {
        if self.is_enrolled(cpf) {
            return Err(GradebookError::validation(format!(
                "student {} is already enrolled in {}",
                cpf,
                self.id()
            )));
        }
        self.enrollments.push(Enrollment::new(cpf));
        Ok(&self.enrollments[self.enrollments.len() - 1])
    }

    pub(crate) fn restore_enrollment(&mut self, enrollment: Enrollment) {
        self.enrollments.retain(|e| e.student_cpf != enrollment.student_cpf);
        self.enrollments.push(enrollment);
    }

    pub fn remove_enrollment(&mut self, cpf: &str) -> bool {
        let before = self.enrollments.len();
        self.enrollments.retain(|e| e.student_cpf != cpf);
        self.enrollments.len() != before
    }

    fn enrollment_mut(&mut self, cpf: &str) -> GradebookResult<&mut Enrollment> {
        let class_id = self.id();
        self.enrollments
            .iter_mut()
            .find(|e| e.student_cpf == cpf)
            .ok_or_else(|| {
                GradebookError::not_found(format!(
                    "Student with CPF {} is not enrolled in class {}",
                    cpf, class_id
                ))
            })
    }

    pub fn add_or_update_evaluation(
        &mut self,
        cpf: &str,
        goal: &str,
        grade: Conceito,
    ) -> GradebookResult<()> {
        self.enrollment_mut(cpf)?.add_or_update_evaluation(goal, grade);
        Ok(())
    }

    pub fn remove_evaluation(&mut self, cpf: &str, goal: &str) -> GradebookResult<bool> {
        Ok(self.enrollment_mut(cpf)?.remove_evaluation(goal))
    }

    pub fn set_nota_final(&mut self, cpf: &str, grade: Option<Conceito>) -> GradebookResult<()> {
        self.enrollment_mut(cpf)?.set_nota_final(grade);
        Ok(())
    }

    pub fn set_reprovado_por_falta(&mut self, cpf: &str, value: bool) -> GradebookResult<()> {
        self.enrollment_mut(cpf)?.set_reprovado_por_falta(value);
        Ok(())
    }

    /// Recomputes every enrollment's averages; returns (cpf, standing) pairs
    /// in enrollment order.
    pub fn refresh_averages(&mut self) -> Vec<(String, Option<f64>)> {
        let spec = Arc::clone(&self.specification);
        self.enrollments
            .iter_mut()
            .map(|e| {
                let standing = e.refresh_averages(&spec);
                (e.student_cpf.clone(), standing)
            })
            .collect()
    }

    /// Mean of the determined post-final standings; 0 when none is determined.
    pub fn class_average(&mut self) -> f64 {
        let standings: Vec<f64> = self
            .refresh_averages()
            .into_iter()
            .filter_map(|(_, s)| s)
            .collect();
        if standings.is_empty() {
            0.0
        } else {
            standings.iter().sum::<f64>() / standings.len() as f64
        }
    }
}

/// Student and class registries.
#[derive(Debug, Default)]
pub struct Gradebook {
    students: Vec<Student>,
    classes: Vec<Class>,
}

impl Gradebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn find_student(&self, cpf: &str) -> Option<&Student> {
        let cpf = clean_cpf(cpf);
        self.students.iter().find(|s| s.cpf == cpf)
    }

    pub fn add_student(&mut self, student: Student) -> GradebookResult<&Student> {
        if self.find_student(&student.cpf).is_some() {
            return Err(GradebookError::validation(
                "Student with this CPF already exists",
            ));
        }
        self.students.push(student);
        Ok(&self.students[self.students.len() - 1])
    }

    pub fn update_student(
        &mut self,
        cpf: &str,
        name: Option<&str>,
        email: Option<&str>,
    ) -> GradebookResult<&Student> {
        let cpf = clean_cpf(cpf);
        let Some(student) = self.students.iter_mut().find(|s| s.cpf == cpf) else {
            return Err(GradebookError::not_found("Student not found"));
        };
        if let Some(name) = name {
            let name = name.trim();
            if name.is_empty() {
                return Err(GradebookError::validation("name must not be empty"));
            }
            student.name = name.to_string();
        }
        if let Some(email) = email {
            student.email = email.trim().to_string();
        }
        Ok(&*student)
    }

    /// Removes the student and every enrollment that references it.
    /// Returns the ids of the classes that lost an enrollment.
    pub fn remove_student(&mut self, cpf: &str) -> GradebookResult<Vec<String>> {
        let cpf = clean_cpf(cpf);
        let before = self.students.len();
        self.students.retain(|s| s.cpf != cpf);
        if self.students.len() == before {
            return Err(GradebookError::not_found("Student not found"));
        }
        let mut touched = Vec::new();
        for class in &mut self.classes {
            if class.remove_enrollment(&cpf) {
                touched.push(class.id());
            }
        }
        Ok(touched)
    }

    pub fn find_class(&self, class_id: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.id() == class_id)
    }

    pub fn find_class_mut(&mut self, class_id: &str) -> Option<&mut Class> {
        self.classes.iter_mut().find(|c| c.id() == class_id)
    }

    pub fn class_mut(&mut self, class_id: &str) -> GradebookResult<&mut Class> {
        self.find_class_mut(class_id)
            .ok_or_else(|| GradebookError::not_found("Class not Found"))
    }

    pub fn add_class(&mut self, class: Class) -> GradebookResult<&Class> {
        if self.find_class(&class.id()).is_some() {
            return Err(GradebookError::validation(format!(
                "class {} already exists",
                class.id()
            )));
        }
        self.classes.push(class);
        Ok(&self.classes[self.classes.len() - 1])
    }

    pub fn remove_class(&mut self, class_id: &str) -> bool {
        let before = self.classes.len();
        self.classes.retain(|c| c.id() != class_id);
        self.classes.len() != before
    }

    /// Enrolls a registered student in a class.
    pub fn enroll(&mut self, class_id: &str, cpf: &str) -> GradebookResult<()> {
        let cpf = clean_cpf(cpf);
        if self.find_student(&cpf).is_none() {
            return Err(GradebookError::not_found("Student not found"));
        }
        self.class_mut(class_id)?.add_enrollment(&cpf)?;
        Ok(())
    }
}
