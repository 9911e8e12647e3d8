//! Narrow interfaces to the systems around the attendance core: who is calling, which students are
//! in a class, and whose face is in a picture.

use crate::models::Student;
use crate::schema;
use crate::{Error, Result};
use diesel::prelude::*;
use std::collections::HashMap;

/// The authenticated identity behind a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Admin,
    /// A teacher, identified by their stable profile id.
    Teacher(i32),
}

impl Caller {
    pub fn teacher_id(self) -> Option<i32> {
        match self {
            Caller::Teacher(id) => Some(id),
            Caller::Admin => None,
        }
    }

    pub(crate) fn require_admin(self, action: &str) -> Result<()> {
        match self {
            Caller::Admin => Ok(()),
            Caller::Teacher(id) => Err(Error::Unauthorized(format!(
                "teacher {id} may not {action}, only administrators may"
            ))),
        }
    }

    /// Checks that the caller is the teacher who owns a resource.
    pub(crate) fn require_teacher(self, owner: i32, what: &str) -> Result<i32> {
        match self {
            Caller::Teacher(id) if id == owner => Ok(id),
            Caller::Teacher(id) => Err(Error::Unauthorized(format!(
                "{what} belongs to teacher {owner}, not teacher {id}"
            ))),
            Caller::Admin => Err(Error::Unauthorized(format!(
                "{what} can only be changed by teacher {owner}"
            ))),
        }
    }
}

/// Lists the students enrolled in a class. Consulted once, when a session is created.
pub trait RosterProvider {
    fn enrolled_students(&self, db: &mut SqliteConnection, class_id: i32) -> Result<Vec<i32>>;
}

/// Reads the roster from the `students` table.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassRoster;

impl RosterProvider for ClassRoster {
    fn enrolled_students(&self, db: &mut SqliteConnection, class: i32) -> Result<Vec<i32>> {
        use schema::students::dsl::*;

        Ok(students
            .filter(class_id.eq(class))
            .select(id)
            .order(id)
            .load(db)?)
    }
}

/// A fixed roster keyed by class id.
impl RosterProvider for HashMap<i32, Vec<i32>> {
    fn enrolled_students(&self, _db: &mut SqliteConnection, class_id: i32) -> Result<Vec<i32>> {
        Ok(self.get(&class_id).cloned().unwrap_or_default())
    }
}

/// Inserts students into the `students` table, returning how many were added.
pub fn enroll_students(db: &mut SqliteConnection, new_students: &[Student]) -> Result<usize> {
    Ok(diesel::insert_into(schema::students::table)
        .values(new_students)
        .execute(db)?)
}

/// Removes a student from the roster. Attendance already recorded for them is kept.
pub fn unenroll_student(db: &mut SqliteConnection, student_id: i32) -> Result<Student> {
    use schema::students::dsl::*;

    diesel::delete(students.filter(id.eq(student_id)))
        .returning(Student::as_returning())
        .get_result(db)
        .optional()?
        .ok_or_else(|| Error::not_found("student", student_id))
}

/// The answer of the face verification service for one picture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verification {
    pub verified: bool,
    pub student_id: Option<i32>,
    pub confidence: Option<f32>,
    pub spoof_detected: bool,
}

impl Verification {
    /// The identified student, if the response can be trusted to mark attendance.
    pub fn accepted_student(&self) -> Option<i32> {
        if self.verified && !self.spoof_detected {
            self.student_id
        } else {
            None
        }
    }
}

/// The external face verification service.
pub trait FaceVerifier {
    fn verify(&self, image: &[u8]) -> Result<Verification>;
}
