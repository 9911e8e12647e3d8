//! Counts over the raw attendance state, for display.

use crate::models::{Attendance, AttendanceStatus, SessionStatus};
use crate::records;
use crate::{Result, sessions};
use chrono::NaiveDate;
use diesel::SqliteConnection;
use tabled::Tabled;

/// How many students of a session ended up in each status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Tabled)]
pub struct AttendanceSummary {
    pub total: usize,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub excused: usize,
}

impl AttendanceSummary {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Attendance>,
    {
        records
            .into_iter()
            .fold(Self::default(), |mut summary, attendance| {
                summary.total += 1;
                match attendance.status {
                    AttendanceStatus::Present => summary.present += 1,
                    AttendanceStatus::Late => summary.late += 1,
                    AttendanceStatus::Absent => summary.absent += 1,
                    AttendanceStatus::Excused => summary.excused += 1,
                }
                summary
            })
    }

    /// Students who showed up, on time or not.
    pub fn attended(&self) -> usize {
        self.present + self.late
    }

    /// The share of students who attended, between 0 and 1. Zero for an empty roster.
    pub fn attendance_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.attended() as f64 / self.total as f64
        }
    }
}

/// Summarizes the attendance of one session.
pub fn session_summary(db: &mut SqliteConnection, session_id: i32) -> Result<AttendanceSummary> {
    sessions::get_session(db, session_id)?;
    let attendance = records::session_attendance(db, session_id)?;

    Ok(AttendanceSummary::from_records(&attendance))
}

/// The dates of a student's sessions, grouped by their status. Cancelled sessions are left out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StudentAttendance {
    pub present: Vec<NaiveDate>,
    pub late: Vec<NaiveDate>,
    pub excused: Vec<NaiveDate>,
    pub absent: Vec<NaiveDate>,
}

/// Retrieves a student's attendance over every recorded session.
pub fn student_summary(db: &mut SqliteConnection, student_id: i32) -> Result<StudentAttendance> {
    let mut summary = StudentAttendance::default();

    for (session, attendance) in records::student_attendance(db, student_id)? {
        if session.status == SessionStatus::Cancelled {
            continue;
        }

        match attendance.status {
            AttendanceStatus::Present => summary.present.push(session.date),
            AttendanceStatus::Late => summary.late.push(session.date),
            AttendanceStatus::Excused => summary.excused.push(session.date),
            AttendanceStatus::Absent => summary.absent.push(session.date),
        }
    }

    Ok(summary)
}
