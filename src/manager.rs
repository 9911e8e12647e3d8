use crate::collaborators::{self, Caller, ClassRoster, FaceVerifier, RosterProvider};
use crate::conflict::{self, Conflict, Slot};
use crate::lifecycle;
use crate::models::{Attendance, NewSchedule, Schedule, Session, SessionStatus, Student};
use crate::records::{self, AttendanceUpdate, CheckIn, CheckInPolicy};
use crate::scheduler::{self, SweepReport};
use crate::schedules::{self, Removal};
use crate::sessions::{self, SessionWithRoster};
use crate::settings::Settings;
use crate::summary::{self, AttendanceSummary, StudentAttendance};
use crate::time::{Clock, SystemClock};
use crate::{Result, establish_connection};
use chrono::{Duration, NaiveDate};
use diesel::SqliteConnection;
use std::sync::Arc;

/// The manager for the timetable, its sessions, and their attendance.
///
/// Every operation reads the current time from the injected [`Clock`] and consults the roster
/// provider when a session is opened.
pub struct AttendanceManager {
    db: SqliteConnection,
    roster: Box<dyn RosterProvider + Send>,
    policy: CheckInPolicy,
    finalize_after: Duration,
    clock: Arc<dyn Clock>,
}

impl AttendanceManager {
    /// Creates a manager over an open connection, using the `students` table as the roster and
    /// default policies.
    pub fn new(db: SqliteConnection, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            roster: Box::new(ClassRoster),
            policy: CheckInPolicy::default(),
            finalize_after: Duration::days(3),
            clock,
        }
    }

    /// Connects to the database named in `settings` and applies its policies.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let db = establish_connection(&settings.database)?;

        Ok(Self::new(db, Arc::new(SystemClock))
            .with_policy(settings.check_in_policy()?)
            .with_finalize_after(settings.scheduler_config()?.finalize_after))
    }

    pub fn with_roster(mut self, roster: impl RosterProvider + Send + 'static) -> Self {
        self.roster = Box::new(roster);
        self
    }

    pub fn with_policy(mut self, policy: CheckInPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_finalize_after(mut self, finalize_after: Duration) -> Self {
        self.finalize_after = finalize_after;
        self
    }

    /// The underlying connection, for queries this manager does not wrap.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.db
    }

    /// Adds students to the `students` roster.
    pub fn enroll_students(&mut self, students: &[Student]) -> Result<usize> {
        collaborators::enroll_students(&mut self.db, students)
    }

    /// Removes a student from the `students` roster.
    pub fn unenroll_student(&mut self, student_id: i32) -> Result<Student> {
        collaborators::unenroll_student(&mut self.db, student_id)
    }

    pub fn check_conflict(&mut self, slot: &Slot, exclude: Option<i32>) -> Result<Option<Conflict>> {
        conflict::check_conflict(&mut self.db, slot, exclude)
    }

    pub fn create_schedule(&mut self, caller: Caller, schedule: &NewSchedule) -> Result<Schedule> {
        schedules::create_schedule(&mut self.db, caller, schedule)
    }

    pub fn create_schedules(
        &mut self,
        caller: Caller,
        new_schedules: &[NewSchedule],
    ) -> Result<Vec<Schedule>> {
        schedules::create_schedules(&mut self.db, caller, new_schedules)
    }

    pub fn update_schedule(
        &mut self,
        caller: Caller,
        schedule_id: i32,
        changes: &NewSchedule,
    ) -> Result<Schedule> {
        schedules::update_schedule(&mut self.db, caller, schedule_id, changes)
    }

    pub fn delete_schedule(&mut self, caller: Caller, schedule_id: i32, force: bool) -> Result<Removal> {
        schedules::delete_schedule(&mut self.db, caller, schedule_id, force)
    }

    pub fn schedule(&mut self, schedule_id: i32) -> Result<Schedule> {
        schedules::get_schedule(&mut self.db, schedule_id)
    }

    /// Retrieves the whole timetable, or one teacher's active part of it.
    pub fn schedules(&mut self, teacher_id: Option<i32>) -> Result<Vec<Schedule>> {
        match teacher_id {
            Some(teacher_id) => schedules::schedules_for_teacher(&mut self.db, teacher_id),
            None => schedules::all_schedules(&mut self.db),
        }
    }

    pub fn class_schedules(&mut self, class_id: i32, day_of_week: Option<i32>) -> Result<Vec<Schedule>> {
        schedules::schedules_for_class(&mut self.db, class_id, day_of_week)
    }

    pub fn create_session(
        &mut self,
        caller: Caller,
        schedule_id: i32,
        date: NaiveDate,
        notes: Option<&str>,
    ) -> Result<SessionWithRoster> {
        let now = self.clock.now();
        lifecycle::create_session(
            &mut self.db,
            caller,
            self.roster.as_ref(),
            schedule_id,
            date,
            notes,
            now,
        )
    }

    pub fn update_session_status(
        &mut self,
        caller: Caller,
        session_id: i32,
        new_status: SessionStatus,
    ) -> Result<Session> {
        let now = self.clock.now();
        lifecycle::update_session_status(&mut self.db, caller, session_id, new_status, now)
    }

    pub fn session(&mut self, session_id: i32) -> Result<SessionWithRoster> {
        sessions::get_session_with_roster(&mut self.db, session_id)
    }

    pub fn sessions_created_by(&mut self, teacher_id: i32) -> Result<Vec<Session>> {
        sessions::sessions_created_by(&mut self.db, teacher_id)
    }

    pub fn mark_attendance(
        &mut self,
        caller: Caller,
        session_id: i32,
        updates: &[AttendanceUpdate],
    ) -> Result<Vec<Attendance>> {
        let now = self.clock.now();
        records::mark_attendance(&mut self.db, caller, session_id, updates, now)
    }

    /// Checks a student in by hand at the current time, deriving `present` or `late`.
    pub fn check_in(&mut self, caller: Caller, session_id: i32, student_id: i32) -> Result<Attendance> {
        let check_in = CheckIn {
            student_id,
            at: self.clock.now(),
            method: crate::models::AttendanceMethod::Manual,
            confidence: None,
        };
        records::record_check_in(&mut self.db, caller, session_id, check_in, &self.policy)
    }

    pub fn check_in_with_face(
        &mut self,
        caller: Caller,
        verifier: &dyn FaceVerifier,
        session_id: i32,
        image: &[u8],
    ) -> Result<Option<Attendance>> {
        let now = self.clock.now();
        records::check_in_with_face(
            &mut self.db,
            caller,
            verifier,
            session_id,
            image,
            &self.policy,
            now,
        )
    }

    pub fn session_summary(&mut self, session_id: i32) -> Result<AttendanceSummary> {
        summary::session_summary(&mut self.db, session_id)
    }

    /// Retrieves a student's attendance over every recorded session.
    pub fn student_attendance(&mut self, student_id: i32) -> Result<StudentAttendance> {
        summary::student_summary(&mut self.db, student_id)
    }

    /// Runs the end-of-day sweep now, outside the scheduler.
    pub fn run_end_of_day_sweep(&mut self) -> Result<SweepReport> {
        scheduler::run_end_of_day_sweep(&mut self.db, self.clock.now())
    }

    /// Runs the finalization sweep now, outside the scheduler.
    pub fn run_finalization_sweep(&mut self) -> Result<SweepReport> {
        scheduler::run_finalization_sweep(&mut self.db, self.clock.now(), self.finalize_after)
    }
}
