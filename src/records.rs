//! Attendance rows: marking them by hand, checking students in, and reading them back.

use crate::collaborators::{Caller, FaceVerifier};
use crate::lifecycle::{ensure_editable, ensure_owner};
use crate::models::{Attendance, AttendanceMethod, AttendanceStatus, Session};
use crate::schema::{attendances, schedules, sessions};
use crate::time::{local, timestamp};
use crate::{Error, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use diesel::prelude::*;
use tracing::{debug, info};

/// How check-in times turn into an attendance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckInPolicy {
    /// How long after the scheduled start a student still counts as present.
    pub late_threshold: Duration,
    /// The offset of the school's wall clock, in which schedule times are expressed.
    pub utc_offset: FixedOffset,
}

impl Default for CheckInPolicy {
    fn default() -> Self {
        Self {
            late_threshold: Duration::minutes(15),
            utc_offset: Utc.fix(),
        }
    }
}

/// Computes the status of a check-in at local time `check_in` for a session on `date` whose
/// schedule starts at `start_time`. Arriving exactly at the threshold still counts as present.
pub fn derive_status(
    check_in: NaiveDateTime,
    date: NaiveDate,
    start_time: NaiveTime,
    late_threshold: Duration,
) -> AttendanceStatus {
    if check_in <= date.and_time(start_time) + late_threshold {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Late
    }
}

/// A requested change to one attendance row.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceUpdate {
    pub attendance_id: i32,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
}

/// Retrieves the attendance rows of a session, ordered by student id.
pub fn session_attendance(db: &mut SqliteConnection, session_id: i32) -> Result<Vec<Attendance>> {
    Ok(attendances::table
        .filter(attendances::session_id.eq(session_id))
        .order(attendances::student_id)
        .select(Attendance::as_select())
        .load(db)?)
}

/// Retrieves every attendance row of a student with its session, oldest session first.
pub fn student_attendance(
    db: &mut SqliteConnection,
    student_id: i32,
) -> Result<Vec<(Session, Attendance)>> {
    Ok(attendances::table
        .inner_join(sessions::table)
        .filter(attendances::student_id.eq(student_id))
        .order((sessions::date, sessions::id))
        .select((Session::as_select(), Attendance::as_select()))
        .load(db)?)
}

/// Sets the status of several rows of one session by hand, all or nothing.
///
/// Only the teacher who created the session may do this, and only while it is ongoing.
pub fn mark_attendance(
    db: &mut SqliteConnection,
    caller: Caller,
    session_id: i32,
    updates: &[AttendanceUpdate],
    now: DateTime<Utc>,
) -> Result<Vec<Attendance>> {
    let marked_at = timestamp(now);

    let marked = db.immediate_transaction::<_, Error, _>(|db| {
        let session = crate::sessions::get_session(db, session_id)?;
        ensure_owner(caller, &session)?;
        ensure_editable(&session)?;

        let mut marked = Vec::with_capacity(updates.len());
        for update in updates {
            let row = attendances::table
                .filter(attendances::id.eq(update.attendance_id))
                .filter(attendances::session_id.eq(session_id));

            let check_in_time = match update.status {
                AttendanceStatus::Present | AttendanceStatus::Late => Some(marked_at),
                AttendanceStatus::Absent | AttendanceStatus::Excused => None,
            };

            let attendance = diesel::update(row)
                .set((
                    attendances::status.eq(update.status),
                    attendances::attendance_method.eq(AttendanceMethod::Manual),
                    attendances::check_in_time.eq(check_in_time),
                    attendances::face_confidence.eq(None::<f32>),
                    attendances::marked_by.eq(session.created_by),
                    attendances::notes.eq(update.notes.as_deref()),
                ))
                .returning(Attendance::as_returning())
                .get_result(db)
                .optional()?
                .ok_or_else(|| Error::not_found("attendance", update.attendance_id))?;

            marked.push(attendance);
        }

        Ok(marked)
    })?;

    info!(session_id, count = marked.len(), "marked attendance");

    Ok(marked)
}

/// A verified arrival of one student.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckIn {
    pub student_id: i32,
    pub at: DateTime<Utc>,
    pub method: AttendanceMethod,
    pub confidence: Option<f32>,
}

/// Records a student's arrival, deriving `present` or `late` from the arrival time and the
/// schedule's start.
///
/// A student who already has a check-in time keeps the earlier one, and a student the teacher
/// excused stays excused. Either way the row is returned unchanged.
pub fn record_check_in(
    db: &mut SqliteConnection,
    caller: Caller,
    session_id: i32,
    check_in: CheckIn,
    policy: &CheckInPolicy,
) -> Result<Attendance> {
    db.immediate_transaction::<_, Error, _>(|db| {
        let (session, start_time) = sessions::table
            .inner_join(schedules::table)
            .filter(sessions::id.eq(session_id))
            .select((Session::as_select(), schedules::start_time))
            .first::<(Session, NaiveTime)>(db)
            .optional()?
            .ok_or_else(|| Error::not_found("session", session_id))?;
        ensure_owner(caller, &session)?;
        ensure_editable(&session)?;

        let existing = attendances::table
            .filter(attendances::session_id.eq(session_id))
            .filter(attendances::student_id.eq(check_in.student_id))
            .select(Attendance::as_select())
            .first(db)
            .optional()?
            .ok_or_else(|| {
                Error::Validation(format!(
                    "student {} is not on the roster of session {session_id}",
                    check_in.student_id
                ))
            })?;

        if existing.check_in_time.is_some() {
            debug!(session_id, student_id = check_in.student_id, "student already checked in");
            return Ok(existing);
        }
        if existing.status == AttendanceStatus::Excused {
            debug!(session_id, student_id = check_in.student_id, "student is excused");
            return Ok(existing);
        }

        let status = derive_status(
            local(check_in.at, policy.utc_offset),
            session.date,
            start_time,
            policy.late_threshold,
        );

        let attendance = diesel::update(attendances::table.find(existing.id))
            .set((
                attendances::status.eq(status),
                attendances::attendance_method.eq(check_in.method),
                attendances::check_in_time.eq(timestamp(check_in.at)),
                attendances::face_confidence.eq(check_in.confidence),
                attendances::marked_by.eq(session.created_by),
            ))
            .returning(Attendance::as_returning())
            .get_result(db)?;

        info!(
            session_id,
            student_id = check_in.student_id,
            %status,
            method = %check_in.method,
            "checked in"
        );

        Ok(attendance)
    })
}

/// Identifies the student in `image` and checks them in.
///
/// Returns `Ok(None)` without touching the database when the verifier does not recognize a
/// student or flags the picture as a spoof.
pub fn check_in_with_face(
    db: &mut SqliteConnection,
    caller: Caller,
    verifier: &dyn FaceVerifier,
    session_id: i32,
    image: &[u8],
    policy: &CheckInPolicy,
    now: DateTime<Utc>,
) -> Result<Option<Attendance>> {
    let verification = verifier.verify(image)?;

    let Some(student_id) = verification.accepted_student() else {
        info!(
            session_id,
            verified = verification.verified,
            spoof_detected = verification.spoof_detected,
            "face check-in rejected"
        );
        return Ok(None);
    };

    let check_in = CheckIn {
        student_id,
        at: now,
        method: AttendanceMethod::FaceRecognition,
        confidence: verification.confidence,
    };

    record_check_in(db, caller, session_id, check_in, policy).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Verification;
    use crate::lifecycle::{create_session, update_session_status};
    use crate::models::SessionStatus;
    use crate::sessions::SessionWithRoster;
    use crate::test_support::{connection, hm, insert_schedule, utc, ymd};
    use std::cell::Cell;
    use std::collections::HashMap;

    const TEACHER: Caller = Caller::Teacher(5);

    fn open_session(db: &mut SqliteConnection) -> SessionWithRoster {
        let schedule = insert_schedule(db, 5, 10, 1, hm(8, 0), hm(9, 0));
        let roster = HashMap::from([(10, vec![101, 102])]);
        create_session(db, TEACHER, &roster, schedule.id, ymd(2026, 3, 2), None, utc(2026, 3, 2, 8, 5))
            .unwrap()
    }

    fn manual(student_id: i32, at: DateTime<Utc>) -> CheckIn {
        CheckIn {
            student_id,
            at,
            method: AttendanceMethod::Manual,
            confidence: None,
        }
    }

    struct FakeVerifier {
        answer: Verification,
        calls: Cell<usize>,
    }

    impl FaceVerifier for FakeVerifier {
        fn verify(&self, _image: &[u8]) -> Result<Verification> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.answer.clone())
        }
    }

    #[test]
    fn threshold_boundary_is_present() {
        let date = ymd(2026, 3, 2);
        let threshold = Duration::minutes(15);

        for (minute, expected) in [
            (10, AttendanceStatus::Present),
            (15, AttendanceStatus::Present),
            (16, AttendanceStatus::Late),
            (20, AttendanceStatus::Late),
        ] {
            assert_eq!(
                derive_status(date.and_time(hm(8, minute)), date, hm(8, 0), threshold),
                expected,
                "check-in at 08:{minute}"
            );
        }
    }

    #[test]
    fn marking_updates_rows_while_ongoing() {
        let mut db = connection();
        let created = open_session(&mut db);
        let [first, second] = [&created.attendances[0], &created.attendances[1]];

        let marked = mark_attendance(
            &mut db,
            TEACHER,
            created.session.id,
            &[
                AttendanceUpdate {
                    attendance_id: first.id,
                    status: AttendanceStatus::Present,
                    notes: None,
                },
                AttendanceUpdate {
                    attendance_id: second.id,
                    status: AttendanceStatus::Excused,
                    notes: Some("doctor's note".to_string()),
                },
            ],
            utc(2026, 3, 2, 8, 30),
        )
        .unwrap();

        assert_eq!(marked[0].status, AttendanceStatus::Present);
        assert_eq!(marked[0].check_in_time, Some(ymd(2026, 3, 2).and_time(hm(8, 30))));
        assert_eq!(marked[0].marked_by, Some(5));
        assert_eq!(marked[1].status, AttendanceStatus::Excused);
        assert_eq!(marked[1].notes.as_deref(), Some("doctor's note"));

        // Correcting a row that is already marked is fine while the session runs.
        let corrected = mark_attendance(
            &mut db,
            TEACHER,
            created.session.id,
            &[AttendanceUpdate {
                attendance_id: first.id,
                status: AttendanceStatus::Late,
                notes: None,
            }],
            utc(2026, 3, 2, 8, 40),
        )
        .unwrap();
        assert_eq!(corrected[0].status, AttendanceStatus::Late);
    }

    #[test]
    fn marking_is_all_or_nothing() {
        let mut db = connection();
        let created = open_session(&mut db);

        let err = mark_attendance(
            &mut db,
            TEACHER,
            created.session.id,
            &[
                AttendanceUpdate {
                    attendance_id: created.attendances[0].id,
                    status: AttendanceStatus::Present,
                    notes: None,
                },
                AttendanceUpdate {
                    attendance_id: 9_999,
                    status: AttendanceStatus::Present,
                    notes: None,
                },
            ],
            utc(2026, 3, 2, 8, 30),
        )
        .unwrap_err();

        assert!(matches!(err, Error::NotFound { entity: "attendance", id: 9_999 }));
        assert!(
            session_attendance(&mut db, created.session.id)
                .unwrap()
                .iter()
                .all(|row| row.status == AttendanceStatus::Absent)
        );
    }

    #[test]
    fn marking_a_completed_session_is_a_state_error() {
        let mut db = connection();
        let created = open_session(&mut db);
        update_session_status(
            &mut db,
            TEACHER,
            created.session.id,
            SessionStatus::Completed,
            utc(2026, 3, 2, 9, 0),
        )
        .unwrap();

        let err = mark_attendance(
            &mut db,
            TEACHER,
            created.session.id,
            &[AttendanceUpdate {
                attendance_id: created.attendances[0].id,
                status: AttendanceStatus::Present,
                notes: None,
            }],
            utc(2026, 3, 2, 9, 5),
        )
        .unwrap_err();

        assert!(
            matches!(err, Error::InvalidState { current: SessionStatus::Completed, .. }),
            "{err}"
        );
    }

    #[test]
    fn other_teachers_cannot_mark() {
        let mut db = connection();
        let created = open_session(&mut db);

        let err = mark_attendance(
            &mut db,
            Caller::Teacher(6),
            created.session.id,
            &[],
            utc(2026, 3, 2, 8, 30),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)), "{err}");
    }

    #[test]
    fn check_in_derives_status_from_schedule_start() {
        let mut db = connection();
        let created = open_session(&mut db);
        let policy = CheckInPolicy::default();

        let on_time =
            record_check_in(&mut db, TEACHER, created.session.id, manual(101, utc(2026, 3, 2, 8, 10)), &policy)
                .unwrap();
        let late =
            record_check_in(&mut db, TEACHER, created.session.id, manual(102, utc(2026, 3, 2, 8, 20)), &policy)
                .unwrap();

        assert_eq!(on_time.status, AttendanceStatus::Present);
        assert_eq!(late.status, AttendanceStatus::Late);

        // A second check-in keeps the first arrival.
        let again =
            record_check_in(&mut db, TEACHER, created.session.id, manual(101, utc(2026, 3, 2, 8, 50)), &policy)
                .unwrap();
        assert_eq!(again, on_time);
    }

    #[test]
    fn check_in_uses_the_school_offset() {
        let mut db = connection();
        let created = open_session(&mut db);
        let policy = CheckInPolicy {
            utc_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
            ..CheckInPolicy::default()
        };

        // 06:10 UTC is 08:10 at UTC+2.
        let attendance =
            record_check_in(&mut db, TEACHER, created.session.id, manual(101, utc(2026, 3, 2, 6, 10)), &policy)
                .unwrap();
        assert_eq!(attendance.status, AttendanceStatus::Present);
    }

    #[test]
    fn unknown_student_cannot_check_in() {
        let mut db = connection();
        let created = open_session(&mut db);

        let err = record_check_in(
            &mut db,
            TEACHER,
            created.session.id,
            manual(999, utc(2026, 3, 2, 8, 10)),
            &CheckInPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }

    #[test]
    fn face_check_in_records_confidence() {
        let mut db = connection();
        let created = open_session(&mut db);
        let verifier = FakeVerifier {
            answer: Verification {
                verified: true,
                student_id: Some(102),
                confidence: Some(0.91),
                spoof_detected: false,
            },
            calls: Cell::new(0),
        };

        let attendance = check_in_with_face(
            &mut db,
            TEACHER,
            &verifier,
            created.session.id,
            b"jpeg",
            &CheckInPolicy::default(),
            utc(2026, 3, 2, 8, 12),
        )
        .unwrap()
        .unwrap();

        assert_eq!(attendance.student_id, 102);
        assert_eq!(attendance.status, AttendanceStatus::Present);
        assert_eq!(attendance.attendance_method, AttendanceMethod::FaceRecognition);
        assert_eq!(attendance.face_confidence, Some(0.91));
    }

    #[test]
    fn spoofed_face_changes_nothing() {
        let mut db = connection();
        let created = open_session(&mut db);
        let verifier = FakeVerifier {
            answer: Verification {
                verified: true,
                student_id: Some(101),
                confidence: Some(0.99),
                spoof_detected: true,
            },
            calls: Cell::new(0),
        };

        let outcome = check_in_with_face(
            &mut db,
            TEACHER,
            &verifier,
            created.session.id,
            b"printed photo",
            &CheckInPolicy::default(),
            utc(2026, 3, 2, 8, 12),
        )
        .unwrap();

        assert_eq!(outcome, None);
        assert_eq!(verifier.calls.get(), 1);
        assert_eq!(session_attendance(&mut db, created.session.id).unwrap(), created.attendances);
    }

    #[test]
    fn face_check_in_keeps_an_excused_student_excused() {
        let mut db = connection();
        let created = open_session(&mut db);
        let excused = &created.attendances[0];
        mark_attendance(
            &mut db,
            TEACHER,
            created.session.id,
            &[AttendanceUpdate {
                attendance_id: excused.id,
                status: AttendanceStatus::Excused,
                notes: Some("field trip".to_string()),
            }],
            utc(2026, 3, 2, 8, 6),
        )
        .unwrap();
        let verifier = FakeVerifier {
            answer: Verification {
                verified: true,
                student_id: Some(excused.student_id),
                confidence: Some(0.95),
                spoof_detected: false,
            },
            calls: Cell::new(0),
        };

        let row = check_in_with_face(
            &mut db,
            TEACHER,
            &verifier,
            created.session.id,
            b"jpeg",
            &CheckInPolicy::default(),
            utc(2026, 3, 2, 8, 10),
        )
        .unwrap()
        .unwrap();

        assert_eq!(row.status, AttendanceStatus::Excused);
        assert_eq!(row.check_in_time, None);
        assert_eq!(row.attendance_method, AttendanceMethod::Manual);
        assert_eq!(row.notes.as_deref(), Some("field trip"));
    }

    #[test]
    fn student_view_lists_sessions_in_order() {
        let mut db = connection();
        let created = open_session(&mut db);

        let rows = student_attendance(&mut db, 101).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, created.session);
        assert_eq!(rows[0].1.student_id, 101);
        assert!(student_attendance(&mut db, 555).unwrap().is_empty());
    }
}
