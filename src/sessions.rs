//! Storage of dated sessions and the attendance rows they own.
//!
//! Nothing here checks who is asking or whether a state change is legal. That is the job of
//! [`crate::lifecycle`], which is the only caller of the mutating functions.

use crate::models::{
    Attendance, AttendanceMethod, AttendanceStatus, NewAttendance, NewSession, Session,
    SessionStatus,
};
use crate::schema::{attendances, sessions};
use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;

/// A session together with its attendance rows, ordered by student id.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionWithRoster {
    pub session: Session,
    pub attendances: Vec<Attendance>,
}

/// Retrieves a session by id.
pub fn get_session(db: &mut SqliteConnection, session_id: i32) -> Result<Session> {
    sessions::table
        .find(session_id)
        .select(Session::as_select())
        .first(db)
        .optional()?
        .ok_or_else(|| Error::not_found("session", session_id))
}

/// Retrieves a session and its attendance rows.
pub fn get_session_with_roster(
    db: &mut SqliteConnection,
    session_id: i32,
) -> Result<SessionWithRoster> {
    let session = get_session(db, session_id)?;
    let attendances = Attendance::belonging_to(&session)
        .select(Attendance::as_select())
        .order(attendances::student_id)
        .load(db)?;

    Ok(SessionWithRoster {
        session,
        attendances,
    })
}

/// Retrieves the session held for a schedule on a given date, if any.
pub fn find_session(
    db: &mut SqliteConnection,
    schedule_id: i32,
    date: NaiveDate,
) -> Result<Option<Session>> {
    Ok(sessions::table
        .filter(sessions::schedule_id.eq(schedule_id))
        .filter(sessions::date.eq(date))
        .select(Session::as_select())
        .first(db)
        .optional()?)
}

/// Retrieves every session a teacher has opened, most recent first.
pub fn sessions_created_by(db: &mut SqliteConnection, teacher_id: i32) -> Result<Vec<Session>> {
    Ok(sessions::table
        .filter(sessions::created_by.eq(teacher_id))
        .order((sessions::date.desc(), sessions::id.desc()))
        .select(Session::as_select())
        .load(db)?)
}

/// Returns the number of sessions held for a schedule.
pub fn count_for_schedule(db: &mut SqliteConnection, schedule_id: i32) -> Result<i64> {
    Ok(sessions::table
        .filter(sessions::schedule_id.eq(schedule_id))
        .count()
        .get_result(db)?)
}

/// Inserts a session and one `absent` attendance row per student.
///
/// Must run inside a transaction so that a failure leaves neither the session nor a partial roster
/// behind.
pub(crate) fn insert_with_roster(
    db: &mut SqliteConnection,
    new_session: &NewSession<'_>,
    student_ids: &[i32],
) -> Result<SessionWithRoster> {
    let session = diesel::insert_into(sessions::table)
        .values(new_session)
        .returning(Session::as_returning())
        .get_result(db)?;

    let rows: Vec<NewAttendance> = student_ids
        .iter()
        .map(|&student_id| NewAttendance {
            session_id: session.id,
            student_id,
            status: AttendanceStatus::Absent,
            attendance_method: AttendanceMethod::Manual,
        })
        .collect();

    if !rows.is_empty() {
        diesel::insert_into(attendances::table)
            .values(&rows)
            .execute(db)?;
    }

    let attendances = Attendance::belonging_to(&session)
        .select(Attendance::as_select())
        .order(attendances::student_id)
        .load(db)?;
    debug_assert_eq!(attendances.len(), student_ids.len());

    Ok(SessionWithRoster {
        session,
        attendances,
    })
}

/// Moves one session from `from` to `to`, but only if it is still in `from`. Returns `None` if
/// the session was no longer in `from`.
pub(crate) fn transition_one(
    db: &mut SqliteConnection,
    session_id: i32,
    from: SessionStatus,
    to: SessionStatus,
    ended_at: Option<NaiveDateTime>,
) -> Result<Option<Session>> {
    let target = sessions::table
        .filter(sessions::id.eq(session_id))
        .filter(sessions::status.eq(from));

    let updated = match ended_at {
        Some(ended) => diesel::update(target)
            .set((sessions::status.eq(to), sessions::ended_at.eq(ended)))
            .returning(Session::as_returning())
            .get_result(db)
            .optional()?,
        None => diesel::update(target)
            .set(sessions::status.eq(to))
            .returning(Session::as_returning())
            .get_result(db)
            .optional()?,
    };

    Ok(updated)
}

/// Moves every ongoing session that has started to `completed` in a single statement, stamping
/// `ended_at`. Returns the number of sessions moved.
pub(crate) fn complete_started(db: &mut SqliteConnection, ended_at: NaiveDateTime) -> Result<usize> {
    let target = sessions::table
        .filter(sessions::status.eq(SessionStatus::Ongoing))
        .filter(sessions::started_at.is_not_null());

    Ok(diesel::update(target)
        .set((
            sessions::status.eq(SessionStatus::Completed),
            sessions::ended_at.eq(ended_at),
        ))
        .execute(db)?)
}

/// Moves every completed session that ended at or before `cutoff` to `finalized` in a single
/// statement. Returns the number of sessions moved.
pub(crate) fn finalize_ended_before(
    db: &mut SqliteConnection,
    cutoff: NaiveDateTime,
) -> Result<usize> {
    let target = sessions::table
        .filter(sessions::status.eq(SessionStatus::Completed))
        .filter(sessions::ended_at.le(cutoff));

    Ok(diesel::update(target)
        .set(sessions::status.eq(SessionStatus::Finalized))
        .execute(db)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connection, hm, insert_schedule, ymd};

    fn open(db: &mut SqliteConnection, schedule_id: i32, students: &[i32]) -> SessionWithRoster {
        let new_session = NewSession {
            schedule_id,
            date: ymd(2026, 3, 2),
            status: SessionStatus::Ongoing,
            started_at: Some(ymd(2026, 3, 2).and_time(hm(8, 5))),
            created_by: 5,
            notes: Some("first week"),
        };
        db.transaction(|db| insert_with_roster(db, &new_session, students))
            .unwrap()
    }

    #[test]
    fn roster_rows_start_absent() {
        let mut db = connection();
        let schedule = insert_schedule(&mut db, 5, 10, 1, hm(8, 0), hm(9, 0));

        let created = open(&mut db, schedule.id, &[3, 1, 2]);

        assert_eq!(created.attendances.len(), 3);
        assert!(
            created
                .attendances
                .iter()
                .all(|row| row.status == AttendanceStatus::Absent
                    && row.attendance_method == AttendanceMethod::Manual)
        );
        assert_eq!(get_session_with_roster(&mut db, created.session.id).unwrap(), created);
        assert_eq!(count_for_schedule(&mut db, schedule.id).unwrap(), 1);
        assert_eq!(
            find_session(&mut db, schedule.id, ymd(2026, 3, 2)).unwrap(),
            Some(created.session)
        );
    }

    #[test]
    fn missing_session_is_not_found() {
        let mut db = connection();
        assert!(matches!(
            get_session(&mut db, 42),
            Err(Error::NotFound { entity: "session", id: 42 })
        ));
    }

    #[test]
    fn guarded_transition_only_matches_the_expected_state() {
        let mut db = connection();
        let schedule = insert_schedule(&mut db, 5, 10, 1, hm(8, 0), hm(9, 0));
        let session = open(&mut db, schedule.id, &[]).session;
        let ended = ymd(2026, 3, 2).and_time(hm(9, 0));

        let moved = transition_one(
            &mut db,
            session.id,
            SessionStatus::Ongoing,
            SessionStatus::Completed,
            Some(ended),
        )
        .unwrap()
        .unwrap();
        assert_eq!(moved.status, SessionStatus::Completed);
        assert_eq!(moved.ended_at, Some(ended));

        let stale = transition_one(
            &mut db,
            session.id,
            SessionStatus::Ongoing,
            SessionStatus::Cancelled,
            Some(ended),
        )
        .unwrap();
        assert_eq!(stale, None);
    }
}
