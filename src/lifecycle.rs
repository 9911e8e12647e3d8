//! The session state machine.
//!
//! ```text
//!            manual / sweep            sweep, 3 days later
//!  ongoing ──────────────────▶ completed ──────────────────▶ finalized
//!     │                           │
//!     │ manual                    │ manual
//!     ▼                           ▼
//!  cancelled ◀────────────────────┘
//! ```
//!
//! Every legal move is a row of [`TRANSITIONS`]. Updates are guarded by the expected current
//! status, so a manual change and a sweep racing on the same session cannot both apply.

use crate::collaborators::{Caller, RosterProvider};
use crate::models::{NewSession, Schedule, Session, SessionStatus};
use crate::sessions::{self, SessionWithRoster};
use crate::time::{iso_weekday, timestamp};
use crate::{Error, Result, schedules};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::prelude::*;
use tracing::{info, warn};

/// What asked for a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The teacher who owns the session.
    Manual,
    /// A scheduler sweep.
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub trigger: Trigger,
    /// Whether `ended_at` is stamped with the time of the change.
    pub stamps_end: bool,
}

const fn rule(from: SessionStatus, to: SessionStatus, trigger: Trigger) -> Transition {
    let stamps_end = !matches!(to, SessionStatus::Finalized);
    Transition {
        from,
        to,
        trigger,
        stamps_end,
    }
}

/// The complete table of legal session state changes.
pub static TRANSITIONS: [Transition; 5] = [
    rule(SessionStatus::Ongoing, SessionStatus::Completed, Trigger::Manual),
    rule(SessionStatus::Ongoing, SessionStatus::Completed, Trigger::Sweep),
    rule(SessionStatus::Ongoing, SessionStatus::Cancelled, Trigger::Manual),
    rule(SessionStatus::Completed, SessionStatus::Cancelled, Trigger::Manual),
    rule(SessionStatus::Completed, SessionStatus::Finalized, Trigger::Sweep),
];

/// Looks up the rule allowing `from -> to` for `trigger`.
pub fn find_transition(
    from: SessionStatus,
    to: SessionStatus,
    trigger: Trigger,
) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|rule| rule.from == from && rule.to == to && rule.trigger == trigger)
}

/// Whether no rule leads out of `status`.
pub fn is_terminal(status: SessionStatus) -> bool {
    !TRANSITIONS.iter().any(|rule| rule.from == status)
}

/// Opens a session of `schedule_id` on `date` for the calling teacher.
///
/// The session starts `ongoing` with `started_at = now`, and one `absent` attendance row is
/// created per student the roster lists for the schedule's class. Either all of it is stored or
/// none of it is.
pub fn create_session(
    db: &mut SqliteConnection,
    caller: Caller,
    roster: &dyn RosterProvider,
    schedule_id: i32,
    date: NaiveDate,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<SessionWithRoster> {
    let created = db
        .immediate_transaction::<_, Error, _>(|db| {
            let schedule = schedules::get_schedule(db, schedule_id)?;
            let teacher_id =
                caller.require_teacher(schedule.teacher_id, &format!("schedule {schedule_id}"))?;

            if !schedule.is_active {
                return Err(Error::Validation(format!(
                    "schedule {schedule_id} is no longer active"
                )));
            }
            if iso_weekday(date) != schedule.day_of_week {
                warn!(
                    schedule_id,
                    %date,
                    slot = %schedule.describe_slot(),
                    "opening a session on a different weekday than its schedule"
                );
            }

            if let Some(existing) = sessions::find_session(db, schedule_id, date)? {
                return Err(duplicate_session(&schedule, existing.id, date));
            }

            let students = roster.enrolled_students(db, schedule.class_id)?;
            let new_session = NewSession {
                schedule_id,
                date,
                status: SessionStatus::Ongoing,
                started_at: Some(timestamp(now)),
                created_by: teacher_id,
                notes,
            };

            sessions::insert_with_roster(db, &new_session, &students)
        })
        .map_err(|err| {
            if err.is_unique_violation() {
                Error::Conflict(format!(
                    "a session already exists for schedule {schedule_id} on {date}"
                ))
            } else {
                err
            }
        })?;

    info!(
        session_id = created.session.id,
        schedule_id,
        %date,
        students = created.attendances.len(),
        "opened session"
    );

    Ok(created)
}

fn duplicate_session(schedule: &Schedule, session_id: i32, date: NaiveDate) -> Error {
    Error::Conflict(format!(
        "session {session_id} already exists for schedule {} ({}) on {date}",
        schedule.id,
        schedule.describe_slot()
    ))
}

/// Changes a session's status on behalf of the teacher who created it.
pub fn update_session_status(
    db: &mut SqliteConnection,
    caller: Caller,
    session_id: i32,
    new_status: SessionStatus,
    now: DateTime<Utc>,
) -> Result<Session> {
    let session = sessions::get_session(db, session_id)?;
    ensure_owner(caller, &session)?;

    let rule = find_transition(session.status, new_status, Trigger::Manual).ok_or_else(|| {
        let message = if is_terminal(session.status) {
            "it can no longer change".to_string()
        } else {
            format!("cannot be changed to {new_status}")
        };
        Error::InvalidState {
            current: session.status,
            message,
        }
    })?;

    if rule.to == SessionStatus::Completed && session.started_at.is_none() {
        return Err(Error::InvalidState {
            current: session.status,
            message: "cannot be completed before it has started".to_string(),
        });
    }

    let ended_at = rule.stamps_end.then(|| timestamp(now));
    match sessions::transition_one(db, session_id, rule.from, rule.to, ended_at)? {
        Some(updated) => {
            info!(session_id, from = %rule.from, to = %rule.to, "changed session status");
            Ok(updated)
        }
        None => {
            // Someone else moved the session between the read and the update.
            let current = sessions::get_session(db, session_id)?.status;
            warn!(session_id, %current, requested = %new_status, "lost session status race");
            Err(Error::InvalidState {
                current,
                message: format!("changed concurrently, cannot be changed to {new_status}"),
            })
        }
    }
}

/// Completes every ongoing session that has started. Safe to run repeatedly: a second run matches
/// nothing.
pub fn complete_ongoing_sessions(db: &mut SqliteConnection, now: DateTime<Utc>) -> Result<usize> {
    let rule = sweep_rule(SessionStatus::Ongoing, SessionStatus::Completed);
    debug_assert!(rule.stamps_end);

    sessions::complete_started(db, timestamp(now))
}

/// Finalizes every completed session that ended at least `after` before `now`.
pub fn finalize_completed_sessions(
    db: &mut SqliteConnection,
    now: DateTime<Utc>,
    after: Duration,
) -> Result<usize> {
    let rule = sweep_rule(SessionStatus::Completed, SessionStatus::Finalized);
    debug_assert!(!rule.stamps_end);

    let cutoff = now.checked_sub_signed(after).ok_or_else(|| {
        Error::Validation(format!("cannot finalize sessions ended {after} before {now}"))
    })?;

    sessions::finalize_ended_before(db, timestamp(cutoff))
}

fn sweep_rule(from: SessionStatus, to: SessionStatus) -> &'static Transition {
    find_transition(from, to, Trigger::Sweep)
        .unwrap_or_else(|| unreachable!("no sweep rule from {from} to {to}"))
}

/// Checks that the caller is the teacher who created the session.
pub(crate) fn ensure_owner(caller: Caller, session: &Session) -> Result<()> {
    caller
        .require_teacher(session.created_by, &format!("session {}", session.id))
        .map(drop)
}

/// Checks that the session's attendance may still be edited.
pub(crate) fn ensure_editable(session: &Session) -> Result<()> {
    if session.status.accepts_attendance_edits() {
        Ok(())
    } else {
        Err(Error::InvalidState {
            current: session.status,
            message: "attendance can no longer be edited".to_string(),
        })
    }
}
