//! Detection of double-booked teachers and classes in the weekly timetable.

use crate::models::{NewSchedule, Schedule};
use crate::schema::schedules;
use crate::{Error, Result};
use chrono::NaiveTime;
use diesel::prelude::*;
use std::fmt;

/// Whether the half-open intervals `[s1, e1)` and `[s2, e2)` overlap, covering partial overlap on
/// either side and containment in both directions.
pub fn overlaps(s1: NaiveTime, e1: NaiveTime, s2: NaiveTime, e2: NaiveTime) -> bool {
    (s1 <= s2 && s2 < e1) || (s1 < e2 && e2 <= e1) || (s2 <= s1 && e1 <= e2)
}

/// Returns the first schedule among `existing` whose time range overlaps `[start, end)`.
pub fn find_overlap<'a, I>(existing: I, start: NaiveTime, end: NaiveTime) -> Option<&'a Schedule>
where
    I: IntoIterator<Item = &'a Schedule>,
{
    existing
        .into_iter()
        .find(|schedule| overlaps(schedule.start_time, schedule.end_time, start, end))
}

/// The timetable position a schedule wants to occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub teacher_id: i32,
    pub class_id: i32,
    pub academic_period_id: i32,
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl From<&NewSchedule> for Slot {
    fn from(schedule: &NewSchedule) -> Self {
        Self {
            teacher_id: schedule.teacher_id,
            class_id: schedule.class_id,
            academic_period_id: schedule.academic_period_id,
            day_of_week: schedule.day_of_week,
            start_time: schedule.start_time,
            end_time: schedule.end_time,
        }
    }
}

/// Which party of the slot is already booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Teacher,
    Class,
}

/// An existing active schedule that collides with a requested slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub existing: Schedule,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let existing = &self.existing;
        match self.kind {
            ConflictKind::Teacher => write!(
                f,
                "teacher {} is already scheduled in schedule {} ({}, room {})",
                existing.teacher_id,
                existing.id,
                existing.describe_slot(),
                existing.room
            ),
            ConflictKind::Class => write!(
                f,
                "class {} is already scheduled in schedule {} ({}, room {})",
                existing.class_id,
                existing.id,
                existing.describe_slot(),
                existing.room
            ),
        }
    }
}

/// Looks for an active schedule in the same academic period and weekday that overlaps `slot` and
/// shares its teacher or its class. `exclude` skips the schedule being updated.
///
/// The teacher is checked first and a teacher conflict is returned without querying the class.
pub fn check_conflict(
    db: &mut SqliteConnection,
    slot: &Slot,
    exclude: Option<i32>,
) -> Result<Option<Conflict>> {
    for kind in [ConflictKind::Teacher, ConflictKind::Class] {
        let candidates = candidates(db, slot, exclude, kind)?;

        if let Some(existing) = find_overlap(&candidates, slot.start_time, slot.end_time) {
            return Ok(Some(Conflict {
                kind,
                existing: existing.clone(),
            }));
        }
    }

    Ok(None)
}

/// Like [`check_conflict`], but turns a conflict into [`Error::Conflict`].
pub fn ensure_no_conflict(
    db: &mut SqliteConnection,
    slot: &Slot,
    exclude: Option<i32>,
) -> Result<()> {
    match check_conflict(db, slot, exclude)? {
        Some(conflict) => Err(Error::Conflict(conflict.to_string())),
        None => Ok(()),
    }
}

fn candidates(
    db: &mut SqliteConnection,
    slot: &Slot,
    exclude: Option<i32>,
    kind: ConflictKind,
) -> QueryResult<Vec<Schedule>> {
    let mut query = schedules::table
        .filter(schedules::academic_period_id.eq(slot.academic_period_id))
        .filter(schedules::day_of_week.eq(slot.day_of_week))
        .filter(schedules::is_active.eq(true))
        .into_boxed();

    query = match kind {
        ConflictKind::Teacher => query.filter(schedules::teacher_id.eq(slot.teacher_id)),
        ConflictKind::Class => query.filter(schedules::class_id.eq(slot.class_id)),
    };

    if let Some(excluded) = exclude {
        query = query.filter(schedules::id.ne(excluded));
    }

    query
        .order(schedules::start_time)
        .select(Schedule::as_select())
        .load(db)
}
