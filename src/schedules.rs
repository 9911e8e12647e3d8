//! The weekly timetable.
//!
//! Every write that can make a schedule active goes through [`crate::conflict`] inside an
//! immediate transaction, which takes SQLite's write lock before the check. Two administrators
//! creating overlapping schedules at the same time are therefore serialized, and the second one
//! sees the first one's row when it checks.

use crate::collaborators::Caller;
use crate::conflict::{Slot, ensure_no_conflict};
use crate::models::{NewSchedule, Schedule};
use crate::schema::schedules;
use crate::{Error, Result, sessions};
use diesel::prelude::*;
use tracing::info;

/// What [`delete_schedule`] did with the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The schedule had no sessions and is gone.
    Deleted,
    /// The schedule has sessions and was only deactivated.
    Deactivated,
}

/// Rejects schedules that could never be stored.
pub fn validate(schedule: &NewSchedule) -> Result<()> {
    if !(1..=7).contains(&schedule.day_of_week) {
        return Err(Error::Validation(format!(
            "day of week must be between 1 (Monday) and 7 (Sunday), got {}",
            schedule.day_of_week
        )));
    }

    if schedule.start_time >= schedule.end_time {
        return Err(Error::Validation(format!(
            "start time {} must be before end time {}",
            schedule.start_time.format("%H:%M"),
            schedule.end_time.format("%H:%M")
        )));
    }

    if schedule.room.trim().is_empty() {
        return Err(Error::Validation("room must not be empty".to_string()));
    }

    Ok(())
}

/// Retrieves a schedule by id.
pub fn get_schedule(db: &mut SqliteConnection, schedule_id: i32) -> Result<Schedule> {
    schedules::table
        .find(schedule_id)
        .select(Schedule::as_select())
        .first(db)
        .optional()?
        .ok_or_else(|| Error::not_found("schedule", schedule_id))
}

/// Retrieves a teacher's active schedules in weekly order.
pub fn schedules_for_teacher(db: &mut SqliteConnection, teacher_id: i32) -> Result<Vec<Schedule>> {
    Ok(schedules::table
        .filter(schedules::teacher_id.eq(teacher_id))
        .filter(schedules::is_active.eq(true))
        .order((schedules::day_of_week, schedules::start_time))
        .select(Schedule::as_select())
        .load(db)?)
}

/// A class's active timetable, optionally limited to one weekday.
pub fn schedules_for_class(
    db: &mut SqliteConnection,
    class_id: i32,
    day_of_week: Option<i32>,
) -> Result<Vec<Schedule>> {
    let mut query = schedules::table
        .filter(schedules::class_id.eq(class_id))
        .filter(schedules::is_active.eq(true))
        .into_boxed();
    if let Some(day) = day_of_week {
        query = query.filter(schedules::day_of_week.eq(day));
    }

    Ok(query
        .order((schedules::day_of_week, schedules::start_time))
        .select(Schedule::as_select())
        .load(db)?)
}

/// Retrieves every schedule, active or not, in weekly order.
pub fn all_schedules(db: &mut SqliteConnection) -> Result<Vec<Schedule>> {
    Ok(schedules::table
        .order((schedules::day_of_week, schedules::start_time, schedules::id))
        .select(Schedule::as_select())
        .load(db)?)
}

/// Creates a schedule after checking it against the timetable.
pub fn create_schedule(
    db: &mut SqliteConnection,
    caller: Caller,
    new_schedule: &NewSchedule,
) -> Result<Schedule> {
    caller.require_admin("create schedules")?;
    validate(new_schedule)?;

    let schedule = db.immediate_transaction(|db| insert_checked(db, new_schedule))?;
    info!(schedule_id = schedule.id, slot = %schedule.describe_slot(), "created schedule");

    Ok(schedule)
}

/// Creates several schedules at once. Each one is checked against the timetable including the
/// ones before it in `new_schedules`; if any fails, none is stored.
pub fn create_schedules(
    db: &mut SqliteConnection,
    caller: Caller,
    new_schedules: &[NewSchedule],
) -> Result<Vec<Schedule>> {
    caller.require_admin("create schedules")?;

    for (index, new_schedule) in new_schedules.iter().enumerate() {
        validate(new_schedule).map_err(|err| match err {
            Error::Validation(message) => Error::Validation(format!("entry {}: {message}", index + 1)),
            other => other,
        })?;
    }

    let created = db.immediate_transaction::<_, Error, _>(|db| {
        new_schedules
            .iter()
            .enumerate()
            .map(|(index, new_schedule)| {
                insert_checked(db, new_schedule).map_err(|err| match err {
                    Error::Conflict(message) => {
                        Error::Conflict(format!("entry {}: {message}", index + 1))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()
    })?;
    info!(count = created.len(), "created schedules");

    Ok(created)
}

fn insert_checked(db: &mut SqliteConnection, new_schedule: &NewSchedule) -> Result<Schedule> {
    if new_schedule.is_active {
        ensure_no_conflict(db, &Slot::from(new_schedule), None)?;
    }

    Ok(diesel::insert_into(schedules::table)
        .values(new_schedule)
        .returning(Schedule::as_returning())
        .get_result(db)?)
}

/// Replaces every field of a schedule, checking the result against the rest of the timetable.
pub fn update_schedule(
    db: &mut SqliteConnection,
    caller: Caller,
    schedule_id: i32,
    changes: &NewSchedule,
) -> Result<Schedule> {
    caller.require_admin("update schedules")?;
    validate(changes)?;

    let schedule = db.immediate_transaction::<_, Error, _>(|db| {
        get_schedule(db, schedule_id)?;

        if changes.is_active {
            ensure_no_conflict(db, &Slot::from(changes), Some(schedule_id))?;
        }

        Ok(diesel::update(schedules::table.find(schedule_id))
            .set(changes)
            .returning(Schedule::as_returning())
            .get_result(db)?)
    })?;
    info!(schedule_id, slot = %schedule.describe_slot(), "updated schedule");

    Ok(schedule)
}

/// Removes a schedule from the timetable.
///
/// A schedule without sessions is deleted. A schedule with sessions keeps them: it is deactivated
/// when `force` is set and the call is rejected otherwise.
pub fn delete_schedule(
    db: &mut SqliteConnection,
    caller: Caller,
    schedule_id: i32,
    force: bool,
) -> Result<Removal> {
    caller.require_admin("delete schedules")?;

    let removal = db.immediate_transaction::<_, Error, _>(|db| {
        get_schedule(db, schedule_id)?;

        let session_count = sessions::count_for_schedule(db, schedule_id)?;
        if session_count == 0 {
            diesel::delete(schedules::table.find(schedule_id)).execute(db)?;
            return Ok(Removal::Deleted);
        }

        if !force {
            return Err(Error::Conflict(format!(
                "schedule {schedule_id} has {session_count} session(s); \
                 delete with force to deactivate it instead"
            )));
        }

        diesel::update(schedules::table.find(schedule_id))
            .set(schedules::is_active.eq(false))
            .execute(db)?;
        Ok(Removal::Deactivated)
    })?;
    info!(schedule_id, ?removal, "removed schedule");

    Ok(removal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connection, hm, new_schedule};

    #[test]
    fn overlapping_teacher_schedule_is_rejected() {
        let mut db = connection();
        let a = create_schedule(&mut db, Caller::Admin, &new_schedule(5, 10, 1, hm(8, 0), hm(9, 0)))
            .unwrap();

        let err = create_schedule(
            &mut db,
            Caller::Admin,
            &new_schedule(5, 11, 1, hm(8, 30), hm(9, 30)),
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(matches!(err, Error::Conflict(_)), "{message}");
        assert!(message.contains("teacher 5"), "{message}");
        assert!(message.contains(&format!("schedule {}", a.id)), "{message}");
        assert!(message.contains("08:00-09:00"), "{message}");
    }

    #[test]
    fn back_to_back_schedules_are_fine() {
        let mut db = connection();
        create_schedule(&mut db, Caller::Admin, &new_schedule(5, 10, 1, hm(8, 0), hm(9, 0))).unwrap();
        create_schedule(&mut db, Caller::Admin, &new_schedule(5, 10, 1, hm(9, 0), hm(10, 0))).unwrap();

        assert_eq!(schedules_for_teacher(&mut db, 5).unwrap().len(), 2);
    }

    #[test]
    fn invalid_schedules_are_rejected_before_the_database() {
        let mut db = connection();

        let backwards = new_schedule(5, 10, 1, hm(9, 0), hm(8, 0));
        assert!(matches!(
            create_schedule(&mut db, Caller::Admin, &backwards),
            Err(Error::Validation(_))
        ));

        let no_such_day = new_schedule(5, 10, 8, hm(8, 0), hm(9, 0));
        assert!(matches!(
            create_schedule(&mut db, Caller::Admin, &no_such_day),
            Err(Error::Validation(_))
        ));

        assert!(all_schedules(&mut db).unwrap().is_empty());
    }

    #[test]
    fn teachers_cannot_edit_the_timetable() {
        let mut db = connection();
        assert!(matches!(
            create_schedule(&mut db, Caller::Teacher(5), &new_schedule(5, 10, 1, hm(8, 0), hm(9, 0))),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn bulk_create_is_all_or_nothing() {
        let mut db = connection();
        let entries = [
            new_schedule(5, 10, 1, hm(8, 0), hm(9, 0)),
            new_schedule(6, 11, 1, hm(8, 0), hm(9, 0)),
            // Same class as the first entry, overlapping it.
            new_schedule(7, 10, 1, hm(8, 45), hm(9, 45)),
        ];

        let err = create_schedules(&mut db, Caller::Admin, &entries).unwrap_err();
        assert!(err.to_string().contains("entry 3"), "{err}");
        assert!(err.to_string().contains("class 10"), "{err}");
        assert!(all_schedules(&mut db).unwrap().is_empty());

        let created = create_schedules(&mut db, Caller::Admin, &entries[..2]).unwrap();
        assert_eq!(created.len(), 2);
    }

    #[test]
    fn update_ignores_the_schedule_itself() {
        let mut db = connection();
        let schedule =
            create_schedule(&mut db, Caller::Admin, &new_schedule(5, 10, 1, hm(8, 0), hm(9, 0))).unwrap();
        create_schedule(&mut db, Caller::Admin, &new_schedule(5, 10, 1, hm(10, 0), hm(11, 0))).unwrap();

        let later = new_schedule(5, 10, 1, hm(8, 30), hm(9, 30));
        let updated = update_schedule(&mut db, Caller::Admin, schedule.id, &later).unwrap();
        assert_eq!(updated.start_time, hm(8, 30));

        let clash = new_schedule(5, 10, 1, hm(9, 30), hm(10, 30));
        assert!(matches!(
            update_schedule(&mut db, Caller::Admin, schedule.id, &clash),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            update_schedule(&mut db, Caller::Admin, 999, &later),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn reactivating_is_checked_too() {
        let mut db = connection();
        let mut inactive = new_schedule(5, 10, 1, hm(8, 0), hm(9, 0));
        inactive.is_active = false;
        let parked = create_schedule(&mut db, Caller::Admin, &inactive).unwrap();
        create_schedule(&mut db, Caller::Admin, &new_schedule(5, 10, 1, hm(8, 0), hm(9, 0))).unwrap();

        inactive.is_active = true;
        assert!(matches!(
            update_schedule(&mut db, Caller::Admin, parked.id, &inactive),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn delete_without_sessions_removes_the_row() {
        let mut db = connection();
        let schedule =
            create_schedule(&mut db, Caller::Admin, &new_schedule(5, 10, 1, hm(8, 0), hm(9, 0))).unwrap();

        assert_eq!(
            delete_schedule(&mut db, Caller::Admin, schedule.id, false).unwrap(),
            Removal::Deleted
        );
        assert!(matches!(
            get_schedule(&mut db, schedule.id),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn class_timetable_skips_inactive_and_other_days() {
        let mut db = connection();
        let monday =
            create_schedule(&mut db, Caller::Admin, &new_schedule(5, 10, 1, hm(8, 0), hm(9, 0))).unwrap();
        let tuesday =
            create_schedule(&mut db, Caller::Admin, &new_schedule(6, 10, 2, hm(8, 0), hm(9, 0))).unwrap();
        let mut parked = new_schedule(7, 10, 1, hm(10, 0), hm(11, 0));
        parked.is_active = false;
        create_schedule(&mut db, Caller::Admin, &parked).unwrap();
        create_schedule(&mut db, Caller::Admin, &new_schedule(8, 11, 1, hm(8, 0), hm(9, 0))).unwrap();

        let ids = |rows: Vec<Schedule>| rows.into_iter().map(|s| s.id).collect::<Vec<_>>();
        assert_eq!(
            ids(schedules_for_class(&mut db, 10, None).unwrap()),
            [monday.id, tuesday.id]
        );
        assert_eq!(ids(schedules_for_class(&mut db, 10, Some(2)).unwrap()), [tuesday.id]);
    }
}
