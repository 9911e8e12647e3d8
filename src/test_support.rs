//! Fixtures shared by the unit tests.

use crate::models::{NewSchedule, Schedule};
use crate::schema;
use crate::settings::DatabaseSettings;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use diesel::prelude::*;

/// A migrated in-memory database.
pub fn connection() -> SqliteConnection {
    crate::establish_connection(&DatabaseSettings::in_memory()).expect("in-memory database")
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

pub fn new_schedule(
    teacher_id: i32,
    class_id: i32,
    day_of_week: i32,
    start_time: NaiveTime,
    end_time: NaiveTime,
) -> NewSchedule {
    NewSchedule {
        class_id,
        subject_id: 1,
        teacher_id,
        academic_period_id: 1,
        day_of_week,
        start_time,
        end_time,
        room: "GHC 4401".to_string(),
        is_active: true,
    }
}

/// Inserts a schedule directly, skipping validation and conflict detection.
pub fn insert_schedule(
    db: &mut SqliteConnection,
    teacher_id: i32,
    class_id: i32,
    day_of_week: i32,
    start_time: NaiveTime,
    end_time: NaiveTime,
) -> Schedule {
    diesel::insert_into(schema::schedules::table)
        .values(new_schedule(teacher_id, class_id, day_of_week, start_time, end_time))
        .returning(Schedule::as_returning())
        .get_result(db)
        .unwrap()
}
