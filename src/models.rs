//! Row types for the `schedules`, `sessions`, `attendances` and `students` tables, plus the closed
//! status enumerations stored in their text columns.

use crate::schema::{attendances, schedules, sessions, students};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;
use diesel::{AsExpression, FromSqlRow};
use std::fmt;
use std::str::FromStr;

/// Returned when a status column or command-line argument holds an unknown variant name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// Declares a fieldless enum persisted as its snake_case name in a `Text` column.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsExpression, FromSqlRow)]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// The name stored in the database.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Sqlite> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
                out.set_value(self.as_str());
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Sqlite> for $name {
            fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
                let text = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
                Ok(text.parse::<$name>()?)
            }
        }
    };
}

text_enum! {
    /// The lifecycle state of a [`Session`]. Legal moves between states live in
    /// [`crate::lifecycle::TRANSITIONS`].
    pub enum SessionStatus {
        Ongoing => "ongoing",
        Completed => "completed",
        Cancelled => "cancelled",
        Finalized => "finalized",
    }
}

text_enum! {
    /// Whether a student was at a session.
    pub enum AttendanceStatus {
        Present => "present",
        Absent => "absent",
        Late => "late",
        Excused => "excused",
    }
}

text_enum! {
    /// How an [`Attendance`] row was last marked.
    pub enum AttendanceMethod {
        FaceRecognition => "face_recognition",
        Manual => "manual",
    }
}

impl SessionStatus {
    /// Attendance can only be edited while the session is still running.
    pub fn accepts_attendance_edits(self) -> bool {
        self == SessionStatus::Ongoing
    }
}

/// A recurring weekly slot binding a class, subject, teacher and room to a time range.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable)]
#[diesel(table_name = schedules)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Schedule {
    pub id: i32,
    pub class_id: i32,
    pub subject_id: i32,
    pub teacher_id: i32,
    pub academic_period_id: i32,
    /// ISO weekday, Monday = 1 through Sunday = 7.
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: String,
    pub is_active: bool,
}

impl Schedule {
    /// Formats the slot as e.g. `Monday 08:00-09:00`.
    pub fn describe_slot(&self) -> String {
        format!(
            "{} {}",
            crate::time::weekday_name(self.day_of_week),
            crate::time::format_range(self.start_time, self.end_time)
        )
    }
}

/// The writable fields of a [`Schedule`], used both to create a schedule and to replace an existing
/// one on update.
#[derive(Debug, Clone, PartialEq, Insertable, AsChangeset)]
#[diesel(table_name = schedules)]
pub struct NewSchedule {
    pub class_id: i32,
    pub subject_id: i32,
    pub teacher_id: i32,
    pub academic_period_id: i32,
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: String,
    pub is_active: bool,
}

/// A single dated occurrence of a [`Schedule`].
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(Schedule))]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Session {
    pub id: i32,
    pub schedule_id: i32,
    pub date: NaiveDate,
    pub status: SessionStatus,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    /// The teacher who opened the session. Only they may mutate it.
    pub created_by: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub schedule_id: i32,
    pub date: NaiveDate,
    pub status: SessionStatus,
    pub started_at: Option<NaiveDateTime>,
    pub created_by: i32,
    pub notes: Option<&'a str>,
}

/// One student's record for one [`Session`].
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(Session))]
#[diesel(table_name = attendances)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Attendance {
    pub id: i32,
    pub session_id: i32,
    pub student_id: i32,
    pub status: AttendanceStatus,
    pub check_in_time: Option<NaiveDateTime>,
    pub attendance_method: AttendanceMethod,
    pub face_confidence: Option<f32>,
    pub marked_by: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = attendances)]
pub struct NewAttendance {
    pub session_id: i32,
    pub student_id: i32,
    pub status: AttendanceStatus,
    pub attendance_method: AttendanceMethod,
}

/// A student enrolled in a class. Backs the default roster provider.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = students)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Student {
    pub id: i32,
    pub class_id: i32,
    pub name: String,
}
