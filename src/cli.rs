//! This module contains the command-line interface [`Cli`] parser for managing the timetable,
//! its class sessions, and their attendance, along with [`run`], which carries out a parsed
//! command.

use crate::collaborators::Caller;
use crate::conflict::Slot;
use crate::display;
use crate::manager::AttendanceManager;
use crate::models::{AttendanceStatus, NewSchedule, SessionStatus, Student};
use crate::records::AttendanceUpdate;
use crate::scheduler::Scheduler;
use crate::schedules::Removal;
use crate::settings::Settings;
use crate::time::{self, Clock, SystemClock, parse_date, parse_time};
use crate::{Error, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::sync::Arc;

/// The command line configuration struct, where the command-line interface parser is automatically
/// derived by [`clap::Parser`].
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    #[command(flatten)]
    pub caller: CallerArgs,

    /// The different commands available for managing the timetable and attendance.
    #[command(subcommand)]
    pub command: Command,
}

/// Who is running the command.
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct CallerArgs {
    /// Act as an administrator.
    #[arg(long)]
    pub admin: bool,

    /// Act as the teacher with this ID.
    #[arg(long, value_name = "ID")]
    pub teacher: Option<i32>,
}

impl CallerArgs {
    pub fn caller(&self) -> Result<Caller> {
        match (self.admin, self.teacher) {
            (true, _) => Ok(Caller::Admin),
            (false, Some(id)) => Ok(Caller::Teacher(id)),
            (false, None) => Err(Error::Unauthorized(
                "pass --admin or --teacher <ID> to run this command".to_string(),
            )),
        }
    }
}

/// A weekly slot of the timetable.
#[derive(Args, Debug, Clone)]
pub struct ScheduleArgs {
    #[arg(long)]
    pub teacher_id: i32,

    #[arg(long)]
    pub class_id: i32,

    #[arg(long)]
    pub subject_id: i32,

    #[arg(long)]
    pub period: i32,

    /// The ISO day of the week, from 1 (Monday) to 7 (Sunday).
    #[arg(long)]
    pub day: i32,

    /// The start time, as HH:MM.
    #[arg(long, value_parser = parse_time)]
    pub start: NaiveTime,

    /// The end time, as HH:MM.
    #[arg(long, value_parser = parse_time)]
    pub end: NaiveTime,

    #[arg(long)]
    pub room: String,

    /// Store the entry as inactive, outside of conflict checks.
    #[arg(long)]
    pub inactive: bool,
}

impl From<ScheduleArgs> for NewSchedule {
    fn from(args: ScheduleArgs) -> Self {
        NewSchedule {
            teacher_id: args.teacher_id,
            class_id: args.class_id,
            subject_id: args.subject_id,
            academic_period_id: args.period,
            day_of_week: args.day,
            start_time: args.start,
            end_time: args.end,
            room: args.room,
            is_active: !args.inactive,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepJob {
    /// Complete every started session that is still ongoing.
    EndOfDay,
    /// Finalize sessions that ended long enough ago.
    Finalize,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database and apply pending migrations.
    Migrate,

    /// Add a student to a class roster.
    AddStudent {
        id: i32,
        class_id: i32,
        name: String,
    },

    /// Remove a student from the roster.
    RemoveStudent { id: i32 },

    /// Add an entry to the timetable.
    AddSchedule(ScheduleArgs),

    /// Replace the fields of a timetable entry.
    UpdateSchedule {
        id: i32,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },

    /// Delete a timetable entry, or deactivate it with --force if it already has sessions.
    DeleteSchedule {
        id: i32,
        #[arg(long)]
        force: bool,
    },

    /// Check whether a slot clashes with the active timetable, without saving it.
    CheckConflict {
        #[command(flatten)]
        schedule: ScheduleArgs,

        /// Ignore this entry, e.g. the one being edited.
        #[arg(long)]
        exclude: Option<i32>,
    },

    /// Show the timetable, or only one teacher's or class's active entries.
    Schedules {
        #[arg(long, conflicts_with = "class")]
        teacher: Option<i32>,

        #[arg(long)]
        class: Option<i32>,

        /// With --class, only this ISO day of the week.
        #[arg(long, requires = "class")]
        day: Option<i32>,
    },

    /// Open a session for a timetable entry and snapshot its roster.
    StartSession {
        schedule_id: i32,

        /// The date of the session, as YYYY-MM-DD. Defaults to today.
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Move a session to another status.
    SetStatus {
        session_id: i32,
        status: SessionStatus,
    },

    /// Mark one attendance record of an ongoing session.
    Mark {
        session_id: i32,
        attendance_id: i32,
        status: AttendanceStatus,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Check a student in now, as present or late.
    CheckIn { session_id: i32, student_id: i32 },

    /// Show a session with its attendance and summary.
    ShowSession { session_id: i32 },

    /// List the sessions opened by the calling teacher.
    Sessions,

    /// Show a student's attendance across sessions.
    Student { student_id: i32 },

    /// Run one of the scheduled sweeps now.
    Sweep { job: SweepJob },

    /// Run the sweep scheduler until Enter is pressed.
    Run,
}

/// Carries out a parsed command against the database named in `settings`.
pub fn run(cli: Cli, settings: &Settings) -> Result<()> {
    let mut manager = AttendanceManager::connect(settings)?;

    match cli.command {
        Command::Migrate => {
            println!("Database `{}` is up to date.", settings.database.url);
        }
        Command::AddStudent { id, class_id, name } => {
            cli.caller.caller()?.require_admin("edit the roster")?;
            manager.enroll_students(&[Student { id, class_id, name }])?;
            println!("Added student {id} to class {class_id}.");
        }
        Command::RemoveStudent { id } => {
            cli.caller.caller()?.require_admin("edit the roster")?;
            let student = manager.unenroll_student(id)?;
            println!("Removed {} ({}).", student.name, student.id);
        }
        Command::AddSchedule(args) => {
            let schedule = manager.create_schedule(cli.caller.caller()?, &args.into())?;
            display::show_schedules(&[schedule]);
        }
        Command::UpdateSchedule { id, schedule } => {
            let schedule = manager.update_schedule(cli.caller.caller()?, id, &schedule.into())?;
            display::show_schedules(&[schedule]);
        }
        Command::DeleteSchedule { id, force } => {
            let caller = cli.caller.caller()?;
            if force && !confirm(&format!("Schedule {id} will be deactivated if it has sessions."))? {
                println!("Deletion canceled");
                return Ok(());
            }
            match manager.delete_schedule(caller, id, force)? {
                Removal::Deleted => println!("Deleted schedule {id}."),
                Removal::Deactivated => println!("Schedule {id} has sessions; deactivated it."),
            }
        }
        Command::CheckConflict { schedule, exclude } => {
            let schedule: NewSchedule = schedule.into();
            match manager.check_conflict(&Slot::from(&schedule), exclude)? {
                Some(conflict) => println!("Conflict: {conflict}"),
                None => println!("No conflict."),
            }
        }
        Command::Schedules {
            teacher,
            class,
            day,
        } => {
            let schedules = match class {
                Some(class) => manager.class_schedules(class, day)?,
                None => manager.schedules(teacher)?,
            };
            display::show_schedules(&schedules);
        }
        Command::StartSession {
            schedule_id,
            date,
            notes,
        } => {
            let date = match date {
                Some(date) => date,
                None => today(settings)?,
            };
            let session =
                manager.create_session(cli.caller.caller()?, schedule_id, date, notes.as_deref())?;
            display::show_session(&session);
        }
        Command::SetStatus { session_id, status } => {
            let session = manager.update_session_status(cli.caller.caller()?, session_id, status)?;
            println!("Session {} is now {}.", session.id, session.status);
        }
        Command::Mark {
            session_id,
            attendance_id,
            status,
            notes,
        } => {
            let update = AttendanceUpdate {
                attendance_id,
                status,
                notes,
            };
            manager.mark_attendance(cli.caller.caller()?, session_id, &[update])?;
            display::show_session(&manager.session(session_id)?);
        }
        Command::CheckIn {
            session_id,
            student_id,
        } => {
            let attendance = manager.check_in(cli.caller.caller()?, session_id, student_id)?;
            println!("Student {student_id} is {}.", attendance.status);
        }
        Command::ShowSession { session_id } => {
            display::show_session(&manager.session(session_id)?);
            display::show_summary(&manager.session_summary(session_id)?);
        }
        Command::Sessions => {
            let teacher = cli.caller.caller()?.teacher_id().ok_or_else(|| {
                Error::Validation("sessions are listed per teacher, pass --teacher".to_string())
            })?;
            display::show_sessions(&manager.sessions_created_by(teacher)?);
        }
        Command::Student { student_id } => {
            let attendance = manager.student_attendance(student_id)?;
            display::show_student_attendance(student_id, &attendance);
        }
        Command::Sweep { job } => {
            let report = match job {
                SweepJob::EndOfDay => manager.run_end_of_day_sweep()?,
                SweepJob::Finalize => manager.run_finalization_sweep()?,
            };
            println!("{} sweep updated {} sessions.", report.job, report.count);
        }
        Command::Run => run_scheduler(settings)?,
    }

    Ok(())
}

fn today(settings: &Settings) -> Result<NaiveDate> {
    let offset = settings.check_in_policy()?.utc_offset;
    Ok(time::local(SystemClock.now(), offset).date())
}

fn run_scheduler(settings: &Settings) -> Result<()> {
    let mut scheduler = Scheduler::new(
        settings.database.clone(),
        settings.scheduler_config()?,
        Arc::new(SystemClock),
    );
    scheduler.start()?;

    print!("Scheduler running. Press Enter to stop: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    scheduler.stop();
    println!("Scheduler stopped.");

    Ok(())
}

fn confirm(warning: &str) -> Result<bool> {
    println!("Warning: {warning}");
    print!("Confirm? y/[N]: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schedule_arguments() {
        let cli = Cli::try_parse_from([
            "attendance",
            "--admin",
            "add-schedule",
            "--teacher-id",
            "7",
            "--class-id",
            "3",
            "--subject-id",
            "2",
            "--period",
            "1",
            "--day",
            "1",
            "--start",
            "08:00",
            "--end",
            "09:00",
            "--room",
            "GHC 4401",
        ])
        .unwrap();

        assert_eq!(cli.caller.caller().unwrap(), Caller::Admin);
        let Command::AddSchedule(args) = cli.command else {
            panic!("expected add-schedule");
        };
        let schedule = NewSchedule::from(args);
        assert_eq!(schedule.start_time, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert!(schedule.is_active);
    }

    #[test]
    fn parses_status_names() {
        let cli = Cli::try_parse_from(["attendance", "--teacher", "7", "set-status", "4", "completed"])
            .unwrap();

        assert_eq!(cli.caller.caller().unwrap(), Caller::Teacher(7));
        assert!(matches!(
            cli.command,
            Command::SetStatus {
                session_id: 4,
                status: SessionStatus::Completed
            }
        ));
    }

    #[test]
    fn rejects_unknown_status_and_both_callers() {
        assert!(
            Cli::try_parse_from(["attendance", "--teacher", "7", "set-status", "4", "done"]).is_err()
        );
        assert!(
            Cli::try_parse_from(["attendance", "--admin", "--teacher", "7", "schedules"]).is_err()
        );
    }

    #[test]
    fn missing_caller_is_unauthorized() {
        let cli = Cli::try_parse_from(["attendance", "schedules"]).unwrap();
        assert!(matches!(cli.caller.caller(), Err(Error::Unauthorized(_))));
    }
}
