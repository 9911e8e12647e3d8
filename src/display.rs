//! Pretty printing of timetable and attendance data for the command line.

use crate::models::{Schedule, Session};
use crate::sessions::SessionWithRoster;
use crate::summary::{AttendanceSummary, StudentAttendance};
use crate::time::{format_range, weekday_name};
use chrono::NaiveDate;
use tabled::{Table, Tabled, settings::Style};

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Pretty prints a list of schedule entries.
pub fn show_schedules(schedules: &[Schedule]) {
    #[derive(Tabled)]
    struct Row {
        id: i32,
        day: &'static str,
        time: String,
        teacher: i32,
        class: i32,
        subject: i32,
        period: i32,
        room: String,
        active: bool,
    }

    let rows = schedules.iter().map(|schedule| Row {
        id: schedule.id,
        day: weekday_name(schedule.day_of_week),
        time: format_range(schedule.start_time, schedule.end_time),
        teacher: schedule.teacher_id,
        class: schedule.class_id,
        subject: schedule.subject_id,
        period: schedule.academic_period_id,
        room: schedule.room.clone(),
        active: schedule.is_active,
    });

    let mut table = Table::new(rows);
    table.with(Style::modern());

    println!("Timetable:\n{table}");
}

/// Pretty prints a list of sessions without their attendance.
pub fn show_sessions(sessions: &[Session]) {
    #[derive(Tabled)]
    struct Row {
        id: i32,
        schedule: i32,
        date: NaiveDate,
        status: String,
        started: String,
        ended: String,
    }

    let rows = sessions.iter().map(|session| Row {
        id: session.id,
        schedule: session.schedule_id,
        date: session.date,
        status: session.status.to_string(),
        started: or_dash(session.started_at),
        ended: or_dash(session.ended_at),
    });

    let mut table = Table::new(rows);
    table.with(Style::modern());

    println!("Sessions:\n{table}");
}

/// Pretty prints a session header followed by its attendance roster.
pub fn show_session(session: &SessionWithRoster) {
    #[derive(Tabled)]
    struct Row {
        id: i32,
        student: i32,
        status: String,
        check_in: String,
        method: String,
        confidence: String,
        notes: String,
    }

    let header = &session.session;
    println!(
        "Session {} (schedule {}, {}) is {}",
        header.id, header.schedule_id, header.date, header.status
    );

    let rows = session.attendances.iter().map(|attendance| Row {
        id: attendance.id,
        student: attendance.student_id,
        status: attendance.status.to_string(),
        check_in: or_dash(attendance.check_in_time),
        method: attendance.attendance_method.to_string(),
        confidence: or_dash(attendance.face_confidence.map(|c| format!("{c:.2}"))),
        notes: attendance.notes.clone().unwrap_or_default(),
    });

    let mut table = Table::new(rows);
    table.with(Style::modern());

    println!("{table}");
}

/// Pretty prints the status counts of a session.
pub fn show_summary(summary: &AttendanceSummary) {
    let mut table = Table::new([*summary]);
    table.with(Style::modern());

    println!(
        "{table}\nAttendance rate: {:.1}%",
        summary.attendance_rate() * 100.0
    );
}

/// Prints the dates a student was present, late, excused or absent.
pub fn show_student_attendance(student_id: i32, attendance: &StudentAttendance) {
    fn dates(dates: &[NaiveDate]) -> String {
        if dates.is_empty() {
            return "-".to_string();
        }
        dates
            .iter()
            .map(NaiveDate::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    #[derive(Tabled)]
    struct Row {
        status: &'static str,
        count: usize,
        dates: String,
    }

    let rows = [
        ("present", &attendance.present),
        ("late", &attendance.late),
        ("excused", &attendance.excused),
        ("absent", &attendance.absent),
    ]
    .into_iter()
    .map(|(status, list)| Row {
        status,
        count: list.len(),
        dates: dates(list),
    });

    let mut table = Table::new(rows);
    table.with(Style::modern());

    println!("Student {student_id} attendance:\n{table}");
}
