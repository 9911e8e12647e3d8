//! The background process that closes and finalizes sessions without teacher action.
//!
//! Two jobs run once a day at fixed local times:
//!
//! - the end-of-day sweep completes every ongoing session that has started;
//! - the finalization sweep finalizes every session completed a few days ago.
//!
//! Both are single set-based updates guarded by the current status, so running them again, or
//! running them while teachers change sessions by hand, never moves a session twice. A failing
//! job is logged and tried again at its next trigger time. It never stops the other job.

use crate::lifecycle::{complete_ongoing_sessions, finalize_completed_sessions};
use crate::settings::DatabaseSettings;
use crate::time::Clock;
use crate::{Error, Result, establish_connection};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, Utc};
use diesel::SqliteConnection;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// One of the scheduler's jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    EndOfDay,
    Finalization,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::EndOfDay => f.write_str("end-of-day sweep"),
            Job::Finalization => f.write_str("finalization sweep"),
        }
    }
}

/// The outcome of a successful sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub job: Job,
    /// How many sessions changed state.
    pub count: usize,
}

/// Completes every ongoing session that has started, stamping `ended_at = now`.
pub fn run_end_of_day_sweep(db: &mut SqliteConnection, now: DateTime<Utc>) -> Result<SweepReport> {
    run_sweep(Job::EndOfDay, || complete_ongoing_sessions(db, now))
}

/// Finalizes every completed session that ended at least `after` before `now`.
pub fn run_finalization_sweep(
    db: &mut SqliteConnection,
    now: DateTime<Utc>,
    after: Duration,
) -> Result<SweepReport> {
    run_sweep(Job::Finalization, || finalize_completed_sessions(db, now, after))
}

fn run_sweep(job: Job, sweep: impl FnOnce() -> Result<usize>) -> Result<SweepReport> {
    info!(%job, "starting");

    match sweep() {
        Ok(count) => {
            info!(%job, count, "finished");
            Ok(SweepReport { job, count })
        }
        Err(err) => {
            error!(%job, %err, "failed");
            Err(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// The offset of the wall clock the trigger times are read on.
    pub utc_offset: FixedOffset,
    pub end_of_day_at: NaiveTime,
    pub finalization_at: NaiveTime,
    /// How long a session stays completed before it is finalized.
    pub finalize_after: Duration,
    /// How often the background thread looks at the clock.
    pub poll_interval: std::time::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            end_of_day_at: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or_default(),
            finalization_at: NaiveTime::from_hms_opt(0, 15, 0).unwrap_or_default(),
            finalize_after: Duration::days(3),
            poll_interval: std::time::Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    fn trigger(&self, job: Job) -> NaiveTime {
        match job {
            Job::EndOfDay => self.end_of_day_at,
            Job::Finalization => self.finalization_at,
        }
    }
}

/// The latest instant at or before `now` at which the wall clock at `offset` read `at`.
pub fn last_occurrence(at: NaiveTime, now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_now = now.with_timezone(&offset).naive_local();
    let mut occurrence = local_now.date().and_time(at);
    if occurrence > local_now {
        occurrence -= Duration::days(1);
    }

    (occurrence - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
}

/// The result of running one job during a tick.
#[derive(Debug)]
pub struct JobRun {
    pub job: Job,
    pub outcome: Result<SweepReport>,
}

/// Decides which jobs are due and runs them. Shared between [`Scheduler::run_once`] and the
/// background thread.
struct Ticker {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    last_tick: Option<DateTime<Utc>>,
}

impl Ticker {
    /// Jobs whose trigger time passed in `(last, now]`, in trigger order within a day.
    fn due(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> Vec<Job> {
        [Job::EndOfDay, Job::Finalization]
            .into_iter()
            .filter(|&job| {
                let occurrence = last_occurrence(self.config.trigger(job), now, self.config.utc_offset);
                occurrence > last
            })
            .collect()
    }

    fn prime(&mut self) {
        if self.last_tick.is_none() {
            self.last_tick = Some(self.clock.now());
        }
    }

    fn tick(&mut self, db: &mut SqliteConnection) -> Vec<JobRun> {
        let now = self.clock.now();
        let Some(last) = self.last_tick.replace(now) else {
            return Vec::new();
        };

        self.due(last, now)
            .into_iter()
            .map(|job| {
                let outcome = match job {
                    Job::EndOfDay => run_end_of_day_sweep(db, now),
                    Job::Finalization => run_finalization_sweep(db, now, self.config.finalize_after),
                };
                JobRun { job, outcome }
            })
            .collect()
    }
}

struct Worker {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Runs the sweeps at their configured wall-clock times.
///
/// The background thread keeps its own connection, opened by [`Scheduler::start`] and reopened
/// after a job fails on a lost connection, so `database` must name a database shared with the
/// rest of the application (not `:memory:`).
pub struct Scheduler {
    database: DatabaseSettings,
    ticker: Arc<Mutex<Ticker>>,
    worker: Option<Worker>,
}

impl Scheduler {
    pub fn new(database: DatabaseSettings, config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            database,
            ticker: Arc::new(Mutex::new(Ticker {
                config,
                clock,
                last_tick: None,
            })),
            worker: None,
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        lock(&self.ticker).config
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts polling the clock on a background thread. Jobs whose trigger time passes from now on
    /// will run.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            warn!("scheduler is already running");
            return Ok(());
        }

        let mut db = Some(establish_connection(&self.database)?);
        lock(&self.ticker).prime();

        let (stop, stopped) = mpsc::channel();
        let ticker = Arc::clone(&self.ticker);
        let database = self.database.clone();
        let poll_interval = self.config().poll_interval;

        let handle = thread::Builder::new()
            .name("session-sweeps".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(poll_interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    if db.is_none() {
                        match establish_connection(&database) {
                            Ok(reconnected) => db = Some(reconnected),
                            Err(err) => {
                                error!(%err, "scheduler could not connect to the database");
                                continue;
                            }
                        }
                    }
                    let Some(conn) = db.as_mut() else { continue };

                    let runs = lock(&ticker).tick(conn);
                    if needs_reconnect(&runs) {
                        warn!("scheduler lost its database connection, reconnecting at next poll");
                        db = None;
                    }
                }
            })?;

        info!(?poll_interval, "scheduler started");
        self.worker = Some(Worker { stop, handle });

        Ok(())
    }

    /// Stops the background thread and waits for it to finish a sweep in progress.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = worker.stop.send(());
        if worker.handle.join().is_err() {
            error!("scheduler thread panicked");
        }
        info!("scheduler stopped");
    }

    /// Runs the jobs that became due since the previous tick, using `db`. The first tick only
    /// records the current time.
    pub fn run_once(&self, db: &mut SqliteConnection) -> Vec<JobRun> {
        lock(&self.ticker).tick(db)
    }

    /// Runs the end-of-day sweep immediately, outside the timer.
    pub fn run_end_of_day_sweep(&self, db: &mut SqliteConnection) -> Result<SweepReport> {
        let now = lock(&self.ticker).clock.now();
        run_end_of_day_sweep(db, now)
    }

    /// Runs the finalization sweep immediately, outside the timer.
    pub fn run_finalization_sweep(&self, db: &mut SqliteConnection) -> Result<SweepReport> {
        let (now, after) = {
            let ticker = lock(&self.ticker);
            (ticker.clock.now(), ticker.config.finalize_after)
        };
        run_finalization_sweep(db, now, after)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Whether any job in a tick failed because the connection went away.
fn needs_reconnect(runs: &[JobRun]) -> bool {
    runs.iter().any(|run| run.outcome.as_ref().is_err_and(Error::is_connection_lost))
}

fn lock(ticker: &Mutex<Ticker>) -> MutexGuard<'_, Ticker> {
    ticker.lock().unwrap_or_else(PoisonError::into_inner)
}
