//! Running jobs on a cron schedule.

use anyhow::Error;
use async_std::{sync::Arc, task::sleep};
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use croner::Cron;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

/// Longest single sleep while waiting for the next fire time.
///
/// Sleeping in bounded steps means a change to the system clock delays a job by at most this
/// long.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// A schedule, given as a standard 5-field crontab expression in local time.
///
/// Shorthands like `@daily` and `@hourly` are also accepted.
#[derive(Clone)]
pub struct Schedule {
    expr: String,
    cron: Arc<Cron>,
}

impl FromStr for Schedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cron = Cron::new(s)
            .parse()
            .map_err(|err| Error::msg(format!("invalid cron expression '{s}': {err}")))?;
        Ok(Self {
            expr: s.into(),
            cron: Arc::new(cron),
        })
    }
}

impl Display for Schedule {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}

impl Debug for Schedule {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_tuple("Schedule").field(&self.expr).finish()
    }
}

impl Schedule {
    /// The first time matching this schedule strictly after `time`.
    pub fn next_after<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> Result<DateTime<Tz>, Error> {
        self.cron.find_next_occurrence(time, false).map_err(|err| {
            Error::msg(format!(
                "no upcoming time matches schedule '{}': {err}",
                self.expr
            ))
        })
    }

    /// Run `job` every time the schedule fires, forever.
    ///
    /// Each run completes before the next fire time is computed, so runs never overlap, and fire
    /// times missed while a run was in progress are skipped. Errors from the job are logged and do
    /// not stop the schedule.
    pub async fn run<F, Fut>(&self, job: F) -> Result<(), Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        self.run_with(&SystemClock, job).await
    }

    async fn run_with<C, F, Fut>(&self, clock: &C, mut job: F) -> Result<(), Error>
    where
        C: Clock,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        loop {
            let next = self.next_after(&clock.now())?;
            tracing::info!("next run at {next}");
            clock.sleep_until(next).await;
            if let Err(err) = job().await {
                tracing::error!("scheduled run failed: {err:#}");
            }
        }
    }
}

#[async_trait]
trait Clock: Sync {
    fn now(&self) -> DateTime<Local>;
    async fn sleep_until(&self, deadline: DateTime<Local>);
}

/// The system clock.
struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Local>) {
        sleep_until(deadline).await
    }
}

/// Sleep until the system clock reaches `deadline`.
async fn sleep_until(deadline: DateTime<Local>) {
    loop {
        let remaining = match (deadline - Local::now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => remaining,
            // The deadline has passed.
            _ => return,
        };
        sleep(remaining.min(MAX_SLEEP)).await;
    }
}
