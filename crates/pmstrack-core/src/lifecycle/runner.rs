//! Async loop that fires sweeps on their triggers.
//!
//! The runner owns no store. It sleeps until the earliest trigger, hands the
//! sweep kind to a [`SweepHandler`], and logs the outcome. Handler errors
//! never stop the loop.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::trigger::ScheduledSweep;
use super::SweepKind;
use crate::clock::Clock;
use crate::error::Result;

/// Executes one sweep.
pub trait SweepHandler {
    fn fire(&mut self, kind: SweepKind) -> Result<String>;
}

impl<F> SweepHandler for F
where
    F: FnMut(SweepKind) -> Result<String>,
{
    fn fire(&mut self, kind: SweepKind) -> Result<String> {
        self(kind)
    }
}

pub struct SweepRunner<H> {
    plan: Vec<(ScheduledSweep, DateTime<Utc>)>,
    clock: Arc<dyn Clock>,
    handler: H,
}

impl<H: SweepHandler> SweepRunner<H> {
    pub fn new(plan: Vec<ScheduledSweep>, clock: Arc<dyn Clock>, handler: H) -> Self {
        let now = clock.now();
        let plan = plan
            .into_iter()
            .map(|sweep| {
                let next = sweep.trigger.next_after(now);
                (sweep, next)
            })
            .collect();
        Self {
            plan,
            clock,
            handler,
        }
    }

    /// Next firing time per sweep kind.
    pub fn upcoming(&self) -> Vec<(SweepKind, DateTime<Utc>)> {
        self.plan.iter().map(|(s, at)| (s.kind, *at)).collect()
    }

    fn earliest(&self) -> Option<usize> {
        self.plan
            .iter()
            .enumerate()
            .min_by_key(|(_, (_, at))| *at)
            .map(|(idx, _)| idx)
    }

    /// Run until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        for (kind, at) in self.upcoming() {
            tracing::info!(kind = kind.as_str(), next = %at, "sweep scheduled");
        }

        loop {
            let Some(idx) = self.earliest() else {
                tracing::warn!("no sweeps scheduled, runner idle until shutdown");
                shutdown.as_mut().await;
                break;
            };
            let (sweep, at) = self.plan[idx];
            let wait = (at - self.clock.now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let kind = sweep.kind;
                    match self.handler.fire(kind) {
                        Ok(summary) => tracing::info!(kind = kind.as_str(), "{summary}"),
                        Err(e) => tracing::error!(kind = kind.as_str(), error = %e, "sweep failed"),
                    }
                    let base = at.max(self.clock.now());
                    self.plan[idx].1 = sweep.trigger.next_after(base);
                }
                _ = shutdown.as_mut() => {
                    tracing::info!("sweep runner shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::CoreError;
    use crate::lifecycle::trigger::Trigger;
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::Mutex;

    fn clock_at(h: u32, m: u32, s: u32, ms: u32) -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_milli_opt(h, m, s, ms)
                .unwrap()
                .and_utc(),
        ))
    }

    fn daily(kind: SweepKind, h: u32, m: u32) -> ScheduledSweep {
        ScheduledSweep {
            kind,
            trigger: Trigger::Daily {
                at: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
            },
        }
    }

    #[test]
    fn new_computes_first_firings() {
        let clock = clock_at(8, 0, 0, 0);
        let runner = SweepRunner::new(
            vec![daily(SweepKind::DueSoon, 9, 0), daily(SweepKind::Expiry, 0, 5)],
            clock,
            |_kind: SweepKind| -> Result<String> { Ok(String::new()) },
        );
        let upcoming = runner.upcoming();
        assert_eq!(upcoming[0].1.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(upcoming[1].1.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(runner.earliest(), Some(0));
    }

    #[tokio::test]
    async fn fires_due_sweep_and_survives_errors() {
        let clock = clock_at(8, 59, 59, 950);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&fired);

        let runner = SweepRunner::new(
            vec![daily(SweepKind::DueSoon, 9, 0)],
            clock,
            move |kind: SweepKind| -> Result<String> {
                log.lock().unwrap().push(kind);
                Err(CoreError::invalid_input("boom"))
            },
        );
        runner
            .run(tokio::time::sleep(std::time::Duration::from_millis(300)))
            .await;

        assert_eq!(*fired.lock().unwrap(), vec![SweepKind::DueSoon]);
    }

    #[tokio::test]
    async fn shutdown_before_any_trigger() {
        let clock = clock_at(10, 0, 0, 0);
        let fired = Arc::new(Mutex::new(0));
        let count = Arc::clone(&fired);

        let runner = SweepRunner::new(
            vec![daily(SweepKind::Expiry, 0, 5)],
            clock,
            move |_kind: SweepKind| -> Result<String> {
                *count.lock().unwrap() += 1;
                Ok("done".into())
            },
        );
        runner.run(async {}).await;
        assert_eq!(*fired.lock().unwrap(), 0);
    }
}
