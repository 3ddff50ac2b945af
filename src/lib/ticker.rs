use std::{future::Future, panic::AssertUnwindSafe, time::Duration};

use futures_util::FutureExt;
use tokio::{
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tracing::{error, info};

/// Runs `job` every `period` until `stop` turns true.
///
/// The stop signal is checked between iterations only; a running job is never
/// interrupted. A job that overruns delays the next tick instead of stacking
/// iterations, and a panicking job is logged and the loop keeps going.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(task = name, period_secs = period.as_secs_f64(), "periodic task started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    // sender gone, nobody can ask us to keep running
                    break;
                }
            }
        }
        if *stop.borrow() {
            break;
        }

        if AssertUnwindSafe(job()).catch_unwind().await.is_err() {
            error!(task = name, "iteration panicked");
        }
    }

    info!(task = name, "periodic task stopped");
}
