//! Owned, cancelable timers.
//!
//! A timer is a spawned task that feeds an event back into a session's
//! loop. Dropping the [`TimerHandle`] aborts it, so a session that stops
//! cannot leave timers firing into a closed channel.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Deliver `event` once, after `delay`.
    pub fn after<T>(delay: Duration, events: mpsc::UnboundedSender<T>, event: T) -> Self
    where
        T: Send + 'static,
    {
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(event);
        });
        Self { task }
    }

    /// Deliver a clone of `event` every `period`, first after one period.
    pub fn every<T>(period: Duration, events: mpsc::UnboundedSender<T>, event: T) -> Self
    where
        T: Clone + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if events.send(event.clone()).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
