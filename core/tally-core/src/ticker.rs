//! Periodic tick sources bound to the running phase.
//!
//! Each armed period gets its own thread and stop flag. `disarm` flips the
//! flag before returning, and every tick carries the epoch it was armed with,
//! so the timer can drop anything that raced past the flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub trait TickControl: Send {
    fn arm(&mut self, epoch: u64);
    fn disarm(&mut self);
}

pub type TickCallback = Arc<dyn Fn(u64) + Send + Sync>;

struct ArmedPeriod {
    epoch: u64,
    stop: Arc<AtomicBool>,
}

/// Delivers `on_tick(epoch)` once per `interval` until disarmed.
pub struct IntervalTicker {
    interval: Duration,
    on_tick: TickCallback,
    armed: Option<ArmedPeriod>,
}

impl IntervalTicker {
    pub fn new(interval: Duration, on_tick: TickCallback) -> Self {
        Self {
            interval,
            on_tick,
            armed: None,
        }
    }

    #[cfg(test)]
    fn armed_epoch(&self) -> Option<u64> {
        self.armed.as_ref().map(|period| period.epoch)
    }
}

impl TickControl for IntervalTicker {
    fn arm(&mut self, epoch: u64) {
        self.disarm();

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let on_tick = Arc::clone(&self.on_tick);
        let interval = self.interval;

        let spawned = thread::Builder::new()
            .name(format!("tally-ticker-{}", epoch))
            .spawn(move || {
                let started = Instant::now();
                let mut ticks: u32 = 0;
                loop {
                    ticks = ticks.saturating_add(1);
                    let due = started + interval * ticks;
                    let now = Instant::now();
                    if due > now {
                        thread::sleep(due - now);
                    }
                    if thread_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    on_tick(epoch);
                }
            });

        match spawned {
            Ok(_) => {
                tracing::debug!(epoch, interval_ms = interval.as_millis() as u64, "Ticker armed");
                self.armed = Some(ArmedPeriod { epoch, stop });
            }
            Err(err) => {
                tracing::error!(epoch, error = %err, "Failed to spawn ticker thread");
            }
        }
    }

    fn disarm(&mut self) {
        if let Some(period) = self.armed.take() {
            period.stop.store(true, Ordering::SeqCst);
            tracing::debug!(epoch = period.epoch, "Ticker disarmed");
        }
    }
}

impl Drop for IntervalTicker {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// A tick source that never fires. Ticks are fed by hand.
#[derive(Debug, Default)]
pub struct NoopTicker;

impl TickControl for NoopTicker {
    fn arm(&mut self, _epoch: u64) {}
    fn disarm(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn delivers_ticks_tagged_with_epoch() {
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let mut ticker = IntervalTicker::new(
            Duration::from_millis(10),
            Arc::new(move |epoch| {
                if let Ok(tx) = tx.lock() {
                    let _ = tx.send(epoch);
                }
            }),
        );

        ticker.arm(7);
        assert_eq!(ticker.armed_epoch(), Some(7));
        let epoch = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("tick delivered");
        assert_eq!(epoch, 7);
        ticker.disarm();
        assert_eq!(ticker.armed_epoch(), None);
    }

    #[test]
    fn disarm_stops_delivery() {
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let mut ticker = IntervalTicker::new(
            Duration::from_millis(10),
            Arc::new(move |epoch| {
                if let Ok(tx) = tx.lock() {
                    let _ = tx.send(epoch);
                }
            }),
        );

        ticker.arm(1);
        rx.recv_timeout(Duration::from_secs(2)).expect("first tick");
        ticker.disarm();

        // Drain anything sent before the flag was observed.
        thread::sleep(Duration::from_millis(50));
        let _ = rx.try_iter().count();
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());
    }
}
