//! Periodic timer interrupts and the wall-clock register.
//!
//! Writing a non-zero period to the timer-period register (re)arms a
//! dedicated scheduler thread that enqueues [`Interrupt::Timer`] every
//! period. Writing zero cancels it. The thread waits on a control channel
//! rather than sleeping, so cancellation and re-arming take effect
//! immediately instead of after the current period.

use crate::io::Interrupt;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct TimerService {
    intr: Sender<Interrupt>,
    /// Handler address for timer interrupts; read at delivery time.
    pub handler: i32,
    period: i32,
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TimerService {
    pub fn new(intr: Sender<Interrupt>) -> Self {
        Self {
            intr,
            handler: 0,
            period: 0,
            cancel: None,
            thread: None,
        }
    }

    pub fn period(&self) -> i32 {
        self.period
    }

    /// (Re)arms the scheduler; negative values clamp to 0 (disabled).
    pub fn set_period(&mut self, period: i32) {
        self.cancel();
        self.period = period.max(0);
        if self.period == 0 {
            return;
        }
        let interval = Duration::from_millis(self.period as u64);
        let intr = self.intr.clone();
        let (cancel_tx, cancel_rx) = mpsc::channel();
        self.thread = Some(std::thread::spawn(move || loop {
            match cancel_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if intr.send(Interrupt::Timer).is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }));
        self.cancel = Some(cancel_tx);
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.period = 0;
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Wall-clock milliseconds since the Unix epoch, truncated to 32 bits.
pub fn current_time_millis() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armed_timer_delivers_periodic_interrupts() {
        let (tx, rx) = mpsc::channel();
        let mut timer = TimerService::new(tx);
        timer.set_period(5);
        for _ in 0..2 {
            let interrupt = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("timer interrupt");
            assert!(matches!(interrupt, Interrupt::Timer));
        }
        timer.cancel();
    }

    #[test]
    fn writing_zero_cancels_promptly() {
        let (tx, rx) = mpsc::channel();
        let mut timer = TimerService::new(tx);
        timer.set_period(3_600_000);
        timer.set_period(0);
        assert_eq!(timer.period(), 0);
        assert!(timer.thread.is_none(), "scheduler thread joined");
        assert!(rx.try_recv().is_err(), "no tick from the cancelled timer");
    }

    #[test]
    fn negative_period_disables() {
        let (tx, _rx) = mpsc::channel();
        let mut timer = TimerService::new(tx);
        timer.set_period(-5);
        assert_eq!(timer.period(), 0);
        assert!(timer.thread.is_none());
    }

    #[test]
    fn wall_clock_advances() {
        let a = current_time_millis();
        std::thread::sleep(Duration::from_millis(5));
        let b = current_time_millis();
        // Truncation to 32 bits can wrap, but not within a few milliseconds.
        assert_ne!(a, b);
    }
}
