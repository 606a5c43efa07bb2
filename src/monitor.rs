use std::{
    sync::{Weak, mpsc},
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crate::supervisor::ConnectionSupervisor;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic liveness poll of the supervised client.
///
/// Ticks run on one dedicated thread, so a check never overlaps the previous
/// one; ticks that come due while a check is still running are dropped
/// rather than queued. The monitor holds only a weak reference and stops on
/// its own once the supervisor is gone.
pub struct LivenessMonitor {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    pub fn start(supervisor: Weak<ConnectionSupervisor>, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let (stop, stopped) = mpsc::channel::<()>();

        let thread = std::thread::spawn(move || {
            log::info!("[monitor] started (period={}ms)", period.as_millis());
            let mut next_tick = Instant::now() + period;
            loop {
                let wait = next_tick.saturating_duration_since(Instant::now());
                match stopped.recv_timeout(wait) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }

                let Some(supervisor) = supervisor.upgrade() else {
                    break;
                };
                supervisor.check_liveness();
                drop(supervisor);

                next_tick += period;
                let now = Instant::now();
                if next_tick <= now {
                    let behind = now.duration_since(next_tick);
                    let dropped = behind.as_nanos() / period.as_nanos() + 1;
                    log::trace!("[monitor] dropped {dropped} tick(s) during a slow check");
                    next_tick += period * u32::try_from(dropped).unwrap_or(u32::MAX);
                }
            }
            log::info!("[monitor] stopped");
        });

        Self {
            stop: Some(stop),
            thread: Some(thread),
        }
    }

    pub fn stop(&mut self) {
        // Dropping the sender wakes the thread immediately.
        self.stop.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::warn!("[monitor] liveness thread panicked");
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
