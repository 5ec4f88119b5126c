//! Periodic scheduling
//!
//! Two pieces:
//! - [`Periodic`], a cadence gate polled from inside a cyclic loop ("is the heartbeat due yet?").
//! - [`spawn_periodic`], which runs a closure on its own thread at a fixed period until a shared
//!   stop flag is raised. The returned [`PeriodicHandle`] can be joined with a bounded timeout.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::time::Clock;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Fires at most once per period. The first poll is always due.
#[derive(Debug, Clone)]
pub struct Periodic {
    period_s: f64,
    last_s: Option<f64>,
}

/// Handle to a thread started by [`spawn_periodic`] or [`spawn_named`].
pub struct PeriodicHandle {
    name: String,
    join_handle: Option<JoinHandle<()>>,
    done: Receiver<()>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Periodic {
    pub fn new(period_s: f64) -> Self {
        Self {
            period_s,
            last_s: None,
        }
    }

    /// Returns true if a full period has elapsed since the last time this returned true.
    pub fn due(&mut self, now_s: f64) -> bool {
        match self.last_s {
            Some(last_s) if now_s - last_s < self.period_s => false,
            _ => {
                self.last_s = Some(now_s);
                true
            }
        }
    }

    /// Forget the last firing so the next poll is due.
    pub fn reset(&mut self) {
        self.last_s = None;
    }
}

impl PeriodicHandle {
    /// Name the thread was spawned with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait at most `timeout` for the thread to exit.
    ///
    /// Returns `true` if the thread has finished (or was already joined). If the timeout elapses
    /// the thread is left detached and `false` is returned.
    pub fn join_timeout(&mut self, timeout: Duration) -> bool {
        let join_handle = match self.join_handle.take() {
            Some(j) => j,
            None => return true,
        };

        match self.done.recv_timeout(timeout) {
            // A disconnect without a message means the thread unwound
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if join_handle.join().is_err() {
                    warn!("Thread \"{}\" panicked", self.name);
                }
                debug!("Thread \"{}\" joined", self.name);
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Thread \"{}\" did not exit within {:.03} s, detaching",
                    self.name,
                    timeout.as_secs_f64()
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Run `f` on a new thread every `period` until `stop` is set.
///
/// `f` is always run at least once. The period is the sleep between the end of one run and the
/// start of the next, so a slow `f` stretches the cadence rather than bunching runs together.
pub fn spawn_periodic<F>(
    name: &str,
    period: Duration,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
    mut f: F,
) -> std::io::Result<PeriodicHandle>
where
    F: FnMut() + Send + 'static,
{
    spawn_named(name, move || loop {
        f();

        if stop.load(Ordering::Relaxed) {
            break;
        }

        clock.sleep(period);

        if stop.load(Ordering::Relaxed) {
            break;
        }
    })
}

/// Run `f` once on a new named thread, returning a handle which supports a bounded join.
pub fn spawn_named<F>(name: &str, f: F) -> std::io::Result<PeriodicHandle>
where
    F: FnOnce() + Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();

    let join_handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            f();
            done_tx.send(()).ok();
        })?;

    Ok(PeriodicHandle {
        name: name.to_string(),
        join_handle: Some(join_handle),
        done: done_rx,
    })
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::SystemClock;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_periodic_due() {
        let mut p = Periodic::new(60.0);

        assert!(p.due(0.0));
        assert!(!p.due(30.0));
        assert!(!p.due(59.9));
        assert!(p.due(60.0));
        assert!(!p.due(100.0));
        assert!(p.due(120.5));

        p.reset();
        assert!(p.due(121.0));
    }

    #[test]
    fn test_spawn_periodic_stops_and_joins() {
        let stop = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let mut handle = spawn_periodic(
            "test_periodic",
            Duration::from_millis(1),
            Arc::new(SystemClock::new()),
            stop.clone(),
            move || {
                count_clone.fetch_add(1, Ordering::Relaxed);
            },
        )
        .unwrap();

        while count.load(Ordering::Relaxed) < 3 {
            thread::sleep(Duration::from_millis(1));
        }

        stop.store(true, Ordering::Relaxed);
        assert!(handle.join_timeout(Duration::from_secs(2)));

        // Second join is a no-op
        assert!(handle.join_timeout(Duration::from_millis(1)));
        assert_eq!(handle.name(), "test_periodic");
    }

    #[test]
    fn test_join_timeout_detaches_stuck_thread() {
        let stop = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let release_clone = release.clone();

        let mut handle = spawn_periodic(
            "test_stuck",
            Duration::from_millis(1),
            Arc::new(SystemClock::new()),
            stop.clone(),
            move || {
                while !release_clone.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(1));
                }
            },
        )
        .unwrap();

        stop.store(true, Ordering::Relaxed);
        assert!(!handle.join_timeout(Duration::from_millis(20)));

        release.store(true, Ordering::Relaxed);
    }
}
