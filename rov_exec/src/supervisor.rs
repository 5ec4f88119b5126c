//! # Lifecycle Supervisor
//!
//! Owns the run loop and the shutdown sequence. Shutdown may be requested from the signal
//! handler, from an error path unwinding through [`ShutdownGuard`], and from the normal end of
//! the run, possibly at the same time. Only the first request does any work, the others wait for
//! it to finish and return.
//!
//! Shutdown proceeds as:
//!
//! 1. Raise the stop flag so the loop and background threads wind down
//! 2. Halt the arbiter, zeroing the motors for good
//! 3. Enqueue the offline marker and flush what is pending within the final flush timeout
//! 4. Close the transport, cleanly if everything was sent so the last will is discarded
//! 5. Join the background threads
//! 6. Record a final telemetry row and close the archives
//! 7. Release the actuator
//!
//! Each step is guarded on its own so a fault in one still lets the rest run.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use comms_if::net::{CloseMode, Message};
use util::{
    schedule::PeriodicHandle,
    time::{self, Clock},
};

use crate::{
    arbiter::Arbiter,
    publisher::RateLimitedPublisher,
    rover::TickFlow,
    telemetry::{ArchiveSink, TelemetryLogger},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SupervisorParams {
    /// Units: seconds
    pub final_flush_timeout_s: f64,

    /// Units: seconds
    pub join_timeout_s: f64,

    /// Target period of one tick of the run loop.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,
}

pub struct Supervisor {
    stop: Arc<AtomicBool>,

    /// Set once shutdown has completed. Held for the whole sequence.
    done: Mutex<bool>,

    arbiter: Arc<Arbiter>,
    publisher: Arc<RateLimitedPublisher>,

    /// Retained marker sent as the last message
    offline: Message,

    threads: Mutex<Vec<PeriodicHandle>>,
    archives: Mutex<Vec<Arc<dyn ArchiveSink>>>,
    telemetry: Option<Arc<TelemetryLogger>>,

    params: SupervisorParams,
    clock: Arc<dyn Clock>,
}

/// Shuts the supervisor down when dropped, covering early returns and panics in `main`.
pub struct ShutdownGuard(Arc<Supervisor>);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Why the run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Stopped,
    EndOfScript,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SupervisorParams {
    fn default() -> Self {
        Self {
            final_flush_timeout_s: 3.0,
            join_timeout_s: 1.5,
            cycle_period_s: 0.05,
        }
    }
}

impl Supervisor {
    pub fn new(
        arbiter: Arc<Arbiter>,
        publisher: Arc<RateLimitedPublisher>,
        offline: Message,
        params: SupervisorParams,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            done: Mutex::new(false),
            arbiter,
            publisher,
            offline,
            threads: Mutex::new(Vec::new()),
            archives: Mutex::new(Vec::new()),
            telemetry: None,
            params,
            clock,
        }
    }

    /// Log a final telemetry row on shutdown.
    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryLogger>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// The flag background threads watch to know when to exit.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Join this thread during shutdown.
    pub fn add_thread(&self, handle: PeriodicHandle) {
        lock(&self.threads).push(handle);
    }

    /// Close this archive during shutdown.
    pub fn add_archive(&self, archive: Arc<dyn ArchiveSink>) {
        lock(&self.archives).push(archive);
    }

    /// Call `tick` once per cycle until it reports the end of the script or a stop is requested.
    pub fn run<F>(&self, mut tick: F) -> RunEnd
    where
        F: FnMut() -> TickFlow,
    {
        info!("Beginning main loop");

        while !self.stop_requested() {
            let cycle_start_s = self.clock.now_s();

            if tick() == TickFlow::EndOfScript {
                return RunEnd::EndOfScript;
            }

            let cycle_dur_s = self.clock.now_s() - cycle_start_s;
            let remaining_s = self.params.cycle_period_s - cycle_dur_s;

            if remaining_s >= 0.0 {
                self.clock.sleep(time::secs(remaining_s));
            } else {
                warn!("Cycle overran by {:.06} s", -remaining_s);
            }
        }

        RunEnd::Stopped
    }

    /// Bring everything to a safe stop. Returns `true` for the call which did the work.
    pub fn shutdown(&self, reason: &str) -> bool {
        let mut done = lock(&self.done);
        if *done {
            return false;
        }

        info!("Shutting down: {}", reason);

        self.stop.store(true, Ordering::Relaxed);

        guarded("halt", || {
            self.arbiter.halt();
        });

        let mut drained = false;
        guarded("final flush", || {
            self.publisher.enqueue_msg(&self.offline);
            drained = self
                .publisher
                .drain(time::secs(self.params.final_flush_timeout_s));
        });

        guarded("close transport", || {
            // Let the will announce we're offline if the marker didn't make it out
            let mode = if drained {
                CloseMode::Clean
            } else {
                CloseMode::Unclean
            };

            if let Err(e) = self.publisher.close(mode) {
                warn!("Could not close the transport: {}", e);
            }
        });

        guarded("join threads", || {
            let timeout = time::secs(self.params.join_timeout_s);
            for mut handle in lock(&self.threads).drain(..) {
                if !handle.join_timeout(timeout) {
                    warn!("Thread {} did not exit in time, leaving it", handle.name());
                }
            }
        });

        guarded("close archives", || {
            if let Some(telemetry) = &self.telemetry {
                telemetry.log_event(&self.arbiter.snapshot(), self.clock.now_s(), "shutdown");
            }

            let timeout = time::secs(self.params.join_timeout_s);
            for archive in lock(&self.archives).drain(..) {
                if !archive.close(timeout) {
                    warn!("Archive {} was not closed cleanly", archive.name());
                }
            }
        });

        guarded("release actuator", || {
            self.arbiter.release_actuator();
        });

        *done = true;
        info!("Shutdown complete");

        true
    }
}

impl ShutdownGuard {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self(supervisor)
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.shutdown("exiting");
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run one shutdown step, containing any panic so the next step still runs.
fn guarded<F: FnOnce()>(step: &str, f: F) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("Shutdown step \"{}\" panicked, continuing", step);
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::actuator::{MotorOutput, SimActuator, ZERO_DUTIES};
    use crate::arbiter::ArbiterParams;
    use crate::publisher::PublisherParams;
    use crate::telemetry::offline_msg;
    use comms_if::net::{mem::MemBroker, Qos};
    use std::time::Duration;
    use util::time::ManualClock;

    const HB: &str = "u/feeds/smartpath.robot.heartbeat";

    struct Rig {
        sup: Arc<Supervisor>,
        arbiter: Arc<Arbiter>,
        publisher: Arc<RateLimitedPublisher>,
        broker: MemBroker,
        sim: Arc<SimActuator>,
    }

    fn rig(params: SupervisorParams) -> Rig {
        let clock = Arc::new(ManualClock::default());
        let sim = Arc::new(SimActuator::new());
        let output = MotorOutput::new(sim.clone(), 1, Duration::from_millis(50), clock.clone());
        let arbiter = Arc::new(Arbiter::new(ArbiterParams::default(), output));

        let broker = MemBroker::new();
        let publisher = Arc::new(RateLimitedPublisher::new(
            Box::new(broker.publisher(Some(offline_msg(HB)))),
            PublisherParams::default(),
            clock.clone(),
        ));

        let sup = Arc::new(Supervisor::new(
            arbiter.clone(),
            publisher.clone(),
            offline_msg(HB),
            params,
            clock,
        ));

        Rig {
            sup,
            arbiter,
            publisher,
            broker,
            sim,
        }
    }

    struct PanickingArchive;

    impl ArchiveSink for PanickingArchive {
        fn name(&self) -> &str {
            "panicking"
        }

        fn close(&self, _timeout: Duration) -> bool {
            panic!("archive close failed");
        }
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let r = rig(SupervisorParams::default());
        r.arbiter.apply_start_stop("on", 0.0);

        assert!(r.sup.shutdown("test"));
        assert!(!r.sup.shutdown("again"));
        drop(ShutdownGuard::new(r.sup.clone()));

        assert!(r.sup.stop_requested());
        assert_eq!(r.sim.close_calls(), 1);
        assert!(r.sim.is_closed());
        assert_eq!(r.sim.last(), Some(ZERO_DUTIES));

        // Halted for good
        r.arbiter.apply_start_stop("on", 1.0);
        assert!(!r.arbiter.snapshot().running);
    }

    #[test]
    fn test_offline_sent_first_and_clean_close() {
        let r = rig(SupervisorParams::default());
        r.publisher
            .enqueue("u/feeds/smartpath.robot.motor-l", "40", false, Qos::AtMostOnce);

        r.sup.shutdown("test");

        let delivered = r.broker.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].topic, HB);
        assert_eq!(delivered[0].payload, "offline");
        assert!(delivered[0].retain);

        // Clean close, so the will never fired
        assert_eq!(r.broker.delivered_on(HB), vec![String::from("offline")]);
    }

    #[test]
    fn test_will_fires_when_flush_times_out() {
        let r = rig(SupervisorParams {
            final_flush_timeout_s: 1.0,
            ..Default::default()
        });
        r.publisher
            .enqueue("u/feeds/smartpath.robot.motor-l", "40", false, Qos::AtMostOnce);

        r.sup.shutdown("test");

        // The marker went first, the rate limit held the rest past the timeout
        assert_eq!(
            r.broker.delivered_on(HB),
            vec![String::from("offline"), String::from("offline")]
        );
        assert!(r
            .broker
            .delivered_on("u/feeds/smartpath.robot.motor-l")
            .is_empty());
        assert_eq!(r.sim.close_calls(), 1);
    }

    #[test]
    fn test_concurrent_shutdown_runs_once() {
        let r = rig(SupervisorParams::default());
        r.arbiter.apply_start_stop("on", 0.0);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sup = r.sup.clone();
                std::thread::spawn(move || sup.shutdown(&format!("caller {}", i)))
            })
            .collect();

        let results: Vec<bool> = handles
            .into_iter()
            .map(|h| h.join().expect("shutdown caller panicked"))
            .collect();

        assert_eq!(results.iter().filter(|&&did_work| did_work).count(), 1);
        assert_eq!(r.sim.close_calls(), 1);
        assert_eq!(r.broker.delivered_on(HB), vec![String::from("offline")]);
        assert!(!r.arbiter.snapshot().running);
    }

    #[test]
    fn test_will_fires_when_link_is_dead() {
        let r = rig(SupervisorParams::default());
        r.broker.fail_next(100);

        assert!(r.sup.shutdown("test"));

        // Only the will reached the broker
        assert_eq!(r.broker.delivered_on(HB), vec![String::from("offline")]);
        assert_eq!(r.sim.close_calls(), 1);
    }

    #[test]
    fn test_failed_step_does_not_stop_release() {
        let r = rig(SupervisorParams::default());
        r.sup.add_archive(Arc::new(PanickingArchive));

        assert!(r.sup.shutdown("test"));
        assert_eq!(r.sim.close_calls(), 1);
    }

    #[test]
    fn test_run_loop() {
        let r = rig(SupervisorParams::default());

        let mut ticks = 0;
        let end = r.sup.run(|| {
            ticks += 1;
            if ticks == 3 {
                TickFlow::EndOfScript
            } else {
                TickFlow::Continue
            }
        });
        assert_eq!(end, RunEnd::EndOfScript);
        assert_eq!(ticks, 3);

        let stop = r.sup.stop_flag();
        let end = r.sup.run(|| {
            stop.store(true, Ordering::Relaxed);
            TickFlow::Continue
        });
        assert_eq!(end, RunEnd::Stopped);
    }
}
