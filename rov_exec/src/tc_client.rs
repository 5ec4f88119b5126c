//! # Telecommand Client
//!
//! Receives operator commands from the command feeds and applies them to the arbiter. The client
//! runs on its own thread so that commands, and above all emergency stops, are applied as soon as
//! they arrive rather than once per control cycle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace, warn};
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use comms_if::{
    feeds::{FeedTable, Inbound},
    net::{NetError, Subscriber},
    tc::{Tc, TcKind},
};
use util::{
    schedule::{spawn_periodic, PeriodicHandle},
    time::Clock,
};

use crate::arbiter::{Applied, Arbiter};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Back off after a transport error so a dead socket doesn't flood the log.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telecommand client
pub struct TcClient {
    subscriber: Box<dyn Subscriber>,
    feeds: Arc<FeedTable>,

    /// Accept readings on the distance and line feeds
    accept_sensor_feeds: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What happened to one received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Nothing arrived before the receive timeout
    Nothing,

    /// A command was applied
    Applied(TcKind, Applied),

    /// A command was refused, the reason has been logged
    Rejected(TcKind),

    /// The provider is throttling us
    Throttle(String),

    /// The message wasn't on one of our feeds
    Unknown(String),

    /// A message arrived but couldn't be decoded
    Malformed(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TcClient {
    /// Create a new client, subscribing to every command feed alias.
    pub fn new(
        mut subscriber: Box<dyn Subscriber>,
        feeds: Arc<FeedTable>,
        accept_sensor_feeds: bool,
    ) -> Result<Self, NetError> {
        for topic in feeds.subscriptions() {
            trace!("Subscribing to {}", topic);
            subscriber.subscribe(&topic)?;
        }

        Ok(Self {
            subscriber,
            feeds,
            accept_sensor_feeds,
        })
    }

    /// Receive at most one message and apply it.
    ///
    /// Only transport failures are returned as errors, bad input is logged and reported in the
    /// [`Received`] outcome.
    pub fn poll(&mut self, arbiter: &Arbiter, now_s: f64) -> Result<Received, NetError> {
        let msg = match self.subscriber.recv() {
            Ok(Some(m)) => m,
            Ok(None) => return Ok(Received::Nothing),
            Err(NetError::Malformed(reason)) => {
                warn!("Discarding malformed message: {}", reason);
                return Ok(Received::Malformed(reason));
            }
            Err(e) => return Err(e),
        };

        let kind = match self.feeds.classify(&msg.topic) {
            Some(Inbound::Command(k)) => k,
            Some(Inbound::Throttle) => {
                warn!("Provider throttle notice: {}", msg.payload);
                return Ok(Received::Throttle(msg.payload));
            }
            None => {
                debug!("Ignoring message on unknown topic {}", msg.topic);
                return Ok(Received::Unknown(msg.topic));
            }
        };

        if !self.accept_sensor_feeds && matches!(kind, TcKind::Distance | TcKind::Line) {
            debug!("Ignoring {} reading, remote sensors are disabled", kind.name());
            return Ok(Received::Rejected(kind));
        }

        // Parse failures are logged by the arbiter
        match arbiter.apply(&Tc::new(kind, &msg.payload), now_s) {
            Ok(applied) => Ok(Received::Applied(kind, applied)),
            Err(_) => Ok(Received::Rejected(kind)),
        }
    }

    /// Run the client on its own thread until `stop` is set.
    pub fn spawn(
        mut self,
        arbiter: Arc<Arbiter>,
        clock: Arc<dyn Clock>,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<PeriodicHandle> {
        let thread_clock = clock.clone();

        // The subscriber's receive timeout paces the loop
        spawn_periodic("tc_client", Duration::ZERO, clock, stop, move || {
            if let Err(e) = self.poll(&arbiter, thread_clock.now_s()) {
                warn!("Telecommand receive failed: {}", e);
                thread_clock.sleep(ERROR_BACKOFF);
            }
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::actuator::{MotorOutput, SimActuator};
    use crate::arbiter::ArbiterParams;
    use comms_if::{
        feeds::{FeedKeys, FeedNamer},
        net::{mem::MemBroker, Message},
    };
    use std::collections::VecDeque;
    use util::time::ManualClock;

    /// Replays canned receive results.
    struct Canned(VecDeque<Result<Option<Message>, NetError>>);

    impl Subscriber for Canned {
        fn subscribe(&mut self, _topic: &str) -> Result<(), NetError> {
            Ok(())
        }

        fn recv(&mut self) -> Result<Option<Message>, NetError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    fn setup(accept_sensor_feeds: bool) -> (MemBroker, TcClient, Arbiter) {
        let broker = MemBroker::new();
        let feeds = Arc::new(FeedTable::new(
            &FeedNamer::new("u", "smartpath"),
            &FeedKeys::default(),
        ));
        let client =
            TcClient::new(Box::new(broker.subscriber()), feeds, accept_sensor_feeds).unwrap();

        let output = MotorOutput::new(
            Arc::new(SimActuator::new()),
            1,
            Duration::ZERO,
            Arc::new(ManualClock::default()),
        );

        (broker, client, Arbiter::new(ArbiterParams::default(), output))
    }

    #[test]
    fn test_aliases_reach_arbiter() {
        let (broker, mut client, arb) = setup(true);

        broker.inject(Message::new("u/feeds/robot-dot-speed", "55"));
        broker.inject(Message::new("u/feeds/smartpath.robot.startstop", "on"));
        broker.inject(Message::new("u/feeds/smartpath-dot-robot-dot-emergency", "on"));

        assert_eq!(
            client.poll(&arb, 1.0).unwrap(),
            Received::Applied(TcKind::Speed, Applied::Changed)
        );
        assert_eq!(
            client.poll(&arb, 1.0).unwrap(),
            Received::Applied(TcKind::StartStop, Applied::Changed)
        );
        assert_eq!(
            client.poll(&arb, 1.0).unwrap(),
            Received::Applied(TcKind::Emergency, Applied::Changed)
        );
        assert_eq!(client.poll(&arb, 1.0).unwrap(), Received::Nothing);

        let state = arb.snapshot();
        assert_eq!(state.speed_pct, 55);
        assert!(state.emergency_active);
        assert!(!state.running);
    }

    #[test]
    fn test_bad_payload_and_throttle() {
        let (broker, mut client, arb) = setup(true);

        broker.inject(Message::new("u/feeds/robot.speed", "fast"));
        broker.inject(Message::new("u/throttle", "slow down"));

        assert_eq!(
            client.poll(&arb, 1.0).unwrap(),
            Received::Rejected(TcKind::Speed)
        );
        assert_eq!(
            client.poll(&arb, 1.0).unwrap(),
            Received::Throttle(String::from("slow down"))
        );
        assert_eq!(arb.snapshot().speed_pct, 35);
    }

    #[test]
    fn test_sensor_feeds_can_be_refused() {
        let (broker, mut client, arb) = setup(false);

        broker.inject(Message::new("u/feeds/robot.distance", "15"));
        assert_eq!(
            client.poll(&arb, 1.0).unwrap(),
            Received::Rejected(TcKind::Distance)
        );
        assert_eq!(arb.snapshot().last_distance_cm, None);
    }

    #[test]
    fn test_malformed_message_does_not_stall() {
        let feeds = Arc::new(FeedTable::new(
            &FeedNamer::new("u", "smartpath"),
            &FeedKeys::default(),
        ));
        let canned = Canned(VecDeque::from(vec![
            Err(NetError::Malformed(String::from("expected 2 or 3 frames in message"))),
            Ok(Some(Message::new("u/feeds/robot.emergency", "on"))),
        ]));
        let mut client = TcClient::new(Box::new(canned), feeds, true).unwrap();

        let clock = Arc::new(ManualClock::default());
        let output = MotorOutput::new(
            Arc::new(SimActuator::new()),
            1,
            Duration::ZERO,
            clock.clone(),
        );
        let arb = Arbiter::new(ArbiterParams::default(), output);

        assert!(matches!(
            client.poll(&arb, 1.0),
            Ok(Received::Malformed(_))
        ));
        assert_eq!(
            client.poll(&arb, 1.0).unwrap(),
            Received::Applied(TcKind::Emergency, Applied::Changed)
        );
        assert!(arb.snapshot().emergency_active);
        assert!(clock.sleeps().is_empty());
    }
}
