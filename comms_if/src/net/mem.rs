//! # In-process loopback transport
//!
//! A [`MemBroker`] behaves like a tiny message broker living inside the process. It keeps
//! retained values, fires last wills on unclean disconnects, and records every delivered message
//! so that tests can assert on exactly what left the vehicle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{CloseMode, Message, NetError, Publisher, Subscriber};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default time a [`MemSubscriber`] waits in `recv`.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Shared handle to the loopback broker.
#[derive(Clone, Default)]
pub struct MemBroker {
    inner: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    retained: HashMap<String, Message>,
    delivered: Vec<Message>,
    subscribers: Vec<SubscriberSlot>,
    fail_next: usize,
    send_attempts: usize,
}

struct SubscriberSlot {
    topics: Arc<Mutex<HashSet<String>>>,
    sender: Sender<Message>,
}

/// Publisher connected to a [`MemBroker`].
pub struct MemPublisher {
    broker: MemBroker,
    will: Option<Message>,
    closed: bool,
}

/// Subscriber connected to a [`MemBroker`].
pub struct MemSubscriber {
    broker: MemBroker,
    topics: Arc<Mutex<HashSet<String>>>,
    loopback: Sender<Message>,
    receiver: Receiver<Message>,
    timeout: Duration,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MemBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new publisher with the given last will.
    pub fn publisher(&self, will: Option<Message>) -> MemPublisher {
        MemPublisher {
            broker: self.clone(),
            will,
            closed: false,
        }
    }

    /// Connect a new subscriber.
    pub fn subscriber(&self) -> MemSubscriber {
        let (sender, receiver) = channel();
        let topics = Arc::new(Mutex::new(HashSet::new()));

        self.lock().subscribers.push(SubscriberSlot {
            topics: topics.clone(),
            sender: sender.clone(),
        });

        MemSubscriber {
            broker: self.clone(),
            topics,
            loopback: sender,
            receiver,
            timeout: DEFAULT_RECV_TIMEOUT,
        }
    }

    /// Make the next `n` publish attempts fail with [`NetError::Unavailable`].
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// Every message delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<Message> {
        self.lock().delivered.clone()
    }

    /// Payloads delivered on one topic, in delivery order.
    pub fn delivered_on(&self, topic: &str) -> Vec<String> {
        self.lock()
            .delivered
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Number of publish attempts made, including failed ones.
    pub fn send_attempts(&self) -> usize {
        self.lock().send_attempts
    }

    /// The retained value of a topic, if any.
    pub fn retained(&self, topic: &str) -> Option<Message> {
        self.lock().retained.get(topic).cloned()
    }

    /// Deliver a message as if another client had published it.
    pub fn inject(&self, msg: Message) {
        self.lock().deliver(msg);
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BrokerState {
    fn deliver(&mut self, msg: Message) {
        if msg.retain {
            self.retained.insert(msg.topic.clone(), msg.clone());
        }

        // Forget subscribers which have gone away
        self.subscribers.retain(|slot| {
            let wanted = slot
                .topics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&msg.topic);

            !wanted || slot.sender.send(msg.clone()).is_ok()
        });

        self.delivered.push(msg);
    }
}

impl MemPublisher {
    fn fire_will(&mut self) {
        if let Some(will) = self.will.take() {
            self.broker.lock().deliver(will);
        }
    }
}

impl Publisher for MemPublisher {
    fn publish(&mut self, msg: &Message) -> Result<(), NetError> {
        if self.closed {
            return Err(NetError::Closed);
        }

        let mut broker = self.broker.lock();
        broker.send_attempts += 1;

        if broker.fail_next > 0 {
            broker.fail_next -= 1;
            return Err(NetError::Unavailable);
        }

        broker.deliver(msg.clone());

        Ok(())
    }

    fn close(&mut self, mode: CloseMode) -> Result<(), NetError> {
        if self.closed {
            return Ok(());
        }

        if mode == CloseMode::Unclean {
            self.fire_will();
        }

        self.will = None;
        self.closed = true;

        Ok(())
    }
}

impl Drop for MemPublisher {
    fn drop(&mut self) {
        if !self.closed {
            self.fire_will();
        }
    }
}

impl MemSubscriber {
    /// Change how long `recv` waits for a message.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Subscriber for MemSubscriber {
    fn subscribe(&mut self, topic: &str) -> Result<(), NetError> {
        // Hold the broker lock so a concurrent delivery can't be seen twice
        let broker = self.broker.lock();

        let newly_added = self
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string());

        // New subscribers get the retained value straight away
        if newly_added {
            if let Some(msg) = broker.retained.get(topic) {
                self.loopback.send(msg.clone()).ok();
            }
        }

        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Message>, NetError> {
        match self.receiver.recv_timeout(self.timeout) {
            Ok(m) => Ok(Some(m)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(NetError::Closed),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_delivery_and_failures() {
        let broker = MemBroker::new();
        let mut publisher = broker.publisher(None);
        let mut subscriber = broker.subscriber();
        subscriber.subscribe("u/feeds/speed").unwrap();

        publisher.publish(&Message::new("u/feeds/speed", "40")).unwrap();
        publisher.publish(&Message::new("u/feeds/mode", "avoid")).unwrap();

        assert_eq!(
            subscriber.recv().unwrap(),
            Some(Message::new("u/feeds/speed", "40"))
        );
        assert_eq!(subscriber.recv().unwrap(), None);

        broker.fail_next(2);
        assert!(matches!(
            publisher.publish(&Message::new("u/feeds/speed", "1")),
            Err(NetError::Unavailable)
        ));
        assert!(publisher.publish(&Message::new("u/feeds/speed", "2")).is_err());
        assert!(publisher.publish(&Message::new("u/feeds/speed", "3")).is_ok());

        assert_eq!(broker.delivered_on("u/feeds/speed"), vec!["40", "3"]);
        assert_eq!(broker.send_attempts(), 5);
    }

    #[test]
    fn test_retained_and_will() {
        let broker = MemBroker::new();
        let will = Message::new("u/feeds/hb", "offline").retained(true);

        {
            let mut publisher = broker.publisher(Some(will.clone()));
            publisher
                .publish(&Message::new("u/feeds/hb", "online").retained(true))
                .unwrap();
            assert_eq!(broker.retained("u/feeds/hb").unwrap().payload, "online");
            // Dropped without closing, the will fires
        }
        assert_eq!(broker.retained("u/feeds/hb"), Some(will.clone()));

        // A clean close discards the will
        let mut publisher = broker.publisher(Some(Message::new("u/feeds/hb", "gone")));
        publisher.close(CloseMode::Clean).unwrap();
        publisher.close(CloseMode::Unclean).unwrap();
        drop(publisher);
        assert!(!broker.delivered_on("u/feeds/hb").contains(&String::from("gone")));

        // An unclean close fires it exactly once
        let mut publisher = broker.publisher(Some(Message::new("u/feeds/hb", "lost")));
        publisher.close(CloseMode::Unclean).unwrap();
        drop(publisher);
        assert_eq!(
            broker
                .delivered_on("u/feeds/hb")
                .iter()
                .filter(|p| *p == "lost")
                .count(),
            1
        );
    }

    #[test]
    fn test_inject_reaches_subscriber() {
        let broker = MemBroker::new();
        let mut subscriber = broker.subscriber();
        subscriber.subscribe("u/feeds/emergency").unwrap();

        broker.inject(Message::new("u/feeds/emergency", "on"));
        assert_eq!(subscriber.recv().unwrap().unwrap().payload, "on");

        // Late subscribers are handed the retained value
        broker.inject(Message::new("u/feeds/hb", "online").retained(true));
        let mut late = broker.subscriber();
        late.subscribe("u/feeds/hb").unwrap();
        assert_eq!(late.recv().unwrap().unwrap().payload, "online");
    }
}
