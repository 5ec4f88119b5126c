//! # Rate limited publisher
//!
//! The telemetry provider throttles clients which publish more often than once every couple of
//! seconds. Everything the vehicle sends therefore goes through a [`PubQueue`] which holds at most
//! one pending value per topic. A new value for a topic replaces the pending one, so the newest
//! value of every topic is always the one which gets sent.
//!
//! The [`RateLimitedPublisher`] drains the queue on its own thread, one message per
//! `min_interval_s`, newest topic first. The queue lock is never held during network I/O so
//! enqueueing from the control cycle never blocks on the network.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::{atomic::AtomicBool, Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use comms_if::net::{CloseMode, Message, NetError, Publisher, Qos};
use util::{
    retry::{RetryError, RetryPolicy},
    schedule::{spawn_periodic, PeriodicHandle},
    time::{self, Clock},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct PublisherParams {
    /// Minimum time between two successful publishes.
    ///
    /// Units: seconds
    pub min_interval_s: f64,

    /// Time between two flushes of the queue.
    ///
    /// Units: seconds
    pub period_s: f64,

    pub retry: RetryPolicy,
}

/// Coalescing queue holding the newest pending value of each topic.
#[derive(Default)]
pub struct PubQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    entries: HashMap<String, Pending>,
    next_seq: u64,
}

struct Pending {
    payload: String,
    retain: bool,
    qos: Qos,

    /// Order of the write, larger is newer
    seq: u64,
}

/// Sends queued messages no faster than the provider allows.
pub struct RateLimitedPublisher {
    queue: PubQueue,
    link: Mutex<Link>,
    params: PublisherParams,
    clock: Arc<dyn Clock>,
}

struct Link {
    transport: Box<dyn Publisher>,

    /// Time of the last successful publish
    last_pub_s: Option<f64>,

    closed: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Result of one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending
    Idle,

    /// Too soon after the last publish
    Throttled,

    /// A message was sent on this topic
    Sent(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("The publisher has been closed")]
    Closed,

    #[error("Gave up publishing on {topic}: {source}")]
    Exhausted {
        topic: String,
        source: RetryError<NetError>,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] NetError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for PublisherParams {
    fn default() -> Self {
        Self {
            min_interval_s: 2.1,
            period_s: 0.1,
            retry: RetryPolicy::default(),
        }
    }
}

impl PubQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pending value of `topic`, replacing any value not yet sent.
    pub fn enqueue(&self, topic: &str, payload: &str, retain: bool, qos: Qos) {
        let mut inner = self.lock();
        inner.next_seq += 1;
        let seq = inner.next_seq;

        inner.entries.insert(
            topic.to_string(),
            Pending {
                payload: payload.to_string(),
                retain,
                qos,
                seq,
            },
        );
    }

    /// Remove and return the most recently written entry.
    pub fn pop_newest(&self) -> Option<Message> {
        let mut inner = self.lock();

        let topic = inner
            .entries
            .iter()
            .max_by_key(|(_, p)| p.seq)
            .map(|(t, _)| t.clone())?;

        inner.entries.remove(&topic).map(|p| {
            Message::new(&topic, &p.payload)
                .retained(p.retain)
                .with_qos(p.qos)
        })
    }

    /// Number of topics with a pending value.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RateLimitedPublisher {
    pub fn new(
        transport: Box<dyn Publisher>,
        params: PublisherParams,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue: PubQueue::new(),
            link: Mutex::new(Link {
                transport,
                last_pub_s: None,
                closed: false,
            }),
            params,
            clock,
        }
    }

    /// Queue a value for `topic`. Never blocks on the network.
    pub fn enqueue(&self, topic: &str, payload: &str, retain: bool, qos: Qos) {
        trace!("Enqueued {} = \"{}\"", topic, payload);
        self.queue.enqueue(topic, payload, retain, qos);
    }

    /// Queue a prepared message.
    pub fn enqueue_msg(&self, msg: &Message) {
        self.enqueue(&msg.topic, &msg.payload, msg.retain, msg.qos);
    }

    /// Number of topics waiting to be sent.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Flush at the current time.
    pub fn flush(&self) -> Result<FlushOutcome, PublishError> {
        self.flush_at(self.clock.now_s())
    }

    /// Send the newest pending message if the rate limit allows it.
    ///
    /// A message which can't be sent after the retry policy is exhausted is dropped, a fresher
    /// value will be along soon enough.
    pub fn flush_at(&self, now_s: f64) -> Result<FlushOutcome, PublishError> {
        self.flush_with(now_s, self.params.retry)
    }

    fn flush_with(&self, now_s: f64, retry: RetryPolicy) -> Result<FlushOutcome, PublishError> {
        let mut link = self.lock_link();

        if link.closed {
            return Err(PublishError::Closed);
        }

        if self.queue.is_empty() {
            return Ok(FlushOutcome::Idle);
        }

        if let Some(last_pub_s) = link.last_pub_s {
            if now_s - last_pub_s < self.params.min_interval_s {
                return Ok(FlushOutcome::Throttled);
            }
        }

        let msg = match self.queue.pop_newest() {
            Some(m) => m,
            None => return Ok(FlushOutcome::Idle),
        };

        let started_s = self.clock.now_s();
        let result = retry.run(self.clock.as_ref(), |_| link.transport.publish(&msg));

        match result {
            Ok(()) => {
                // Time spent retrying counts towards the interval
                let spent_s = (self.clock.now_s() - started_s).max(0.0);
                link.last_pub_s = Some(now_s + spent_s);
                debug!("Published {} = \"{}\"", msg.topic, msg.payload);
                Ok(FlushOutcome::Sent(msg.topic))
            }
            Err(e) => {
                warn!("Dropping {} = \"{}\": {}", msg.topic, msg.payload, e);
                Err(PublishError::Exhausted {
                    topic: msg.topic,
                    source: e,
                })
            }
        }
    }

    /// Keep flushing until the queue is empty or `timeout` has passed.
    ///
    /// Waits out the rate limit between messages and cuts retries short at the deadline. Returns
    /// `true` if everything pending was sent, a message dropped after its retries counts as unsent.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline_s = self.clock.now_s() + timeout.as_secs_f64();
        let mut all_sent = true;

        loop {
            let now_s = self.clock.now_s();
            if now_s >= deadline_s && !self.queue.is_empty() {
                warn!(
                    "{} message(s) still pending at the drain timeout",
                    self.pending()
                );
                return false;
            }

            match self.flush_with(now_s, self.params.retry.within(deadline_s - now_s)) {
                Ok(FlushOutcome::Idle) => return all_sent,
                Ok(FlushOutcome::Sent(_)) => (),
                Err(PublishError::Exhausted { .. }) => all_sent = false,
                Err(e) => {
                    warn!("Drain stopped: {}", e);
                    return false;
                }
                Ok(FlushOutcome::Throttled) => {
                    let next_s = match self.next_slot_s() {
                        Some(t) => t,
                        None => continue,
                    };

                    if next_s > deadline_s {
                        warn!(
                            "{} message(s) still pending, the rate limit outlasts the drain timeout",
                            self.pending()
                        );
                        return false;
                    }

                    let wait = time::secs(next_s - self.clock.now_s());
                    self.clock.sleep(wait.max(Duration::from_millis(1)));
                }
            }
        }
    }

    /// Close the transport. Only the first call reaches it.
    pub fn close(&self, mode: CloseMode) -> Result<(), PublishError> {
        let mut link = self.lock_link();

        if link.closed {
            return Ok(());
        }
        link.closed = true;

        let pending = self.queue.len();
        if pending > 0 {
            info!("Closing publisher with {} message(s) unsent", pending);
        }

        link.transport.close(mode)?;
        Ok(())
    }

    /// Start flushing the queue on its own thread until `stop` is set.
    pub fn spawn(
        self: &Arc<Self>,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<PeriodicHandle> {
        let publisher = self.clone();

        spawn_periodic(
            "publisher",
            time::secs(self.params.period_s),
            self.clock.clone(),
            stop,
            move || match publisher.flush() {
                // Already logged
                Ok(_) | Err(PublishError::Exhausted { .. }) => (),
                Err(PublishError::Closed) => (),
                Err(e) => warn!("Publisher flush failed: {}", e),
            },
        )
    }

    /// Earliest time the next publish is allowed.
    fn next_slot_s(&self) -> Option<f64> {
        self.lock_link()
            .last_pub_s
            .map(|t| t + self.params.min_interval_s)
    }

    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::net::mem::MemBroker;
    use util::time::ManualClock;

    fn publisher(broker: &MemBroker) -> (RateLimitedPublisher, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let params = PublisherParams {
            min_interval_s: 2.1,
            period_s: 0.1,
            retry: RetryPolicy::new(3, 200),
        };
        let will = Message::new("u/feeds/hb", "offline").retained(true);

        (
            RateLimitedPublisher::new(
                Box::new(broker.publisher(Some(will))),
                params,
                clock.clone(),
            ),
            clock,
        )
    }

    #[test]
    fn test_queue_coalesces() {
        let queue = PubQueue::new();

        queue.enqueue("a", "1", false, Qos::AtMostOnce);
        queue.enqueue("b", "1", false, Qos::AtMostOnce);
        queue.enqueue("a", "2", true, Qos::AtLeastOnce);
        assert_eq!(queue.len(), 2);

        // Newest write first
        let first = queue.pop_newest().unwrap();
        assert_eq!(first.topic, "a");
        assert_eq!(first.payload, "2");
        assert!(first.retain);
        assert_eq!(first.qos, Qos::AtLeastOnce);

        assert_eq!(queue.pop_newest().unwrap().topic, "b");
        assert!(queue.pop_newest().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_only_latest_value_delivered() {
        let broker = MemBroker::new();
        let (publisher, _) = publisher(&broker);

        publisher.enqueue("u/feeds/speed", "10", false, Qos::AtMostOnce);
        publisher.enqueue("u/feeds/speed", "20", false, Qos::AtMostOnce);

        assert_eq!(
            publisher.flush_at(0.0).unwrap(),
            FlushOutcome::Sent(String::from("u/feeds/speed"))
        );
        assert_eq!(publisher.flush_at(10.0).unwrap(), FlushOutcome::Idle);
        assert_eq!(broker.delivered_on("u/feeds/speed"), vec!["20"]);
    }

    #[test]
    fn test_rate_limit_under_burst() {
        let broker = MemBroker::new();
        let (publisher, _) = publisher(&broker);

        let mut sent_at = Vec::new();
        let mut now_s = 0.0;

        // Burst of enqueues on many topics, flushed every 100 ms
        while now_s < 20.0 {
            for i in 0..5 {
                let topic = format!("u/feeds/t{}", i);
                publisher.enqueue(&topic, &format!("{}", now_s), false, Qos::AtMostOnce);
            }
            if let Ok(FlushOutcome::Sent(_)) = publisher.flush_at(now_s) {
                sent_at.push(now_s);
            }
            now_s += 0.1;
        }

        assert!(sent_at.len() >= 9);
        for pair in sent_at.windows(2) {
            assert!(pair[1] - pair[0] >= 2.1 - 1e-9, "{:?}", pair);
        }
    }

    #[test]
    fn test_retry_then_drop() {
        let broker = MemBroker::new();
        let (publisher, clock) = publisher(&broker);

        // Recovers within the retry budget
        broker.fail_next(2);
        publisher.enqueue("u/feeds/a", "1", false, Qos::AtMostOnce);
        assert!(matches!(publisher.flush_at(0.0), Ok(FlushOutcome::Sent(_))));
        assert_eq!(broker.send_attempts(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(200), Duration::from_millis(200)]
        );

        // Gives up and drops the value
        broker.fail_next(3);
        publisher.enqueue("u/feeds/a", "2", false, Qos::AtMostOnce);
        assert!(matches!(
            publisher.flush_at(10.0),
            Err(PublishError::Exhausted { .. })
        ));
        assert_eq!(broker.send_attempts(), 6);
        assert_eq!(publisher.pending(), 0);
        assert_eq!(broker.delivered_on("u/feeds/a"), vec!["1"]);

        // A failed attempt doesn't count against the rate limit
        publisher.enqueue("u/feeds/a", "3", false, Qos::AtMostOnce);
        assert!(matches!(publisher.flush_at(10.5), Ok(FlushOutcome::Sent(_))));
    }

    #[test]
    fn test_drain_waits_out_rate_limit() {
        let broker = MemBroker::new();
        let (publisher, clock) = publisher(&broker);

        publisher.enqueue("u/feeds/a", "1", false, Qos::AtMostOnce);
        publisher.flush().unwrap();

        publisher.enqueue("u/feeds/b", "1", false, Qos::AtMostOnce);
        publisher.enqueue("u/feeds/hb", "offline", true, Qos::AtLeastOnce);

        // Only one more slot fits in the timeout, the newest value gets it
        assert!(!publisher.drain(Duration::from_secs(3)));
        assert_eq!(broker.delivered_on("u/feeds/hb"), vec!["offline"]);
        assert!(broker.delivered_on("u/feeds/b").is_empty());
        assert!(clock.now_s() >= 2.1);

        assert!(publisher.drain(Duration::from_secs(3)));
        assert_eq!(broker.delivered_on("u/feeds/b"), vec!["1"]);
    }

    #[test]
    fn test_drain_bounded_on_dead_link() {
        let broker = MemBroker::new();
        let (publisher, clock) = publisher(&broker);

        for i in 0..6 {
            publisher.enqueue(&format!("u/feeds/t{}", i), "1", false, Qos::AtMostOnce);
        }
        broker.fail_next(100);

        assert!(!publisher.drain(Duration::from_secs(1)));
        assert!(clock.now_s() <= 1.0 + 1e-9, "drain took {} s", clock.now_s());
        assert!(broker.delivered().is_empty());
    }

    #[test]
    fn test_drain_reports_dropped_message() {
        let broker = MemBroker::new();
        let (publisher, _) = publisher(&broker);

        publisher.enqueue("u/feeds/hb", "offline", true, Qos::AtLeastOnce);
        broker.fail_next(3);

        assert!(!publisher.drain(Duration::from_secs(5)));
        assert_eq!(publisher.pending(), 0);
    }

    #[test]
    fn test_close() {
        let broker = MemBroker::new();
        let (publisher, _) = publisher(&broker);

        publisher.close(CloseMode::Unclean).unwrap();
        publisher.close(CloseMode::Unclean).unwrap();

        // The will fired once
        assert_eq!(broker.delivered_on("u/feeds/hb"), vec!["offline"]);

        publisher.enqueue("u/feeds/a", "1", false, Qos::AtMostOnce);
        assert!(matches!(publisher.flush_at(0.0), Err(PublishError::Closed)));
        assert!(!publisher.drain(Duration::from_secs(1)));
    }
}
