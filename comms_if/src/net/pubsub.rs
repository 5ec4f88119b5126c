//! # ZMQ publish/subscribe transport
//!
//! Messages are sent as three frames:
//!
//! 1. the topic, which zmq uses for subscription filtering,
//! 2. a small JSON header `{"retain": bool, "qos": 0|1}`,
//! 3. the payload.
//!
//! Two frame messages (topic and payload) are also accepted from simple publishers such as the
//! `send_tc` tool.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{
    CloseMode, Message, MonitoredSocket, NetError, NetParams, Publisher, Qos, SocketOptions,
    Subscriber,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Publisher over a bound zmq PUB socket.
///
/// zmq has no broker to hold a last will, so the publisher sends its will itself when it is closed
/// uncleanly or dropped without being closed.
pub struct ZmqPublisher {
    socket: Option<MonitoredSocket>,
    will: Option<Message>,
}

/// Subscriber over a zmq SUB socket.
pub struct ZmqSubscriber {
    socket: MonitoredSocket,
    topics: HashSet<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireHeader {
    retain: bool,
    qos: u8,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ZmqPublisher {
    /// Bind a new publisher on `endpoint`, registering `will` as its last will.
    pub fn new(
        ctx: &zmq::Context,
        params: &NetParams,
        endpoint: &str,
        will: Option<Message>,
    ) -> Result<Self, NetError> {
        let socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            linger: 500,
            send_timeout: params.send_timeout_ms,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::PUB, socket_options, endpoint)?;

        Ok(Self {
            socket: Some(socket),
            will,
        })
    }

    fn send_will(&mut self) {
        if let (Some(socket), Some(will)) = (self.socket.as_ref(), self.will.take()) {
            match send_message(socket, &will) {
                Ok(()) => debug!("Last will sent on {}", will.topic),
                Err(e) => warn!("Could not send last will on {}: {}", will.topic, e),
            }
        }
    }
}

impl Publisher for ZmqPublisher {
    fn publish(&mut self, msg: &Message) -> Result<(), NetError> {
        match self.socket.as_ref() {
            Some(socket) => send_message(socket, msg),
            None => Err(NetError::Closed),
        }
    }

    fn close(&mut self, mode: CloseMode) -> Result<(), NetError> {
        if mode == CloseMode::Unclean {
            self.send_will();
        }

        self.will = None;
        self.socket = None;

        Ok(())
    }
}

impl Drop for ZmqPublisher {
    fn drop(&mut self) {
        self.send_will();
    }
}

impl ZmqSubscriber {
    /// Connect a new subscriber to `endpoint`.
    ///
    /// If `credentials` are given they are presented to the publisher using ZMQ PLAIN security.
    pub fn new(
        ctx: &zmq::Context,
        params: &NetParams,
        endpoint: &str,
        credentials: Option<(String, String)>,
    ) -> Result<Self, NetError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            plain_credentials: credentials,
            linger: 0,
            recv_timeout: params.recv_timeout_ms,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::SUB, socket_options, endpoint)?;

        Ok(Self {
            socket,
            topics: HashSet::new(),
        })
    }

    /// Return if the underlying socket is connected.
    pub fn connected(&self) -> bool {
        self.socket.connected()
    }
}

impl Subscriber for ZmqSubscriber {
    fn subscribe(&mut self, topic: &str) -> Result<(), NetError> {
        self.socket
            .set_subscribe(topic.as_bytes())
            .map_err(NetError::SubscribeError)?;
        self.topics.insert(topic.to_string());

        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Message>, NetError> {
        let frames = match self.socket.recv_multipart(0) {
            Ok(f) => f,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(NetError::RecvError(e)),
        };

        let msg = decode_frames(frames)?;

        // zmq filters on prefixes, topics must match exactly
        if self.topics.contains(&msg.topic) {
            Ok(Some(msg))
        } else {
            Ok(None)
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn send_message(socket: &MonitoredSocket, msg: &Message) -> Result<(), NetError> {
    let header = serde_json::to_string(&WireHeader {
        retain: msg.retain,
        qos: msg.qos.level(),
    })
    .map_err(|e| NetError::Malformed(e.to_string()))?;

    socket
        .send_multipart(
            [
                msg.topic.as_bytes(),
                header.as_bytes(),
                msg.payload.as_bytes(),
            ],
            0,
        )
        .map_err(NetError::SendError)
}

fn decode_frames(frames: Vec<Vec<u8>>) -> Result<Message, NetError> {
    // Invalid UTF-8 is dropped from the text rather than refusing the whole message
    let mut frames = frames
        .into_iter()
        .map(|f| String::from_utf8_lossy(&f).replace('\u{FFFD}', ""));

    match (frames.next(), frames.next(), frames.next(), frames.next()) {
        (Some(topic), Some(payload), None, None) => Ok(Message::new(&topic, &payload)),
        (Some(topic), Some(header), Some(payload), None) => {
            let header: WireHeader = serde_json::from_str(&header)
                .map_err(|e| NetError::Malformed(format!("bad header: {}", e)))?;
            let qos = Qos::from_level(header.qos)
                .ok_or_else(|| NetError::Malformed(format!("bad qos {}", header.qos)))?;

            Ok(Message::new(&topic, &payload)
                .retained(header.retain)
                .with_qos(qos))
        }
        _ => Err(NetError::Malformed(String::from(
            "expected 2 or 3 frames in message",
        ))),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_decode_frames() {
        let msg = decode_frames(vec![
            b"u/feeds/a".to_vec(),
            br#"{"retain":true,"qos":1}"#.to_vec(),
            b"online".to_vec(),
        ])
        .unwrap();

        assert_eq!(
            msg,
            Message::new("u/feeds/a", "online")
                .retained(true)
                .with_qos(Qos::AtLeastOnce)
        );

        let simple = decode_frames(vec![b"u/feeds/b".to_vec(), b"40".to_vec()]).unwrap();
        assert_eq!(simple, Message::new("u/feeds/b", "40"));

        assert!(matches!(
            decode_frames(vec![b"only".to_vec()]),
            Err(NetError::Malformed(_))
        ));
        assert!(matches!(
            decode_frames(vec![b"t".to_vec(), b"{}".to_vec(), b"p".to_vec()]),
            Err(NetError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_drops_invalid_utf8() {
        let msg = decode_frames(vec![b"u/feeds/e".to_vec(), b"o\xffn".to_vec()]).unwrap();
        assert_eq!(msg, Message::new("u/feeds/e", "on"));
    }

    #[test]
    fn test_pub_sub_inproc() {
        let ctx = zmq::Context::new();
        let params = NetParams::default();

        let mut publisher = ZmqPublisher::new(&ctx, &params, "inproc://pubsub_test", None).unwrap();
        let mut subscriber =
            ZmqSubscriber::new(&ctx, &params, "inproc://pubsub_test", None).unwrap();
        subscriber.subscribe("u/feeds/speed").unwrap();

        let wanted = Message::new("u/feeds/speed", "40").with_qos(Qos::AtLeastOnce);
        let other = Message::new("u/feeds/speed.old", "10");

        // Subscriptions propagate asynchronously, keep sending until one arrives
        let mut received = None;
        for _ in 0..200 {
            publisher.publish(&other).unwrap();
            publisher.publish(&wanted).unwrap();
            if let Some(m) = subscriber.recv().unwrap() {
                received = Some(m);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(received, Some(wanted));

        publisher.close(CloseMode::Clean).unwrap();
        assert!(matches!(
            publisher.publish(&Message::new("u/feeds/speed", "1")),
            Err(NetError::Closed)
        ));
    }
}
