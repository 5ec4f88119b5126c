//! # Network Module
//!
//! This module provides networking abstractions over ZMQ, the networking library chosen for the
//! software, and the publish/subscribe interface the vehicle core talks to.
//!
//! The core never touches a socket directly. Outbound telemetry goes through a [`Publisher`] and
//! inbound commands arrive through a [`Subscriber`]. Two implementations are provided:
//! - [`pubsub`]: ZMQ PUB/SUB sockets, used by the executables.
//! - [`mem`]: an in-process loopback broker, used by tests and simulations.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod mem;
pub mod pubsub;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::Ordering,
        atomic::{AtomicBool, AtomicUsize},
        Arc,
    },
    thread,
};
use zmq::{Context, Socket, SocketEvent, SocketType};

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| MonitoredSocketError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Timeout on the monitor socket so the monitor thread can notice a shutdown request.
const MONITOR_POLL_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Number of monitors that are registered. Used to provide unique IDs for each mointor endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The outbound half of the transport boundary.
pub trait Publisher: Send {
    /// Deliver a single message. Returns once the transport has accepted it.
    fn publish(&mut self, msg: &Message) -> Result<(), NetError>;

    /// Close the connection.
    ///
    /// A [`CloseMode::Clean`] close suppresses the last will, an [`CloseMode::Unclean`] close lets
    /// it fire. Closing twice is not an error, and publishing after a close returns
    /// [`NetError::Closed`].
    fn close(&mut self, mode: CloseMode) -> Result<(), NetError>;
}

/// The inbound half of the transport boundary.
pub trait Subscriber: Send {
    /// Start receiving messages published on exactly this topic.
    fn subscribe(&mut self, topic: &str) -> Result<(), NetError>;

    /// Receive the next message, waiting at most the transport's receive timeout.
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    fn recv(&mut self) -> Result<Option<Message>, NetError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A message travelling over the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,

    /// If set the transport keeps this as the last known value of the topic and hands it to any
    /// later subscriber.
    pub retain: bool,

    pub qos: Qos,
}

/// Endpoints used by the executables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetParams {
    /// Endpoint the command subscriber connects to.
    pub cmd_endpoint: String,

    /// Endpoint the telemetry publisher binds.
    pub tm_endpoint: String,

    /// Endpoint of the mechanisms server.
    pub mech_dems_endpoint: String,

    /// Authenticate the command subscriber with the operator credentials (ZMQ PLAIN).
    pub plain_auth: bool,

    /// Receive timeout for subscribers and request/reply clients.
    ///
    /// Units: milliseconds
    pub recv_timeout_ms: i32,

    /// Send timeout for publishers and request/reply clients.
    ///
    /// Units: milliseconds
    pub send_timeout_ms: i32,
}

/// A zmq socket which is monitored providing additional information.
///
/// A background thread is run in order to monitor activity on the socket and update visible
/// information to the user. Currently this is only whether or not the socket is actually connected.
pub struct MonitoredSocket {
    socket: Socket,

    join_handle: Option<thread::JoinHandle<()>>,

    _monitor_endpoint: String,

    shutdown: Arc<AtomicBool>,

    connected: Arc<AtomicBool>,
}

/// Represents options which can be set on a monitored socket.
///
/// Most options here correspond to those found in the
/// [`zmq_setsockopt`](http://api.zeromq.org/2-1:zmq-setsockopt) documentation.
pub struct SocketOptions {
    /// Indicates if the socket should bind itself to the endpoint. Servers should have this value
    /// set as `true`, clients should have it set as `false`.
    ///
    /// The default value is `false`.
    pub bind: bool,

    /// If true the `MonitoredSocket::new()` function will block until the socket is connected, or
    /// until the connect_timeout elapses. If the timeout elapses this function will return a
    /// `MonitoredSocketError::CouldNotConnect` error.
    ///
    /// The default value is `true`.
    pub block_on_first_connect: bool,

    /// `ZMQ_PLAIN_USERNAME` and `ZMQ_PLAIN_PASSWORD`: client credentials for PLAIN security.
    ///
    /// The default value is `None` (NULL security).
    pub plain_credentials: Option<(String, String)>,

    /// `ZMQ_REQ_CORRELATE`: Match replies with requests
    pub req_correlate: bool,

    /// `ZMQ_REQ_RELAXED`: relax strict alternation between request and reply
    pub req_relaxed: bool,

    /// `ZMQ_LINGER`: Set linger period for socket shutdown
    pub linger: i32,

    /// `ZMQ_RECONNECT_IVL`: Set reconnection interval
    pub reconnect_ivl: i32,

    /// `ZMQ_RECONNECT_IVL_MAX`: Set maximum reconnection interval
    pub reconnect_ivl_max: i32,

    /// `ZMQ_CONNECT_TIMEOUT`: Set `connect()` timeout
    pub connect_timeout: i32,

    /// `ZMQ_RCVTIMEO`: Maximum time before a recv operation returns with `EAGAIN`
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`: Maximum time before a send operation returns with `EAGAIN`
    pub send_timeout: i32,

    /// `ZMQ_HEARTBEAT_IVL`: Set interval between sending ZMTP heartbeats
    pub heartbeat_ivl: i32,

    /// `ZMQ_HEARTBEAT_TIMEOUT`: Set timeout for ZMTP heartbeats
    pub heartbeat_timeout: i32,

    /// `ZMQ_HEARTBEAT_TTL`: Set the TTL (time to live) value for ZMTP heartbeats
    pub heartbeat_ttl: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Delivery guarantee requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
}

/// How a publisher connection is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Orderly disconnect, the last will is discarded.
    Clean,

    /// Connection abandoned, the last will is published.
    Unclean,
}

#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("Socket error: {0}")]
    SocketError(#[from] MonitoredSocketError),

    #[error("Could not send the message: {0}")]
    SendError(zmq::Error),

    #[error("Could not receive a message: {0}")]
    RecvError(zmq::Error),

    #[error("Could not set the subscription: {0}")]
    SubscribeError(zmq::Error),

    #[error("Received a malformed message: {0}")]
    Malformed(String),

    #[error("The connection has been closed")]
    Closed,

    #[error("The transport is not available")]
    Unavailable,
}

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not connect the socket: {0:?}")]
    CouldNotConnect(Option<zmq::Error>),

    #[error("Could not read event from monitor socket: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, zmq::Error),

    #[error("Could not start the monitor thread: {0}")]
    MonitorThreadError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Message {
    /// A non-retained, at-most-once message.
    pub fn new(topic: &str, payload: &str) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain: false,
            qos: Qos::AtMostOnce,
        }
    }

    pub fn retained(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }
}

impl Qos {
    /// The numeric level (0 or 1).
    pub fn level(&self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Qos::AtMostOnce),
            1 => Some(Qos::AtLeastOnce),
            _ => None,
        }
    }
}

impl Default for NetParams {
    fn default() -> Self {
        Self {
            cmd_endpoint: String::from("tcp://localhost:5020"),
            tm_endpoint: String::from("tcp://*:5021"),
            mech_dems_endpoint: String::from("tcp://localhost:5000"),
            plain_auth: false,
            recv_timeout_ms: 50,
            send_timeout_ms: 100,
        }
    }
}

impl MonitoredSocket {
    /// Create a new monitored socket.
    ///
    /// ## Socket options
    ///
    /// The `socket_options` argument specifies the options that will be passed to the underlying
    /// zmq socket. For these options the defaults used by zmq are used.
    ///
    /// In addition some other options are available:
    /// - `bind`: If set the socket will bind itself to the endpoint rather than connect.
    ///    Servers should set this value to `true`. The default value is `false`.
    /// - `block_on_first_connect`: If set this function will block until a connection is
    ///    established or the `connect_timeout` expires. Servers should set this value to `false`.
    ///    the default value is `true`.
    ///
    /// ## Arguments
    /// - `ctx`: the zmq context which will be used to create the socket
    /// - `socket_type`: the type of zmq socket to create
    /// - `socket_options`: a [`SocketOptions`] struct specifying how to configure the socket
    /// - `endpoint`: a zmq endpoint string, such as `"tcp://localhost:4000"`
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        socket_options: SocketOptions,
        endpoint: &str,
    ) -> Result<Self, MonitoredSocketError> {
        // Create atomics
        let shutdown = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        // Create socket
        let socket = ctx
            .socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        // Create monitor endpoint
        let monitor_endpoint = format!(
            "inproc://monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );

        // Enable, create, and connect monitor
        socket
            .monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;
        let monitor = ctx
            .socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        monitor
            .connect(&monitor_endpoint)
            .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        // Set the options on the socket
        socket_options.set(&socket)?;

        // Connect or bind the socket to it's endpoint
        match socket_options.bind {
            false => socket.connect(endpoint),
            true => socket.bind(endpoint),
        }
        .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        // If the block on first connect flag is set, and this is a client, wait for the monitor to
        // signal connection
        if socket_options.block_on_first_connect {
            loop {
                let event = read_event(&monitor).map_err(MonitoredSocketError::EventReadError)?;

                match event {
                    SocketEvent::CONNECTED => break,
                    SocketEvent::CONNECT_DELAYED => continue,
                    _ => return Err(MonitoredSocketError::CouldNotConnect(None)),
                }
            }

            // Set the connected bool to true here since it must have happend
            connected.store(true, Ordering::Relaxed);
        }

        // From here on the monitor only needs to wake up often enough to see a shutdown
        set_sockopts!(monitor, (set_rcvtimeo, MONITOR_POLL_MS));

        // Create clones for use by the monitor thread
        let shutdown_clone = shutdown.clone();
        let connected_clone = connected.clone();
        let monitor_endpoint_clone = monitor_endpoint.clone();

        // Spawn the monitor thread
        let join_handle = thread::Builder::new()
            .name(format!("monitor_{}", endpoint))
            .spawn(move || {
                monitor_socket(
                    monitor,
                    monitor_endpoint_clone,
                    shutdown_clone,
                    connected_clone,
                )
            })
            .map_err(MonitoredSocketError::MonitorThreadError)?;

        // Create self
        Ok(Self {
            socket,
            join_handle: Some(join_handle),
            _monitor_endpoint: monitor_endpoint,
            shutdown,
            connected,
        })
    }

    /// Return if the socket is connected or not.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The monitor wakes at least every MONITOR_POLL_MS so this join is bounded
        if let Some(jh) = self.join_handle.take() {
            jh.join().ok();
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl std::ops::DerefMut for MonitoredSocket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.socket
    }
}

impl SocketOptions {
    /// Set these options on the given socket.
    pub fn set(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        // Set all the socket options, we use a macro here to make the error handling nice and
        // easy
        set_sockopts!(
            socket,
            (set_connect_timeout, self.connect_timeout),
            (set_heartbeat_ivl, self.heartbeat_ivl),
            (set_heartbeat_timeout, self.heartbeat_timeout),
            (set_heartbeat_ttl, self.heartbeat_ttl),
            (set_linger, self.linger),
            (set_reconnect_ivl, self.reconnect_ivl),
            (set_reconnect_ivl_max, self.reconnect_ivl_max),
            (set_rcvtimeo, self.recv_timeout),
            (set_sndtimeo, self.send_timeout)
        );

        // If the socket is a req type set the req-specific options
        if let Ok(SocketType::REQ) = socket.get_socket_type() {
            set_sockopts!(
                socket,
                (set_req_correlate, self.req_correlate),
                (set_req_relaxed, self.req_relaxed)
            );
        }

        // Credentials must be in place before the socket connects
        if let Some((username, password)) = &self.plain_credentials {
            set_sockopts!(
                socket,
                (set_plain_username, Some(username.as_str())),
                (set_plain_password, Some(password.as_str()))
            );
        }

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        // Defaults for sockopts taken from http://api.zeromq.org/4-2:zmq-setsockopt
        Self {
            bind: false,
            block_on_first_connect: true,
            plain_credentials: None,
            connect_timeout: 0,
            heartbeat_ivl: 0,
            heartbeat_timeout: 0,
            heartbeat_ttl: 0,
            linger: 30_000,
            reconnect_ivl: 100,
            reconnect_ivl_max: 0,
            recv_timeout: -1,
            req_correlate: false,
            req_relaxed: false,
            send_timeout: 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read an event from a socket.
fn read_event(socket: &Socket) -> Result<SocketEvent, zmq::Error> {
    let msg = socket.recv_msg(0)?;

    if msg.len() < 2 || !socket.get_rcvmore()? {
        // Monitor events are always two frames with a 16 bit event ID first
        return Err(zmq::Error::EPROTO);
    }

    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    // the address, we'll ignore it
    let _ = socket.recv_msg(0)?;

    Ok(SocketEvent::from_raw(event))
}

fn monitor_socket(
    monitor: Socket,
    monitor_endpoint: String,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
) {
    // So long as the shutdown isn't requested
    while !shutdown.load(Ordering::Relaxed) {
        // Read the next event from the monitor
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!(
                    "Error reading event from monitor {}, stopping monitor: {}",
                    monitor_endpoint, e
                );
                return;
            }
        };

        // Raise any flags required by the event
        match event {
            SocketEvent::CONNECTED => connected.store(true, Ordering::Relaxed),
            SocketEvent::DISCONNECTED => connected.store(false, Ordering::Relaxed),
            _ => (),
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
    fn test_message_builders() {
        let msg = Message::new("user/feeds/a", "online")
            .retained(true)
            .with_qos(Qos::AtLeastOnce);

        assert_eq!(msg.topic, "user/feeds/a");
        assert!(msg.retain);
        assert_eq!(msg.qos.level(), 1);
        assert_eq!(Qos::from_level(0), Some(Qos::AtMostOnce));
        assert_eq!(Qos::from_level(2), None);
    }

    #[test]
    fn test_net_params_defaults() {
        let params: NetParams = toml::from_str("plain_auth = true").unwrap();

        assert!(params.plain_auth);
        assert_eq!(params.mech_dems_endpoint, "tcp://localhost:5000");
        assert!(toml::from_str::<NetParams>("bogus = 1").is_err());
    }
}
