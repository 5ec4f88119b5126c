//! # Mechanisms Server Module
//!
//! This module abstracts over the networking side of the mechanisms executable. The server accepts
//! connections from the client in the rover executable, allowing demands to be recieved from the
//! client and responses sent back.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::mech::{MechDems, MechDemsResponse},
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
};
use log::{trace, warn};

use crate::params::MechExecParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the mechanisms executable.
pub struct MechServer {
    /// REP socket which accepts demands from the client
    dems_socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`MechServer`]
#[derive(thiserror::Error, Debug)]
pub enum MechServerError {
    #[error("Socket error: {0}")]
    SocketError(#[from] MonitoredSocketError),

    #[error("Could not serialize the response: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not send data to the client: {0}")]
    SendError(zmq::Error),
}

/// What came in on the demands socket.
#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    /// Nothing before the timeout
    None,

    Demands(MechDems),

    /// Something arrived which wasn't a set of demands. It still needs a response.
    Malformed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MechServer {
    /// Create a new instance of the mechanisms server.
    ///
    /// This function will not wait for a connection from the client before returning.
    pub fn new(ctx: &zmq::Context, params: &MechExecParams) -> Result<Self, MechServerError> {
        // Create the socket options
        let dems_socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            recv_timeout: params.demands_timeout_ms,
            send_timeout: 10,
            ..Default::default()
        };

        // Create the socket
        let dems_socket = MonitoredSocket::new(
            ctx,
            zmq::REP,
            dems_socket_options,
            &params.demands_endpoint,
        )?;

        Ok(Self { dems_socket })
    }

    /// Retrieve a set of demands from the client.
    ///
    /// Unless [`Request::None`] is returned the user MUST call [`MechServer::send_dems_response`]
    /// at the earliest opportunity in order to notify the client.
    pub fn get_demands(&mut self) -> Request {
        match self.dems_socket.recv_msg(0) {
            Ok(m) => parse_request(m.as_str().unwrap_or("")),
            Err(zmq::Error::EAGAIN) => Request::None,
            Err(e) => {
                warn!("Could not read from demands socket: {}", e);
                Request::None
            }
        }
    }

    /// Send a response to the client based on the recieved demands.
    pub fn send_dems_response(
        &mut self,
        response: &MechDemsResponse,
    ) -> Result<(), MechServerError> {
        // Serialize response
        let resp_str =
            serde_json::to_string(response).map_err(MechServerError::SerializationError)?;

        trace!("Responding {}", resp_str);

        // Send response
        self.dems_socket
            .send(&resp_str, 0)
            .map_err(MechServerError::SendError)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn parse_request(msg: &str) -> Request {
    match serde_json::from_str(msg) {
        Ok(d) => Request::Demands(d),
        Err(e) => {
            warn!("Could not deserialize demands: {}", e);
            Request::Malformed
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
    fn test_parse_request() {
        assert_eq!(
            parse_request(r#"{"duty":[1,2,3,-4]}"#),
            Request::Demands(MechDems::new([1, 2, 3, -4]))
        );
        assert_eq!(parse_request("stop"), Request::Malformed);
        assert_eq!(parse_request(""), Request::Malformed);
    }
}
