//! # Mechanisms Client
//!
//! This module provides networking abstractions to connect to the mechanisms server, which owns
//! the motor driver board. The client is the production [`Actuator`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use std::sync::{Mutex, PoisonError};

use comms_if::{
    eqpt::mech::{MechDems, MechDemsResponse},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

use crate::actuator::{Actuator, ActuatorError, Duties};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct MechClient {
    /// Demands socket, `None` once the client has been closed
    dems_socket: Mutex<Option<MonitoredSocket>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MechClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The client is not connected to the server")]
    NotConnected,

    #[error("Could not send demands to the server: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the data: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the server: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The server rejected the demands: {0:?}")]
    Rejected(MechDemsResponse),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MechClient {
    /// Create a new instance of the mechanisms client.
    ///
    /// Blocks until the server is reached or the connect timeout expires.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, MechClientError> {
        // Create the socket options
        let dems_socket_options = SocketOptions {
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 10,
            send_timeout: 10,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        // Create the socket
        let dems_socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            dems_socket_options,
            &params.mech_dems_endpoint,
        )
        .map_err(MechClientError::SocketError)?;

        info!("Connected to mechanisms server at {}", params.mech_dems_endpoint);

        Ok(Self {
            dems_socket: Mutex::new(Some(dems_socket)),
        })
    }

    /// Send demands to the server.
    ///
    /// If the server acknowledges the demands within the configured timeout then `Ok()` is
    /// returned, otherwise an `Err()` is returned.
    fn send_demands(
        socket: &MonitoredSocket,
        demands: &MechDems,
    ) -> Result<(), MechClientError> {
        // If not connected return now
        if !socket.connected() {
            return Err(MechClientError::NotConnected);
        }

        // Serialize the demands
        let dems_str =
            serde_json::to_string(demands).map_err(MechClientError::SerializationError)?;

        // Send the demands to the server
        socket
            .send(&dems_str, 0)
            .map_err(MechClientError::SendError)?;

        // Recieve response back from the server
        let msg = socket.recv_msg(0).map_err(MechClientError::RecvError)?;

        check_response(msg.as_str().unwrap_or(""))
    }
}

impl Actuator for MechClient {
    fn set_motor_duty(&self, duties: Duties) -> Result<(), ActuatorError> {
        let guard = self
            .dems_socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let socket = guard.as_ref().ok_or(ActuatorError::Closed)?;

        Self::send_demands(socket, &MechDems::new(duties))
            .map_err(|e| ActuatorError::Fault(e.to_string()))
    }

    fn close(&self) -> Result<(), ActuatorError> {
        let socket = self
            .dems_socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        // Dropping the socket stops its monitor
        match socket {
            Some(s) => {
                drop(s);
                info!("Mechanisms client closed");
            }
            None => debug!("Mechanisms client already closed"),
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Interpret the server's reply to a demand.
fn check_response(response: &str) -> Result<(), MechClientError> {
    let response: MechDemsResponse =
        serde_json::from_str(response).map_err(MechClientError::DeserializeError)?;

    match response {
        MechDemsResponse::DemsOk => Ok(()),
        r => Err(MechClientError::Rejected(r)),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_check_response() {
        assert!(check_response(r#""DemsOk""#).is_ok());
        assert!(matches!(
            check_response(r#""DemsInvalid""#),
            Err(MechClientError::Rejected(MechDemsResponse::DemsInvalid))
        ));
        assert!(matches!(
            check_response(r#""EqptInvalid""#),
            Err(MechClientError::Rejected(MechDemsResponse::EqptInvalid))
        ));
        assert!(matches!(
            check_response("garbage"),
            Err(MechClientError::DeserializeError(_))
        ));
    }

    #[test]
    fn test_closed_client_refuses_writes() {
        let client = MechClient {
            dems_socket: Mutex::new(None),
        };

        assert!(matches!(
            client.set_motor_duty([0; 4]),
            Err(ActuatorError::Closed)
        ));
        assert!(client.close().is_ok());
    }
}
