//! # Mechanisms Control Executable
//!
//! This executable is responsible for controlling the mechanisms of the vehicle, which are the
//! four wheel motors.
//!
//! Demands arrive from the rover executable over a request/reply socket and are answered one for
//! one. If no demand arrives within the demands timeout the motors are stopped (safe mode) until
//! the next valid demand.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Driver used to control the motors.
mod motor_ctrl;

/// Mechanisms server abstraction.
mod mech_server;

/// Parameters for the mechanisms executable.
mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::{eqpt::mech::MechDemsResponse, net::zmq};
use log::{info, trace, warn};

// Internal
use mech_server::{MechServer, Request};
use motor_ctrl::{MotorCtrl, PwmDriver, SimBoard};
use params::{BoardKind, MechExecParams};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mech_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Mechanisms Control Executable\n");
    info!("Running on: {}", host::get_hostname());
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: MechExecParams =
        util::params::load("mech_exec.toml").wrap_err("Could not load mech_exec params")?;

    info!("Parameters loaded");

    // ---- BOARD INITIALISATION ----

    match params.board {
        BoardKind::Pca9685 => run_pca9685(&params),
        BoardKind::Sim => {
            info!("Using the simulated driver board");
            run(&params, SimBoard::new())
        }
    }
}

#[cfg(all(target_arch = "arm", target_os = "linux"))]
fn run_pca9685(params: &MechExecParams) -> Result<()> {
    let board = motor_ctrl::pca9685::open(params.i2c_address, params.prescale)
        .wrap_err("Failed to open the PCA9685 board")?;

    run(params, board)
}

#[cfg(not(all(target_arch = "arm", target_os = "linux")))]
fn run_pca9685(_params: &MechExecParams) -> Result<()> {
    Err(color_eyre::eyre::eyre!(
        "The PCA9685 board is only available on the Raspberry Pi, use board = \"sim\""
    ))
}

/// Serve demands until the process is killed.
fn run<D: PwmDriver>(params: &MechExecParams, driver: D) -> Result<()> {
    let mut ctrl =
        MotorCtrl::new(driver, params.channels).wrap_err("Failed to stop the motors")?;

    // ---- SERVER INITIALISATION ----

    let ctx = zmq::Context::new();
    let mut server = MechServer::new(&ctx, params).wrap_err("Failed to initialise server")?;

    info!("Server initialised");

    // ---- MAIN LOOP ----

    info!("Initialisation complete, entering main loop in safe mode");

    loop {
        // Get demands from client
        let response = match server.get_demands() {
            Request::Demands(d) => {
                trace!("Recieved demands {:?}", d.duty);
                ctrl.handle_demands(&d)
            }
            Request::Malformed => MechDemsResponse::DemsInvalid,
            Request::None => {
                ctrl.enter_safe_mode();
                continue;
            }
        };

        // Send response to client
        if let Err(e) = server.send_dems_response(&response) {
            warn!("Couldn't send response to client: {}", e);
            ctrl.enter_safe_mode();
        }
    }
}
