//! Main rover-side executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise all modules
//!     - Start the background threads:
//!         - Publisher, drains the telemetry queue at the provider's rate limit
//!         - Telecommand client, applies operator commands as they arrive
//!     - Main loop (see `rover::Rover::tick`):
//!         - Scripted commands
//!         - Sensor acquisition
//!         - Drive mode processing
//!         - Status and telemetry
//!     - Shutdown (see `supervisor::Supervisor::shutdown`)
//!
//! # Modules
//!
//! All cyclic modules (e.g. `drive`) shall meet the following requirements:
//!     1. Provide a public struct implementing the `util::module::State` trait.

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

#[cfg(feature = "mech")]
use rov_lib::mech_client::MechClient;
use rov_lib::{
    actuator::{Actuator, MotorOutput, SimActuator},
    arbiter::Arbiter,
    drive::DriveCtrl,
    params::{auto_resume_override, ActuatorKind, Credentials, RovExecParams, SensorKind},
    publisher::RateLimitedPublisher,
    rover::Rover,
    sensors::SensorSuite,
    supervisor::{RunEnd, ShutdownGuard, Supervisor},
    tc_client::TcClient,
    telemetry::{offline_msg, AuditLog, StatusReporter, TelemetryLogger},
};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, info, warn};
use std::env;
use std::sync::Arc;

// Internal
use comms_if::{
    feeds::{FeedNamer, FeedTable},
    net::{
        pubsub::{ZmqPublisher, ZmqSubscriber},
        zmq,
    },
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    script_interpreter::ScriptInterpreter,
    session::Session,
    time::{Clock, SystemClock},
};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session =
        Session::new("rov_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("SmartPath Rover Executable\n");
    info!("Running on: {}", host::get_hostname());
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut params: RovExecParams =
        util::params::load("rov_exec.toml").wrap_err("Could not load rov_exec params")?;
    params
        .validate()
        .wrap_err("Invalid rov_exec parameters")?;

    let creds = Credentials::from_env().wrap_err("Operator credentials are not set")?;
    if let Some(auto_resume) = auto_resume_override(|k| env::var(k).ok()) {
        info!("Emergency auto-resume overridden from the environment: {}", auto_resume);
        params.emergency_auto_resume = auto_resume;
    }

    info!("Exec parameters loaded");
    debug!("{:#?}", params);

    // ---- COMMAND SOURCE ----

    // Collect all arguments
    let args: Vec<String> = env::args().collect();

    debug!("CLI arguments: {:?}", args);

    // If we have a single argument use it as the script path
    let script = match args.len() {
        1 => None,
        2 => {
            info!("Loading script from \"{}\"", &args[1]);
            Some(ScriptInterpreter::new(&args[1]).wrap_err("Failed to load script")?)
        }
        _ => {
            return Err(eyre!(
                "Expected at most one argument (a script path), got {:?}",
                &args[1..]
            ))
        }
    };

    // ---- INITIALISE NETWORK ----

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let zmq_ctx = zmq::Context::new();

    let feeds = Arc::new(FeedTable::new(
        &FeedNamer::new(&creds.username, &creds.prefix),
        &params.feeds,
    ));

    // ---- INITIALISE ACTUATOR ----

    let actuator = init_actuator(&params, &zmq_ctx)?;
    let output = MotorOutput::new(actuator, params.forward_sign, params.settle(), clock.clone());

    // ---- INITIALISE PUBLISHER AND ARCHIVES ----

    let transport = ZmqPublisher::new(
        &zmq_ctx,
        &params.net,
        &params.net.tm_endpoint,
        Some(offline_msg(&feeds.heartbeat)),
    )
    .wrap_err("Failed to create the telemetry publisher")?;
    let publisher = Arc::new(RateLimitedPublisher::new(
        Box::new(transport),
        params.publisher(),
        clock.clone(),
    ));

    let telemetry = Arc::new(
        TelemetryLogger::new(
            &session.arch_root,
            params.telemetry_interval_s,
            params.archive_retry(),
            clock.clone(),
        )
        .wrap_err("Failed to start the telemetry archive")?,
    );
    let audit = Arc::new(
        AuditLog::new(
            &session.arch_root,
            params.archive_retry(),
            clock.clone(),
            publisher.clone(),
            &feeds.status,
        )
        .wrap_err("Failed to start the audit log")?,
    );

    // ---- INITIALISE ARBITER AND SUPERVISOR ----

    let arbiter = Arc::new(Arbiter::new(params.arbiter(), output).with_sink(audit.clone()));

    let supervisor = Arc::new(
        Supervisor::new(
            arbiter.clone(),
            publisher.clone(),
            offline_msg(&feeds.heartbeat),
            params.supervisor(),
            clock.clone(),
        )
        .with_telemetry(telemetry.clone()),
    );
    supervisor.add_archive(telemetry.clone());
    supervisor.add_archive(audit);

    // From here on every exit path goes through the shutdown sequence
    let _guard = ShutdownGuard::new(supervisor.clone());

    let signal_supervisor = supervisor.clone();
    ctrlc::set_handler(move || {
        signal_supervisor.shutdown("interrupted");
    })
    .wrap_err("Failed to install the interrupt handler")?;

    // ---- START BACKGROUND THREADS ----

    supervisor.add_thread(
        publisher
            .spawn(supervisor.stop_flag())
            .wrap_err("Failed to start the publisher thread")?,
    );

    if script.is_none() {
        let credentials = if params.net.plain_auth {
            Some((creds.username.clone(), creds.key.clone()))
        } else {
            None
        };

        let subscriber = ZmqSubscriber::new(
            &zmq_ctx,
            &params.net,
            &params.net.cmd_endpoint,
            credentials,
        )
        .wrap_err("Failed to create the command subscriber")?;

        let tc_client = TcClient::new(
            Box::new(subscriber),
            feeds.clone(),
            params.sensors == SensorKind::Remote,
        )
        .wrap_err("Failed to subscribe to the command feeds")?;

        supervisor.add_thread(
            tc_client
                .spawn(arbiter.clone(), clock.clone(), supervisor.stop_flag())
                .wrap_err("Failed to start the telecommand client thread")?,
        );
    }

    // ---- INITIALISE CONTROL CYCLE ----

    let mut drive = DriveCtrl::default();
    drive
        .init(params.drive())
        .wrap_err("Failed to initialise the drive engine")?;

    let mut rover = Rover::new(
        arbiter,
        drive,
        SensorSuite::from_kind(params.sensors),
        StatusReporter::new(publisher, &feeds, params.status()),
        telemetry,
        clock,
    );
    if let Some(si) = script {
        rover = rover.with_script(si);
    }

    rover.announce_online();

    // ---- MAIN LOOP ----

    let end = supervisor.run(|| rover.tick());

    // ---- SHUTDOWN ----

    let reason = match end {
        RunEnd::EndOfScript => "end of script",
        RunEnd::Stopped => "stop requested",
    };
    if !supervisor.shutdown(reason) {
        warn!("Shutdown was already carried out");
    }

    info!("End of execution");

    Ok(())
}

/// Create the configured actuator.
fn init_actuator(
    params: &RovExecParams,
    _zmq_ctx: &zmq::Context,
) -> Result<Arc<dyn Actuator>, Report> {
    match params.actuator {
        #[cfg(feature = "mech")]
        ActuatorKind::Mech => {
            let client = MechClient::new(_zmq_ctx, &params.net)
                .wrap_err("Failed to connect to the mechanisms server")?;
            Ok(Arc::new(client))
        }
        #[cfg(not(feature = "mech"))]
        ActuatorKind::Mech => Err(eyre!(
            "The mech actuator was requested but rov_exec was built without the mech feature"
        )),
        ActuatorKind::Sim => {
            info!("Using the simulated actuator");
            Ok(Arc::new(SimActuator::new()))
        }
    }
}
