//! Print every message the vehicle publishes
//!
//! Usage: `feed_monitor <endpoint> <topic>...`. With no topics every message is printed.

use chrono::Local;
use comms_if::net::{MonitoredSocket, SocketOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        println!("Usage: feed_monitor <endpoint> <topic>...");
        return Ok(());
    }

    // Create context
    let ctx = zmq::Context::new();

    // Create socket options
    let socket_options = SocketOptions {
        block_on_first_connect: false,
        ..Default::default()
    };

    // Create socket
    let socket = MonitoredSocket::new(&ctx, zmq::SUB, socket_options, &args[1])?;

    // Subscribe to the requested topics, or everything
    if args.len() == 2 {
        socket.set_subscribe(b"")?;
    }
    for topic in &args[2..] {
        socket.set_subscribe(topic.as_bytes())?;
    }

    // Recieve messages from the vehicle
    loop {
        let frames = socket.recv_multipart(0)?;

        let text: Vec<String> = frames
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect();

        println!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), text.join(" | "));
    }
}
