//! Send a single telecommand to the vehicle
//!
//! Usage: `send_tc <bind endpoint> <topic> <payload>`, for example
//! `send_tc tcp://*:5020 alice/feeds/smartpath.robot.speed 40`.

use comms_if::net::{pubsub::ZmqPublisher, Message, NetParams, Publisher, CloseMode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() != 4 {
        println!("Usage: send_tc <bind endpoint> <topic> <payload>");
        return Ok(());
    }

    // Create zmq context
    let ctx = zmq::Context::new();

    let mut publisher = ZmqPublisher::new(&ctx, &NetParams::default(), &args[1], None)?;

    println!("Publisher open on {}, waiting for subscribers", args[1]);

    // PUB sockets drop messages for subscribers that haven't finished connecting
    std::thread::sleep(std::time::Duration::from_millis(1000));

    publisher.publish(&Message::new(&args[2], &args[3]))?;
    println!("Sent {} -> {}", args[2], args[3]);

    publisher.close(CloseMode::Clean)?;

    Ok(())
}
