//! Broker process entry point.
//!
//! Replaces the teacher's `#[no_mangle] extern "C"` FFI exports (this core
//! has no embedding use case — it is a standalone network service) with a
//! conventional binary reading its configuration file and two startup
//! parameters: the producer/controller port and the raft port.

use std::env;
use std::process;

use partbroker::broker::{Broker, BrokerOptions, ServerState};
use partbroker::config::Config;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        eprintln!(
            "usage: {} <config-file> <port> <raft-port>",
            args.get(0).map(String::as_str).unwrap_or("partbroker")
        );
        process::exit(1);
    }

    let config = match Config::load(&args[1]) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config {}: {}", args[1], err);
            process::exit(1);
        }
    };

    let port: u16 = match args[2].parse() {
        Ok(port) => port,
        Err(_) => {
            eprintln!("invalid port: {}", args[2]);
            process::exit(1);
        }
    };

    let raft_port: u16 = match args[3].parse() {
        Ok(raft_port) => raft_port,
        Err(_) => {
            eprintln!("invalid raft port: {}", args[3]);
            process::exit(1);
        }
    };

    let options = BrokerOptions::from_config(&config, port, raft_port);
    log::info!(
        "starting broker {} on port {} (raft port {})",
        options.broker_id,
        port,
        raft_port
    );

    let broker = Broker::new(options);
    match broker.start() {
        Some(ServerState::Started) => {
            log::info!("broker started");
        }
        other => {
            eprintln!("broker failed to start: {:?}", other);
            process::exit(1);
        }
    }

    // The broker runs on its own background threads; park the main thread.
    loop {
        std::thread::park();
    }
}
